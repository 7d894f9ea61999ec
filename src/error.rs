//! Error types for the batch pipeline
//!
//! Every stage reports through [`BatchrError`]. Only profiling failures are
//! recoverable; the rest end the run, and `main` maps them to exit codes.

use std::path::PathBuf;

use thiserror::Error;

/// Convenient result alias for pipeline operations.
pub type BatchrResult<T> = Result<T, BatchrError>;

/// Exit status when a required artifact could not be provisioned.
pub const EXIT_ARTIFACT_FETCH: u8 = 2;

/// Exit status for any other fatal pipeline failure.
pub const EXIT_FATAL: u8 = 1;

#[derive(Debug, Error)]
pub enum BatchrError {
    /// A required artifact could not be retrieved or stored.
    #[error("failed to fetch artifact '{url}': {reason}")]
    ArtifactFetch { url: String, reason: String },

    /// An input image could not be read or decoded.
    #[error("failed to decode image '{}': {source}", path.display())]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Graph or weights are malformed, or the device is unavailable.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// The bound buffer does not match the declared input.
    #[error("input '{name}' expects {expected} values, got {actual}")]
    InputShape {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// The forward pass or an output read failed.
    #[error("execution failed: {0}")]
    Execution(String),

    /// A profiling session could not be created. Never fatal.
    #[error("profiling unavailable: {0}")]
    Profiling(String),

    /// The output buffer cannot be split into per-image rows.
    #[error("cannot decode output: {0}")]
    Decode(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BatchrError {
    /// Wraps a tensor runtime error raised while loading the model.
    pub fn model_load(context: &str, err: impl std::fmt::Display) -> Self {
        Self::ModelLoad(format!("{context}: {err}"))
    }

    /// Wraps a tensor runtime error raised during execution.
    pub fn execution(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Execution(format!("{context}: {err}"))
    }

    pub fn artifact_fetch(url: &str, reason: impl std::fmt::Display) -> Self {
        Self::ArtifactFetch {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the run may continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Profiling(_))
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::ArtifactFetch { .. } => EXIT_ARTIFACT_FETCH,
            _ => EXIT_FATAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_profiling_is_recoverable() {
        assert!(BatchrError::Profiling("no cuda".into()).is_recoverable());
        assert!(!BatchrError::Execution("oom".into()).is_recoverable());
        assert!(!BatchrError::ModelLoad("bad graph".into()).is_recoverable());
    }

    #[test]
    fn test_exit_codes() {
        let fetch = BatchrError::artifact_fetch("http://x/y", "404");
        assert_eq!(fetch.exit_code(), EXIT_ARTIFACT_FETCH);
        let shape = BatchrError::InputShape {
            name: "data".into(),
            expected: 10,
            actual: 9,
        };
        assert_eq!(shape.exit_code(), EXIT_FATAL);
        assert_eq!(
            shape.to_string(),
            "input 'data' expects 10 values, got 9"
        );
    }
}
