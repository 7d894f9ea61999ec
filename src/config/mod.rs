//! Configuration system for batchr
//!
//! A single [`BatchrConfig`] is built at process entry (file first, CLI flags
//! on top) and passed by reference into the pipeline.

mod artifacts;
mod inference;
mod input;
mod profiling;

pub use artifacts::{default_artifact_dir, ArtifactConfig};
pub use inference::{DevicePreference, InferenceConfig};
pub use input::{DecodeFailurePolicy, InputConfig, Normalization, ResizeFilter};
pub use profiling::{OutputConfig, OutputFormat, ProfilingConfig};

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BatchrError, BatchrResult};
use crate::provision::Source;

/// Batchr configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchrConfig {
    /// Graph, weights and label sources
    #[serde(default)]
    pub artifacts: ArtifactConfig,

    /// Device, batch and input binding
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Image directory and preprocessing
    #[serde(default)]
    pub input: InputConfig,

    #[serde(default)]
    pub profiling: ProfilingConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

impl BatchrConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> BatchrResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        serde_yaml::from_str(&content).map_err(|e| BatchrError::Config(e.to_string()))
    }

    /// Load configuration from a JSON file
    pub fn from_json<P: AsRef<Path>>(path: P) -> BatchrResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&content).map_err(|e| BatchrError::Config(e.to_string()))
    }

    /// Load configuration, picking the parser from the file extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> BatchrResult<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(path),
            Some("yaml") | Some("yml") => Self::from_yaml(path),
            other => Err(BatchrError::Config(format!(
                "unsupported config format: {}",
                other.unwrap_or("<none>")
            ))),
        }
    }

    /// Check the settings the pipeline relies on
    pub fn validate(&self) -> BatchrResult<()> {
        let inference = &self.inference;
        if inference.batch_size == 0 {
            return Err(BatchrError::Config("batch_size must be at least 1".into()));
        }
        if !matches!(inference.channels, 1 | 3) {
            return Err(BatchrError::Config(format!(
                "channels must be 1 or 3, got {}",
                inference.channels
            )));
        }
        if inference.height == 0 || inference.width == 0 {
            return Err(BatchrError::Config(
                "input height and width must be non-zero".into(),
            ));
        }
        if self.input.extensions.is_empty() {
            return Err(BatchrError::Config(
                "at least one image extension is required".into(),
            ));
        }
        if let Some(norm) = &self.input.normalization {
            let channels = inference.channels;
            let std_len = norm.std.as_ref().map_or(channels, Vec::len);
            if norm.mean.len() != channels || std_len != channels {
                return Err(BatchrError::Config(format!(
                    "normalization needs {channels} mean/std values"
                )));
            }
            if norm.std.iter().flatten().any(|s| *s == 0.0) {
                return Err(BatchrError::Config(
                    "normalization std values must be non-zero".into(),
                ));
            }
        }
        if self.output.top_k == 0 {
            return Err(BatchrError::Config("top_k must be at least 1".into()));
        }
        Ok(())
    }

    /// Check that every required artifact has a source and its own local file
    pub fn validate_artifacts(&self) -> BatchrResult<()> {
        let mut stored: HashMap<String, &str> = HashMap::new();
        for (role, url) in self.artifacts.required() {
            if url.trim().is_empty() {
                return Err(BatchrError::Config(format!(
                    "artifacts.{role}_url is not set"
                )));
            }
            let name = Source::parse(url)?.file_name().ok_or_else(|| {
                BatchrError::Config(format!("artifacts.{role}_url does not name a file"))
            })?;
            if let Some(other) = stored.insert(name.clone(), role) {
                return Err(BatchrError::Config(format!(
                    "artifacts.{other}_url and artifacts.{role}_url both store '{name}'"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batchr_config_yaml() {
        let yaml = r#"
artifacts:
  dir: /tmp/models
  graph_url: https://example.com/squeezenet-graph.json
  weights_url: https://example.com/squeezenet.safetensors
  labels_url: https://example.com/synset.txt

inference:
  device: cuda:1
  batch_size: 4
  height: 32
  width: 32

input:
  dir: ./images
  extensions: [jpg, png]
  on_decode_error: skip
  normalization:
    mean: [123.68, 116.78, 103.94]

profiling:
  operators: true
  trace_output: profile.json

output:
  top_k: 5
  format: json
"#;
        let config: BatchrConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.inference.device, DevicePreference::Cuda(1));
        assert_eq!(config.inference.batch_size, 4);
        assert_eq!(config.inference.input_name, "data");
        assert_eq!(config.inference.input_dims(), [3, 32, 32]);
        assert_eq!(config.input.on_decode_error, DecodeFailurePolicy::Skip);
        assert_eq!(config.input.resize_filter, ResizeFilter::Linear);
        assert!(config.profiling.operators);
        assert!(config.profiling.device_activity);
        assert_eq!(config.output.format, OutputFormat::Json);
        config.validate().unwrap();
        config.validate_artifacts().unwrap();
    }

    #[test]
    fn test_artifacts_need_distinct_file_names() {
        let mut config = BatchrConfig::default();
        config.artifacts.graph_url = "https://example.com/a/model".into();
        config.artifacts.weights_url = "https://example.com/b/model".into();
        config.artifacts.labels_url = "hf://acme/squeezenet/synset.txt".into();
        let err = config.validate_artifacts().unwrap_err();
        assert!(matches!(err, BatchrError::Config(_)));
        assert!(err.to_string().contains("'model'"));

        config.artifacts.weights_url = "https://example.com/b/model.safetensors".into();
        config.validate_artifacts().unwrap();

        config.artifacts.labels_url = "https://example.com/labels/".into();
        assert!(matches!(
            config.validate_artifacts(),
            Err(BatchrError::Config(_))
        ));
    }

    #[test]
    fn test_defaults_match_reference_run() {
        let config = BatchrConfig::default();
        assert_eq!(config.inference.batch_size, 10);
        assert_eq!(config.input.extensions, vec!["jpg".to_string()]);
        assert_eq!(config.input.on_decode_error, DecodeFailurePolicy::FailFast);
        assert_eq!(config.output.top_k, 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = BatchrConfig::default();
        config.inference.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = BatchrConfig::default();
        config.inference.channels = 4;
        assert!(config.validate().is_err());

        let mut config = BatchrConfig::default();
        config.input.normalization = Some(Normalization {
            mean: vec![0.5],
            std: None,
        });
        assert!(config.validate().is_err());

        let mut config = BatchrConfig::default();
        config.input.normalization = Some(Normalization {
            mean: vec![0.0; 3],
            std: Some(vec![1.0, 0.0, 1.0]),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_artifacts_requires_urls() {
        let config = BatchrConfig::default();
        let err = config.validate_artifacts().unwrap_err();
        assert!(err.to_string().contains("graph_url"));
    }

    #[test]
    fn test_from_file_rejects_unknown_extension() {
        assert!(BatchrConfig::from_file("config.toml").is_err());
    }
}
