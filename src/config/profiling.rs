//! Profiling and output settings

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Profiling around the forward pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilingConfig {
    /// Record per-operator timings
    #[serde(default)]
    pub operators: bool,

    /// Attach the device activity tracer when running on CUDA
    #[serde(default = "default_true")]
    pub device_activity: bool,

    /// Write operator timings as a Chrome trace to this file
    #[serde(default)]
    pub trace_output: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self {
            operators: false,
            device_activity: true,
            trace_output: None,
        }
    }
}

/// How predictions are reported
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Prediction output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Ranked entries reported per image
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default)]
    pub format: OutputFormat,
}

fn default_top_k() -> usize {
    1
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            format: OutputFormat::default(),
        }
    }
}
