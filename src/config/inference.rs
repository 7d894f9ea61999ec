//! Inference configuration settings

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Device preference for inference
///
/// Accepts "auto", "cpu", "cuda", "gpu" or "cuda:N".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DevicePreference {
    /// CUDA device 0 when a GPU is present, CPU otherwise
    #[default]
    Auto,
    Cpu,
    /// A specific CUDA device ordinal
    Cuda(usize),
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|id| id.parse().ok())
                .map(DevicePreference::Cuda)
                .ok_or_else(|| {
                    format!("unknown device '{s}'; use 'auto', 'cpu', 'cuda' or 'cuda:N'")
                }),
        }
    }
}

impl TryFrom<String> for DevicePreference {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DevicePreference> for String {
    fn from(value: DevicePreference) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevicePreference::Auto => write!(f, "auto"),
            DevicePreference::Cpu => write!(f, "cpu"),
            DevicePreference::Cuda(id) => write!(f, "cuda:{id}"),
        }
    }
}

/// Inference-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Device preference
    #[serde(default)]
    pub device: DevicePreference,

    /// Number of images per forward pass
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Name of the graph input the batch is bound to
    #[serde(default = "default_input_name")]
    pub input_name: String,

    /// Colour planes per image (1 or 3)
    #[serde(default = "default_channels")]
    pub channels: usize,

    /// Input height in pixels
    #[serde(default = "default_side")]
    pub height: usize,

    /// Input width in pixels
    #[serde(default = "default_side")]
    pub width: usize,

    /// Output slot holding the class scores
    #[serde(default)]
    pub output_index: usize,
}

fn default_batch_size() -> usize {
    10
}

fn default_input_name() -> String {
    "data".to_string()
}

fn default_channels() -> usize {
    3
}

fn default_side() -> usize {
    224
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            device: DevicePreference::default(),
            batch_size: default_batch_size(),
            input_name: default_input_name(),
            channels: default_channels(),
            height: default_side(),
            width: default_side(),
            output_index: 0,
        }
    }
}

impl InferenceConfig {
    /// Per-image input shape as `[C, H, W]`
    pub fn input_dims(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }
}
