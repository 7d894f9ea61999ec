//! Image input configuration settings

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Interpolation used when resizing images to the model's input size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeFilter {
    Nearest,
    /// Bilinear (triangle) resampling
    #[default]
    Linear,
    Cubic,
    Gaussian,
    Lanczos3,
}

/// What to do when an image in the batch directory cannot be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecodeFailurePolicy {
    /// Abort the whole run
    #[default]
    FailFast,
    /// Log the file and keep filling the batch
    Skip,
}

/// Per-channel normalization applied after resizing
///
/// Each value becomes `(pixel - mean[c]) / std[c]` with pixels in `0..=255`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: Vec<f32>,
    #[serde(default)]
    pub std: Option<Vec<f32>>,
}

/// Image input configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Directory searched (recursively) for images
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    /// Accepted file extensions, without the dot, compared case-insensitively
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    #[serde(default)]
    pub resize_filter: ResizeFilter,

    #[serde(default)]
    pub normalization: Option<Normalization>,

    #[serde(default)]
    pub on_decode_error: DecodeFailurePolicy,
}

fn default_dir() -> PathBuf {
    PathBuf::from("./_fixtures")
}

fn default_extensions() -> Vec<String> {
    vec!["jpg".to_string()]
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            extensions: default_extensions(),
            resize_filter: ResizeFilter::default(),
            normalization: None,
            on_decode_error: DecodeFailurePolicy::default(),
        }
    }
}
