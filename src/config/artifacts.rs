//! Model artifact locations

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where the graph, weights and labels come from and where they are stored
///
/// URLs may be `http(s)://`, `file://`, `hf://<owner>/<repo>/<file>` or a
/// plain local path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Local directory artifacts are provisioned into
    #[serde(default = "default_artifact_dir")]
    pub dir: PathBuf,

    #[serde(default)]
    pub graph_url: String,

    #[serde(default)]
    pub weights_url: String,

    #[serde(default)]
    pub labels_url: String,
}

/// `$BATCHR_ARTIFACT_DIR`, falling back to `./artifacts`
pub fn default_artifact_dir() -> PathBuf {
    std::env::var("BATCHR_ARTIFACT_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./artifacts"))
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: default_artifact_dir(),
            graph_url: String::new(),
            weights_url: String::new(),
            labels_url: String::new(),
        }
    }
}

impl ArtifactConfig {
    /// The three required artifacts as `(role, url)`, in graph, weights, labels order
    pub fn required(&self) -> [(&'static str, &str); 3] {
        [
            ("graph", &self.graph_url),
            ("weights", &self.weights_url),
            ("labels", &self.labels_url),
        ]
    }
}
