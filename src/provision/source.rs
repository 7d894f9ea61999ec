//! Artifact source locations

use std::fmt;
use std::path::PathBuf;

use url::Url;

use crate::error::{BatchrError, BatchrResult};

/// Where an artifact is fetched from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// `http://` or `https://`
    Http(String),
    /// `file://` URL or plain local path
    File(PathBuf),
    /// `hf://<owner>/<repo>/<file>` on the HuggingFace Hub
    HuggingFace { repo: String, file: String },
}

impl Source {
    pub fn parse(location: &str) -> BatchrResult<Self> {
        let location = location.trim();
        if location.is_empty() {
            return Err(BatchrError::artifact_fetch(location, "empty location"));
        }

        let url = match Url::parse(location) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                return Ok(Source::File(PathBuf::from(location)))
            }
            Err(e) => return Err(BatchrError::artifact_fetch(location, e)),
        };

        match url.scheme() {
            "http" | "https" => Ok(Source::Http(url.to_string())),
            "file" => url
                .to_file_path()
                .map(Source::File)
                .map_err(|_| BatchrError::artifact_fetch(location, "not a local file path")),
            "hf" => {
                let owner = url.host_str().unwrap_or_default();
                let mut segments = url
                    .path_segments()
                    .map(|s| s.filter(|p| !p.is_empty()).collect::<Vec<_>>())
                    .unwrap_or_default();
                if owner.is_empty() || segments.len() < 2 {
                    return Err(BatchrError::artifact_fetch(
                        location,
                        "expected hf://<owner>/<repo>/<file>",
                    ));
                }
                let repo = format!("{}/{}", owner, segments.remove(0));
                Ok(Source::HuggingFace {
                    repo,
                    file: segments.join("/"),
                })
            }
            other => Err(BatchrError::artifact_fetch(
                location,
                format!("unsupported scheme '{other}'"),
            )),
        }
    }

    /// Name the artifact is stored under locally
    pub fn file_name(&self) -> Option<String> {
        let name = match self {
            Source::Http(url) => Url::parse(url)
                .ok()?
                .path_segments()?
                .next_back()
                .map(str::to_string),
            Source::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string()),
            Source::HuggingFace { file, .. } => file.rsplit('/').next().map(str::to_string),
        };
        name.filter(|n| !n.is_empty())
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Http(url) => write!(f, "{url}"),
            Source::File(path) => write!(f, "{}", path.display()),
            Source::HuggingFace { repo, file } => write!(f, "hf://{repo}/{file}"),
        }
    }
}
