//! Artifact provisioning
//!
//! Fetches the model graph, weights and label file into a local directory.
//! Fetching is idempotent: a non-empty file already at the destination is
//! returned as is, without touching the source.

mod source;

pub use source::Source;

use std::fs::File;
use std::path::{Path, PathBuf};

use hf_hub::api::sync::Api;

use crate::config::ArtifactConfig;
use crate::error::{BatchrError, BatchrResult};

/// Moves an artifact's bytes from its source to a local file
pub trait Transport: Send + Sync {
    /// Write the content of `source` to `dest`, returning the bytes written
    fn download(&self, source: &Source, dest: &Path) -> BatchrResult<u64>;
}

/// HTTP via `ureq`, the HuggingFace Hub via `hf-hub`, local files by copy
#[derive(Debug, Default, Clone)]
pub struct DefaultTransport;

impl Transport for DefaultTransport {
    fn download(&self, source: &Source, dest: &Path) -> BatchrResult<u64> {
        let location = source.to_string();
        match source {
            Source::Http(url) => {
                let response = ureq::get(url)
                    .call()
                    .map_err(|e| BatchrError::artifact_fetch(&location, e))?;
                let mut reader = response.into_reader();
                let mut file = File::create(dest)?;
                Ok(std::io::copy(&mut reader, &mut file)?)
            }
            Source::File(path) => std::fs::copy(path, dest)
                .map_err(|e| BatchrError::artifact_fetch(&location, e)),
            Source::HuggingFace { repo, file } => {
                let api = Api::new().map_err(|e| BatchrError::artifact_fetch(&location, e))?;
                let cached = api
                    .model(repo.clone())
                    .get(file)
                    .map_err(|e| BatchrError::artifact_fetch(&location, e))?;
                Ok(std::fs::copy(&cached, dest)?)
            }
        }
    }
}

/// Local paths of the three required artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    pub graph: PathBuf,
    pub weights: PathBuf,
    pub labels: PathBuf,
}

/// Fetches artifacts into one directory
#[derive(Debug, Clone)]
pub struct Provisioner<T: Transport = DefaultTransport> {
    dir: PathBuf,
    transport: T,
}

impl Provisioner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_transport(dir, DefaultTransport)
    }
}

impl<T: Transport> Provisioner<T> {
    pub fn with_transport(dir: impl Into<PathBuf>, transport: T) -> Self {
        Self {
            dir: dir.into(),
            transport,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Local path `location` is (or would be) provisioned to
    pub fn destination(&self, location: &str) -> BatchrResult<PathBuf> {
        let source = Source::parse(location)?;
        let name = source
            .file_name()
            .ok_or_else(|| BatchrError::artifact_fetch(location, "location has no file name"))?;
        Ok(self.dir.join(name))
    }

    /// Fetch `location` into the artifact directory and return its local path
    pub fn fetch(&self, location: &str) -> BatchrResult<PathBuf> {
        let source = Source::parse(location)?;
        let dest = self.destination(location)?;
        if is_present(&dest) {
            tracing::debug!("{} already present at {}", source, dest.display());
            return Ok(dest);
        }

        std::fs::create_dir_all(&self.dir).map_err(|e| BatchrError::artifact_fetch(location, e))?;
        let mut part = dest.clone().into_os_string();
        part.push(".part");
        let part = PathBuf::from(part);

        tracing::info!("Downloading {} -> {}", source, dest.display());
        let written = self
            .transport
            .download(&source, &part)
            .and_then(|bytes| {
                if bytes == 0 {
                    return Err(BatchrError::artifact_fetch(location, "empty artifact"));
                }
                std::fs::rename(&part, &dest)?;
                Ok(bytes)
            })
            .map_err(|e| {
                let _ = std::fs::remove_file(&part);
                match e {
                    BatchrError::ArtifactFetch { .. } => e,
                    other => BatchrError::artifact_fetch(location, other),
                }
            })?;

        tracing::info!("Fetched {} ({} bytes)", dest.display(), written);
        Ok(dest)
    }

    /// Fetch graph, weights and labels one after another
    pub fn fetch_all(&self, config: &ArtifactConfig) -> BatchrResult<Artifacts> {
        Ok(Artifacts {
            graph: self.fetch(&config.graph_url)?,
            weights: self.fetch(&config.weights_url)?,
            labels: self.fetch(&config.labels_url)?,
        })
    }
}

fn is_present(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}
