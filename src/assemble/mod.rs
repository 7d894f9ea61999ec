//! Image batch assembly
//!
//! Walks an image directory in a stable order, decodes and resizes up to
//! `batch_size` eligible images and concatenates them into one flat
//! `[count, C, H, W]` buffer.

mod convert;

pub use convert::image_to_chw;

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageReader};
use walkdir::WalkDir;

use crate::config::{BatchrConfig, DecodeFailurePolicy, Normalization, ResizeFilter};
use crate::error::{BatchrError, BatchrResult};

/// Settings for one assembly pass
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    pub batch_size: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    /// Accepted extensions, lowercase, without the dot
    pub extensions: Vec<String>,
    pub filter: ResizeFilter,
    pub normalization: Option<Normalization>,
    pub on_decode_error: DecodeFailurePolicy,
}

impl AssemblerConfig {
    pub fn from_config(config: &BatchrConfig) -> Self {
        Self {
            batch_size: config.inference.batch_size,
            channels: config.inference.channels,
            height: config.inference.height,
            width: config.inference.width,
            extensions: config
                .input
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            filter: config.input.resize_filter,
            normalization: config.input.normalization.clone(),
            on_decode_error: config.input.on_decode_error,
        }
    }

    /// Values contributed by one image
    pub fn image_len(&self) -> usize {
        self.channels * self.height * self.width
    }

    fn is_eligible(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }
}

/// A batch buffer holding `count` images, channel-major per image
#[derive(Debug, Clone)]
pub struct Batch {
    data: Vec<f32>,
    paths: Vec<PathBuf>,
    image_len: usize,
}

impl Batch {
    /// Number of images actually accepted
    pub fn count(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Source path of every accepted image, in batch order
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// The flat buffer, exactly `count * C * H * W` long
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn image_len(&self) -> usize {
        self.image_len
    }

    /// Consume the batch into a buffer sized for `batch_size` images.
    ///
    /// Missing slots are zero-filled; they carry no image and must not be
    /// decoded.
    pub fn padded(self, batch_size: usize) -> Vec<f32> {
        let mut data = self.data;
        let full = batch_size * self.image_len;
        if data.len() < full {
            data.resize(full, 0.0);
        }
        data
    }
}

/// Builds a [`Batch`] from a directory of images
#[derive(Debug, Clone)]
pub struct BatchAssembler {
    config: AssemblerConfig,
}

impl BatchAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Assemble up to `batch_size` images found under `dir`.
    ///
    /// Entries are visited recursively, sorted by file name. The root itself,
    /// directories and files with other extensions are skipped.
    pub fn assemble(&self, dir: &Path) -> BatchrResult<Batch> {
        let cfg = &self.config;
        let image_len = cfg.image_len();
        let mut data = Vec::with_capacity(cfg.batch_size * image_len);
        let mut paths = Vec::with_capacity(cfg.batch_size);

        let walk = WalkDir::new(dir)
            .min_depth(1)
            .follow_links(true)
            .sort_by_file_name();
        for entry in walk {
            if paths.len() >= cfg.batch_size {
                break;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    // unreadable entries that could never be images are not our concern
                    let ignorable =
                        err.depth() > 0 && err.path().is_some_and(|p| !cfg.is_eligible(p));
                    if ignorable {
                        tracing::debug!("Ignoring unreadable entry: {}", err);
                        continue;
                    }
                    return Err(std::io::Error::from(err).into());
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() || !cfg.is_eligible(path) {
                continue;
            }

            let img = match decode_image(path) {
                Ok(img) => img,
                Err(source) => match cfg.on_decode_error {
                    DecodeFailurePolicy::FailFast => {
                        return Err(BatchrError::ImageDecode {
                            path: path.to_path_buf(),
                            source,
                        })
                    }
                    DecodeFailurePolicy::Skip => {
                        tracing::warn!("Skipping {}: {}", path.display(), source);
                        continue;
                    }
                },
            };

            let values = image_to_chw(
                &img,
                cfg.channels,
                cfg.height,
                cfg.width,
                cfg.filter,
                cfg.normalization.as_ref(),
            )?;
            data.extend_from_slice(&values);
            paths.push(path.to_path_buf());
            tracing::debug!(
                "Accepted {} ({}x{}) as slot {}",
                path.display(),
                img.width(),
                img.height(),
                paths.len() - 1
            );
        }

        tracing::info!(
            "Assembled {} of {} images from {}",
            paths.len(),
            cfg.batch_size,
            dir.display()
        );

        Ok(Batch {
            data,
            paths,
            image_len,
        })
    }
}

/// Decode by content, not by extension
fn decode_image(path: &Path) -> image::ImageResult<DynamicImage> {
    ImageReader::open(path)?.with_guessed_format()?.decode()
}
