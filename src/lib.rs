//! Batchr - batch image-classification inference driver
//!
//! Batchr classifies one fixed-size batch of images with a serialized model:
//!
//! - **provision**: fetch graph, weights and labels (idempotent)
//! - **assemble**: decode, resize and pack images into one `[N, C, H, W]` buffer
//! - **device**: pick CPU or CUDA
//! - **engine**: load the graph and run one forward pass, optionally profiled
//! - **decode**: rank each image's scores and attach labels
//!
//! # Example
//!
//! ```bash
//! # Classify up to 10 images with a config file
//! batchr run --config batchr.yaml --images ./photos
//!
//! # Fetch artifacts only
//! batchr pull --config batchr.yaml
//!
//! # Inspect a graph
//! batchr info artifacts/graph.json --weights artifacts/weights.safetensors
//! ```

pub mod assemble;
pub mod cli;
pub mod config;
pub mod decode;
pub mod device;
pub mod engine;
pub mod error;
pub mod provision;

// Re-export key types
pub use assemble::{Batch, BatchAssembler};
pub use config::BatchrConfig;
pub use decode::{decode_batch, LabelTable, Prediction};
pub use device::{select_device, DeviceSelection};
pub use engine::{PredictorConfig, PredictorSession};
pub use error::{BatchrError, BatchrResult};
pub use provision::Provisioner;
