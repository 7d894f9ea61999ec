//! Core inference engine
//!
//! This module provides the predictor side of the pipeline:
//! - Graph: the serialized model description
//! - Executor: a predictor session running one forward pass on a device
//! - Profile: scoped profiling around the forward pass

mod executor;
pub mod graph;
pub mod profile;

pub use executor::{InputBinding, PredictorConfig, PredictorSession};
pub use graph::{GraphSpec, Op};
pub use profile::{profiled, DeviceActivityTracer, OpRecorder, OperatorProfiler, ProfileScope};
