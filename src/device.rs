//! Device selection
//!
//! One device is picked per run: CUDA device 0 when the host has a usable
//! GPU, the CPU otherwise. An explicit preference from the configuration
//! replaces the automatic policy.

use std::fmt;

use candle_core::Device;
use serde::Serialize;

use crate::config::DevicePreference;
use crate::error::{BatchrError, BatchrResult};

/// Compute device family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    Cuda,
}

/// The device chosen for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceSelection {
    pub kind: DeviceKind,
    /// Device ordinal; always 0 for the CPU
    pub ordinal: usize,
}

impl DeviceSelection {
    pub const CPU: DeviceSelection = DeviceSelection {
        kind: DeviceKind::Cpu,
        ordinal: 0,
    };

    pub fn cuda(ordinal: usize) -> Self {
        Self {
            kind: DeviceKind::Cuda,
            ordinal,
        }
    }

    pub fn is_cuda(&self) -> bool {
        self.kind == DeviceKind::Cuda
    }

    /// Open the device context for this selection
    pub fn open(&self) -> BatchrResult<Device> {
        match self.kind {
            DeviceKind::Cpu => Ok(Device::Cpu),
            DeviceKind::Cuda => Device::new_cuda(self.ordinal).map_err(|e| {
                BatchrError::model_load(&format!("cuda:{} unavailable", self.ordinal), e)
            }),
        }
    }
}

impl fmt::Display for DeviceSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DeviceKind::Cpu => write!(f, "cpu"),
            DeviceKind::Cuda => write!(f, "cuda:{}", self.ordinal),
        }
    }
}

/// Whether this host can run on CUDA device 0
///
/// Requires a build with the `cuda` feature and a device that opens.
pub fn gpu_available() -> bool {
    candle_core::utils::cuda_is_available() && Device::new_cuda(0).is_ok()
}

/// Pick the device for this run
pub fn select_device(preference: &DevicePreference) -> BatchrResult<DeviceSelection> {
    let selection = resolve(preference, gpu_available)?;
    tracing::info!(device = %selection, preference = %preference, "Using device");
    Ok(selection)
}

fn resolve(
    preference: &DevicePreference,
    has_gpu: impl FnOnce() -> bool,
) -> BatchrResult<DeviceSelection> {
    match preference {
        DevicePreference::Auto => {
            if has_gpu() {
                Ok(DeviceSelection::cuda(0))
            } else {
                Ok(DeviceSelection::CPU)
            }
        }
        DevicePreference::Cpu => Ok(DeviceSelection::CPU),
        DevicePreference::Cuda(ordinal) => {
            if candle_core::utils::cuda_is_available() {
                Ok(DeviceSelection::cuda(*ordinal))
            } else {
                Err(BatchrError::ModelLoad(format!(
                    "cuda:{ordinal} requested but CUDA support is not enabled; \
                     rebuild with --features cuda or use --device cpu"
                )))
            }
        }
    }
}
