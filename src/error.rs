//! Error types for the simulation core
//!
//! Host kernels never fail: precondition violations (non-positive spacing,
//! stale relations, mismatched lengths inside a step) are caller bugs and are
//! not checked per particle. Errors only come from setup validation and from
//! the offload device.

use thiserror::Error;

/// Result alias used throughout the crate
pub type SphResult<T> = Result<T, SphError>;

#[derive(Error, Debug)]
pub enum SphError {
    /// No adapter could be found for offloaded execution
    #[error("no compute adapter available: {0}")]
    AdapterUnavailable(String),

    /// The adapter refused to create a device
    #[error("failed to create compute device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    /// The adapter cannot bind as many storage buffers as the kernels need
    #[error("adapter supports {available} storage buffers per shader stage, {required} required")]
    DeviceLimits { available: u32, required: u32 },

    /// Mapping a staging buffer for readback failed
    #[error("device readback of `{label}` failed: {message}")]
    Readback { label: String, message: String },

    /// Waiting for submitted device work failed
    #[error("device poll failed: {0}")]
    DevicePoll(String),

    /// A setting is out of its admissible range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Field arrays of one particle set disagree on length
    #[error("field `{field}` has {actual} entries, expected {expected}")]
    FieldLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl SphError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    pub(crate) fn check_length(field: &'static str, expected: usize, actual: usize) -> SphResult<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::FieldLength {
                field,
                expected,
                actual,
            })
        }
    }
}
