//! Error type shared by every `dptrain` module.

use crate::array::Device;
use thiserror::Error;

/// Error type for training orchestration.
#[derive(Error, Debug)]
pub enum Error {
    /// A value outside its recognized set (policy, level, construction options).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// Lookup of an unknown optimizer, iterator, observer or serialized entry.
    #[error("Not found: {0}")]
    NotFound(String),
    /// A required entry (usually `"main"`) is absent from a construction map.
    #[error("Missing required key {0:?}")]
    MissingKey(String),
    /// An abstract operation was invoked on a type that does not provide it.
    #[error("Not implemented: {0}")]
    NotImplemented(String),
    /// The shape of the data does not match the expected shape.
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// Operands live on different devices.
    #[error("Device mismatch: expected {expected}, got {got}")]
    DeviceMismatch { expected: Device, got: Device },
    /// A non-repeating iterator has no batches left.
    #[error("Iterator exhausted")]
    StopIteration,
    /// The updater was finalized and cannot run further steps.
    #[error("Updater has already been finalized")]
    Finalized,
    /// A stored record could not be converted back into its value.
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(feature = "accel")]
impl From<dptrain_kernels::KernelError> for Error {
    fn from(e: dptrain_kernels::KernelError) -> Self {
        match e {
            dptrain_kernels::KernelError::ShapeMismatch { expected, got } => {
                Error::ShapeMismatch { expected, got }
            }
        }
    }
}
