//! Backend selection.
//!
//! Two backends exist for array computation:
//!
//! - [`Backend::Generic`]: the portable loops on [`Array`](crate::array::Array).
//!   Works for every dtype and device.
//! - [`Backend::Accelerated`]: the native kernels from `dptrain-kernels`, used for
//!   host `f32` arrays of supported rank when the [`AccelGate`] allows it.
//!
//! Selection happens per operation in [`dispatch`]; callers never pick a backend
//! themselves.

pub mod dispatch;
pub mod gate;

pub use gate::{AccelGate, AccelPolicy, Availability, DisableGuard, UseLevel};

use crate::array::{ArrayMeta, Layout};
use crate::error::Result;
use std::fmt;

/// Execution backend for one operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Backend {
    #[default]
    Generic,
    Accelerated,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Generic => write!(f, "generic"),
            Backend::Accelerated => write!(f, "accelerated"),
        }
    }
}

/// Ranks the native kernels accept. Empty when the kernels are not compiled in.
pub fn supported_ndims() -> &'static [usize] {
    #[cfg(feature = "accel")]
    {
        &dptrain_kernels::SUPPORTED_NDIMS
    }
    #[cfg(not(feature = "accel"))]
    {
        &[]
    }
}

/// Picks the backend for an operation over `inputs`.
///
/// Without a gate every operation is generic.
pub fn backend_for(gate: Option<&AccelGate>, inputs: &[&dyn ArrayMeta]) -> Result<Backend> {
    let Some(gate) = gate else {
        return Ok(Backend::Generic);
    };
    if gate.all_ready(inputs, supported_ndims())? {
        Ok(Backend::Accelerated)
    } else {
        Ok(Backend::Generic)
    }
}

/// Backend that currently owns the given arrays' buffers.
///
/// Any native input means the result of an operation over them should stay
/// native; otherwise the data is generic.
pub fn array_backend(inputs: &[&dyn ArrayMeta]) -> Backend {
    if inputs.iter().any(|x| x.layout() == Layout::Native) {
        Backend::Accelerated
    } else {
        Backend::Generic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Array;
    use crate::config::Config;
    use std::sync::Arc;

    #[test]
    fn test_backend_for_without_gate() {
        let x = Array::<f32>::zeros(&[2, 2]);
        assert_eq!(backend_for(None, &[&x]).unwrap(), Backend::Generic);
    }

    #[cfg(feature = "accel")]
    #[test]
    fn test_backend_for_follows_gate() {
        let gate = AccelGate::new(
            Availability::detect(),
            true,
            Arc::new(Config::new("auto")),
        );
        let x = Array::<f32>::zeros(&[2, 2]);
        assert_eq!(backend_for(Some(&gate), &[&x]).unwrap(), Backend::Accelerated);

        gate.config().set_use_accel("never");
        assert_eq!(backend_for(Some(&gate), &[&x]).unwrap(), Backend::Generic);
    }

    #[test]
    fn test_array_backend() {
        let x = Array::<f32>::zeros(&[2, 2]);
        let n = Array::<f32>::zeros(&[2, 2]).with_layout(Layout::Native);
        assert_eq!(array_backend(&[&x]), Backend::Generic);
        assert_eq!(array_backend(&[&x, &n]), Backend::Accelerated);
    }

    #[test]
    fn test_gate_unavailable_is_generic() {
        let gate = AccelGate::new(
            Availability::Unavailable {
                reason: "test".into(),
            },
            true,
            Arc::new(Config::new("always")),
        );
        let x = Array::<f32>::zeros(&[2, 2]);
        assert_eq!(backend_for(Some(&gate), &[&x]).unwrap(), Backend::Generic);
    }
}
