//! Devices an [`Array`](super::Array) can live on.
//!
//! # ML Context
//!
//! In data-parallel training every replica of a model owns its parameters on
//! its own device, and inputs must be moved to that device before the forward
//! pass. Arithmetic between arrays on different devices is rejected: the caller
//! has to issue an explicit transfer (`to_device`), which is where device-to-device
//! synchronization happens.

use crate::error::{Error, Result};
use std::fmt;

/// A physical memory domain.
///
/// `Cpu` is host memory. `Gpu(id)` is an accelerator identified by its ordinal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Device {
    #[default]
    Cpu,
    Gpu(u32),
}

impl Device {
    /// Maps an integer device id to a device.
    ///
    /// Negative ids denote host memory, non-negative ids an accelerator ordinal.
    ///
    /// ```rust
    /// use dptrain::array::Device;
    /// assert_eq!(Device::from_id(-1).unwrap(), Device::Cpu);
    /// assert_eq!(Device::from_id(2).unwrap(), Device::Gpu(2));
    /// assert!(Device::from_id(1 << 40).is_err());
    /// ```
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if the ordinal does not fit in a `u32`.
    pub fn from_id(id: i64) -> Result<Self> {
        if id < 0 {
            return Ok(Device::Cpu);
        }
        u32::try_from(id)
            .map(Device::Gpu)
            .map_err(|_| Error::InvalidArgument(format!("device id {} is out of range", id)))
    }

    /// Returns `true` for host memory.
    pub fn is_cpu(&self) -> bool {
        matches!(self, Device::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Gpu(id) => write!(f, "gpu:{}", id),
        }
    }
}

/// Memory layout of an array.
///
/// `Native` marks arrays already converted to the accelerated backend's own
/// format; the capability gate routes them straight to native kernels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Layout {
    #[default]
    Generic,
    Native,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_display() {
        assert_eq!(Device::Cpu.to_string(), "cpu");
        assert_eq!(Device::Gpu(3).to_string(), "gpu:3");
    }

    #[test]
    fn test_device_from_id() {
        assert_eq!(Device::from_id(-1).unwrap(), Device::Cpu);
        assert_eq!(Device::from_id(0).unwrap(), Device::Gpu(0));
        assert_eq!(Device::from_id(i64::from(u32::MAX)).unwrap(), Device::Gpu(u32::MAX));
        assert!(matches!(
            Device::from_id(i64::from(u32::MAX) + 1),
            Err(Error::InvalidArgument(_))
        ));
        assert!(Device::default().is_cpu());
        assert!(!Device::Gpu(0).is_cpu());
    }

    #[test]
    fn test_device_ordering() {
        let mut devices = vec![Device::Gpu(1), Device::Cpu, Device::Gpu(0)];
        devices.sort();
        assert_eq!(devices, vec![Device::Cpu, Device::Gpu(0), Device::Gpu(1)]);
    }
}
