//! Capability gate for the accelerated backend.
//!
//! Every accelerated operator asks the gate before leaving the generic array path.
//! The gate combines three things:
//!
//! 1. **Availability**: detected once when the gate is built (is the native backend
//!    compiled in, and which version).
//! 2. **Enabled flag**: the master switch, which can be turned off temporarily
//!    with [`AccelGate::scoped_disable`].
//! 3. **Policy**: the live `use_accel` value of the shared [`Config`], matched
//!    against the level the operator asks for.
//!
//! | policy \ level | `==always` | `>=auto` |
//! |---|---|---|
//! | `always` | true | true |
//! | `auto` | false | true |
//! | `never` | false | false |
//!
//! The enabled flag is process-wide state shared through `Arc<AccelGate>`.
//! Scoped disabling nests like a stack; concurrent toggling from independent
//! call sites is not coordinated and assumes a single writer at a time.

use crate::array::{ArrayMeta, DType, Layout};
use crate::config::{accel_switch_from_env, Config};
use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Result of probing for the native backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Availability {
    Available { version: u32 },
    Unavailable { reason: String },
}

impl Availability {
    /// Detects the backend compiled into this build.
    pub fn detect() -> Self {
        #[cfg(feature = "accel")]
        {
            Availability::Available {
                version: dptrain_kernels::VERSION,
            }
        }
        #[cfg(not(feature = "accel"))]
        {
            Availability::Unavailable {
                reason: "built without the `accel` feature".into(),
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available { .. })
    }

    /// Installed version, `0` when unavailable.
    pub fn version(&self) -> u32 {
        match self {
            Availability::Available { version } => *version,
            Availability::Unavailable { .. } => 0,
        }
    }
}

/// Level an operator requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UseLevel {
    /// `"==always"`: only when the policy is `always`.
    Always,
    /// `">=auto"`: when the policy is `auto` or `always`.
    Auto,
}

impl FromStr for UseLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "==always" => Ok(UseLevel::Always),
            ">=auto" => Ok(UseLevel::Auto),
            other => Err(Error::InvalidArgument(format!(
                "invalid accel use level: {:?} (must be either of \"==always\" or \">=auto\")",
                other
            ))),
        }
    }
}

impl fmt::Display for UseLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UseLevel::Always => write!(f, "==always"),
            UseLevel::Auto => write!(f, ">=auto"),
        }
    }
}

/// Configured policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccelPolicy {
    Always,
    Auto,
    Never,
}

impl FromStr for AccelPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "always" => Ok(AccelPolicy::Always),
            "auto" => Ok(AccelPolicy::Auto),
            "never" => Ok(AccelPolicy::Never),
            other => Err(Error::InvalidArgument(format!(
                "invalid use_accel configuration: {:?} (must be either of \"always\", \"auto\", or \"never\")",
                other
            ))),
        }
    }
}

impl UseLevel {
    /// The decision table.
    pub fn permits(self, policy: AccelPolicy) -> bool {
        match (self, policy) {
            (_, AccelPolicy::Always) => true,
            (UseLevel::Auto, AccelPolicy::Auto) => true,
            (UseLevel::Always, AccelPolicy::Auto) => false,
            (_, AccelPolicy::Never) => false,
        }
    }
}

/// Decides per operation whether to route to the accelerated backend.
#[derive(Debug)]
pub struct AccelGate {
    availability: Availability,
    enabled: AtomicBool,
    config: Arc<Config>,
}

impl AccelGate {
    /// Builds a gate. It starts enabled only if the backend is available and
    /// the master switch is on.
    pub fn new(availability: Availability, switch_on: bool, config: Arc<Config>) -> Self {
        let enabled = availability.is_available() && switch_on;
        match &availability {
            Availability::Available { version } => {
                tracing::info!(version, enabled, "accelerated backend available")
            }
            Availability::Unavailable { reason } => {
                tracing::info!(%reason, "accelerated backend unavailable")
            }
        }
        Self {
            availability,
            enabled: AtomicBool::new(enabled),
            config,
        }
    }

    /// Detects the backend and reads the master switch from `DPTRAIN_ACCEL`.
    pub fn from_env(config: Arc<Config>) -> Self {
        Self::new(Availability::detect(), accel_switch_from_env(), config)
    }

    pub fn availability(&self) -> &Availability {
        &self.availability
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn is_available(&self) -> bool {
        self.availability.is_available()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Installed backend version (`0` when unavailable).
    pub fn version(&self) -> u32 {
        self.availability.version()
    }

    /// Determines whether the caller should use the accelerated backend.
    ///
    /// # Arguments
    ///
    /// * `level` - `"==always"` or `">=auto"`.
    /// * `lowest_version` - Minimum backend version the caller needs.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `level` or the configured policy is not recognized.
    pub fn should_use(&self, level: &str, lowest_version: u32) -> Result<bool> {
        if !self.is_enabled() || self.version() < lowest_version {
            return Ok(false);
        }
        let level = level.parse::<UseLevel>()?;
        let policy = self.config.use_accel().parse::<AccelPolicy>()?;
        Ok(level.permits(policy))
    }

    /// Typed variant of [`should_use`](Self::should_use).
    pub fn should_use_level(&self, level: UseLevel, lowest_version: u32) -> Result<bool> {
        if !self.is_enabled() || self.version() < lowest_version {
            return Ok(false);
        }
        let policy = self.config.use_accel().parse::<AccelPolicy>()?;
        Ok(level.permits(policy))
    }

    /// Checks that `inputs` can go to the native kernels.
    ///
    /// True only if acceleration is enabled, every input rank is in
    /// `supported_ndims`, and either the first input is already native or all
    /// inputs are host `f32` arrays and the policy allows `>=auto`.
    pub fn all_ready(&self, inputs: &[&dyn ArrayMeta], supported_ndims: &[usize]) -> Result<bool> {
        if !self.is_enabled() {
            return Ok(false);
        }
        let Some(first) = inputs.first() else {
            return Ok(false);
        };
        if !inputs.iter().all(|x| supported_ndims.contains(&x.ndim())) {
            return Ok(false);
        }
        if first.layout() == Layout::Native {
            return Ok(true);
        }
        let types_ok = inputs
            .iter()
            .all(|x| x.dtype() == DType::F32 && x.device().is_cpu());
        if !types_ok {
            return Ok(false);
        }
        self.should_use_level(UseLevel::Auto, 0)
    }

    /// Disables acceleration until the returned guard is dropped.
    ///
    /// The previous value is restored on every exit path, including early
    /// returns through `?` and unwinding.
    ///
    /// ```rust
    /// use dptrain::backend::{AccelGate, Availability};
    /// use dptrain::config::Config;
    /// use std::sync::Arc;
    ///
    /// let gate = AccelGate::new(
    ///     Availability::Available { version: 2 },
    ///     true,
    ///     Arc::new(Config::new("always")),
    /// );
    /// {
    ///     let _off = gate.scoped_disable();
    ///     assert!(!gate.is_enabled());
    /// }
    /// assert!(gate.is_enabled());
    /// ```
    pub fn scoped_disable(&self) -> DisableGuard<'_> {
        let previous = self.enabled.swap(false, Ordering::AcqRel);
        DisableGuard {
            gate: self,
            previous,
        }
    }
}

/// Restores the gate's enabled flag on drop.
#[must_use = "acceleration is re-enabled as soon as the guard is dropped"]
#[derive(Debug)]
pub struct DisableGuard<'a> {
    gate: &'a AccelGate,
    previous: bool,
}

impl Drop for DisableGuard<'_> {
    fn drop(&mut self) {
        self.gate.enabled.store(self.previous, Ordering::Release);
    }
}
