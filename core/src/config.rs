//! Process-wide configuration.
//!
//! Two knobs control the accelerated backend:
//!
//! - **Master switch** (`DPTRAIN_ACCEL`): read once when an
//!   [`AccelGate`](crate::backend::AccelGate) is built. An integer `0` disables
//!   acceleration; any other value, or no value, leaves it enabled.
//! - **Policy** (`use_accel`): a live setting on [`Config`], re-read on every
//!   routing decision. Recognized values are `"always"`, `"auto"` and `"never"`.
//!   The value is kept as written so that a bad setting surfaces as
//!   [`Error::InvalidArgument`](crate::Error::InvalidArgument) at the point of use.

use std::env;
use std::sync::{PoisonError, RwLock};

/// Environment variable holding the master switch.
pub const ACCEL_ENV: &str = "DPTRAIN_ACCEL";

/// Environment variable providing the initial `use_accel` policy.
pub const USE_ACCEL_ENV: &str = "DPTRAIN_USE_ACCEL";

/// Policy used when nothing else is configured.
pub const DEFAULT_USE_ACCEL: &str = "never";

/// Parses the master switch value. Only an integer `0` turns acceleration off.
///
/// ```rust
/// use dptrain::config::accel_switch;
/// assert!(accel_switch(None));
/// assert!(!accel_switch(Some("0")));
/// assert!(accel_switch(Some("1")));
/// assert!(accel_switch(Some("yes")));
/// ```
pub fn accel_switch(value: Option<&str>) -> bool {
    !matches!(value.map(|v| v.trim().parse::<i64>()), Some(Ok(0)))
}

/// Reads the master switch from the process environment.
pub fn accel_switch_from_env() -> bool {
    accel_switch(env::var(ACCEL_ENV).ok().as_deref())
}

/// Live configuration shared by every component that makes routing decisions.
#[derive(Debug)]
pub struct Config {
    use_accel: RwLock<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new(DEFAULT_USE_ACCEL)
    }
}

impl Config {
    pub fn new(use_accel: impl Into<String>) -> Self {
        Self {
            use_accel: RwLock::new(use_accel.into()),
        }
    }

    /// Builds a configuration whose policy comes from `DPTRAIN_USE_ACCEL`,
    /// falling back to [`DEFAULT_USE_ACCEL`].
    pub fn from_env() -> Self {
        let use_accel = env::var(USE_ACCEL_ENV).unwrap_or_else(|_| DEFAULT_USE_ACCEL.to_string());
        Self::new(use_accel)
    }

    /// Current raw policy value.
    pub fn use_accel(&self) -> String {
        self.use_accel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_use_accel(&self, value: impl Into<String>) {
        *self
            .use_accel
            .write()
            .unwrap_or_else(PoisonError::into_inner) = value.into();
    }

    /// Overrides the policy until the returned guard is dropped.
    ///
    /// ```rust
    /// use dptrain::config::Config;
    ///
    /// let config = Config::new("never");
    /// {
    ///     let _guard = config.scoped_use_accel("always");
    ///     assert_eq!(config.use_accel(), "always");
    /// }
    /// assert_eq!(config.use_accel(), "never");
    /// ```
    pub fn scoped_use_accel(&self, value: impl Into<String>) -> UseAccelGuard<'_> {
        let previous = self.use_accel();
        self.set_use_accel(value);
        UseAccelGuard {
            config: self,
            previous: Some(previous),
        }
    }
}

/// Restores the previous `use_accel` value on drop.
#[must_use = "the override ends as soon as the guard is dropped"]
pub struct UseAccelGuard<'a> {
    config: &'a Config,
    previous: Option<String>,
}

impl Drop for UseAccelGuard<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.config.set_use_accel(previous);
        }
    }
}
