//! Tracing setup for binaries and tests.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to the application. [`init_tracing`] is the shared helper for that.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Registry};

/// Directive used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Installs a formatted subscriber filtered by `RUST_LOG`.
///
/// Returns `false` if a global subscriber was already installed, which makes
/// the call safe to repeat from several tests.
pub fn init_tracing() -> bool {
    init_tracing_with(None)
}

/// Same as [`init_tracing`] with explicit filter directives
/// (e.g. `"dptrain::training=debug,info"`).
pub fn init_tracing_with(directives: Option<&str>) -> bool {
    let filter = directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE));

    let fmt_layer = tracing_fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::NONE);

    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
}
