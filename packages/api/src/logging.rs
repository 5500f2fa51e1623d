//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;

/// Install the process-wide fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `level` applies. Safe to call
/// multiple times (subsequent calls are no-ops).
pub fn init(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
