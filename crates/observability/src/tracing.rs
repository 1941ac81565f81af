//! Tracing/logging initialization.
//!
//! One `fmt` subscriber per process, filtered by `RUST_LOG` when set and by
//! the configured directive otherwise. Output is JSON unless asked otherwise.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

/// Initialize JSON logging with the default `info` filter.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with(DEFAULT_FILTER, true);
}

/// Initialize logging with `filter` as the fallback directive.
///
/// `RUST_LOG` still wins when present. Safe to call multiple times.
pub fn init_with(filter: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    let _ = if json {
        builder.json().with_target(false).try_init()
    } else {
        builder.with_target(true).try_init()
    };
}
