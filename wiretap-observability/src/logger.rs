//! Structured logging setup shared by every binary target.

use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber. `RUST_LOG` takes precedence when
/// set; otherwise `default_level` (e.g. `"info"`) is used.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
