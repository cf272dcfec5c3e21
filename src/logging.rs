//! Tracing subscriber setup for the server binary.

use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_FILTER: &str = "info,tubegrab=info";

/// Installs a `fmt` subscriber filtered by `RUST_LOG`. Calling it twice is
/// harmless; the second install is ignored.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
