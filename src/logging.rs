//! Tracing setup helpers

use tracing_subscriber::EnvFilter;

/// Initialize console logging.
///
/// The level is taken from `RUST_LOG` when set, otherwise `info`. Safe to
/// call more than once; later calls are no-ops.
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}
