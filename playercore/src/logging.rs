//! Log subscriber setup for hosts that do not install their own.

use playerconfig::Config;
use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber filtered at `min_level` (or by `RUST_LOG`
/// when set). Returns false when a global subscriber already exists.
pub fn init_logging(min_level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(min_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Same as [`init_logging`] with `logger.min_level` from the configuration.
pub fn init_logging_from_config(config: &Config) -> bool {
    init_logging(&config.get_log_min_level())
}
