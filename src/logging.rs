//! Tracing subscriber setup
//!
//! The library only emits `tracing` events; hosts that want them printed
//! call [`init_logging`] once at startup.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to `settings.level`
///
/// Returns false when a global subscriber was already installed (by an
/// earlier call or by the host); that subscriber stays in place.
pub fn init_logging(settings: &LoggingSettings) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new(crate::util::constants::DEFAULT_LOG_LEVEL));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}
