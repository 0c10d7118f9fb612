//! Centralized constants for the Tessera runtime
//!
//! Session names, thread names and default settings in one place.

// ═══════════════════════════════════════════════════════════════
// Sessions
// ═══════════════════════════════════════════════════════════════

/// Session used outside any hosting runtime
pub const GLOBAL_SESSION: &str = "global";

// ═══════════════════════════════════════════════════════════════
// Task engines
// ═══════════════════════════════════════════════════════════════

/// Thread name prefix for threaded task units
pub const TASK_THREAD_PREFIX: &str = "tessera-task";

/// Thread name of the dedicated background event loop
pub const BACKGROUND_LOOP_THREAD: &str = "tessera-loop";

/// Worker threads of the dedicated background event loop
pub const BACKGROUND_LOOP_WORKERS: usize = 1;

// ═══════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════

/// Directory name under the platform config dir
pub const CONFIG_DIR_NAME: &str = "tessera";

/// Config file name inside the config dir
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Default log level when neither config nor RUST_LOG set one
pub const DEFAULT_LOG_LEVEL: &str = "info";

// ═══════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_loop_has_workers() {
        assert!(BACKGROUND_LOOP_WORKERS > 0);
    }

    #[test]
    fn config_file_is_toml() {
        assert!(CONFIG_FILE_NAME.ends_with(".toml"));
    }
}
