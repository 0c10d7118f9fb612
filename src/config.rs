//! Tessera Configuration Module
//!
//! Runtime defaults for stores, tasks and logging.
//! Config is stored in `~/.config/tessera/config.toml`.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Environment variables (`TESSERA_MUTATION_DETECTION`, `TESSERA_PREFER_THREADED`,
//!    `TESSERA_RAISE_ERRORS`, `TESSERA_LOG`)
//! 2. Config file (`~/.config/tessera/config.toml`)
//! 3. Defaults

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TesseraError};
use crate::util::constants::{CONFIG_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_LOG_LEVEL};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TesseraConfig {
    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub task: TaskSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Store defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoreSettings {
    /// Build stores on `MutationGuard` storage (development aid)
    #[serde(default)]
    pub mutation_detection: bool,
}

/// Task defaults, consumed through `TaskOptions::from`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSettings {
    /// Run event-loop bodies on the dedicated background loop
    #[serde(default = "default_true")]
    pub prefer_threaded: bool,

    /// `result_or_raise` turns Error results into `TaskFailed`
    #[serde(default = "default_true")]
    pub raise_errors: bool,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            prefer_threaded: true,
            raise_errors: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    /// `EnvFilter` directive, e.g. "info" or "tessera=debug"
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl TesseraConfig {
    /// Get the config directory path
    ///
    /// Returns `~/.config/tessera/` on Unix, `%APPDATA%/tessera/` on Windows
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_DIR_NAME)
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join(CONFIG_FILE_NAME)
    }

    /// Load from the default path; defaults if the file doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`
    ///
    /// Returns default config if the file doesn't exist.
    /// Returns error if the file exists but is malformed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| TesseraError::ConfigError {
            reason: format!("Failed to read config file: {}", e),
        })?;

        toml::from_str(&content).map_err(|e| TesseraError::ConfigError {
            reason: format!("Failed to parse config file: {}", e),
        })
    }

    /// Save to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|dir| !dir.exists()) {
            fs::create_dir_all(dir).map_err(|e| TesseraError::ConfigError {
                reason: format!("Failed to create config directory: {}", e),
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| TesseraError::ConfigError {
            reason: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, content).map_err(|e| TesseraError::ConfigError {
            reason: format!("Failed to write config file: {}", e),
        })
    }

    /// Merge with environment variables
    ///
    /// Set, non-empty variables take precedence over file values. Booleans
    /// accept `1/0`, `true/false`, `yes/no`, `on/off`.
    pub fn with_env(mut self) -> Result<Self> {
        if let Some(flag) = env_flag("TESSERA_MUTATION_DETECTION")? {
            self.store.mutation_detection = flag;
        }
        if let Some(flag) = env_flag("TESSERA_PREFER_THREADED")? {
            self.task.prefer_threaded = flag;
        }
        if let Some(flag) = env_flag("TESSERA_RAISE_ERRORS")? {
            self.task.raise_errors = flag;
        }
        if let Some(level) = env_value("TESSERA_LOG") {
            self.logging.level = level;
        }
        Ok(self)
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn env_flag(name: &str) -> Result<Option<bool>> {
    let Some(value) = env_value(name) else {
        return Ok(None);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(TesseraError::ConfigError {
            reason: format!("{} must be a boolean, got '{}'", name, value),
        }),
    }
}
