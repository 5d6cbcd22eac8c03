//! Configuration management for the termdock backend.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/termdock/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_sessions must be between 1 and 1000, got {0}")]
    InvalidMaxSessions(usize),

    #[error("grace_period_ms must be between 10 and 60000, got {0}")]
    InvalidGracePeriod(u64),

    #[error("output_ring_chunks must be greater than 0, got {0}")]
    InvalidRingCapacity(usize),

    #[error("default terminal size must be positive, got {0}x{1}")]
    InvalidDimensions(u16, u16),

    #[error("default_shell path does not exist: {0}")]
    InvalidShellPath(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the termdock backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General backend configuration.
    pub general: GeneralConfig,

    /// Session management configuration.
    pub session: SessionConfig,
}

/// General backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Session management configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Default shell for new sessions. None means the platform default
    /// ($SHELL, falling back to /bin/sh; cmd.exe on Windows).
    pub default_shell: Option<String>,

    /// Default terminal columns when the caller does not specify any.
    pub default_cols: u16,

    /// Default terminal rows when the caller does not specify any.
    pub default_rows: u16,

    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,

    /// How long to wait after a graceful termination signal before
    /// escalating to a forceful kill, in milliseconds.
    pub grace_period_ms: u64,

    /// How many output chunks a session may buffer before the oldest
    /// chunk is dropped.
    pub output_ring_chunks: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_shell: None,
            default_cols: control::DEFAULT_COLS,
            default_rows: control::DEFAULT_ROWS,
            max_sessions: 16,
            grace_period_ms: 300,
            output_ring_chunks: 128,
        }
    }
}

impl Config {
    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("termdock")
            .join("config.toml")
    }

    /// Loads configuration from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Loads configuration from the default path, falling back to defaults
    /// if no file exists yet.
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Saves the configuration to the given path, creating parent
    /// directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config directory: {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Applies a single override keyed by environment variable name.
    ///
    /// Returns true if the key was recognized.
    pub fn apply_override(&mut self, key: &str, value: &str) -> bool {
        match key {
            "TERMDOCK_SHELL" => {
                self.session.default_shell = Some(value.to_string());
                true
            }
            "TERMDOCK_LOG_LEVEL" => {
                self.general.log_level = value.to_string();
                true
            }
            "TERMDOCK_MAX_SESSIONS" => {
                if let Ok(n) = value.parse() {
                    self.session.max_sessions = n;
                }
                true
            }
            _ => false,
        }
    }

    /// Applies overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        for key in ["TERMDOCK_SHELL", "TERMDOCK_LOG_LEVEL", "TERMDOCK_MAX_SESSIONS"] {
            if let Ok(value) = std::env::var(key) {
                self.apply_override(key, &value);
            }
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.session.max_sessions == 0 || self.session.max_sessions > 1000 {
            return Err(ConfigError::InvalidMaxSessions(self.session.max_sessions));
        }

        if self.session.grace_period_ms < 10 || self.session.grace_period_ms > 60_000 {
            return Err(ConfigError::InvalidGracePeriod(self.session.grace_period_ms));
        }

        if self.session.output_ring_chunks == 0 {
            return Err(ConfigError::InvalidRingCapacity(self.session.output_ring_chunks));
        }

        if self.session.default_cols == 0 || self.session.default_rows == 0 {
            return Err(ConfigError::InvalidDimensions(
                self.session.default_cols,
                self.session.default_rows,
            ));
        }

        // Absolute shell paths must exist; bare names are resolved via PATH
        // at spawn time.
        if let Some(shell) = &self.session.default_shell {
            if shell.contains('/') && !Path::new(shell).exists() {
                return Err(ConfigError::InvalidShellPath(shell.clone()));
            }
        }

        if !VALID_LOG_LEVELS.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.general.log_level.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.default_cols, 80);
        assert_eq!(config.session.default_rows, 24);
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.session.default_shell = Some("/bin/sh".to_string());
        config.session.max_sessions = 4;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nonexistent.toml");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[session]\nmax_sessions = 3\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.session.max_sessions, 3);
        assert_eq!(config.session.default_cols, 80);
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn test_validate_rejects_zero_max_sessions() {
        let mut config = Config::default();
        config.session.max_sessions = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaxSessions(0)));
    }

    #[test]
    fn test_validate_rejects_bad_grace_period() {
        let mut config = Config::default();
        config.session.grace_period_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidGracePeriod(0)));

        config.session.grace_period_ms = 120_000;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidGracePeriod(120_000))
        );
    }

    #[test]
    fn test_validate_rejects_zero_ring_capacity() {
        let mut config = Config::default();
        config.session.output_ring_chunks = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidRingCapacity(0)));
    }

    #[test]
    fn test_validate_rejects_zero_dimensions() {
        let mut config = Config::default();
        config.session.default_cols = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidDimensions(0, 24)));
    }

    #[test]
    fn test_validate_rejects_missing_shell_path() {
        let mut config = Config::default();
        config.session.default_shell = Some("/nonexistent/path/to/shell".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidShellPath(_))
        ));
    }

    #[test]
    fn test_validate_accepts_bare_shell_name() {
        let mut config = Config::default();
        config.session.default_shell = Some("zsh".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_log_level() {
        let mut config = Config::default();
        config.general.log_level = "loud".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_apply_override() {
        let mut config = Config::default();

        assert!(config.apply_override("TERMDOCK_SHELL", "/bin/bash"));
        assert_eq!(config.session.default_shell.as_deref(), Some("/bin/bash"));

        assert!(config.apply_override("TERMDOCK_LOG_LEVEL", "debug"));
        assert_eq!(config.general.log_level, "debug");

        assert!(config.apply_override("TERMDOCK_MAX_SESSIONS", "8"));
        assert_eq!(config.session.max_sessions, 8);

        // Unparseable values leave the setting untouched.
        assert!(config.apply_override("TERMDOCK_MAX_SESSIONS", "lots"));
        assert_eq!(config.session.max_sessions, 8);

        assert!(!config.apply_override("UNRELATED_VAR", "x"));
    }
}
