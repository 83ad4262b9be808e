//! Configuration loading for the Thread glove driver client.
//!
//! Kept dependency-light so both the protocol crate and the CLI can import
//! it without dragging in the async runtime.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/threadglove/config.toml` (system)
//! 2. `~/.config/threadglove/config.toml` (user)
//! 3. `./threadglove.toml` (local override, or the `--config` path)
//! 4. Environment variables (`THREADGLOVE_*`, `RUST_LOG`)
//!
//! Files are merged table by table, so a local file that only sets
//! `driver.port` keeps the host configured by the user file.
//!
//! # Example Config
//!
//! ```toml
//! [driver]
//! host = "127.0.0.1"
//! port = 7777
//! connect_timeout_ms = 5000
//! request_timeout_ms = 10000
//!
//! [telemetry]
//! encoding = "utf-16le"
//! channel_capacity = 256
//!
//! [calibration]
//! delay_secs = 5
//! output = "~/.local/share/threadglove/calibration.txt"
//!
//! [logging]
//! level = "info"
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use sections::{
    CalibrationConfig, DriverConfig, LoggingConfig, TelemetryConfig, DEFAULT_DRIVER_PORT,
};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ThreadConfig {
    #[serde(default)]
    pub driver: DriverConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub calibration: CalibrationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ThreadConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with an explicit file taking the place of
    /// `./threadglove.toml`. System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::into_config(merged)?;
        loader::apply_env_overrides(&mut config, &mut sources);
        config.validate()?;

        Ok((config, sources))
    }

    /// Reject values no driver revision can work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.driver.host.trim().is_empty() {
            return Err(ConfigError::Invalid("driver.host is empty".to_string()));
        }
        if self.driver.port == 0 {
            return Err(ConfigError::Invalid("driver.port must be non-zero".to_string()));
        }
        if self.driver.request_timeout_ms == 0 || self.driver.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "driver timeouts must be non-zero".to_string(),
            ));
        }
        if self.telemetry.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "telemetry.channel_capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ThreadConfig::default();
        assert_eq!(config.driver.port, DEFAULT_DRIVER_PORT);
        assert_eq!(config.driver.address(), "127.0.0.1:7777");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_to_toml_roundtrips() {
        let config = ThreadConfig::default();
        let text = config.to_toml().unwrap();
        assert!(text.contains("[driver]"));
        assert!(text.contains("[telemetry]"));

        let parsed: ThreadConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = ThreadConfig::default();
        config.driver.request_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_with_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[driver]\nhost = \"192.168.4.2\"\n").unwrap();

        let (config, sources) = ThreadConfig::load_with_sources_from(Some(&path)).unwrap();
        // THREADGLOVE_HOST in the environment would legitimately win here
        if std::env::var("THREADGLOVE_HOST").is_err() {
            assert_eq!(config.driver.host, "192.168.4.2");
        }
        assert!(sources.files.contains(&path));
    }
}
