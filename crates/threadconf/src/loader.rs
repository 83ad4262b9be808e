//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, ThreadConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/threadglove/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("threadglove/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("threadglove.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a config file as a raw TOML table.
///
/// The table is also checked against [`ThreadConfig`] so type errors are
/// reported against the file that introduced them, not the merged result.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    toml::Value::Table(table.clone())
        .try_into::<ThreadConfig>()
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    Ok(table)
}

/// Load a single file on top of compiled defaults.
pub fn load_from_file(path: &Path) -> Result<ThreadConfig, ConfigError> {
    let table = load_table(path)?;
    into_config(table)
}

/// Deep-merge `overlay` into `base`. Nested tables merge key by key;
/// any other value in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Turn a merged table into a typed config (missing fields take defaults).
pub fn into_config(table: toml::Table) -> Result<ThreadConfig, ConfigError> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Invalid(e.to_string()))
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut ThreadConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

/// Apply overrides from an arbitrary variable lookup.
///
/// Unparseable numeric values are ignored rather than failing the load.
pub fn apply_overrides_from<F>(config: &mut ThreadConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("THREADGLOVE_HOST") {
        config.driver.host = v;
        sources.env_overrides.push("THREADGLOVE_HOST".to_string());
    }
    if let Some(v) = lookup("THREADGLOVE_PORT") {
        if let Ok(port) = v.parse() {
            config.driver.port = port;
            sources.env_overrides.push("THREADGLOVE_PORT".to_string());
        }
    }
    if let Some(v) = lookup("THREADGLOVE_CONNECT_TIMEOUT_MS") {
        if let Ok(ms) = v.parse() {
            config.driver.connect_timeout_ms = ms;
            sources
                .env_overrides
                .push("THREADGLOVE_CONNECT_TIMEOUT_MS".to_string());
        }
    }
    if let Some(v) = lookup("THREADGLOVE_REQUEST_TIMEOUT_MS") {
        if let Ok(ms) = v.parse() {
            config.driver.request_timeout_ms = ms;
            sources
                .env_overrides
                .push("THREADGLOVE_REQUEST_TIMEOUT_MS".to_string());
        }
    }

    if let Some(v) = lookup("THREADGLOVE_TELEMETRY_ENCODING") {
        config.telemetry.encoding = v;
        sources
            .env_overrides
            .push("THREADGLOVE_TELEMETRY_ENCODING".to_string());
    }

    if let Some(v) = lookup("THREADGLOVE_CALIBRATION_OUTPUT") {
        config.calibration.output = expand_path(&v);
        sources
            .env_overrides
            .push("THREADGLOVE_CALIBRATION_OUTPUT".to_string());
    }

    if let Some(v) = lookup("THREADGLOVE_LOG_LEVEL") {
        config.logging.level = v;
        sources.env_overrides.push("THREADGLOVE_LOG_LEVEL".to_string());
    }
    // RUST_LOG wins over everything else
    if let Some(v) = lookup("RUST_LOG") {
        config.logging.level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_path(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(stripped) => directories::BaseDirs::new()
            .map(|d| d.home_dir().join(stripped))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}
