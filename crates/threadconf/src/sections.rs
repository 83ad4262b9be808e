//! Configuration sections. Every field has a serde default so partial files
//! only override what they name.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Well-known loopback port the device driver listens on.
pub const DEFAULT_DRIVER_PORT: u16 = 7777;

/// Where and how to reach the device driver's control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Host of the driver process.
    /// Default: 127.0.0.1
    #[serde(default = "DriverConfig::default_host")]
    pub host: String,

    /// Control channel TCP port.
    /// Default: 7777
    #[serde(default = "DriverConfig::default_port")]
    pub port: u16,

    /// Bound on transport connect plus handshake.
    /// Default: 5000
    #[serde(default = "DriverConfig::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Bound on each request/response exchange.
    /// Default: 10000
    #[serde(default = "DriverConfig::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl DriverConfig {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    fn default_port() -> u16 {
        DEFAULT_DRIVER_PORT
    }

    fn default_connect_timeout_ms() -> u64 {
        5_000
    }

    fn default_request_timeout_ms() -> u64 {
        10_000
    }

    /// `host:port` form suitable for `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            connect_timeout_ms: Self::default_connect_timeout_ms(),
            request_timeout_ms: Self::default_request_timeout_ms(),
        }
    }
}

/// Telemetry channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Text encoding of telemetry lines ("utf-8" or "utf-16le").
    /// Depends on the driver revision.
    #[serde(default = "TelemetryConfig::default_encoding")]
    pub encoding: String,

    /// Capacity of the gesture event queue between reader task and consumer.
    #[serde(default = "TelemetryConfig::default_channel_capacity")]
    pub channel_capacity: usize,
}

impl TelemetryConfig {
    fn default_encoding() -> String {
        "utf-8".to_string()
    }

    fn default_channel_capacity() -> usize {
        256
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            encoding: Self::default_encoding(),
            channel_capacity: Self::default_channel_capacity(),
        }
    }
}

/// Defaults for the calibration workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Seconds the user is given to perform the calibration motion.
    #[serde(default = "CalibrationConfig::default_delay_secs")]
    pub delay_secs: u64,

    /// Where calibration results are written when no path is given.
    /// Default: ~/.local/share/threadglove/calibration.txt
    #[serde(default = "CalibrationConfig::default_output")]
    pub output: PathBuf,
}

impl CalibrationConfig {
    fn default_delay_secs() -> u64 {
        5
    }

    fn default_output() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.data_local_dir().join("threadglove/calibration.txt"))
            .unwrap_or_else(|| PathBuf::from("calibration.txt"))
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            delay_secs: Self::default_delay_secs(),
            output: Self::default_output(),
        }
    }
}

/// Log filter for the binaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or EnvFilter directive (trace, debug, info, warn, error).
    /// Default: info
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}
