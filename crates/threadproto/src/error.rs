//! Client error kinds.
//!
//! Fatal kinds leave the control channel unusable until a fresh `connect`;
//! recoverable kinds leave it in sync.

use std::path::PathBuf;
use std::time::Duration;

use crate::frame::FrameError;

pub type Result<T> = std::result::Result<T, DriverError>;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Transport connect or handshake failed
    #[error("Could not connect to driver: {0}")]
    ConnectFailed(String),

    /// I/O failure, short write, or non-success status mid-exchange
    #[error("Control channel error: {0}")]
    Channel(String),

    /// Malformed frame from the driver
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A bounded wait expired; the channel may be desynchronized
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Driver rejected a saved calibration file
    #[error("Driver rejected calibration file {path}: {reason}")]
    BadCalibrationFile { path: PathBuf, reason: String },

    /// One malformed telemetry line
    #[error("Invalid gesture: {0}")]
    InvalidGesture(String),

    /// A background calibration is still running
    #[error("A calibration is already in progress")]
    AlreadyCalibrating,

    /// Operation needs a connected session
    #[error("Session is not connected")]
    NotConnected,

    /// Local I/O on a calibration artifact
    #[error("Failed to write calibration artifact {path}: {source}")]
    Artifact {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid client configuration: {0}")]
    Config(String),
}

impl DriverError {
    /// Whether the control channel is still usable after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DriverError::BadCalibrationFile { .. }
                | DriverError::InvalidGesture(_)
                | DriverError::AlreadyCalibrating
                | DriverError::Artifact { .. }
        )
    }

    /// Short machine-readable name, used in logs and calibration state.
    pub fn kind(&self) -> &'static str {
        match self {
            DriverError::ConnectFailed(_) => "connect_failed",
            DriverError::Channel(_) => "channel_error",
            DriverError::ProtocolViolation(_) => "protocol_violation",
            DriverError::Timeout(_) => "timeout",
            DriverError::BadCalibrationFile { .. } => "bad_calibration_file",
            DriverError::InvalidGesture(_) => "invalid_gesture",
            DriverError::AlreadyCalibrating => "already_calibrating",
            DriverError::NotConnected => "not_connected",
            DriverError::Artifact { .. } => "artifact",
            DriverError::Config(_) => "config",
        }
    }
}

impl From<FrameError> for DriverError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::InvalidGesture(msg) => DriverError::InvalidGesture(msg),
            other => DriverError::ProtocolViolation(other.to_string()),
        }
    }
}

#[cfg(feature = "client")]
impl From<threadconf::ConfigError> for DriverError {
    fn from(err: threadconf::ConfigError) -> Self {
        DriverError::Config(err.to_string())
    }
}
