//! Client configuration.

use std::time::Duration;

use threadconf::{ThreadConfig, DEFAULT_DRIVER_PORT};

use crate::error::{DriverError, Result};
use crate::protocol::ProtocolTable;
use crate::transport::TextEncoding;

/// Configuration for a [`Session`](crate::Session)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Name used as a log prefix
    pub name: String,
    /// Control channel address (`host:port`)
    pub address: String,
    /// Bound on transport connect and on the handshake exchange
    pub connect_timeout: Duration,
    /// Bound on each request/response exchange
    pub request_timeout: Duration,
    /// Telemetry text encoding for the targeted driver revision
    pub encoding: TextEncoding,
    /// Queue depth between the telemetry task and its consumer
    pub event_capacity: usize,
    /// Op codes, connect codes and tokens for the targeted driver revision
    pub protocol: ProtocolTable,
}

impl ClientConfig {
    pub fn new(address: &str) -> Self {
        Self {
            name: "threadglove".to_string(),
            address: address.to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            encoding: TextEncoding::Utf8,
            event_capacity: 256,
            protocol: ProtocolTable::canonical(),
        }
    }

    /// Build from loaded configuration files.
    pub fn from_config(config: &ThreadConfig) -> Result<Self> {
        config.validate()?;
        let client = Self::new(&config.driver.address())
            .with_connect_timeout(Duration::from_millis(config.driver.connect_timeout_ms))
            .with_request_timeout(Duration::from_millis(config.driver.request_timeout_ms))
            .with_encoding(config.telemetry.encoding.parse()?)
            .with_event_capacity(config.telemetry.channel_capacity);
        client.validate()?;
        Ok(client)
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_protocol(mut self, protocol: ProtocolTable) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.protocol.validate().map_err(DriverError::Config)?;
        if self.event_capacity == 0 {
            return Err(DriverError::Config("event capacity must be non-zero".to_string()));
        }
        if self.connect_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(DriverError::Config("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(&format!("127.0.0.1:{}", DEFAULT_DRIVER_PORT))
    }
}
