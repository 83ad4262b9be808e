//! Half-duplex control channel.
//!
//! One request is outstanding at a time: a request frame goes out, then the
//! full response is read before anything else may be sent. `ControlChannel`
//! enforces this with `&mut self`; [`SharedChannel`] extends it across tasks
//! by holding its lock for the whole exchange.
//!
//! A failed, timed-out or abandoned exchange leaves unread bytes on the wire, so the
//! channel moves to [`ConnectionState::Failed`] and refuses further requests
//! until the session reconnects.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{DriverError, Result};
use crate::frame::{encode_goodbye, encode_handshake, encode_request, ResponseDecoder, ResponseFrame};
use crate::protocol::{Operation, ProtocolTable};
use crate::transport::{self, BoxedDuplex};

const READ_CHUNK: usize = 1024;
const GOODBYE_TIMEOUT: Duration = Duration::from_millis(500);

/// Lifecycle of a control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel, or closed
    Disconnected,
    /// Transport open, handshake in flight
    Connecting,
    /// Handshake accepted, requests allowed
    Connected,
    /// An exchange failed mid-frame; reconnect required
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct ControlChannel {
    name: String,
    stream: BoxedDuplex,
    decoder: ResponseDecoder,
    protocol: ProtocolTable,
    session_id: Uuid,
    request_timeout: Duration,
    state: ConnectionState,
}

impl ControlChannel {
    /// Open a TCP connection to the driver and perform the handshake.
    ///
    /// Returns the channel and the telemetry endpoint identifier the driver
    /// announced in its handshake response.
    pub async fn connect(config: &ClientConfig, session_id: Uuid) -> Result<(Self, String)> {
        config.validate()?;
        debug!("{}: Connecting to driver at {}", config.name, config.address);
        let stream = transport::connect_tcp(&config.address, config.connect_timeout).await?;
        Self::connect_with(stream, config, session_id).await
    }

    /// Perform the handshake over an already-open transport.
    pub async fn connect_with(
        stream: BoxedDuplex,
        config: &ClientConfig,
        session_id: Uuid,
    ) -> Result<(Self, String)> {
        config.validate()?;
        let mut channel = Self {
            name: config.name.clone(),
            stream,
            decoder: ResponseDecoder::new(),
            protocol: config.protocol.clone(),
            session_id,
            request_timeout: config.request_timeout,
            state: ConnectionState::Connecting,
        };

        let telemetry = match tokio::time::timeout(config.connect_timeout, channel.handshake()).await {
            Ok(Ok(telemetry)) => telemetry,
            Ok(Err(DriverError::ConnectFailed(msg))) => return Err(DriverError::ConnectFailed(msg)),
            Ok(Err(e)) => return Err(DriverError::ConnectFailed(format!("handshake failed: {}", e))),
            Err(_) => {
                return Err(DriverError::ConnectFailed(format!(
                    "no handshake response within {:?}",
                    config.connect_timeout
                )))
            }
        };

        channel.state = ConnectionState::Connected;
        info!(
            "{}: Session {} connected, telemetry at {}",
            channel.name, session_id, telemetry
        );
        Ok((channel, telemetry))
    }

    async fn handshake(&mut self) -> Result<String> {
        let frame = encode_handshake(self.protocol.hello, &self.session_id)
            .map_err(|e| DriverError::ConnectFailed(e.to_string()))?;
        self.send_frame(&frame).await?;

        let response = self.read_frame(1).await?;
        if !self.protocol.is_success(response.status) {
            return Err(DriverError::ConnectFailed(format!(
                "driver refused handshake with status {}: {}",
                response.status, response.payload
            )));
        }
        if response.payload.is_empty() {
            return Err(DriverError::ConnectFailed(
                "handshake response named no telemetry endpoint".to_string(),
            ));
        }
        Ok(response.payload)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn protocol(&self) -> &ProtocolTable {
        &self.protocol
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Send one request and read its complete response.
    ///
    /// Non-success statuses are returned as-is; see [`Self::request_ok`].
    pub async fn request(&mut self, op: Operation, payload: &str) -> Result<ResponseFrame> {
        self.request_multi(op, payload, op.response_segments()).await
    }

    /// Like [`Self::request`] with an explicit response segment count.
    pub async fn request_multi(
        &mut self,
        op: Operation,
        payload: &str,
        segments: usize,
    ) -> Result<ResponseFrame> {
        self.ensure_usable()?;

        // Encoding failures happen before anything is sent; the channel stays in sync.
        let frame = encode_request(self.protocol.code(op), payload)?;
        trace!("{}: Sending {} ({} bytes)", self.name, op.as_str(), frame.len());

        // Failed until the response is fully read, so a caller that drops this
        // future mid-exchange cannot leave a stale reply for the next request.
        self.state = ConnectionState::Failed;
        let limit = self.request_timeout;
        let exchange = async {
            self.send_frame(&frame).await?;
            self.read_frame(segments).await
        };
        let outcome = tokio::time::timeout(limit, exchange).await;

        match outcome {
            Ok(Ok(response)) => {
                self.state = ConnectionState::Connected;
                trace!(
                    "{}: {} answered with status {}",
                    self.name,
                    op.as_str(),
                    response.status
                );
                Ok(response)
            }
            Ok(Err(e)) => {
                warn!("{}: {} failed, channel unusable: {}", self.name, op.as_str(), e);
                Err(e)
            }
            Err(_) => {
                warn!(
                    "{}: {} timed out after {:?}, channel unusable",
                    self.name,
                    op.as_str(),
                    limit
                );
                Err(DriverError::Timeout(limit))
            }
        }
    }

    /// Send a request and require a success status, returning the payload.
    pub async fn request_ok(&mut self, op: Operation, payload: &str) -> Result<String> {
        let response = self.request(op, payload).await?;
        if self.protocol.is_success(response.status) {
            Ok(response.payload)
        } else {
            Err(DriverError::Channel(format!(
                "{} rejected with status {}: {}",
                op.as_str(),
                response.status,
                response.payload
            )))
        }
    }

    /// Boolean query: success status and exactly the affirmative or negative token.
    pub async fn request_flag(&mut self, op: Operation) -> Result<bool> {
        let payload = self.request_ok(op, "").await?;
        self.protocol.parse_flag(&payload).ok_or_else(|| {
            DriverError::ProtocolViolation(format!(
                "{} answered {:?}, expected {:?} or {:?}",
                op.as_str(),
                payload,
                self.protocol.affirmative,
                self.protocol.negative
            ))
        })
    }

    /// Send the goodbye frame (best effort) and shut the transport down.
    pub async fn close(mut self) {
        if self.state == ConnectionState::Connected {
            match encode_goodbye(&self.protocol, &self.session_id) {
                Ok(frame) => {
                    let sent = tokio::time::timeout(GOODBYE_TIMEOUT, self.send_frame(&frame)).await;
                    if !matches!(sent, Ok(Ok(()))) {
                        debug!("{}: Goodbye not delivered", self.name);
                    }
                }
                Err(e) => debug!("{}: Could not encode goodbye: {}", self.name, e),
            }
        }
        let _ = self.stream.shutdown().await;
        self.state = ConnectionState::Disconnected;
        info!("{}: Session {} closed", self.name, self.session_id);
    }

    fn ensure_usable(&self) -> Result<()> {
        match self.state {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Failed => Err(DriverError::Channel(
                "channel desynchronized by an earlier failure; reconnect required".to_string(),
            )),
            ConnectionState::Connecting | ConnectionState::Disconnected => Err(DriverError::NotConnected),
        }
    }

    async fn send_frame(&mut self, frame: &Bytes) -> Result<()> {
        self.stream
            .write_all(frame)
            .await
            .map_err(|e| DriverError::Channel(format!("short write of {}-byte frame: {}", frame.len(), e)))?;
        self.stream
            .flush()
            .await
            .map_err(|e| DriverError::Channel(format!("flush failed: {}", e)))
    }

    async fn read_frame(&mut self, segments: usize) -> Result<ResponseFrame> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(frame) = self.decoder.decode(segments)? {
                if self.decoder.buffered() > 0 {
                    return Err(DriverError::ProtocolViolation(format!(
                        "{} unexpected bytes after response",
                        self.decoder.buffered()
                    )));
                }
                return Ok(frame);
            }

            let n = self
                .stream
                .read(&mut chunk)
                .await
                .map_err(|e| DriverError::Channel(format!("read failed: {}", e)))?;
            if n == 0 {
                self.decoder.finish()?;
                return Err(DriverError::ProtocolViolation(
                    "driver closed the channel before responding".to_string(),
                ));
            }
            self.decoder.extend(&chunk[..n]);
        }
    }
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("name", &self.name)
            .field("session_id", &self.session_id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// A control channel shared between tasks.
///
/// Every operation holds the lock from send until the response is fully
/// read, so exchanges from different tasks never interleave on the wire.
#[derive(Debug, Clone, Default)]
pub struct SharedChannel {
    inner: Arc<Mutex<Option<ControlChannel>>>,
}

impl SharedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new channel, returning the previous one.
    pub async fn replace(&self, channel: ControlChannel) -> Option<ControlChannel> {
        self.inner.lock().await.replace(channel)
    }

    pub async fn take(&self) -> Option<ControlChannel> {
        self.inner.lock().await.take()
    }

    pub async fn state(&self) -> ConnectionState {
        match self.inner.lock().await.as_ref() {
            Some(channel) => channel.state(),
            None => ConnectionState::Disconnected,
        }
    }

    pub async fn request(&self, op: Operation, payload: &str) -> Result<ResponseFrame> {
        let mut guard = self.inner.lock().await;
        let channel = guard.as_mut().ok_or(DriverError::NotConnected)?;
        channel.request(op, payload).await
    }

    pub async fn request_ok(&self, op: Operation, payload: &str) -> Result<String> {
        let mut guard = self.inner.lock().await;
        let channel = guard.as_mut().ok_or(DriverError::NotConnected)?;
        channel.request_ok(op, payload).await
    }

    pub async fn request_flag(&self, op: Operation) -> Result<bool> {
        let mut guard = self.inner.lock().await;
        let channel = guard.as_mut().ok_or(DriverError::NotConnected)?;
        channel.request_flag(op).await
    }

    pub async fn protocol(&self) -> Option<ProtocolTable> {
        self.inner
            .lock()
            .await
            .as_ref()
            .map(|channel| channel.protocol().clone())
    }
}
