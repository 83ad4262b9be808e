//! Transports for the two driver channels.
//!
//! Both channels are consumed as plain duplex byte streams, so anything
//! implementing tokio's `AsyncRead + AsyncWrite` can stand in for the real
//! socket (tests use in-memory pipes and loopback listeners).
//!
//! - Control channel: TCP to a well-known loopback port.
//! - Telemetry channel: named by the handshake. Either a TCP address or a
//!   filesystem path (FIFO, regular file, Unix socket, Windows named pipe).

use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{DriverError, Result};
use crate::frame::FrameError;

/// A duplex byte stream the control channel can own.
pub trait DuplexStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> DuplexStream for T {}

pub type BoxedDuplex = Box<dyn DuplexStream>;

/// Read half used by the telemetry reader.
pub type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;

/// Open the control channel's TCP transport within `timeout`.
pub async fn connect_tcp(address: &str, timeout: Duration) -> Result<BoxedDuplex> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
        .await
        .map_err(|_| {
            DriverError::ConnectFailed(format!("connect to {} timed out after {:?}", address, timeout))
        })?
        .map_err(|e| DriverError::ConnectFailed(format!("connect to {}: {}", address, e)))?;

    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay failed on {}: {}", address, e);
    }
    Ok(Box::new(stream))
}

// ============================================================================
// Telemetry endpoint
// ============================================================================

/// Where the telemetry channel lives, as announced in the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEndpoint {
    /// `host:port`, from either `tcp://host:port` or a bare address
    Tcp(String),
    /// Named pipe, FIFO, Unix socket or plain file
    Path(PathBuf),
}

impl TelemetryEndpoint {
    pub fn parse(identifier: &str) -> Result<Self> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(DriverError::ProtocolViolation(
                "driver announced an empty telemetry channel".to_string(),
            ));
        }

        if let Some(address) = identifier.strip_prefix("tcp://") {
            return Ok(TelemetryEndpoint::Tcp(address.to_string()));
        }

        let looks_like_address = !identifier.contains(['/', '\\'])
            && identifier
                .rsplit_once(':')
                .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if looks_like_address {
            return Ok(TelemetryEndpoint::Tcp(identifier.to_string()));
        }

        Ok(TelemetryEndpoint::Path(PathBuf::from(identifier)))
    }

    /// Open the channel for reading.
    pub async fn open(&self, timeout: Duration) -> Result<BoxedReader> {
        let opened = tokio::time::timeout(timeout, self.open_inner()).await;
        match opened {
            Ok(Ok(reader)) => Ok(reader),
            Ok(Err(e)) => Err(DriverError::ConnectFailed(format!(
                "open telemetry channel {}: {}",
                self, e
            ))),
            Err(_) => Err(DriverError::ConnectFailed(format!(
                "open telemetry channel {} timed out after {:?}",
                self, timeout
            ))),
        }
    }

    async fn open_inner(&self) -> io::Result<BoxedReader> {
        match self {
            TelemetryEndpoint::Tcp(address) => {
                let stream = TcpStream::connect(address).await?;
                Ok(Box::new(stream))
            }
            TelemetryEndpoint::Path(path) => open_path(path).await,
        }
    }
}

#[cfg(unix)]
async fn open_path(path: &std::path::Path) -> io::Result<BoxedReader> {
    use std::os::unix::fs::FileTypeExt;

    let metadata = tokio::fs::metadata(path).await?;
    if metadata.file_type().is_socket() {
        let stream = tokio::net::UnixStream::connect(path).await?;
        return Ok(Box::new(stream));
    }
    let file = tokio::fs::File::open(path).await?;
    Ok(Box::new(file))
}

#[cfg(windows)]
async fn open_path(path: &std::path::Path) -> io::Result<BoxedReader> {
    let is_pipe = path.to_string_lossy().starts_with(r"\\.\pipe\");
    if is_pipe {
        let client = tokio::net::windows::named_pipe::ClientOptions::new().open(path)?;
        return Ok(Box::new(client));
    }
    let file = tokio::fs::File::open(path).await?;
    Ok(Box::new(file))
}

#[cfg(not(any(unix, windows)))]
async fn open_path(path: &std::path::Path) -> io::Result<BoxedReader> {
    let file = tokio::fs::File::open(path).await?;
    Ok(Box::new(file))
}

impl std::fmt::Display for TelemetryEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TelemetryEndpoint::Tcp(address) => write!(f, "tcp://{}", address),
            TelemetryEndpoint::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

// ============================================================================
// Line reading
// ============================================================================

/// Text encoding of telemetry lines. Differs between driver revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Utf16Le,
}

impl FromStr for TextEncoding {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(TextEncoding::Utf8),
            "utf-16le" | "utf16le" | "utf-16" | "utf16" => Ok(TextEncoding::Utf16Le),
            other => Err(DriverError::Config(format!(
                "unknown telemetry encoding {:?} (expected utf-8 or utf-16le)",
                other
            ))),
        }
    }
}

/// Longest telemetry line kept, in bytes. Anything longer is consumed up to
/// its terminator and reported as undecodable.
pub const MAX_LINE_BYTES: usize = 16 * 1024;

/// Reads logical lines in either encoding, with terminators stripped.
///
/// The outer `io::Result` is a transport failure; the inner `Result` is a
/// single line that could not be decoded as text and should be skipped.
pub struct LineReader<R> {
    inner: R,
    encoding: TextEncoding,
    buf: Vec<u8>,
    /// Bytes consumed for the current line, including any not kept in `buf`
    line_len: usize,
    overlong: bool,
    first_line: bool,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub fn new(inner: R, encoding: TextEncoding) -> Self {
        Self {
            inner,
            encoding,
            buf: Vec::with_capacity(128),
            line_len: 0,
            overlong: false,
            first_line: true,
        }
    }

    /// Next line, or `None` once the stream is closed.
    pub async fn next_line(&mut self) -> io::Result<Option<std::result::Result<String, FrameError>>> {
        self.buf.clear();
        self.line_len = 0;
        self.overlong = false;
        let complete = match self.encoding {
            TextEncoding::Utf8 => self.fill_utf8().await?,
            TextEncoding::Utf16Le => self.fill_utf16().await?,
        };
        if !complete && self.line_len == 0 {
            return Ok(None);
        }
        if self.overlong {
            self.first_line = false;
            return Ok(Some(Err(FrameError::InvalidGesture(format!(
                "line of {} bytes exceeds the {}-byte limit",
                self.line_len, MAX_LINE_BYTES
            )))));
        }

        let decoded = match self.encoding {
            TextEncoding::Utf8 => String::from_utf8(std::mem::take(&mut self.buf))
                .map_err(|_| FrameError::InvalidGesture("line is not valid UTF-8".to_string())),
            TextEncoding::Utf16Le => decode_utf16le(&self.buf),
        };

        let first = std::mem::replace(&mut self.first_line, false);
        Ok(Some(decoded.map(|mut line| {
            if line.ends_with('\r') {
                line.pop();
            }
            if first {
                if let Some(stripped) = line.strip_prefix('\u{feff}') {
                    line = stripped.to_string();
                }
            }
            line
        })))
    }

    /// Consume through the next 0x0A byte, keeping at most
    /// [`MAX_LINE_BYTES`]. Returns false at end of stream.
    async fn read_segment(&mut self) -> io::Result<bool> {
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                return Ok(false);
            }
            let (used, found) = match available.iter().position(|b| *b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            };
            let room = MAX_LINE_BYTES.saturating_sub(self.buf.len());
            if used > room {
                self.overlong = true;
            }
            self.buf.extend_from_slice(&available[..used.min(room)]);
            self.line_len += used;
            self.inner.consume(used);
            if found {
                return Ok(true);
            }
        }
    }

    /// Returns true when a terminator was found, false at end of stream.
    async fn fill_utf8(&mut self) -> io::Result<bool> {
        let found = self.read_segment().await?;
        if found && !self.overlong {
            self.buf.pop();
        }
        Ok(found)
    }

    /// A 0x0A byte only ends the line when it is the low byte of the
    /// code unit 0x000A, so odd offsets and non-zero high bytes continue.
    async fn fill_utf16(&mut self) -> io::Result<bool> {
        loop {
            if !self.read_segment().await? {
                return Ok(false);
            }

            let newline_at = self.line_len - 1;
            if newline_at % 2 != 0 {
                continue;
            }

            match self.inner.read_u8().await {
                Ok(0) => {
                    self.line_len += 1;
                    if !self.overlong {
                        self.buf.truncate(newline_at);
                    }
                    return Ok(true);
                }
                Ok(high) => {
                    self.line_len += 1;
                    if self.buf.len() < MAX_LINE_BYTES {
                        self.buf.push(high);
                    } else {
                        self.overlong = true;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
                Err(e) => return Err(e),
            }
        }
    }
}

fn decode_utf16le(bytes: &[u8]) -> std::result::Result<String, FrameError> {
    if bytes.len() % 2 != 0 {
        return Err(FrameError::InvalidGesture(
            "line has an odd number of UTF-16 bytes".to_string(),
        ));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units)
        .map_err(|_| FrameError::InvalidGesture("line is not valid UTF-16".to_string()))
}
