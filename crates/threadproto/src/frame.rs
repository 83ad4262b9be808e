//! Thread driver wire codec
//!
//! Pure framing and parsing functions for the control channel and the
//! telemetry channel. No I/O happens here.
//!
//! ## Control Channel Frames
//!
//! ```text
//! Handshake (client → driver), fixed length:
//!   [1-byte connect code][16-byte session id][\n]
//!
//! Request (client → driver):
//!   [1-byte op code][optional UTF-8 payload][\n]
//!
//! Response (driver → client):
//!   [1-byte status][UTF-8 payload][\n]
//!   calibration end: [1-byte status][segment 1][\n][segment 2][\n]
//! ```
//!
//! The handshake is read by length, not by delimiter, because the session id
//! is binary and may itself contain `0x0A`. Every other frame is delimited by
//! newlines, and payloads have no escaping, so a payload may never contain one.
//!
//! ## Telemetry Lines
//!
//! ```text
//! <gesture-code><whitespace><flag:mag>,<flag:mag>,<flag:mag>
//! 4 0:12,1:7,0:3      → Pan (12, -7, 3)
//! ```
//!
//! A sign flag of `1` negates the magnitude.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::{GestureKind, ProtocolTable};

/// Frame terminator
pub const TERMINATOR: u8 = b'\n';

/// Length of the session identifier in the handshake
pub const SESSION_ID_LEN: usize = 16;

/// Total handshake length: connect code + session id + terminator
pub const HANDSHAKE_LEN: usize = 1 + SESSION_ID_LEN + 1;

/// Errors during frame encoding and parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Handshake frame has wrong length: expected {expected} bytes, got {actual}")]
    HandshakeLength { expected: usize, actual: usize },
    #[error("Handshake frame is missing its terminator")]
    HandshakeTerminator,
    #[error("Payload contains an embedded newline")]
    EmbeddedNewline,
    #[error("Frame has no status byte")]
    EmptyFrame,
    #[error("Stream closed before frame terminator ({buffered} bytes buffered)")]
    Unterminated { buffered: usize },
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("Invalid gesture: {0}")]
    InvalidGesture(String),
}

// ============================================================================
// Handshake
// ============================================================================

/// Build the fixed-length handshake frame.
///
/// The length check is a local contract: a mismatch means this build is
/// broken, and the caller surfaces it as a connection failure.
pub fn encode_handshake(code: u8, session_id: &Uuid) -> Result<Bytes, FrameError> {
    let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
    buf.put_u8(code);
    buf.put_slice(session_id.as_bytes());
    buf.put_u8(TERMINATOR);

    if buf.len() != HANDSHAKE_LEN {
        return Err(FrameError::HandshakeLength {
            expected: HANDSHAKE_LEN,
            actual: buf.len(),
        });
    }
    Ok(buf.freeze())
}

/// Build the goodbye frame sent when a session closes.
pub fn encode_goodbye(table: &ProtocolTable, session_id: &Uuid) -> Result<Bytes, FrameError> {
    encode_handshake(table.goodbye, session_id)
}

/// Parse a handshake frame back into its connect code and session id.
pub fn decode_handshake(frame: &[u8]) -> Result<(u8, Uuid), FrameError> {
    if frame.len() != HANDSHAKE_LEN {
        return Err(FrameError::HandshakeLength {
            expected: HANDSHAKE_LEN,
            actual: frame.len(),
        });
    }
    if frame[HANDSHAKE_LEN - 1] != TERMINATOR {
        return Err(FrameError::HandshakeTerminator);
    }

    let mut id = [0u8; SESSION_ID_LEN];
    id.copy_from_slice(&frame[1..1 + SESSION_ID_LEN]);
    Ok((frame[0], Uuid::from_bytes(id)))
}

// ============================================================================
// Requests
// ============================================================================

/// Build a request frame. An empty payload is simply omitted.
pub fn encode_request(op_code: u8, payload: &str) -> Result<Bytes, FrameError> {
    if payload.as_bytes().contains(&TERMINATOR) {
        return Err(FrameError::EmbeddedNewline);
    }

    let mut buf = BytesMut::with_capacity(payload.len() + 2);
    buf.put_u8(op_code);
    buf.put_slice(payload.as_bytes());
    buf.put_u8(TERMINATOR);
    Ok(buf.freeze())
}

/// Parse one newline-terminated request frame (receiving side).
pub fn decode_request(frame: &[u8]) -> Result<(u8, String), FrameError> {
    let body = match frame.split_last() {
        Some((&TERMINATOR, body)) => body,
        _ => return Err(FrameError::Unterminated { buffered: frame.len() }),
    };
    let (&op_code, payload) = body.split_first().ok_or(FrameError::EmptyFrame)?;
    if payload.contains(&TERMINATOR) {
        return Err(FrameError::EmbeddedNewline);
    }

    let payload = std::str::from_utf8(payload)
        .map_err(|_| FrameError::InvalidUtf8("request payload"))?
        .to_string();
    Ok((op_code, payload))
}

// ============================================================================
// Responses
// ============================================================================

/// A decoded response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub status: u8,
    pub payload: String,
}

impl ResponseFrame {
    /// Build the wire bytes for this frame (driver side; used by stubs).
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.payload.len() + 2);
        buf.put_u8(self.status);
        buf.put_slice(self.payload.as_bytes());
        buf.put_u8(TERMINATOR);
        buf.freeze()
    }
}

/// Incremental response decoder.
///
/// Bytes arrive in arbitrary chunks; a frame is complete once `segments`
/// terminators have been seen. Bytes after the frame stay buffered.
#[derive(Debug, Default)]
pub struct ResponseDecoder {
    buf: BytesMut,
}

impl ResponseDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Append bytes read from the stream
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Number of bytes not yet consumed by a frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Try to take one complete frame spanning `segments` terminators.
    ///
    /// Returns `Ok(None)` until enough terminators have arrived.
    pub fn decode(&mut self, segments: usize) -> Result<Option<ResponseFrame>, FrameError> {
        let segments = segments.max(1);

        if self.buf.first() == Some(&TERMINATOR) {
            let _ = self.buf.split_to(1);
            return Err(FrameError::EmptyFrame);
        }

        // The status byte is never a segment boundary
        let end = self
            .buf
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, b)| **b == TERMINATOR)
            .map(|(i, _)| i)
            .nth(segments - 1);

        let Some(end) = end else {
            return Ok(None);
        };

        let frame = self.buf.split_to(end + 1);
        let status = frame[0];
        let payload = std::str::from_utf8(&frame[1..end])
            .map_err(|_| FrameError::InvalidUtf8("response payload"))?
            .to_string();

        Ok(Some(ResponseFrame { status, payload }))
    }

    /// Call when the stream has closed: anything buffered is a partial frame.
    pub fn finish(&self) -> Result<(), FrameError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(FrameError::Unterminated {
                buffered: self.buf.len(),
            })
        }
    }
}

/// Decode a single-segment response from a complete byte stream.
pub fn decode_response(stream: &[u8]) -> Result<ResponseFrame, FrameError> {
    decode_response_segments(stream, 1)
}

/// Decode a response of `segments` newline-terminated segments.
pub fn decode_response_segments(
    stream: &[u8],
    segments: usize,
) -> Result<ResponseFrame, FrameError> {
    let mut decoder = ResponseDecoder::new();
    decoder.extend(stream);
    match decoder.decode(segments)? {
        Some(frame) => Ok(frame),
        None => Err(FrameError::Unterminated {
            buffered: decoder.buffered(),
        }),
    }
}

// ============================================================================
// Telemetry
// ============================================================================

/// One decoded gesture from the telemetry channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GestureEvent {
    pub kind: GestureKind,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl GestureEvent {
    pub fn new(kind: GestureKind, x: i32, y: i32, z: i32) -> Self {
        Self { kind, x, y, z }
    }

    pub fn vector(&self) -> [i32; 3] {
        [self.x, self.y, self.z]
    }

    /// Render in telemetry wire format, without a line terminator.
    pub fn to_line(&self) -> String {
        let component = |v: i32| {
            let flag = if v < 0 { 1 } else { 0 };
            format!("{}:{}", flag, v.unsigned_abs())
        };
        format!(
            "{} {},{},{}",
            self.kind.code(),
            component(self.x),
            component(self.y),
            component(self.z)
        )
    }
}

/// Decode one telemetry line into a gesture event.
pub fn decode_telemetry_line(line: &str) -> Result<GestureEvent, FrameError> {
    let mut tokens = line.split_whitespace();
    let (Some(code_token), Some(vector_token), None) = (tokens.next(), tokens.next(), tokens.next())
    else {
        return Err(FrameError::InvalidGesture(format!(
            "expected '<code> <vector>', got {:?}",
            line.trim()
        )));
    };

    let code: u8 = code_token.parse().map_err(|_| {
        FrameError::InvalidGesture(format!("non-numeric gesture code {:?}", code_token))
    })?;
    let kind = GestureKind::from_code(code)?;

    let components: Vec<&str> = vector_token.split(',').collect();
    let [x, y, z] = components.as_slice() else {
        return Err(FrameError::InvalidGesture(format!(
            "expected 3 vector components, got {}",
            components.len()
        )));
    };

    Ok(GestureEvent {
        kind,
        x: decode_component(x)?,
        y: decode_component(y)?,
        z: decode_component(z)?,
    })
}

fn decode_component(token: &str) -> Result<i32, FrameError> {
    let inner = token.trim_start_matches('(').trim_end_matches(')');
    let (flag, magnitude) = inner.split_once(':').ok_or_else(|| {
        FrameError::InvalidGesture(format!("component {:?} is not flag:magnitude", token))
    })?;

    let magnitude: u32 = magnitude
        .parse()
        .map_err(|_| FrameError::InvalidGesture(format!("bad magnitude in {:?}", token)))?;
    let magnitude = i32::try_from(magnitude)
        .map_err(|_| FrameError::InvalidGesture(format!("magnitude out of range in {:?}", token)))?;

    match flag {
        "0" => Ok(magnitude),
        "1" => Ok(-magnitude),
        other => Err(FrameError::InvalidGesture(format!(
            "sign flag must be 0 or 1, got {:?}",
            other
        ))),
    }
}
