//! threadproto - Wire protocol and async client for the Thread glove driver
//!
//! The glove driver runs locally and exposes two channels:
//!
//! - a **control channel** over loopback TCP: a fixed-length handshake, then
//!   strictly half-duplex request/response frames
//!   (`[op code][UTF-8 payload]\n` out, `[status][UTF-8 payload]\n` back)
//! - a **telemetry channel**, named in the handshake response, carrying one
//!   gesture event per text line (`<code> <flag:mag>,<flag:mag>,<flag:mag>`)
//!
//! ## Layout
//!
//! The codec half is always compiled and has no runtime dependencies:
//! - `protocol` - op codes, connect codes and tokens as data ([`ProtocolTable`])
//! - `frame` - encoders/decoders for every frame and the telemetry line format
//! - `error` - [`DriverError`] and its recoverable/fatal classification
//!
//! The `client` feature (on by default) adds the tokio client:
//! - `control` - the control channel and its connection state
//! - `calibration` - blocking and background calibration flows
//! - `telemetry` - callback and queue forms of the gesture reader
//! - `recording` - driver-side gesture recording
//! - `session` - [`Session`], which ties the above together
//!
//! ## Protocol revision
//!
//! Driver builds disagree on op-code numbering and status polarity. This
//! crate targets [`ProtocolTable::canonical`]; another revision can be
//! targeted by passing a different table to `ClientConfig::with_protocol`.

pub mod error;
pub mod frame;
pub mod protocol;

#[cfg(feature = "client")]
pub mod calibration;
#[cfg(feature = "client")]
pub mod config;
#[cfg(feature = "client")]
pub mod control;
#[cfg(feature = "client")]
pub mod recording;
#[cfg(feature = "client")]
pub mod session;
#[cfg(feature = "client")]
pub mod telemetry;
#[cfg(feature = "client")]
pub mod transport;

pub use error::{DriverError, Result};
pub use frame::{
    decode_handshake, decode_request, decode_response, decode_response_segments,
    decode_telemetry_line, encode_goodbye, encode_handshake, encode_request, FrameError,
    GestureEvent, ResponseDecoder, ResponseFrame, HANDSHAKE_LEN, SESSION_ID_LEN,
};
pub use protocol::{GestureKind, OpCodes, Operation, ProtocolTable};

#[cfg(feature = "client")]
pub use calibration::{CalibrationController, CalibrationState};
#[cfg(feature = "client")]
pub use config::ClientConfig;
#[cfg(feature = "client")]
pub use control::{ConnectionState, ControlChannel, SharedChannel};
#[cfg(feature = "client")]
pub use recording::{RecordingController, RecordingState};
#[cfg(feature = "client")]
pub use session::Session;
#[cfg(feature = "client")]
pub use telemetry::{ListenSummary, TelemetryReader, TelemetryStream};
#[cfg(feature = "client")]
pub use transport::{TelemetryEndpoint, TextEncoding};
