//! Protocol constants as data.
//!
//! Driver builds have shipped incompatible numbering schemes for operation
//! codes, connect codes and the status byte. Everything that differs between
//! revisions lives in [`ProtocolTable`] so the state machines never hard-code
//! a number. [`ProtocolTable::canonical`] is the revision this crate targets.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::frame::FrameError;

/// Operations the control channel understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Query remaining battery, payload is a percentage
    BatteryLife,
    /// Begin recording the resting signal
    StartCalibration,
    /// Stop recording, response carries the calibration result
    EndCalibration,
    /// Payload is a path to a previously persisted calibration result
    UseSavedCalibration,
    /// Payload of the response is the affirmative or negative token
    AskIfCalibrated,
    /// Payload of the response is the affirmative or negative token
    IsGloveConnected,
    /// Driver starts buffering gesture events for export
    StartRecording,
    /// Payload is the path the driver writes its recording to
    EndRecording,
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Operation::BatteryLife,
        Operation::StartCalibration,
        Operation::EndCalibration,
        Operation::UseSavedCalibration,
        Operation::AskIfCalibrated,
        Operation::IsGloveConnected,
        Operation::StartRecording,
        Operation::EndRecording,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::BatteryLife => "battery_life",
            Operation::StartCalibration => "start_calibration",
            Operation::EndCalibration => "end_calibration",
            Operation::UseSavedCalibration => "use_saved_calibration",
            Operation::AskIfCalibrated => "ask_if_calibrated",
            Operation::IsGloveConnected => "is_glove_connected",
            Operation::StartRecording => "start_recording",
            Operation::EndRecording => "end_recording",
        }
    }

    /// Number of newline-terminated segments in this operation's response.
    pub fn response_segments(&self) -> usize {
        match self {
            Operation::EndCalibration => 2,
            _ => 1,
        }
    }
}

/// One-byte operation codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpCodes {
    pub battery_life: u8,
    pub start_calibration: u8,
    pub end_calibration: u8,
    pub use_saved_calibration: u8,
    pub ask_if_calibrated: u8,
    pub is_glove_connected: u8,
    pub start_recording: u8,
    pub end_recording: u8,
}

impl OpCodes {
    pub fn code(&self, op: Operation) -> u8 {
        match op {
            Operation::BatteryLife => self.battery_life,
            Operation::StartCalibration => self.start_calibration,
            Operation::EndCalibration => self.end_calibration,
            Operation::UseSavedCalibration => self.use_saved_calibration,
            Operation::AskIfCalibrated => self.ask_if_calibrated,
            Operation::IsGloveConnected => self.is_glove_connected,
            Operation::StartRecording => self.start_recording,
            Operation::EndRecording => self.end_recording,
        }
    }

    /// Reverse lookup, used on the receiving side.
    pub fn operation(&self, code: u8) -> Option<Operation> {
        Operation::ALL.into_iter().find(|op| self.code(*op) == code)
    }
}

/// Every constant that varies between driver revisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolTable {
    /// Connect code opening a session
    pub hello: u8,
    /// Connect code closing a session
    pub goodbye: u8,
    /// Status byte meaning success; anything else is failure
    pub success_status: u8,
    /// Exact payload meaning "yes" for boolean queries
    pub affirmative: String,
    /// Exact payload meaning "no" for boolean queries
    pub negative: String,
    pub ops: OpCodes,
}

impl ProtocolTable {
    /// The revision this crate targets.
    pub fn canonical() -> Self {
        Self {
            hello: 0,
            goodbye: 1,
            success_status: 0,
            affirmative: "yes".to_string(),
            negative: "no".to_string(),
            ops: OpCodes {
                battery_life: 1,
                start_calibration: 2,
                end_calibration: 3,
                use_saved_calibration: 4,
                ask_if_calibrated: 5,
                is_glove_connected: 6,
                start_recording: 7,
                end_recording: 8,
            },
        }
    }

    pub fn code(&self, op: Operation) -> u8 {
        self.ops.code(op)
    }

    pub fn is_success(&self, status: u8) -> bool {
        status == self.success_status
    }

    /// Interpret a boolean query payload. `None` means neither token matched.
    pub fn parse_flag(&self, payload: &str) -> Option<bool> {
        if payload == self.affirmative {
            Some(true)
        } else if payload == self.negative {
            Some(false)
        } else {
            None
        }
    }

    /// Reject tables that would make frames ambiguous.
    pub fn validate(&self) -> Result<(), String> {
        if self.hello == self.goodbye {
            return Err(format!(
                "hello and goodbye share connect code {}",
                self.hello
            ));
        }
        if self.success_status == b'\n' {
            return Err("success status may not be the newline byte".to_string());
        }
        if self.affirmative == self.negative {
            return Err("affirmative and negative tokens are identical".to_string());
        }
        if self.affirmative.contains('\n') || self.negative.contains('\n') {
            return Err("flag tokens may not contain a newline".to_string());
        }

        let mut seen = HashSet::new();
        for op in Operation::ALL {
            let code = self.code(op);
            if code == b'\n' {
                return Err(format!("{} uses the newline byte as its code", op.as_str()));
            }
            if !seen.insert(code) {
                return Err(format!("duplicate op code {} ({})", code, op.as_str()));
            }
        }
        Ok(())
    }
}

impl Default for ProtocolTable {
    fn default() -> Self {
        Self::canonical()
    }
}

/// Gesture kinds reported on the telemetry channel.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GestureKind {
    ZoomIn = 1,
    ZoomOut = 2,
    Rotate = 3,
    Pan = 4,
}

impl GestureKind {
    pub fn from_code(code: u8) -> Result<Self, FrameError> {
        match code {
            1 => Ok(GestureKind::ZoomIn),
            2 => Ok(GestureKind::ZoomOut),
            3 => Ok(GestureKind::Rotate),
            4 => Ok(GestureKind::Pan),
            other => Err(FrameError::InvalidGesture(format!(
                "unknown gesture code {}",
                other
            ))),
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GestureKind::ZoomIn => "zoom_in",
            GestureKind::ZoomOut => "zoom_out",
            GestureKind::Rotate => "rotate",
            GestureKind::Pan => "pan",
        }
    }
}

impl std::fmt::Display for GestureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
