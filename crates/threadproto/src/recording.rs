//! Gesture recording.
//!
//! The driver buffers events between a start and an end request and writes
//! its own artifact at the path named by the end request. Both calls report
//! plain booleans; failures are logged, never returned.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::control::SharedChannel;
use crate::protocol::Operation;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecordingState {
    Idle,
    Recording { started_at: DateTime<Utc> },
}

pub struct RecordingController {
    name: String,
    // Held across the driver exchange so start/end never race each other
    state: Mutex<RecordingState>,
}

impl RecordingController {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(RecordingState::Idle),
        }
    }

    pub async fn state(&self) -> RecordingState {
        self.state.lock().await.clone()
    }

    /// Ask the driver to start buffering events for export.
    pub async fn start(&self, channel: &SharedChannel) -> bool {
        let mut state = self.state.lock().await;
        if let RecordingState::Recording { started_at } = &*state {
            warn!("{}: Recording already open since {}", self.name, started_at);
            return false;
        }

        match channel.request_ok(Operation::StartRecording, "").await {
            Ok(_) => {
                *state = RecordingState::Recording {
                    started_at: Utc::now(),
                };
                info!("{}: Gesture recording started", self.name);
                true
            }
            Err(e) => {
                warn!("{}: Could not start recording: {}", self.name, e);
                false
            }
        }
    }

    /// Ask the driver to close the recording and write it to `path`.
    pub async fn end(&self, channel: &SharedChannel, path: &Path) -> bool {
        let mut state = self.state.lock().await;
        if *state == RecordingState::Idle {
            warn!("{}: No recording open", self.name);
            return false;
        }

        let Some(target) = path.to_str() else {
            warn!("{}: Recording path {} is not valid UTF-8", self.name, path.display());
            return false;
        };

        match channel.request_ok(Operation::EndRecording, target).await {
            Ok(_) => {
                *state = RecordingState::Idle;
                info!("{}: Driver wrote recording to {}", self.name, path.display());
                true
            }
            Err(e) => {
                warn!("{}: Could not end recording: {}", self.name, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disconnected_start_stays_idle() {
        let recording = RecordingController::new("test");
        assert!(!recording.start(&SharedChannel::new()).await);
        assert_eq!(recording.state().await, RecordingState::Idle);
    }

    #[tokio::test]
    async fn end_without_start_is_false() {
        let recording = RecordingController::new("test");
        assert!(!recording.end(&SharedChannel::new(), Path::new("/tmp/rec.csv")).await);
    }
}
