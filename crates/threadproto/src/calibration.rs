//! Calibration flows.
//!
//! The driver records the glove's resting signal between a start and an end
//! request. Two flows drive this:
//!
//! - [`CalibrationController::calibrate_blocking`] waits inline and writes the
//!   result atomically (temp file, then rename).
//! - [`CalibrationController::start`] returns once the start request is
//!   acknowledged; a background task waits, truncates the artifact, sends the
//!   end request and writes the result. Progress is published as
//!   [`CalibrationState`] on a watch channel.
//!
//! Only one calibration runs at a time.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control::SharedChannel;
use crate::error::{DriverError, Result};
use crate::protocol::Operation;

/// Progress of the most recent calibration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CalibrationState {
    Idle,
    /// Start request in flight
    Requested,
    /// Driver is recording; the end request goes out at `deadline`
    Waiting { deadline: DateTime<Utc> },
    /// End request in flight
    Ended,
    /// Result written to `path`
    Persisted {
        path: PathBuf,
        bytes: usize,
        completed_at: DateTime<Utc>,
    },
    Failed { reason: String },
}

impl CalibrationState {
    pub fn in_progress(&self) -> bool {
        matches!(
            self,
            CalibrationState::Requested | CalibrationState::Waiting { .. } | CalibrationState::Ended
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CalibrationState::Persisted { .. } | CalibrationState::Failed { .. }
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CalibrationState::Idle => "idle",
            CalibrationState::Requested => "requested",
            CalibrationState::Waiting { .. } => "waiting",
            CalibrationState::Ended => "ended",
            CalibrationState::Persisted { .. } => "persisted",
            CalibrationState::Failed { .. } => "failed",
        }
    }
}

struct Background {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct CalibrationController {
    name: String,
    state: watch::Sender<CalibrationState>,
    background: Mutex<Option<Background>>,
}

impl CalibrationController {
    pub fn new(name: &str) -> Self {
        let (state, _) = watch::channel(CalibrationState::Idle);
        Self {
            name: name.to_string(),
            state,
            background: Mutex::new(None),
        }
    }

    pub fn state(&self) -> CalibrationState {
        self.state.borrow().clone()
    }

    /// Receiver for observing state transitions.
    pub fn subscribe(&self) -> watch::Receiver<CalibrationState> {
        self.state.subscribe()
    }

    /// Move to `Requested` unless a calibration is already running.
    fn begin(&self) -> Result<()> {
        let mut busy = false;
        self.state.send_if_modified(|state| {
            if state.in_progress() {
                busy = true;
                false
            } else {
                *state = CalibrationState::Requested;
                true
            }
        });
        if busy {
            Err(DriverError::AlreadyCalibrating)
        } else {
            Ok(())
        }
    }

    fn fail(&self, err: &DriverError) {
        warn!("{}: Calibration failed: {}", self.name, err);
        self.state.send_replace(CalibrationState::Failed {
            reason: err.to_string(),
        });
    }

    /// Run a full calibration inline and return the artifact path.
    pub async fn calibrate_blocking(
        &self,
        channel: &SharedChannel,
        delay: Duration,
        path: &Path,
    ) -> Result<PathBuf> {
        self.begin()?;
        let guard = InterruptGuard::new(&self.name, &self.state);
        let outcome = self.run_blocking(channel, delay, path).await;
        guard.disarm();
        match outcome {
            Ok(bytes) => {
                self.persisted(path, bytes);
                Ok(path.to_path_buf())
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    async fn run_blocking(&self, channel: &SharedChannel, delay: Duration, path: &Path) -> Result<usize> {
        channel.request_ok(Operation::StartCalibration, "").await?;
        self.waiting(delay);
        tokio::time::sleep(delay).await;

        self.state.send_replace(CalibrationState::Ended);
        let result = channel.request_ok(Operation::EndCalibration, "").await?;
        write_atomic(path, &artifact_contents(&result)).await
    }

    /// Start a background calibration.
    ///
    /// Returns once the driver has acknowledged the start request. Fails with
    /// [`DriverError::AlreadyCalibrating`] if one is already running.
    pub async fn start(&self, channel: &SharedChannel, delay: Duration, path: &Path) -> Result<()> {
        self.begin()?;
        let guard = InterruptGuard::new(&self.name, &self.state);
        if let Err(e) = channel.request_ok(Operation::StartCalibration, "").await {
            guard.disarm();
            self.fail(&e);
            return Err(e);
        }
        self.waiting(delay);

        let cancel = CancellationToken::new();
        let task = BackgroundCalibration {
            name: self.name.clone(),
            channel: channel.clone(),
            state: self.state.clone(),
            delay,
            path: path.to_path_buf(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(task.run());
        guard.disarm();

        let previous = self
            .background
            .lock()
            .map(|mut slot| slot.replace(Background { cancel, handle }))
            .unwrap_or(None);
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        Ok(())
    }

    /// Stop a background calibration that is still waiting.
    ///
    /// An end request already in flight is allowed to finish so the channel
    /// stays in sync.
    pub fn cancel(&self) {
        let current = self.background.lock().ok().and_then(|mut slot| slot.take());
        if let Some(background) = current {
            background.cancel.cancel();
            debug!("{}: Calibration cancel requested", self.name);
        }
    }

    /// Wait until no calibration is in progress and return the final state.
    pub async fn wait(&self) -> CalibrationState {
        let mut rx = self.state.subscribe();
        let result = rx.wait_for(|state| !state.in_progress()).await.map(|state| state.clone());
        match result {
            Ok(state) => state,
            Err(_) => self.state(),
        }
    }

    /// Strict calibration query: unknown payloads are protocol violations.
    pub async fn status(&self, channel: &SharedChannel) -> Result<bool> {
        channel.request_flag(Operation::AskIfCalibrated).await
    }

    /// Lenient calibration query: every failure reads as "not calibrated".
    pub async fn is_calibrated(&self, channel: &SharedChannel) -> bool {
        match self.status(channel).await {
            Ok(calibrated) => calibrated,
            Err(e) => {
                warn!("{}: Calibration query failed, assuming uncalibrated: {}", self.name, e);
                false
            }
        }
    }

    /// Ask the driver to load a previously persisted calibration.
    pub async fn load_file(&self, channel: &SharedChannel, path: &Path) -> Result<()> {
        let Some(text) = path.to_str() else {
            return Err(DriverError::BadCalibrationFile {
                path: path.to_path_buf(),
                reason: "path is not valid UTF-8".to_string(),
            });
        };
        if text.contains('\n') {
            return Err(DriverError::BadCalibrationFile {
                path: path.to_path_buf(),
                reason: "path contains a newline".to_string(),
            });
        }

        let response = channel.request(Operation::UseSavedCalibration, text).await?;
        let protocol = channel.protocol().await.unwrap_or_default();
        if protocol.is_success(response.status) {
            info!("{}: Driver loaded calibration from {}", self.name, path.display());
            Ok(())
        } else {
            Err(DriverError::BadCalibrationFile {
                path: path.to_path_buf(),
                reason: if response.payload.is_empty() {
                    format!("status {}", response.status)
                } else {
                    response.payload
                },
            })
        }
    }

    fn waiting(&self, delay: Duration) {
        let deadline = Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        self.state.send_replace(CalibrationState::Waiting { deadline });
    }

    fn persisted(&self, path: &Path, bytes: usize) {
        info!("{}: Calibration written to {} ({} bytes)", self.name, path.display(), bytes);
        self.state.send_replace(CalibrationState::Persisted {
            path: path.to_path_buf(),
            bytes,
            completed_at: Utc::now(),
        });
    }
}

impl Drop for CalibrationController {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Marks an in-progress calibration `Failed` if the future driving it is
/// dropped before reaching a terminal state.
struct InterruptGuard {
    name: String,
    state: watch::Sender<CalibrationState>,
    armed: bool,
}

impl InterruptGuard {
    fn new(name: &str, state: &watch::Sender<CalibrationState>) -> Self {
        Self {
            name: name.to_string(),
            state: state.clone(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let interrupted = self.state.send_if_modified(|state| {
            if state.in_progress() {
                *state = CalibrationState::Failed {
                    reason: "cancelled".to_string(),
                };
                true
            } else {
                false
            }
        });
        if interrupted {
            info!("{}: Calibration abandoned by its caller", self.name);
        }
    }
}

struct BackgroundCalibration {
    name: String,
    channel: SharedChannel,
    state: watch::Sender<CalibrationState>,
    delay: Duration,
    path: PathBuf,
    cancel: CancellationToken,
}

impl BackgroundCalibration {
    async fn run(self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {
                info!("{}: Calibration cancelled before end request", self.name);
                self.state.send_replace(CalibrationState::Failed {
                    reason: "cancelled".to_string(),
                });
                return;
            }
            _ = tokio::time::sleep(self.delay) => {}
        }

        match self.finish().await {
            Ok(bytes) => {
                info!(
                    "{}: Calibration written to {} ({} bytes)",
                    self.name,
                    self.path.display(),
                    bytes
                );
                self.state.send_replace(CalibrationState::Persisted {
                    path: self.path.clone(),
                    bytes,
                    completed_at: Utc::now(),
                });
            }
            Err(e) => {
                warn!("{}: Background calibration failed: {}", self.name, e);
                self.state.send_replace(CalibrationState::Failed {
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Truncate the artifact, end the recording and write the result.
    ///
    /// The artifact exists (possibly empty) even if the end request fails.
    async fn finish(&self) -> Result<usize> {
        let mut file = create_artifact(&self.path).await?;

        self.state.send_replace(CalibrationState::Ended);
        let result = self.channel.request_ok(Operation::EndCalibration, "").await?;

        let contents = artifact_contents(&result);
        file.write_all(contents.as_bytes())
            .await
            .map_err(|source| artifact_error(&self.path, source))?;
        file.sync_all()
            .await
            .map_err(|source| artifact_error(&self.path, source))?;
        Ok(contents.len())
    }
}

/// The end response payload plus its final terminator.
fn artifact_contents(result: &str) -> String {
    format!("{}\n", result)
}

fn artifact_error(path: &Path, source: std::io::Error) -> DriverError {
    DriverError::Artifact {
        path: path.to_path_buf(),
        source,
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| artifact_error(path, source))?;
    }
    Ok(())
}

async fn create_artifact(path: &Path) -> Result<tokio::fs::File> {
    ensure_parent(path).await?;
    tokio::fs::File::create(path)
        .await
        .map_err(|source| artifact_error(path, source))
}

async fn write_atomic(path: &Path, contents: &str) -> Result<usize> {
    ensure_parent(path).await?;
    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    tokio::fs::write(&partial, contents.as_bytes())
        .await
        .map_err(|source| artifact_error(&partial, source))?;
    tokio::fs::rename(&partial, path)
        .await
        .map_err(|source| artifact_error(path, source))?;
    Ok(contents.len())
}
