//! A client session with the glove driver.
//!
//! The session owns the control channel, the calibration and recording
//! state, and the cancellation scope for every telemetry task it spawns.
//! All methods take `&self` so a session can be shared behind an `Arc`
//! between a telemetry consumer and control-side callers.
//!
//! ```ignore
//! let session = Session::new(ClientConfig::default());
//! session.connect().await?;
//! if !session.is_calibrated().await {
//!     session.calibrate(Duration::from_secs(5), &path).await?;
//! }
//! let mut gestures = session.spawn_listener()?;
//! while let Some(event) = gestures.recv().await { /* ... */ }
//! session.close().await;
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::calibration::{CalibrationController, CalibrationState};
use crate::config::ClientConfig;
use crate::control::{ConnectionState, ControlChannel, SharedChannel};
use crate::error::{DriverError, Result};
use crate::frame::GestureEvent;
use crate::protocol::Operation;
use crate::recording::{RecordingController, RecordingState};
use crate::telemetry::{ListenSummary, TelemetryReader, TelemetryStream};
use crate::transport::{BoxedDuplex, TelemetryEndpoint};

pub struct Session {
    config: ClientConfig,
    session_id: Uuid,
    channel: SharedChannel,
    telemetry: RwLock<Option<TelemetryEndpoint>>,
    calibration: CalibrationController,
    recording: RecordingController,
    tasks: Mutex<CancellationToken>,
}

impl Session {
    pub fn new(config: ClientConfig) -> Self {
        let session_id = Uuid::new_v4();
        debug!("{}: New session {}", config.name, session_id);
        Self {
            calibration: CalibrationController::new(&config.name),
            recording: RecordingController::new(&config.name),
            config,
            session_id,
            channel: SharedChannel::new(),
            telemetry: RwLock::new(None),
            tasks: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Telemetry channel named by the most recent handshake.
    pub fn telemetry_endpoint(&self) -> Option<TelemetryEndpoint> {
        self.telemetry.read().ok().and_then(|endpoint| endpoint.clone())
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.channel.state().await
    }

    /// Connect over TCP and perform the handshake.
    ///
    /// Any previous channel is closed first, so this is also how a session
    /// recovers after a timeout or protocol violation.
    pub async fn connect(&self) -> Result<TelemetryEndpoint> {
        self.drop_channel().await;
        let (channel, identifier) = ControlChannel::connect(&self.config, self.session_id).await?;
        self.install(channel, &identifier).await
    }

    /// Perform the handshake over an already-open transport.
    pub async fn connect_with(&self, stream: BoxedDuplex) -> Result<TelemetryEndpoint> {
        self.drop_channel().await;
        let (channel, identifier) =
            ControlChannel::connect_with(stream, &self.config, self.session_id).await?;
        self.install(channel, &identifier).await
    }

    async fn install(&self, channel: ControlChannel, identifier: &str) -> Result<TelemetryEndpoint> {
        let endpoint = match TelemetryEndpoint::parse(identifier) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                channel.close().await;
                return Err(DriverError::ConnectFailed(e.to_string()));
            }
        };

        self.channel.replace(channel).await;
        if let Ok(mut slot) = self.telemetry.write() {
            *slot = Some(endpoint.clone());
        }
        if let Ok(mut tasks) = self.tasks.lock() {
            if tasks.is_cancelled() {
                *tasks = CancellationToken::new();
            }
        }
        Ok(endpoint)
    }

    async fn drop_channel(&self) {
        if let Some(previous) = self.channel.take().await {
            debug!(
                "{}: Replacing channel in state {}",
                self.config.name,
                previous.state()
            );
            previous.close().await;
        }
        if let Ok(mut slot) = self.telemetry.write() {
            *slot = None;
        }
    }

    /// Send goodbye, close the control channel and stop every task this
    /// session spawned.
    pub async fn close(&self) {
        self.cancel_tasks();
        self.calibration.cancel();
        self.drop_channel().await;
        info!("{}: Session {} shut down", self.config.name, self.session_id);
    }

    fn cancel_tasks(&self) {
        if let Ok(tasks) = self.tasks.lock() {
            tasks.cancel();
        }
    }

    fn child_token(&self) -> CancellationToken {
        match self.tasks.lock() {
            Ok(tasks) => tasks.child_token(),
            Err(_) => CancellationToken::new(),
        }
    }

    // --- device status ---

    /// Remaining battery as a percentage.
    pub async fn battery_life(&self) -> Result<u8> {
        let payload = self.channel.request_ok(Operation::BatteryLife, "").await?;
        match payload.trim().parse::<u8>() {
            Ok(percent) if percent <= 100 => Ok(percent),
            _ => Err(DriverError::ProtocolViolation(format!(
                "battery_life answered {:?}, expected 0-100",
                payload
            ))),
        }
    }

    /// Strict glove query: unknown payloads are protocol violations.
    pub async fn glove_connection_status(&self) -> Result<bool> {
        self.channel.request_flag(Operation::IsGloveConnected).await
    }

    /// Lenient glove query: every failure reads as "not connected".
    pub async fn is_glove_connected(&self) -> bool {
        match self.glove_connection_status().await {
            Ok(connected) => connected,
            Err(e) => {
                warn!("{}: Glove query failed, assuming disconnected: {}", self.config.name, e);
                false
            }
        }
    }

    // --- calibration ---

    pub async fn calibration_status(&self) -> Result<bool> {
        self.calibration.status(&self.channel).await
    }

    pub async fn is_calibrated(&self) -> bool {
        self.calibration.is_calibrated(&self.channel).await
    }

    /// Calibrate inline; the artifact is written only once the full result
    /// has arrived.
    pub async fn calibrate(&self, delay: Duration, path: &Path) -> Result<PathBuf> {
        self.calibration
            .calibrate_blocking(&self.channel, delay, path)
            .await
    }

    /// Start a background calibration; observe it with
    /// [`Self::calibration_state`] or [`Self::wait_for_calibration`].
    pub async fn start_calibration(&self, delay: Duration, path: &Path) -> Result<()> {
        self.calibration.start(&self.channel, delay, path).await
    }

    pub fn cancel_calibration(&self) {
        self.calibration.cancel();
    }

    pub fn calibration_state(&self) -> CalibrationState {
        self.calibration.state()
    }

    pub fn subscribe_calibration(&self) -> tokio::sync::watch::Receiver<CalibrationState> {
        self.calibration.subscribe()
    }

    pub async fn wait_for_calibration(&self) -> CalibrationState {
        self.calibration.wait().await
    }

    pub async fn load_calibration_file(&self, path: &Path) -> Result<()> {
        self.calibration.load_file(&self.channel, path).await
    }

    // --- recording ---

    pub async fn start_gesture_recording(&self) -> bool {
        self.recording.start(&self.channel).await
    }

    pub async fn end_gesture_recording(&self, path: &Path) -> bool {
        self.recording.end(&self.channel, path).await
    }

    pub async fn recording_state(&self) -> RecordingState {
        self.recording.state().await
    }

    // --- telemetry ---

    pub fn telemetry_reader(&self) -> Result<TelemetryReader> {
        let endpoint = self.telemetry_endpoint().ok_or(DriverError::NotConnected)?;
        Ok(TelemetryReader::new(endpoint, &self.config))
    }

    /// Invoke `on_event` for every gesture until the telemetry channel
    /// closes or the session is closed.
    pub async fn listen<F>(&self, on_event: F) -> Result<ListenSummary>
    where
        F: FnMut(GestureEvent) + Send,
    {
        let reader = self.telemetry_reader()?;
        reader.listen(on_event, self.child_token()).await
    }

    /// Read telemetry on a background task; stopped by [`Self::close`].
    pub fn spawn_listener(&self) -> Result<TelemetryStream> {
        let reader = self.telemetry_reader()?;
        Ok(reader.spawn(self.child_token()))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel_tasks();
    }
}
