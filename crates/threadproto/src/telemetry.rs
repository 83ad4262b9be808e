//! Telemetry reader.
//!
//! Gesture events arrive as text lines on a channel separate from the control
//! channel. A malformed line is logged and skipped; it never ends the stream.
//! Reading stops when the channel closes or the cancellation token fires.

use tokio::io::{AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::{DriverError, Result};
use crate::frame::{decode_telemetry_line, GestureEvent};
use crate::transport::{LineReader, TelemetryEndpoint, TextEncoding};

/// Counts from one listening run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenSummary {
    /// Events handed to the consumer
    pub delivered: u64,
    /// Lines that failed to decode
    pub skipped: u64,
}

enum Sink<'a> {
    Callback(&'a mut (dyn FnMut(GestureEvent) + Send)),
    Queue(mpsc::Sender<GestureEvent>),
}

impl Sink<'_> {
    /// Hand over one event. `false` means the consumer is gone.
    async fn deliver(&mut self, event: GestureEvent) -> bool {
        match self {
            Sink::Callback(on_event) => {
                on_event(event);
                true
            }
            Sink::Queue(tx) => tx.send(event).await.is_ok(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryReader {
    name: String,
    endpoint: TelemetryEndpoint,
    encoding: TextEncoding,
    open_timeout: std::time::Duration,
    capacity: usize,
}

impl TelemetryReader {
    pub fn new(endpoint: TelemetryEndpoint, config: &ClientConfig) -> Self {
        Self {
            name: config.name.clone(),
            endpoint,
            encoding: config.encoding,
            open_timeout: config.connect_timeout,
            capacity: config.event_capacity,
        }
    }

    pub fn endpoint(&self) -> &TelemetryEndpoint {
        &self.endpoint
    }

    /// Open the endpoint and invoke `on_event` once per decoded gesture, in
    /// stream order, until the channel closes or `cancel` fires.
    pub async fn listen<F>(&self, mut on_event: F, cancel: CancellationToken) -> Result<ListenSummary>
    where
        F: FnMut(GestureEvent) + Send,
    {
        let reader = self.endpoint.open(self.open_timeout).await?;
        info!("{}: Listening for gestures on {}", self.name, self.endpoint);
        self.run(reader, Sink::Callback(&mut on_event), cancel).await
    }

    /// Like [`Self::listen`] over an already-open reader.
    pub async fn listen_on<R, F>(&self, reader: R, mut on_event: F, cancel: CancellationToken) -> Result<ListenSummary>
    where
        R: AsyncRead + Unpin + Send,
        F: FnMut(GestureEvent) + Send,
    {
        self.run(reader, Sink::Callback(&mut on_event), cancel).await
    }

    /// Read on a background task, delivering events through a bounded queue.
    pub fn spawn(self, cancel: CancellationToken) -> TelemetryStream {
        let (tx, rx) = mpsc::channel(self.capacity.max(1));
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let reader = self.endpoint.open(self.open_timeout).await?;
            info!("{}: Listening for gestures on {}", self.name, self.endpoint);
            self.run(reader, Sink::Queue(tx), task_cancel).await
        });
        TelemetryStream { rx, cancel, handle }
    }

    /// Like [`Self::spawn`] over an already-open reader.
    pub fn spawn_on<R>(self, reader: R, cancel: CancellationToken) -> TelemetryStream
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.capacity.max(1));
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move { self.run(reader, Sink::Queue(tx), task_cancel).await });
        TelemetryStream { rx, cancel, handle }
    }

    async fn run<R>(&self, reader: R, mut sink: Sink<'_>, cancel: CancellationToken) -> Result<ListenSummary>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut lines = LineReader::new(BufReader::new(reader), self.encoding);
        let mut summary = ListenSummary::default();

        loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("{}: Telemetry cancelled", self.name);
                    break;
                }
                line = lines.next_line() => line,
            };

            let text = match line {
                Ok(Some(Ok(text))) => text,
                Ok(Some(Err(e))) => {
                    summary.skipped += 1;
                    warn!("{}: Skipping undecodable telemetry line: {}", self.name, e);
                    continue;
                }
                Ok(None) => {
                    debug!("{}: Telemetry channel closed", self.name);
                    break;
                }
                Err(e) => {
                    return Err(DriverError::Channel(format!("telemetry read failed: {}", e)));
                }
            };

            if text.trim().is_empty() {
                continue;
            }

            match decode_telemetry_line(&text) {
                Ok(event) => {
                    trace!("{}: {:?}", self.name, event);
                    if !sink.deliver(event).await {
                        debug!("{}: Telemetry consumer dropped", self.name);
                        break;
                    }
                    summary.delivered += 1;
                }
                Err(e) => {
                    summary.skipped += 1;
                    warn!("{}: Skipping telemetry line {:?}: {}", self.name, text, e);
                }
            }
        }

        info!(
            "{}: Telemetry finished, {} delivered, {} skipped",
            self.name, summary.delivered, summary.skipped
        );
        Ok(summary)
    }
}

/// Handle to a background telemetry task.
#[derive(Debug)]
pub struct TelemetryStream {
    rx: mpsc::Receiver<GestureEvent>,
    cancel: CancellationToken,
    handle: JoinHandle<Result<ListenSummary>>,
}

impl TelemetryStream {
    /// Next event, or `None` once the task has stopped and the queue is drained.
    pub async fn recv(&mut self) -> Option<GestureEvent> {
        self.rx.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Consume as a `Stream`. The task stops when the stream is dropped.
    pub fn into_stream(self) -> ReceiverStream<GestureEvent> {
        ReceiverStream::new(self.rx)
    }

    /// Stop reading and wait for the task's summary.
    pub async fn join(self) -> Result<ListenSummary> {
        self.cancel.cancel();
        drop(self.rx);
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(DriverError::Channel(format!("telemetry task failed: {}", e))),
        }
    }
}
