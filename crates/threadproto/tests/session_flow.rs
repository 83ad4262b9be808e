//! End-to-end session scenarios.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use common::{telemetry_feed, DriverStub, CALIBRATION_RESULT};
use threadproto::{
    CalibrationState, ConnectionState, DriverError, GestureKind, RecordingState, Session,
    TelemetryEndpoint,
};

#[tokio::test]
async fn connect_poll_calibrate_listen_close() {
    let (telemetry, _feed) = telemetry_feed(
        b"4 0:12,1:7,0:3\n1 0:1,0:1,0:1\n".to_vec(),
        Duration::from_millis(200),
    )
    .await;
    let stub = DriverStub::start(&telemetry).await;
    let session = Session::new(stub.config());

    let endpoint = session.connect().await.unwrap();
    assert!(matches!(endpoint, TelemetryEndpoint::Tcp(_)));
    assert_eq!(session.telemetry_endpoint(), Some(endpoint));
    assert_eq!(session.connection_state().await, ConnectionState::Connected);

    assert!(!session.is_glove_connected().await);
    stub.state.glove_connected.store(true, Ordering::SeqCst);
    assert!(session.is_glove_connected().await);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("calibration.txt");
    session.start_calibration(Duration::ZERO, &path).await.unwrap();
    assert!(matches!(
        session.wait_for_calibration().await,
        CalibrationState::Persisted { .. }
    ));
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        format!("{}\n", CALIBRATION_RESULT)
    );

    let mut gestures = session.spawn_listener().unwrap();
    let first = gestures.recv().await.unwrap();
    let second = gestures.recv().await.unwrap();
    assert_eq!(first.kind, GestureKind::Pan);
    assert_eq!(first.vector(), [12, -7, 3]);
    assert_eq!(second.kind, GestureKind::ZoomIn);

    session.close().await;
    assert_eq!(session.connection_state().await, ConnectionState::Disconnected);
    assert!(session.telemetry_endpoint().is_none());
    assert_eq!(stub.ops(), vec![6, 6, 2, 3]);
}

#[tokio::test]
async fn telemetry_runs_beside_control_queries() {
    let mut lines = String::new();
    for i in 0..50 {
        lines.push_str(&format!("3 0:{},0:0,0:0\n", i));
    }
    let (telemetry, _feed) = telemetry_feed(lines.into_bytes(), Duration::from_millis(100)).await;
    let stub = DriverStub::start(&telemetry).await;
    stub.set_delay(Duration::from_millis(5));

    let session = Arc::new(Session::new(stub.config()));
    session.connect().await.unwrap();

    let listener = {
        let session = session.clone();
        tokio::spawn(async move {
            let mut xs = Vec::new();
            let summary = session.listen(|event| xs.push(event.x)).await;
            (summary, xs)
        })
    };

    for _ in 0..5 {
        assert!(!session.is_calibrated().await);
        assert_eq!(session.battery_life().await.unwrap(), 87);
    }

    let (summary, xs) = listener.await.unwrap();
    assert_eq!(summary.unwrap().delivered, 50);
    assert_eq!(xs, (0..50).collect::<Vec<i32>>());
}

#[tokio::test]
async fn reconnect_after_timeout() {
    let stub = DriverStub::start("tcp://127.0.0.1:9").await;
    let session = Session::new(stub.config());
    session.connect().await.unwrap();

    stub.set_delay(Duration::from_secs(1));
    let err = session.battery_life().await.unwrap_err();
    assert!(matches!(err, DriverError::Timeout(_)), "{err:?}");
    assert_eq!(session.connection_state().await, ConnectionState::Failed);

    let err = session.battery_life().await.unwrap_err();
    assert!(matches!(err, DriverError::Channel(_)), "{err:?}");
    assert!(!session.is_glove_connected().await);

    stub.set_delay(Duration::ZERO);
    session.connect().await.unwrap();
    assert_eq!(session.connection_state().await, ConnectionState::Connected);
    assert_eq!(session.battery_life().await.unwrap(), 87);
    assert_eq!(stub.state.handshakes.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn battery_payload_is_validated() {
    let stub = DriverStub::start("tcp://127.0.0.1:9").await;
    let session = Session::new(stub.config());
    session.connect().await.unwrap();

    *stub.state.battery.lock().unwrap() = "140".to_string();
    let err = session.battery_life().await.unwrap_err();
    assert!(matches!(err, DriverError::ProtocolViolation(_)), "{err:?}");
    assert_eq!(session.connection_state().await, ConnectionState::Connected);
}

#[tokio::test]
async fn recording_bracket() {
    let stub = DriverStub::start("tcp://127.0.0.1:9").await;
    let session = Session::new(stub.config());
    session.connect().await.unwrap();
    let path = std::path::Path::new("/tmp/gestures.csv");

    assert!(!session.end_gesture_recording(path).await);
    assert!(session.start_gesture_recording().await);
    assert!(matches!(
        session.recording_state().await,
        RecordingState::Recording { .. }
    ));
    // Already recording: refused locally
    assert!(!session.start_gesture_recording().await);

    stub.state.reject_end_recording.store(true, Ordering::SeqCst);
    assert!(!session.end_gesture_recording(path).await);
    assert!(matches!(
        session.recording_state().await,
        RecordingState::Recording { .. }
    ));

    stub.state.reject_end_recording.store(false, Ordering::SeqCst);
    assert!(session.end_gesture_recording(path).await);
    assert_eq!(session.recording_state().await, RecordingState::Idle);

    assert_eq!(
        stub.requests(),
        vec![
            (7, String::new()),
            (8, "/tmp/gestures.csv".to_string()),
            (8, "/tmp/gestures.csv".to_string()),
        ]
    );
}

#[tokio::test]
async fn operations_before_connect() {
    let session = Session::new(threadproto::ClientConfig::default());
    assert!(!session.is_glove_connected().await);
    assert!(!session.start_gesture_recording().await);
    assert!(matches!(
        session.load_calibration_file(std::path::Path::new("/tmp/c.txt")).await,
        Err(DriverError::NotConnected)
    ));
    assert!(matches!(session.listen(|_| {}).await, Err(DriverError::NotConnected)));
    session.close().await;
}

#[tokio::test]
async fn abandoned_query_never_answers_the_next_one() {
    let stub = DriverStub::start("tcp://127.0.0.1:9").await;
    stub.state.calibrated.store(true, Ordering::SeqCst);
    stub.set_delay(Duration::from_millis(100));
    let session = Session::new(stub.config());
    session.connect().await.unwrap();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(20), session.calibration_status()).await;
    assert!(abandoned.is_err());
    assert_eq!(session.connection_state().await, ConnectionState::Failed);

    let err = session.glove_connection_status().await.unwrap_err();
    assert!(matches!(err, DriverError::Channel(_)), "{err:?}");

    session.connect().await.unwrap();
    assert!(!session.glove_connection_status().await.unwrap());
}

#[tokio::test]
async fn failed_reconnect_forgets_old_telemetry_endpoint() {
    let stub = DriverStub::start("tcp://127.0.0.1:9").await;
    let session = Session::new(stub.config());
    session.connect().await.unwrap();
    assert!(session.telemetry_endpoint().is_some());

    // A transport whose peer hangs up without answering the handshake
    let (client, driver) = tokio::io::duplex(64);
    drop(driver);
    let err = session.connect_with(Box::new(client)).await.unwrap_err();
    assert!(matches!(err, DriverError::ConnectFailed(_)), "{err:?}");

    assert_eq!(session.connection_state().await, ConnectionState::Disconnected);
    assert!(session.telemetry_endpoint().is_none());
    assert!(matches!(session.spawn_listener(), Err(DriverError::NotConnected)));
}

#[tokio::test]
async fn ambiguous_protocol_table_is_refused_at_connect() {
    let stub = DriverStub::start("tcp://127.0.0.1:9").await;
    let mut table = threadproto::ProtocolTable::canonical();
    table.ops.end_recording = table.ops.start_recording;
    let session = Session::new(stub.config().with_protocol(table));

    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, DriverError::Config(_)), "{err:?}");
    assert!(stub.state.handshakes.lock().unwrap().is_empty());
}
