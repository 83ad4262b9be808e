//! Calibration flows against the scripted driver.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use pretty_assertions::assert_eq;

use common::{dead_address, DriverStub, CALIBRATION_RESULT};
use threadproto::{CalibrationState, ClientConfig, DriverError, Session};

async fn connected(stub: &DriverStub) -> Session {
    let session = Session::new(stub.config());
    session.connect().await.unwrap();
    session
}

#[tokio::test]
async fn background_flow_persists_result() {
    let stub = DriverStub::start("tcp://127.0.0.1:9").await;
    let session = connected(&stub).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("calibration.txt");

    session.start_calibration(Duration::ZERO, &path).await.unwrap();
    let state = session.wait_for_calibration().await;

    let CalibrationState::Persisted { path: written, bytes, .. } = &state else {
        panic!("expected persisted, got {state:?}");
    };
    assert_eq!(written, &path);
    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(!contents.is_empty());
    assert_eq!(contents, format!("{}\n", CALIBRATION_RESULT));
    assert_eq!(*bytes, contents.len());
    assert_eq!(stub.ops(), vec![2, 3]);
}

#[tokio::test]
async fn unanswered_end_leaves_empty_artifact_and_failed_state() {
    let stub = DriverStub::start("tcp://127.0.0.1:9").await;
    stub.state.answer_end_calibration.store(false, Ordering::SeqCst);
    let session = connected(&stub).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("calibration.txt");

    session.start_calibration(Duration::ZERO, &path).await.unwrap();
    let state = session.wait_for_calibration().await;

    let CalibrationState::Failed { reason } = &state else {
        panic!("expected failed, got {state:?}");
    };
    assert!(reason.contains("Timed out"), "{reason}");
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
}

#[tokio::test]
async fn second_start_is_rejected_until_first_finishes() {
    let stub = DriverStub::start("tcp://127.0.0.1:9").await;
    let session = connected(&stub).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("calibration.txt");

    session.start_calibration(Duration::from_secs(30), &path).await.unwrap();
    assert!(matches!(session.calibration_state(), CalibrationState::Waiting { .. }));

    let err = session
        .start_calibration(Duration::ZERO, &path)
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::AlreadyCalibrating));
    assert!(err.is_recoverable());

    let err = session.calibrate(Duration::ZERO, &path).await.unwrap_err();
    assert!(matches!(err, DriverError::AlreadyCalibrating));

    session.cancel_calibration();
    let state = session.wait_for_calibration().await;
    assert_eq!(
        state,
        CalibrationState::Failed {
            reason: "cancelled".to_string()
        }
    );
    // Only the first start reached the driver
    assert_eq!(stub.ops(), vec![2]);

    session.start_calibration(Duration::ZERO, &path).await.unwrap();
    assert!(matches!(
        session.wait_for_calibration().await,
        CalibrationState::Persisted { .. }
    ));
}

#[tokio::test]
async fn blocking_flow_writes_whole_result() {
    let stub = DriverStub::start("tcp://127.0.0.1:9").await;
    let session = connected(&stub).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("calibration.txt");

    let written = session.calibrate(Duration::from_millis(20), &path).await.unwrap();
    assert_eq!(written, path);
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        format!("{}\n", CALIBRATION_RESULT)
    );
    assert!(matches!(session.calibration_state(), CalibrationState::Persisted { .. }));

    let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(leftovers.len(), 1);
}

#[tokio::test]
async fn blocking_flow_failure_writes_nothing() {
    let stub = DriverStub::start("tcp://127.0.0.1:9").await;
    stub.state.answer_end_calibration.store(false, Ordering::SeqCst);
    let session = connected(&stub).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("calibration.txt");

    let err = session.calibrate(Duration::ZERO, &path).await.unwrap_err();
    assert!(matches!(err, DriverError::Timeout(_)), "{err:?}");
    assert!(!path.exists());
    assert!(matches!(session.calibration_state(), CalibrationState::Failed { .. }));
}

#[tokio::test]
async fn rejected_calibration_file() {
    let stub = DriverStub::start("tcp://127.0.0.1:9").await;
    let session = connected(&stub).await;

    session
        .load_calibration_file(std::path::Path::new("/data/good.txt"))
        .await
        .unwrap();

    let err = session
        .load_calibration_file(std::path::Path::new("/data/old.bad"))
        .await
        .unwrap_err();
    match err {
        DriverError::BadCalibrationFile { path, reason } => {
            assert_eq!(path, std::path::Path::new("/data/old.bad"));
            assert_eq!(reason, "corrupt calibration data");
        }
        other => panic!("expected BadCalibrationFile, got {other:?}"),
    }

    // The channel is still usable afterwards
    assert_eq!(session.battery_life().await.unwrap(), 87);
    assert_eq!(
        stub.requests()[..2].to_vec(),
        vec![
            (4, "/data/good.txt".to_string()),
            (4, "/data/old.bad".to_string())
        ]
    );
}

#[tokio::test]
async fn calibration_queries() {
    let stub = DriverStub::start("tcp://127.0.0.1:9").await;
    let session = connected(&stub).await;

    assert!(!session.is_calibrated().await);
    stub.state.calibrated.store(true, Ordering::SeqCst);
    assert!(session.is_calibrated().await);
    assert!(session.calibration_status().await.unwrap());

    *stub.state.flag_override.lock().unwrap() = Some("yes, mostly".to_string());
    let err = session.calibration_status().await.unwrap_err();
    assert!(matches!(err, DriverError::ProtocolViolation(_)), "{err:?}");
    assert!(!session.is_calibrated().await);
}

#[tokio::test]
async fn unreachable_driver_reads_as_uncalibrated() {
    let address = dead_address().await;
    let session = Session::new(
        ClientConfig::new(&address).with_connect_timeout(Duration::from_millis(300)),
    );

    assert!(matches!(
        session.connect().await,
        Err(DriverError::ConnectFailed(_))
    ));
    assert!(!session.is_calibrated().await);
    assert!(matches!(
        session.calibration_status().await,
        Err(DriverError::NotConnected)
    ));
}

#[tokio::test]
async fn abandoned_blocking_calibration_can_be_retried() {
    let stub = DriverStub::start("tcp://127.0.0.1:9").await;
    let session = connected(&stub).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("calibration.txt");

    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), session.calibrate(Duration::from_secs(5), &path))
            .await;
    assert!(abandoned.is_err());
    assert_eq!(
        session.calibration_state(),
        CalibrationState::Failed {
            reason: "cancelled".to_string()
        }
    );

    let written = session.calibrate(Duration::ZERO, &path).await.unwrap();
    assert_eq!(written, path);
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        format!("{}\n", CALIBRATION_RESULT)
    );
}
