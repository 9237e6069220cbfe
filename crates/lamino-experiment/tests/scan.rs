//! Full runs against a simulated session.

use std::sync::Arc;
use std::time::Duration;

use lamino_core::{DeviceError, ShutterState};
use lamino_experiment::walker::MANIFEST_FILE;
use lamino_experiment::{
    sequence_from_session, Experiment, MemorySink, Outcome, ScanManifest, Walker,
};
use lamino_hardware::config::{load_session_config_from_str, ScanMode};
use lamino_hardware::Session;

const SESSION: &str = r#"
[session]
name = "scan-test"

[motors.rot]
type = "mock"
kind = "rotation"
velocity = 1000.0

[motors.flat]
type = "bliss"
kind = "linear"

[motors.flat.axis]
velocity = 1000.0

[shutter]
transition = "0s"

[camera]
type = "mock"
width = 8
height = 8
frame_rate = 100.0

[scan]
rotation_motor = "rot"
flat_motor = "flat"
flat_position = 5.0
radio_position = 0.0
num_darks = 2
num_flats = 3
num_projections = 10
angular_range = 10.0
"#;

async fn open() -> Session {
    let config = load_session_config_from_str(SESSION).unwrap();
    Session::open(config).await.unwrap()
}

#[tokio::test]
async fn stepped_scan_writes_tiffs_and_manifest() {
    let session = open().await;
    let dir = tempfile::tempdir().unwrap();
    let sequence = sequence_from_session(&session, ScanMode::Stepped).unwrap();
    let experiment = Experiment::new("scan-test", sequence, Arc::new(Walker::new(dir.path())))
        .with_storage_ring(session.storage_ring());

    let manifest = experiment.run().await.unwrap();
    assert_eq!(manifest.scan, "scan_0001");
    assert_eq!(manifest.sequence, "stepped-laminography");
    assert_eq!(manifest.frames["darks"], 2);
    assert_eq!(manifest.frames["flats"], 3);
    assert_eq!(manifest.frames["radios"], 10);
    assert_eq!(manifest.parameters["num_projections"], 10);
    assert_eq!(manifest.beam.as_ref().map(|b| b.current), Some(200.0));

    let scan = dir.path().join("scan_0001");
    assert!(scan.join("darks/frame_000001.tif").is_file());
    assert!(scan.join("flats/frame_000002.tif").is_file());
    assert!(scan.join("radios/frame_000009.tif").is_file());
    let written: ScanManifest =
        serde_json::from_str(&std::fs::read_to_string(scan.join(MANIFEST_FILE)).unwrap()).unwrap();
    assert_eq!(written.outcome, Outcome::Completed);

    assert_eq!(session.shutter().state().await.unwrap(), ShutterState::Closed);
    let rot = session.motor("rot").unwrap();
    assert!(rot.position().await.unwrap().abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn continuous_scan_runs_every_acquisition() {
    let session = open().await;
    let sink = Arc::new(MemorySink::new());
    let sequence = sequence_from_session(&session, ScanMode::Continuous).unwrap();
    let experiment = Experiment::new("scan-test", sequence, sink.clone());

    let manifest = experiment.run().await.unwrap();
    assert_eq!(manifest.sequence, "continuous-laminography");
    assert_eq!(manifest.frames["radios"], 10);
    assert_eq!(sink.count("darks"), 2);
    assert_eq!(sink.count("flats"), 3);
    assert_eq!(session.shutter().state().await.unwrap(), ShutterState::Closed);
}

#[tokio::test(start_paused = true)]
async fn abort_mid_scan_is_recorded() {
    let session = open().await;
    let sink = Arc::new(MemorySink::new());
    let sequence = sequence_from_session(&session, ScanMode::Continuous).unwrap();
    let experiment = Arc::new(Experiment::new("scan-test", sequence, sink.clone()));
    let abort = experiment.abort_handle();

    let run = {
        let experiment = experiment.clone();
        tokio::spawn(async move { experiment.run().await })
    };
    // Radios start after a one second ramp.
    tokio::time::sleep(Duration::from_millis(500)).await;
    abort.abort();

    let err = run.await.unwrap().unwrap_err();
    assert!(DeviceError::is_abort(&err));
    let manifest = &sink.manifests()[0];
    assert_eq!(manifest.outcome, Outcome::Aborted);
    assert_eq!(sink.count("radios"), 0);
    assert_eq!(session.shutter().state().await.unwrap(), ShutterState::Closed);
    let rot = session.motor("rot").unwrap();
    assert!(rot.position().await.unwrap().abs() < 1e-9);
}

#[tokio::test]
async fn sequence_resolves_scan_motors() {
    let mut config = load_session_config_from_str(SESSION).unwrap();
    config.scan.rotation_motor = "flat".into();
    let session = Session::open(config).await.unwrap();
    // Bliss axes have velocity control.
    assert!(sequence_from_session(&session, ScanMode::Continuous).is_ok());

    let mut config = load_session_config_from_str(SESSION).unwrap();
    config.scan.flat_motor = "missing".into();
    let session = Session::open(config).await.unwrap();
    assert!(sequence_from_session(&session, ScanMode::Stepped).is_err());
}
