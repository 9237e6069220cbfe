//! Sessions opened against the in-process Micos simulator.

use lamino_core::{DeviceError, Motor, MotorState, ShutterState, StorageRingState};
use lamino_hardware::config::load_session_config_from_str;
use lamino_hardware::registry::SessionError;
use lamino_hardware::Session;

const SESSION: &str = r#"
[session]
name = "session-test"

[micos.motion_server]
simulate = true

[micos.motion_server.settings]
sleep_between = "2ms"
read_timeout = "1s"

[[micos.motion_server.controllers]]
name = "Sam"
axes = 6
speed = 500.0

[[micos.motion_server.controllers]]
name = "Cont2"
axes = 2
speed = 500.0

[micos.unused]
host = "192.0.2.1"

[motors.lamino_rot]
type = "micos"
server = "motion_server"
controller = "Sam"
index = 5
kind = "rotation"
continuous = true

[motors.lamino_tilt]
type = "micos"
server = "motion_server"
controller = "Cont2"
index = 1
kind = "rotation"

[motors.sx45]
type = "micos"
server = "motion_server"
controller = "Sam"
index = 1
kind = "linear"

[motors.sy45]
type = "micos"
server = "motion_server"
controller = "Sam"
index = 2
kind = "linear"

[motors.px45]
type = "mock"
kind = "linear"
velocity = 1000.0

[motors.py45]
type = "mock"
kind = "linear"
velocity = 1000.0

[motors.flat_motor]
type = "bliss"
kind = "linear"

[motors.flat_motor.axis]
velocity = 1000.0

[magnets.px45]
motor = "px45"
in_position = 0.0
out_position = 5.0

[magnets.py45]
motor = "py45"
in_position = 0.0
out_position = 5.0

[shutter]
transition = "0s"

[sample_translation]

[scan]
mode = "continuous"
rotation_motor = "lamino_rot"
flat_motor = "flat_motor"
flat_position = 10.0
radio_position = 0.0
"#;

async fn open() -> Session {
    let config = load_session_config_from_str(SESSION).unwrap();
    Session::open(config).await.unwrap()
}

#[tokio::test]
async fn opens_simulated_session() {
    let session = open().await;
    assert_eq!(
        session.motor_names(),
        vec!["flat_motor", "lamino_rot", "lamino_tilt", "px45", "py45", "sx45", "sy45"]
    );
    assert_eq!(session.simulators().len(), 1);

    let rot = session.continuous_motor("lamino_rot").unwrap();
    rot.set_position(12.5).await.unwrap();
    assert!((rot.position().await.unwrap() - 12.5).abs() < 1e-3);
    assert_eq!(rot.state().await.unwrap(), MotorState::Standby);

    let simulator = &session.simulators()[0];
    assert!((simulator.position("Sam", 5).unwrap() - 12.5).abs() < 1e-3);
}

#[tokio::test]
async fn capability_lookup() {
    let session = open().await;
    assert!(matches!(
        session.continuous_motor("lamino_tilt"),
        Err(SessionError::MissingCapability { .. })
    ));
    assert!(matches!(
        session.motor("nope"),
        Err(SessionError::UnknownDevice { kind: "motor", .. })
    ));
    assert!(session.continuous_motor("flat_motor").is_ok());
    assert!(session.magnet("px45").is_ok());
}

#[tokio::test]
async fn beam_devices() {
    let session = open().await;
    let shutter = session.shutter();
    assert_eq!(shutter.state().await.unwrap(), ShutterState::Closed);
    shutter.open().await.unwrap();
    assert_eq!(shutter.state().await.unwrap(), ShutterState::Open);

    let ring = session.storage_ring();
    assert_eq!(ring.current().await.unwrap(), 200.0);
    assert_eq!(ring.energy().await.unwrap(), 6.0);
    assert_eq!(ring.state().await.unwrap(), StorageRingState::UserOperation);
}

#[tokio::test]
async fn sample_translation_through_simulator() {
    let session = open().await;
    let stage = session.sample_translation().unwrap();
    stage.move_sample_x(1.0).await.unwrap();

    let sx = session.motor("sx45").unwrap().position().await.unwrap();
    let sy = session.motor("sy45").unwrap().position().await.unwrap();
    assert!((sx + 2f64.sqrt()).abs() < 1e-3, "sx45 at {}", sx);
    assert!((sy + 2f64.sqrt()).abs() < 1e-3, "sy45 at {}", sy);

    session.magnet("py45").unwrap().move_out().await.unwrap();
    let err = stage.move_sample_y(1.0).await.unwrap_err();
    assert_eq!(err.downcast_ref::<DeviceError>(), Some(&DeviceError::MagnetsOut));
}

#[tokio::test]
async fn example_configuration_is_valid() {
    let config = load_session_config_from_str(include_str!("../../../config/lamino.toml")).unwrap();
    assert_eq!(config.scan.rotation_motor, "lamino_rot");
    assert!(config.sample_translation.is_some());
}
