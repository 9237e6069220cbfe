//! Schema of the session configuration file.
//!
//! ```toml
//! [session]              # Name and data directory
//! [micos.<server>]       # Micos motion servers (or simulators)
//! [motors.<name>]        # Motors by name, tagged by `type`
//! [magnets.<name>]       # Magnet pushers over linear motors
//! [shutter]              # Beam shutter
//! [storage_ring]         # Machine information
//! [camera]               # Detector
//! [sample_translation]   # 45° pusher stage (optional)
//! [scan]                 # Laminography scan parameters
//! ```
//!
//! See `config/lamino.toml` for a complete example.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use lamino_core::limits::{
    DEFAULT_ADDITIONAL_MARGIN, DEFAULT_RETURN_VELOCITY, DEFAULT_SETTLE_TIMEOUT,
    DEFAULT_SHUTTER_TIMEOUT,
};
use lamino_core::MotorKind;
use lamino_driver_bliss::SimulatedAxisConfig;
use lamino_driver_micos::MicosConnectionSettings;
use lamino_driver_mock::MockCameraConfig;
use serde::{Deserialize, Serialize};
use serde_valid::Validate;

use crate::magnet::MagnetPositions;

// =============================================================================
// Top-Level Config
// =============================================================================

/// Complete session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SessionConfig {
    /// Session identity and data location
    #[validate]
    pub session: SessionInfo,

    /// Micos motion servers by name
    #[serde(default)]
    pub micos: HashMap<String, MicosServerConfig>,

    /// Motors by name
    #[serde(default)]
    pub motors: HashMap<String, MotorConfig>,

    /// Magnet pushers by name
    #[serde(default)]
    pub magnets: HashMap<String, MagnetConfig>,

    /// Beam shutter
    #[serde(default)]
    #[validate]
    pub shutter: ShutterConfig,

    /// Storage ring telemetry source
    #[serde(default)]
    #[validate]
    pub storage_ring: StorageRingConfig,

    /// Detector
    #[serde(default)]
    pub camera: CameraConfig,

    /// Sample stage on the 45° pushers
    #[serde(default)]
    #[validate]
    pub sample_translation: Option<SampleTranslationConfig>,

    /// Scan parameters
    #[validate]
    pub scan: ScanConfig,
}

/// `[session]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SessionInfo {
    /// Session name, used in logs and manifests
    #[validate(min_length = 1)]
    #[validate(max_length = 100)]
    pub name: String,

    /// Directory receiving scan data
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
}

fn default_data_root() -> PathBuf {
    PathBuf::from("data")
}

// =============================================================================
// Micos
// =============================================================================

/// One Micos motion server.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MicosServerConfig {
    /// Server host
    #[serde(default = "default_micos_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_micos_port")]
    #[validate(minimum = 1)]
    pub port: u16,

    /// Start an in-process simulator instead of connecting
    #[serde(default)]
    pub simulate: bool,

    /// Timing of the command/response exchange
    #[serde(default)]
    pub settings: MicosConnectionSettings,

    /// Controllers exposed by the simulator
    #[serde(default)]
    pub controllers: Vec<SimulatedControllerConfig>,
}

fn default_micos_host() -> String {
    "160.103.39.110".to_string()
}

fn default_micos_port() -> u16 {
    6542
}

/// Controller served by the Micos simulator.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SimulatedControllerConfig {
    /// Controller name, e.g. `Sam`
    #[validate(min_length = 1)]
    pub name: String,

    /// Number of axes
    #[validate(minimum = 1)]
    pub axes: usize,

    /// Initial speed of every axis (unit/s)
    #[serde(default = "default_sim_speed")]
    pub speed: f64,

    /// Initial acceleration of every axis (unit/s²)
    #[serde(default = "default_sim_acceleration")]
    pub acceleration: f64,
}

fn default_sim_speed() -> f64 {
    10.0
}

fn default_sim_acceleration() -> f64 {
    100.0
}

// =============================================================================
// Motors
// =============================================================================

/// Motor backend, selected by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MotorConfig {
    /// Axis of a Micos controller
    Micos {
        /// Name of the `[micos.<server>]` entry
        server: String,
        /// Controller name, e.g. `Sam`
        controller: String,
        /// 0-based axis index
        index: usize,
        /// Linear or rotation axis
        kind: MotorKind,
        /// Expose velocity control
        #[serde(default)]
        continuous: bool,
        /// Upper bound for moves and homing
        #[serde(with = "humantime_serde", default = "default_settle_timeout")]
        settle_timeout: Duration,
    },
    /// Simulated Bliss axis
    Bliss {
        /// Linear or rotation axis
        kind: MotorKind,
        /// Initial axis settings
        #[serde(default)]
        axis: SimulatedAxisConfig,
    },
    /// In-memory motor
    Mock {
        /// Linear or rotation axis
        kind: MotorKind,
        /// Start position
        #[serde(default)]
        position: f64,
        /// Velocity (unit/s)
        #[serde(default = "default_mock_velocity")]
        velocity: f64,
        /// Report the velocity as motion velocity
        #[serde(default)]
        motion_velocity: bool,
    },
}

impl MotorConfig {
    /// Axis geometry.
    pub fn kind(&self) -> MotorKind {
        match self {
            MotorConfig::Micos { kind, .. }
            | MotorConfig::Bliss { kind, .. }
            | MotorConfig::Mock { kind, .. } => *kind,
        }
    }

    /// True if the motor supports velocity control.
    pub fn is_continuous(&self) -> bool {
        match self {
            MotorConfig::Micos { continuous, .. } => *continuous,
            MotorConfig::Bliss { .. } | MotorConfig::Mock { .. } => true,
        }
    }
}

fn default_settle_timeout() -> Duration {
    DEFAULT_SETTLE_TIMEOUT
}

fn default_mock_velocity() -> f64 {
    10.0
}

/// Magnet pusher over a named linear motor.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MagnetConfig {
    /// Name of the pusher motor
    pub motor: String,

    /// Engaged and retracted positions
    #[serde(flatten)]
    #[validate]
    pub positions: MagnetPositions,
}

// =============================================================================
// Beam
// =============================================================================

/// Simulated Bliss shutter.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ShutterConfig {
    /// Device name
    #[validate(min_length = 1)]
    pub name: String,

    /// Upper bound for an open or close
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Blade travel time of the simulated device
    #[serde(with = "humantime_serde")]
    pub transition: Duration,
}

impl Default for ShutterConfig {
    fn default() -> Self {
        Self {
            name: "bsh2".to_string(),
            timeout: DEFAULT_SHUTTER_TIMEOUT,
            transition: Duration::from_millis(50),
        }
    }
}

/// Simulated machine information.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StorageRingConfig {
    /// Ring current (mA)
    #[validate(minimum = 0.0)]
    pub current: f64,

    /// Beam lifetime (s)
    #[validate(minimum = 0.0)]
    pub lifetime: f64,

    /// Operation mode code (1 = user operation)
    pub mode: i64,
}

impl Default for StorageRingConfig {
    fn default() -> Self {
        Self {
            current: 200.0,
            lifetime: 72_000.0,
            mode: 1,
        }
    }
}

/// Detector backend, selected by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CameraConfig {
    /// Software camera
    Mock(MockCameraConfig),
}

impl Default for CameraConfig {
    fn default() -> Self {
        CameraConfig::Mock(MockCameraConfig::default())
    }
}

// =============================================================================
// Sample Stage
// =============================================================================

/// Motors of the 45° pusher stage.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SampleTranslationConfig {
    /// Laminography tilt motor
    #[serde(default = "default_tilt")]
    pub tilt: String,
    /// Pusher x
    #[serde(default = "default_sx45")]
    pub sx45: String,
    /// Pusher y
    #[serde(default = "default_sy45")]
    pub sy45: String,
    /// Magnet on pusher x
    #[serde(default = "default_px45")]
    pub px45: String,
    /// Magnet on pusher y
    #[serde(default = "default_py45")]
    pub py45: String,
}

fn default_tilt() -> String {
    "lamino_tilt".to_string()
}
fn default_sx45() -> String {
    "sx45".to_string()
}
fn default_sy45() -> String {
    "sy45".to_string()
}
fn default_px45() -> String {
    "px45".to_string()
}
fn default_py45() -> String {
    "py45".to_string()
}

// =============================================================================
// Scan
// =============================================================================

/// Rotation during radiograph acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Stop at every projection angle
    Stepped,
    /// Rotate at constant velocity while the camera free-runs
    Continuous,
}

/// `[scan]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ScanConfig {
    /// Rotation mode
    #[serde(default = "default_mode")]
    pub mode: ScanMode,

    /// Motor rotating the sample
    pub rotation_motor: String,

    /// Motor moving the sample out of the beam for flats
    pub flat_motor: String,

    /// Flat motor position with the sample out of the beam
    pub flat_position: f64,

    /// Flat motor position with the sample in the beam
    pub radio_position: f64,

    /// Number of dark fields
    #[serde(default = "default_num_darks")]
    pub num_darks: usize,

    /// Number of flat fields
    #[serde(default = "default_num_flats")]
    pub num_flats: usize,

    /// Number of projections
    #[serde(default = "default_num_projections")]
    #[validate(minimum = 1)]
    pub num_projections: usize,

    /// Rotation covered by the projections (deg)
    #[serde(default = "default_angular_range")]
    #[validate(exclusive_minimum = 0.0)]
    pub angular_range: f64,

    /// Angle of the first projection (deg)
    #[serde(default)]
    pub start_angle: f64,

    /// Write every run into its own `scan_NNNN` directory
    #[serde(default = "default_separate_scans")]
    pub separate_scans: bool,

    /// Continuous rotation velocity (deg/s); derived from the frame rate if unset
    #[serde(default)]
    pub velocity: Option<f64>,

    /// Extra travel on both ends of a continuous scan (deg)
    #[serde(default = "default_additional_margin")]
    #[validate(minimum = 0.0)]
    pub additional_margin: f64,

    /// Velocity for returning to the start angle (deg/s)
    #[serde(default = "default_return_velocity")]
    #[validate(exclusive_minimum = 0.0)]
    pub return_velocity: f64,
}

fn default_mode() -> ScanMode {
    ScanMode::Stepped
}
fn default_num_darks() -> usize {
    50
}
fn default_num_flats() -> usize {
    51
}
fn default_num_projections() -> usize {
    3600
}
fn default_angular_range() -> f64 {
    360.0
}
fn default_separate_scans() -> bool {
    true
}
fn default_additional_margin() -> f64 {
    DEFAULT_ADDITIONAL_MARGIN
}
fn default_return_velocity() -> f64 {
    DEFAULT_RETURN_VELOCITY
}
