//! Session configuration.
//!
//! A session file declares every device of the beamline and the scan to run:
//!
//! 1. **Schema** - serde types with `serde_valid` field ranges
//! 2. **Validation** - cross-section references and capability checks
//! 3. **Loader** - figment (TOML file + `LAMINO_` environment overrides)
//!
//! # Example Configuration
//!
//! ```toml
//! [session]
//! name = "lamino"
//! data_root = "/data/visitor/ma1234/id19"
//!
//! [micos.motion_server]
//! host = "160.103.39.110"
//! port = 6542
//!
//! [motors.lamino_rot]
//! type = "micos"
//! server = "motion_server"
//! controller = "Sam"
//! index = 5
//! kind = "rotation"
//! continuous = true
//!
//! [scan]
//! mode = "continuous"
//! rotation_motor = "lamino_rot"
//! flat_motor = "flat"
//! flat_position = 10.0
//! radio_position = 0.0
//! ```

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_session_config, load_session_config_from_str, ENV_PREFIX};
pub use schema::{
    CameraConfig, MagnetConfig, MicosServerConfig, MotorConfig, SampleTranslationConfig,
    ScanConfig, ScanMode, SessionConfig, SessionInfo, ShutterConfig, SimulatedControllerConfig,
    StorageRingConfig,
};
pub use validation::validate_session_config;
