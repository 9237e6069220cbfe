//! Beamline hardware assembly for lamino
//!
//! - [`config`]: TOML session configuration (figment, serde_valid)
//! - [`registry`]: builds a [`Session`] of live devices from a configuration
//! - [`pseudo`]: composite motors moving several axes as one
//! - [`magnet`]: magnet pushers that hold the sample stage
//! - [`sample_translation`]: sample moves in beamline coordinates through the
//!   45° pushers
//! - [`motions`]: direct relative pusher moves

pub mod config;
pub mod magnet;
pub mod motions;
pub mod pseudo;
pub mod registry;
pub mod sample_translation;

pub use config::{load_session_config, load_session_config_from_str, SessionConfig};
pub use magnet::{MagnetPositions, MagnetPusher};
pub use pseudo::CompositeMotor;
pub use registry::Session;
pub use sample_translation::SampleTranslation;
