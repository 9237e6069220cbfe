//! `lamino-core`
//!
//! Core trait definitions and types shared by the beamline drivers and the
//! laminography sequencers.
//!
//! ## Layers
//!
//! - **Transport**: vendor wire protocols live in the driver crates
//!   (`lamino-driver-micos`, `lamino-driver-bliss`).
//! - **Capabilities**: small async traits a device implements
//!   ([`Motor`], [`ContinuousMotor`], [`Shutter`], [`Camera`], ...).
//! - **Sequencing**: `lamino-experiment` drives devices only through these
//!   traits, so simulated and real hardware are interchangeable.
//!
//! ## Key Types
//!
//! - [`MotorState`], [`ShutterState`], [`StorageRingState`]: derived device states
//! - [`DeviceError`]: typed failures drivers attach to `anyhow` errors
//! - [`Parameter`]: validated, observable scan parameter
//! - [`Frame`]: one camera image

pub mod capabilities;
pub mod data;
pub mod error;
pub mod limits;
pub mod parameter;
pub mod state;

pub use capabilities::{
    BufferedCamera, Camera, ContinuousMotor, FrameProducer, Motor, PseudoMotor, Shutter,
    StorageRing, Triggerable,
};
pub use data::Frame;
pub use error::{ConfigError, DeviceError};
pub use parameter::Parameter;
pub use state::{MotorKind, MotorState, ShutterState, StorageRingState, TriggerSource};

pub use anyhow::{anyhow, Result};
