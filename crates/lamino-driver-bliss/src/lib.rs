//! Bliss device adapters
//!
//! Beamline motors, shutters and the machine-information server are
//! reachable through Bliss. This crate maps those devices onto the lamino
//! capability traits:
//!
//! - [`BlissMotor`] over a [`BlissAxis`]
//! - [`BlissShutter`] over a [`BlissShutterDevice`]
//! - [`EsrfStorageRing`] over a [`MachineInfo`] proxy
//!
//! The device traits are the seam to the control system. The [`sim`] module
//! provides in-memory implementations used by simulated sessions and tests.

pub mod motor;
pub mod shutter;
pub mod sim;
pub mod storage_ring;

pub use motor::{BlissAxis, BlissMotor};
pub use shutter::{BlissShutter, BlissShutterDevice};
pub use sim::{SimulatedAxis, SimulatedAxisConfig, SimulatedMachineInfo, SimulatedShutter};
pub use storage_ring::{EsrfStorageRing, MachineInfo, ESRF_ENERGY_GEV};
