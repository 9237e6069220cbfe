//! Micos motion server driver
//!
//! The laminograph stages are driven by a Micos motion server reachable over
//! TCP. The server groups axes into named controllers (`Sam`, `Cont2`, ...)
//! and speaks a line-oriented ASCII dialect:
//!
//! ```text
//! -> Sam Crds ?\r\n
//! <- Sam Crds 0.000 1.250 0.000 0.000 12.500\r\n
//! -> Sam AxisAbs 5 90.0\r\n
//! <- Sam AxisAbs ok\r\n
//! ```
//!
//! - [`MicosConnection`]: framed, lock-serialized command/response transport
//! - [`MicosMotor`]: one controller axis exposed through the `Motor` and
//!   `ContinuousMotor` capabilities
//! - [`MicosSimulator`]: in-process server speaking the same dialect
//!
//! # Example
//!
//! ```rust,ignore
//! use lamino_driver_micos::{ContinuousRotationMotor, MicosAxisConfig, MicosConnection};
//!
//! let conn = Arc::new(MicosConnection::connect("160.103.39.110", 6542, DEFAULT_SETTLE_DELAY).await?);
//! let axis = MicosAxisConfig::new("Sam", 5);
//! let rot = ContinuousRotationMotor::open("lamino_rot", &axis, conn).await?;
//! rot.set_position(90.0).await?;
//! ```

pub mod connection;
pub mod motor;
pub mod simulator;

pub use connection::{MicosConnection, MicosConnectionSettings, MicosError, RETURN_SEQUENCE};
pub use motor::{
    ContinuousLinearMotor, ContinuousMicosMotor, ContinuousRotationMotor, LinearMotor,
    MicosAxisConfig, MicosMotor, RotationMotor,
};
pub use simulator::{MicosSimulator, SimulatedController};
