//! Mock devices for lamino
//!
//! Software stand-ins for the detector and for motion axes, used by the
//! sequencer tests and by fully simulated sessions:
//!
//! - [`MockCamera`]: trigger modes, recording buffer, frame rate, failure injection
//! - [`MockMotor`]: continuous motor with time-based motion
//! - [`MockShutter`]: shutter that records every transition

pub mod mock_camera;
pub mod mock_motor;
pub mod mock_shutter;
pub mod pattern;

pub use mock_camera::{MockCamera, MockCameraConfig};
pub use mock_motor::MockMotor;
pub use mock_shutter::MockShutter;
