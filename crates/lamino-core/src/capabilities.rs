//! Device capability traits
//!
//! Each beamline device implements the small set of capabilities it actually
//! supports instead of one monolithic device trait:
//!
//! - A Micos rotation stage implements `Motor + ContinuousMotor`
//! - A sample pusher implements `Motor`
//! - A detector implements `Triggerable + FrameProducer + BufferedCamera`
//!
//! Every capability trait is async (`#[async_trait]`), thread-safe
//! (`Send + Sync`) and returns `anyhow::Result`. Drivers attach a
//! [`DeviceError`](crate::DeviceError) when the failure is one callers may
//! want to match on.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn rotate_to<M: Motor + ?Sized>(motor: &M, angle: f64) -> Result<()> {
//!     motor.set_position(angle).await?;
//!     assert_eq!(motor.state().await?, MotorState::Standby);
//!     Ok(())
//! }
//! ```

use crate::data::Frame;
use crate::error::DeviceError;
use crate::state::{MotorKind, MotorState, ShutterState, StorageRingState, TriggerSource};
use anyhow::Result;
use async_trait::async_trait;

// =============================================================================
// Motion
// =============================================================================

/// Positional motor.
///
/// Positions are in the unit of [`Motor::kind`]: mm for linear motors and
/// deg for rotation motors.
#[async_trait]
pub trait Motor: Send + Sync {
    /// Device name used in logs and errors.
    fn name(&self) -> &str;

    /// Geometry of the axis.
    fn kind(&self) -> MotorKind;

    /// Current position.
    async fn position(&self) -> Result<f64>;

    /// Move to an absolute position.
    ///
    /// Returns once the motor reports standby again.
    async fn set_position(&self, target: f64) -> Result<()>;

    /// Move relative to the current position.
    async fn move_rel(&self, distance: f64) -> Result<()> {
        let current = self.position().await?;
        self.set_position(current + distance).await
    }

    /// Derived motor state.
    async fn state(&self) -> Result<MotorState>;

    /// Stop any motion.
    async fn stop(&self) -> Result<()>;

    /// Run the homing (calibration) procedure and wait for it to finish.
    async fn home(&self) -> Result<()>;

    /// Acceleration in unit/s².
    async fn acceleration(&self) -> Result<f64>;

    /// Set the acceleration in unit/s².
    async fn set_acceleration(&self, acceleration: f64) -> Result<()>;
}

/// Motor that can also be driven at a constant velocity.
#[async_trait]
pub trait ContinuousMotor: Motor {
    /// Continuous velocity in unit/s.
    async fn velocity(&self) -> Result<f64>;

    /// Set the continuous velocity in unit/s.
    async fn set_velocity(&self, velocity: f64) -> Result<()>;

    /// Velocity used for positional moves, if the device has a separate one.
    async fn motion_velocity(&self) -> Result<Option<f64>> {
        Ok(None)
    }

    /// Set the velocity used for positional moves.
    async fn set_motion_velocity(&self, _velocity: f64) -> Result<()> {
        Err(DeviceError::not_supported(self.name(), "set_motion_velocity").into())
    }
}

/// Motor whose position is a coordinate vector over several axes.
#[async_trait]
pub trait PseudoMotor: Send + Sync {
    /// Device name.
    fn name(&self) -> &str;

    /// Current coordinates, one per component axis.
    async fn position(&self) -> Result<Vec<f64>>;

    /// Move every component to the given coordinates.
    async fn set_position(&self, target: &[f64]) -> Result<()>;

    /// Combined state of the component axes.
    async fn state(&self) -> Result<MotorState>;
}

// =============================================================================
// Beam
// =============================================================================

/// Beam shutter.
#[async_trait]
pub trait Shutter: Send + Sync {
    /// Open the shutter.
    async fn open(&self) -> Result<()>;

    /// Close the shutter.
    async fn close(&self) -> Result<()>;

    /// Current shutter state.
    async fn state(&self) -> Result<ShutterState>;
}

/// Storage ring telemetry.
#[async_trait]
pub trait StorageRing: Send + Sync {
    /// Ring current in mA.
    async fn current(&self) -> Result<f64>;

    /// Beam energy in GeV.
    async fn energy(&self) -> Result<f64>;

    /// Beam lifetime in s.
    async fn lifetime(&self) -> Result<f64>;

    /// Operation mode.
    async fn state(&self) -> Result<StorageRingState>;
}

// =============================================================================
// Camera
// =============================================================================

/// Camera trigger control.
#[async_trait]
pub trait Triggerable: Send + Sync {
    /// Select where frame triggers come from.
    async fn set_trigger_source(&self, source: TriggerSource) -> Result<()>;

    /// Issue a software trigger.
    async fn trigger(&self) -> Result<()>;
}

/// Recording and frame retrieval.
#[async_trait]
pub trait FrameProducer: Send + Sync {
    /// Start filling the recording buffer.
    async fn start_recording(&self) -> Result<()>;

    /// Stop recording.
    async fn stop_recording(&self) -> Result<()>;

    /// Take the next frame from the recording buffer.
    async fn grab(&self) -> Result<Frame>;

    /// Frame rate in frames/s.
    async fn frame_rate(&self) -> Result<f64>;
}

/// Camera with an internal frame buffer.
#[async_trait]
pub trait BufferedCamera: Send + Sync {
    /// Region-of-interest width in pixels.
    async fn roi_width(&self) -> Result<u32>;

    /// Region-of-interest height in pixels.
    async fn roi_height(&self) -> Result<u32>;

    /// Sensor bit depth.
    async fn sensor_bitdepth(&self) -> Result<u32>;

    /// Number of frame buffers.
    async fn num_buffers(&self) -> Result<usize>;

    /// Set the number of frame buffers.
    async fn set_num_buffers(&self, count: usize) -> Result<()>;

    /// Enable or disable buffered recording.
    async fn set_buffered(&self, enabled: bool) -> Result<()>;
}

/// Everything a sequencer needs from a detector.
pub trait Camera: Triggerable + FrameProducer + BufferedCamera {}

impl<T: Triggerable + FrameProducer + BufferedCamera + ?Sized> Camera for T {}
