//! Bliss motors
//!
//! A Bliss axis has two velocities. The device `velocity` is used for
//! positional moves and homing (exposed as the motion velocity); the jog
//! velocity drives continuous rotation (exposed as the velocity). Jogging
//! at 0 or stopping the axis ends continuous motion.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use lamino_core::{ContinuousMotor, DeviceError, Motor, MotorKind, MotorState};
use parking_lot::Mutex;
use tracing::{debug, instrument};

/// Bliss axis object as seen from the control system.
#[async_trait]
pub trait BlissAxis: Send + Sync {
    /// Axis name in the beamline configuration.
    fn name(&self) -> &str;

    /// Dial position in user units.
    async fn position(&self) -> Result<f64>;

    /// Move to `position` and wait for the move to finish.
    async fn move_to(&self, position: f64) -> Result<()>;

    /// Acceleration in units/s².
    async fn acceleration(&self) -> Result<f64>;

    /// Set the acceleration in units/s².
    async fn set_acceleration(&self, acceleration: f64) -> Result<()>;

    /// Velocity used for positional moves.
    async fn velocity(&self) -> Result<f64>;

    /// Set the velocity used for positional moves.
    async fn set_velocity(&self, velocity: f64) -> Result<()>;

    /// Start jogging at `velocity` (0 stops jogging).
    async fn jog(&self, velocity: f64) -> Result<()>;

    /// Time the axis needs to reach the jog velocity.
    async fn jog_acctime(&self) -> Result<Duration>;

    /// Run the home search and wait for it.
    async fn home(&self) -> Result<()>;

    /// Stop and wait until the axis is idle.
    async fn stop(&self) -> Result<()>;

    /// Raw state string, e.g. `READY` or `MOVING`.
    async fn state(&self) -> Result<String>;

    /// Software position limits `(low, high)`.
    async fn limits(&self) -> Result<(f64, f64)>;
}

/// Map a Bliss state string onto [`MotorState`]. The first matching flag wins.
pub fn motor_state_from_bliss(state: &str) -> MotorState {
    if state.contains("READY") {
        MotorState::Standby
    } else if state.contains("LIMNEG") || state.contains("LIMPOS") {
        MotorState::HardLimit
    } else if state.contains("MOVING") {
        MotorState::Moving
    } else if state.contains("FAULT") {
        MotorState::Error
    } else if state.contains("HOME") {
        MotorState::Moving
    } else if state.contains("OFF") {
        MotorState::Off
    } else if state.contains("DISABLED") {
        MotorState::Disabled
    } else {
        MotorState::Unknown
    }
}

/// Bliss axis exposed through the motor capabilities.
pub struct BlissMotor {
    name: String,
    kind: MotorKind,
    device: Arc<dyn BlissAxis>,
    jog_velocity: Mutex<f64>,
}

impl BlissMotor {
    /// Wrap an axis.
    pub fn new(name: impl Into<String>, kind: MotorKind, device: Arc<dyn BlissAxis>) -> Self {
        Self {
            name: name.into(),
            kind,
            device,
            jog_velocity: Mutex::new(0.0),
        }
    }

    /// Linear axis (mm).
    pub fn linear(name: impl Into<String>, device: Arc<dyn BlissAxis>) -> Self {
        Self::new(name, MotorKind::Linear, device)
    }

    /// Rotation axis (deg).
    pub fn rotation(name: impl Into<String>, device: Arc<dyn BlissAxis>) -> Self {
        Self::new(name, MotorKind::Rotation, device)
    }

    async fn check_limits(&self, target: f64) -> Result<()> {
        let (a, b) = self.device.limits().await?;
        let (lower, upper) = (a.min(b), a.max(b));
        if !(lower..=upper).contains(&target) {
            return Err(DeviceError::OutOfLimits {
                target,
                lower,
                upper,
            }
            .into());
        }
        Ok(())
    }

    async fn check_motion_velocity_access(&self) -> Result<()> {
        let state = self.state().await?;
        if matches!(state, MotorState::Standby | MotorState::HardLimit) {
            Ok(())
        } else {
            Err(DeviceError::StateCheck {
                parameter: "motion_velocity".into(),
                state,
            }
            .into())
        }
    }
}

#[async_trait]
impl Motor for BlissMotor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MotorKind {
        self.kind
    }

    async fn position(&self) -> Result<f64> {
        self.device.position().await
    }

    #[instrument(skip(self), fields(motor = %self.name), err)]
    async fn set_position(&self, target: f64) -> Result<()> {
        self.check_limits(target).await?;
        self.device.move_to(target).await
    }

    async fn state(&self) -> Result<MotorState> {
        let raw = self.device.state().await?;
        Ok(motor_state_from_bliss(&raw))
    }

    #[instrument(skip(self), fields(motor = %self.name), err)]
    async fn stop(&self) -> Result<()> {
        self.device.stop().await?;
        *self.jog_velocity.lock() = 0.0;
        Ok(())
    }

    #[instrument(skip(self), fields(motor = %self.name), err)]
    async fn home(&self) -> Result<()> {
        self.device.home().await
    }

    async fn acceleration(&self) -> Result<f64> {
        self.device.acceleration().await
    }

    async fn set_acceleration(&self, acceleration: f64) -> Result<()> {
        self.device.set_acceleration(acceleration).await
    }
}

#[async_trait]
impl ContinuousMotor for BlissMotor {
    async fn velocity(&self) -> Result<f64> {
        Ok(*self.jog_velocity.lock())
    }

    /// Jog at `velocity` and return once the axis has accelerated.
    #[instrument(skip(self), fields(motor = %self.name), err)]
    async fn set_velocity(&self, velocity: f64) -> Result<()> {
        self.device.jog(velocity).await?;
        let acctime = self.device.jog_acctime().await?;
        debug!(?acctime, "waiting for jog acceleration");
        tokio::time::sleep(acctime).await;
        *self.jog_velocity.lock() = velocity;
        Ok(())
    }

    async fn motion_velocity(&self) -> Result<Option<f64>> {
        self.check_motion_velocity_access().await?;
        Ok(Some(self.device.velocity().await?))
    }

    #[instrument(skip(self), fields(motor = %self.name), err)]
    async fn set_motion_velocity(&self, velocity: f64) -> Result<()> {
        self.check_motion_velocity_access().await?;
        self.device.set_velocity(velocity).await?;
        // The axis has to be idle again after the write.
        self.check_motion_velocity_access().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimulatedAxis, SimulatedAxisConfig};

    fn motor() -> (Arc<SimulatedAxis>, BlissMotor) {
        let axis = Arc::new(SimulatedAxis::new(
            "lmy",
            SimulatedAxisConfig {
                limits: (-10.0, 10.0),
                velocity: 1000.0,
                jog_acctime: Duration::from_millis(5),
                ..Default::default()
            },
        ));
        let motor = BlissMotor::linear("lmy", axis.clone());
        (axis, motor)
    }

    #[test]
    fn state_mapping_first_flag_wins() {
        assert_eq!(motor_state_from_bliss("READY"), MotorState::Standby);
        assert_eq!(motor_state_from_bliss("READY LIMPOS"), MotorState::Standby);
        assert_eq!(motor_state_from_bliss("LIMNEG"), MotorState::HardLimit);
        assert_eq!(motor_state_from_bliss("LIMPOS"), MotorState::HardLimit);
        assert_eq!(motor_state_from_bliss("MOVING"), MotorState::Moving);
        assert_eq!(motor_state_from_bliss("FAULT"), MotorState::Error);
        assert_eq!(motor_state_from_bliss("HOME"), MotorState::Moving);
        assert_eq!(motor_state_from_bliss("OFF"), MotorState::Off);
        assert_eq!(motor_state_from_bliss("DISABLED"), MotorState::Disabled);
        assert_eq!(motor_state_from_bliss("???"), MotorState::Unknown);
    }

    #[tokio::test]
    async fn out_of_limit_targets_are_rejected_before_moving() {
        let (axis, motor) = motor();
        let err = motor.set_position(12.0).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeviceError>(),
            Some(DeviceError::OutOfLimits { upper, .. }) if *upper == 10.0
        ));
        assert_eq!(axis.position().await.unwrap(), 0.0);

        motor.set_position(-4.0).await.unwrap();
        assert_eq!(motor.position().await.unwrap(), -4.0);
    }

    #[tokio::test]
    async fn jog_velocity_is_remembered_and_reset_by_stop() {
        let (axis, motor) = motor();
        motor.set_velocity(3.0).await.unwrap();
        assert_eq!(motor.velocity().await.unwrap(), 3.0);
        assert_eq!(motor.state().await.unwrap(), MotorState::Moving);

        motor.stop().await.unwrap();
        assert_eq!(motor.velocity().await.unwrap(), 0.0);
        assert_eq!(axis.state().await.unwrap(), "READY");
    }

    #[tokio::test]
    async fn motion_velocity_requires_idle_axis() {
        let (_axis, motor) = motor();
        motor.set_motion_velocity(20.0).await.unwrap();
        assert_eq!(motor.motion_velocity().await.unwrap(), Some(20.0));

        motor.set_velocity(1.0).await.unwrap();
        let err = motor.motion_velocity().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeviceError>(),
            Some(DeviceError::StateCheck { state: MotorState::Moving, .. })
        ));
    }
}
