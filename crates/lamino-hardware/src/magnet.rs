//! Magnet pushers
//!
//! The sample stage is held by two magnets mounted on the 45° pushers
//! `px45` and `py45`. A pusher is "in" at its engaged position and "out" at
//! its retracted position. Sample translation is only allowed with both
//! magnets in.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use lamino_core::{Motor, MotorKind, MotorState};
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use tracing::{info, instrument};

/// Engaged and retracted positions of a pusher (mm).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize, Validate)]
pub struct MagnetPositions {
    /// Position with the magnet engaged
    pub in_position: f64,
    /// Position with the magnet retracted
    pub out_position: f64,
    /// Match tolerance
    #[serde(default = "default_tolerance")]
    #[validate(exclusive_minimum = 0.0)]
    pub tolerance: f64,
}

fn default_tolerance() -> f64 {
    0.01
}

/// Linear motor carrying a magnet.
pub struct MagnetPusher {
    motor: Arc<dyn Motor>,
    positions: MagnetPositions,
}

impl MagnetPusher {
    /// Wrap the pusher motor.
    pub fn new(motor: Arc<dyn Motor>, positions: MagnetPositions) -> Self {
        Self { motor, positions }
    }

    /// Configured positions.
    pub fn positions(&self) -> MagnetPositions {
        self.positions
    }

    fn near(&self, position: f64, reference: f64) -> bool {
        (position - reference).abs() <= self.positions.tolerance
    }

    /// True unless the pusher sits at its engaged position.
    ///
    /// A pusher between the two positions counts as out.
    pub async fn is_magnet_out(&self) -> Result<bool> {
        let position = self.motor.position().await?;
        Ok(!self.near(position, self.positions.in_position))
    }

    /// Engage the magnet.
    #[instrument(skip(self), fields(motor = %self.motor.name()), err)]
    pub async fn move_in(&self) -> Result<()> {
        self.motor.set_position(self.positions.in_position).await?;
        info!("magnet in");
        Ok(())
    }

    /// Retract the magnet.
    #[instrument(skip(self), fields(motor = %self.motor.name()), err)]
    pub async fn move_out(&self) -> Result<()> {
        self.motor.set_position(self.positions.out_position).await?;
        info!("magnet out");
        Ok(())
    }
}

#[async_trait]
impl Motor for MagnetPusher {
    fn name(&self) -> &str {
        self.motor.name()
    }

    fn kind(&self) -> MotorKind {
        self.motor.kind()
    }

    async fn position(&self) -> Result<f64> {
        self.motor.position().await
    }

    async fn set_position(&self, target: f64) -> Result<()> {
        self.motor.set_position(target).await
    }

    /// `in` or `out` at the configured positions, otherwise the motor state.
    async fn state(&self) -> Result<MotorState> {
        let state = self.motor.state().await?;
        if state != MotorState::Standby {
            return Ok(state);
        }
        let position = self.motor.position().await?;
        if self.near(position, self.positions.in_position) {
            Ok(MotorState::In)
        } else if self.near(position, self.positions.out_position) {
            Ok(MotorState::Out)
        } else {
            Ok(state)
        }
    }

    async fn stop(&self) -> Result<()> {
        self.motor.stop().await
    }

    async fn home(&self) -> Result<()> {
        self.motor.home().await
    }

    async fn acceleration(&self) -> Result<f64> {
        self.motor.acceleration().await
    }

    async fn set_acceleration(&self, acceleration: f64) -> Result<()> {
        self.motor.set_acceleration(acceleration).await
    }
}
