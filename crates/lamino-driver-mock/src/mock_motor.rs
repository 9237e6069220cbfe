//! Mock continuous motor.
//!
//! Positional moves run at the current velocity with a constant-velocity
//! profile. The position is computed from elapsed time, so `stop` freezes the
//! axis where the profile put it and the interrupted `set_position` returns.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use lamino_core::{ContinuousMotor, DeviceError, Motor, MotorKind, MotorState};
use parking_lot::Mutex;
use tokio::time::Instant;

const POLL: Duration = Duration::from_millis(2);

#[derive(Debug, Clone, Copy)]
struct Move {
    from: f64,
    to: f64,
    speed: f64,
    started: Instant,
}

impl Move {
    fn position_at(&self, now: Instant) -> f64 {
        let travelled = self.speed * now.duration_since(self.started).as_secs_f64();
        if travelled >= (self.to - self.from).abs() {
            self.to
        } else {
            self.from + travelled * (self.to - self.from).signum()
        }
    }
}

#[derive(Debug)]
struct MotorInner {
    position: f64,
    velocity: f64,
    acceleration: f64,
    motion: Option<Move>,
    generation: u64,
    fail_moves: bool,
    velocity_history: Vec<f64>,
    targets: Vec<f64>,
    stops: usize,
}

impl MotorInner {
    fn current(&self, now: Instant) -> f64 {
        self.motion.map_or(self.position, |m| m.position_at(now))
    }

    fn settle(&mut self, now: Instant) {
        if let Some(m) = self.motion {
            if m.position_at(now) == m.to {
                self.position = m.to;
                self.motion = None;
            }
        }
    }

    fn halt(&mut self, now: Instant) {
        self.position = self.current(now);
        self.motion = None;
        self.generation += 1;
    }
}

/// Software motor implementing [`Motor`] and [`ContinuousMotor`].
pub struct MockMotor {
    name: String,
    kind: MotorKind,
    has_motion_velocity: bool,
    inner: Mutex<MotorInner>,
}

impl MockMotor {
    /// Motor at position 0 with velocity 10 unit/s and acceleration 100 unit/s².
    pub fn new(name: impl Into<String>, kind: MotorKind) -> Self {
        Self {
            name: name.into(),
            kind,
            has_motion_velocity: false,
            inner: Mutex::new(MotorInner {
                position: 0.0,
                velocity: 10.0,
                acceleration: 100.0,
                motion: None,
                generation: 0,
                fail_moves: false,
                velocity_history: Vec::new(),
                targets: Vec::new(),
                stops: 0,
            }),
        }
    }

    /// Rotation motor (deg).
    pub fn rotation(name: impl Into<String>) -> Self {
        Self::new(name, MotorKind::Rotation)
    }

    /// Linear motor (mm).
    pub fn linear(name: impl Into<String>) -> Self {
        Self::new(name, MotorKind::Linear)
    }

    /// Initial position.
    pub fn with_position(self, position: f64) -> Self {
        self.inner.lock().position = position;
        self
    }

    /// Initial velocity.
    pub fn with_velocity(self, velocity: f64) -> Self {
        self.inner.lock().velocity = velocity;
        self
    }

    /// Initial acceleration.
    pub fn with_acceleration(self, acceleration: f64) -> Self {
        self.inner.lock().acceleration = acceleration;
        self
    }

    /// Expose the velocity as motion velocity too.
    pub fn with_motion_velocity(mut self) -> Self {
        self.has_motion_velocity = true;
        self
    }

    /// Make every following positional move fail (or succeed again).
    pub fn set_fail_moves(&self, fail: bool) {
        self.inner.lock().fail_moves = fail;
    }

    /// Every velocity written, in order.
    pub fn velocity_history(&self) -> Vec<f64> {
        self.inner.lock().velocity_history.clone()
    }

    /// Every positional target requested, in order.
    pub fn targets(&self) -> Vec<f64> {
        self.inner.lock().targets.clone()
    }

    /// Number of `stop` calls.
    pub fn stops(&self) -> usize {
        self.inner.lock().stops
    }

    /// True while a move is in progress.
    pub fn is_moving(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.settle(Instant::now());
        inner.motion.is_some()
    }

    fn write_velocity(&self, velocity: f64) {
        let mut inner = self.inner.lock();
        inner.velocity = velocity;
        inner.velocity_history.push(velocity);
    }
}

#[async_trait]
impl Motor for MockMotor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MotorKind {
        self.kind
    }

    async fn position(&self) -> Result<f64> {
        Ok(self.inner.lock().current(Instant::now()))
    }

    async fn set_position(&self, target: f64) -> Result<()> {
        let generation = {
            let mut inner = self.inner.lock();
            inner.targets.push(target);
            if inner.fail_moves {
                return Err(DeviceError::Communication {
                    device: self.name.clone(),
                    message: "simulated move failure".into(),
                }
                .into());
            }
            let now = Instant::now();
            inner.halt(now);
            if inner.velocity <= 0.0 {
                bail!("Motor '{}' cannot move at velocity {}", self.name, inner.velocity);
            }
            inner.motion = Some(Move {
                from: inner.position,
                to: target,
                speed: inner.velocity,
                started: now,
            });
            inner.generation
        };

        loop {
            {
                let mut inner = self.inner.lock();
                if inner.generation != generation {
                    return Ok(());
                }
                inner.settle(Instant::now());
                if inner.motion.is_none() {
                    return Ok(());
                }
            }
            tokio::time::sleep(POLL).await;
        }
    }

    async fn state(&self) -> Result<MotorState> {
        Ok(if self.is_moving() {
            MotorState::Moving
        } else {
            MotorState::Standby
        })
    }

    async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.stops += 1;
        inner.halt(Instant::now());
        Ok(())
    }

    async fn home(&self) -> Result<()> {
        self.set_position(0.0).await
    }

    async fn acceleration(&self) -> Result<f64> {
        Ok(self.inner.lock().acceleration)
    }

    async fn set_acceleration(&self, acceleration: f64) -> Result<()> {
        self.inner.lock().acceleration = acceleration;
        Ok(())
    }
}

#[async_trait]
impl ContinuousMotor for MockMotor {
    async fn velocity(&self) -> Result<f64> {
        Ok(self.inner.lock().velocity)
    }

    async fn set_velocity(&self, velocity: f64) -> Result<()> {
        self.write_velocity(velocity);
        Ok(())
    }

    async fn motion_velocity(&self) -> Result<Option<f64>> {
        if self.has_motion_velocity {
            Ok(Some(self.inner.lock().velocity))
        } else {
            Ok(None)
        }
    }

    async fn set_motion_velocity(&self, velocity: f64) -> Result<()> {
        if !self.has_motion_velocity {
            return Err(DeviceError::not_supported(&self.name, "set_motion_velocity").into());
        }
        self.write_velocity(velocity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn move_takes_distance_over_velocity() {
        let motor = MockMotor::rotation("rot").with_velocity(20.0);
        let start = Instant::now();
        motor.set_position(10.0).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(motor.position().await.unwrap(), 10.0);
        assert_eq!(motor.state().await.unwrap(), MotorState::Standby);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_a_running_move() {
        let motor = Arc::new(MockMotor::rotation("rot").with_velocity(1.0));
        let task = {
            let motor = motor.clone();
            tokio::spawn(async move { motor.set_position(50.0).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(motor.state().await.unwrap(), MotorState::Moving);

        motor.stop().await.unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(motor.state().await.unwrap(), MotorState::Standby);
        assert!(motor.position().await.unwrap() < 2.0);
        assert_eq!(motor.stops(), 1);
    }

    #[tokio::test]
    async fn failing_moves_are_recorded() {
        let motor = MockMotor::linear("sx");
        motor.set_fail_moves(true);
        assert!(motor.set_position(1.0).await.is_err());
        assert_eq!(motor.targets(), vec![1.0]);
    }

    #[tokio::test]
    async fn motion_velocity_is_optional() {
        let plain = MockMotor::rotation("a");
        assert_eq!(plain.motion_velocity().await.unwrap(), None);
        assert!(plain.set_motion_velocity(1.0).await.is_err());

        let stashing = MockMotor::rotation("b").with_motion_velocity();
        stashing.set_motion_velocity(7.0).await.unwrap();
        assert_eq!(stashing.motion_velocity().await.unwrap(), Some(7.0));
        assert_eq!(stashing.velocity_history(), vec![7.0]);
    }
}
