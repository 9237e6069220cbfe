//! Composite pseudo motors
//!
//! A [`CompositeMotor`] bundles several motors into one coordinate vector,
//! e.g. `[lamino_tilt, sx45, sy45]` for sample positioning. Setting a
//! position moves all components concurrently.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use lamino_core::{Motor, MotorState, PseudoMotor};
use tracing::instrument;

/// Pseudo motor over an ordered list of motors.
pub struct CompositeMotor {
    name: String,
    components: Vec<Arc<dyn Motor>>,
}

impl CompositeMotor {
    /// Combine `components`; coordinate `i` drives `components[i]`.
    pub fn new(name: impl Into<String>, components: Vec<Arc<dyn Motor>>) -> Self {
        Self {
            name: name.into(),
            components,
        }
    }

    /// The component motors in coordinate order.
    pub fn components(&self) -> &[Arc<dyn Motor>] {
        &self.components
    }
}

/// Combine component states: errors and hard limits dominate, then motion.
pub fn combine_states(states: &[MotorState]) -> MotorState {
    if states.contains(&MotorState::Error) {
        MotorState::Error
    } else if states.contains(&MotorState::HardLimit) {
        MotorState::HardLimit
    } else if states.contains(&MotorState::Moving) {
        MotorState::Moving
    } else {
        MotorState::Standby
    }
}

#[async_trait]
impl PseudoMotor for CompositeMotor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn position(&self) -> Result<Vec<f64>> {
        try_join_all(self.components.iter().map(|m| m.position())).await
    }

    #[instrument(skip(self), fields(motor = %self.name), err)]
    async fn set_position(&self, target: &[f64]) -> Result<()> {
        if target.len() != self.components.len() {
            bail!(
                "Pseudo motor '{}' expects {} coordinates, got {}",
                self.name,
                self.components.len(),
                target.len()
            );
        }
        try_join_all(
            self.components
                .iter()
                .zip(target)
                .map(|(motor, &value)| motor.set_position(value)),
        )
        .await?;
        Ok(())
    }

    async fn state(&self) -> Result<MotorState> {
        let states = try_join_all(self.components.iter().map(|m| m.state())).await?;
        Ok(combine_states(&states))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lamino_driver_mock::MockMotor;

    fn composite() -> (Arc<MockMotor>, Arc<MockMotor>, CompositeMotor) {
        let a = Arc::new(MockMotor::rotation("tilt").with_velocity(1000.0));
        let b = Arc::new(MockMotor::linear("sx45").with_velocity(1000.0));
        let pseudo = CompositeMotor::new(
            "sample",
            vec![a.clone() as Arc<dyn Motor>, b.clone() as Arc<dyn Motor>],
        );
        (a, b, pseudo)
    }

    #[tokio::test]
    async fn sets_every_component() {
        let (a, b, pseudo) = composite();
        pseudo.set_position(&[1.0, -2.0]).await.unwrap();
        assert_eq!(a.position().await.unwrap(), 1.0);
        assert_eq!(b.position().await.unwrap(), -2.0);
        assert_eq!(pseudo.position().await.unwrap(), vec![1.0, -2.0]);
        assert_eq!(pseudo.state().await.unwrap(), MotorState::Standby);
    }

    #[tokio::test]
    async fn rejects_wrong_dimension() {
        let (a, _b, pseudo) = composite();
        assert!(pseudo.set_position(&[1.0]).await.is_err());
        assert!(a.targets().is_empty());
    }

    #[test]
    fn state_precedence() {
        use MotorState::*;
        assert_eq!(combine_states(&[Standby, Moving]), Moving);
        assert_eq!(combine_states(&[Moving, HardLimit]), HardLimit);
        assert_eq!(combine_states(&[HardLimit, Error]), Error);
        assert_eq!(combine_states(&[Standby, Standby]), Standby);
    }
}
