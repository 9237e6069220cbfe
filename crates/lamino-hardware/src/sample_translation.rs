//! Sample translation through the 45° pushers
//!
//! The sample stage sits on two pushers `sx45` and `sy45` rotated against the
//! beamline frame. A move along beamline x or y is decomposed into pusher
//! moves and sent to the `[lamino_tilt, sx45, sy45]` pseudo motor in one go,
//! so all three axes travel together.
//!
//! Angles (deg):
//!
//! - [`ALPHA_DEG`]: between beamline x and y
//! - [`BETA_DEG`]: between pusher x and y
//! - [`GAMMA_DEG`]: between beamline x and pusher x

use std::sync::Arc;

use anyhow::Result;
use lamino_core::{DeviceError, Motor, PseudoMotor};
use tracing::{info, instrument};

use crate::magnet::MagnetPusher;

/// Angle between the beamline x and y axes.
pub const ALPHA_DEG: f64 = 90.0;
/// Angle between the pusher x and y axes.
pub const BETA_DEG: f64 = 90.0;
/// Angle between beamline x and pusher x.
pub const GAMMA_DEG: f64 = 135.0;

/// Pusher targets for a move of `rel` along the beamline axis at `offset_deg`
/// from beamline x.
pub fn pusher_targets(sx45: f64, sy45: f64, rel: f64, offset_deg: f64) -> (f64, f64) {
    let x = sx45 + rel / (GAMMA_DEG - offset_deg).to_radians().cos();
    let y = sy45 + rel / (GAMMA_DEG + BETA_DEG - offset_deg).to_radians().cos();
    (x, y)
}

/// Moves the sample in beamline coordinates.
pub struct SampleTranslation {
    pseudo: Arc<dyn PseudoMotor>,
    tilt: Arc<dyn Motor>,
    sx45: Arc<dyn Motor>,
    sy45: Arc<dyn Motor>,
    px45: Arc<MagnetPusher>,
    py45: Arc<MagnetPusher>,
}

impl SampleTranslation {
    /// `pseudo` must take coordinates `[tilt, sx45, sy45]`.
    pub fn new(
        pseudo: Arc<dyn PseudoMotor>,
        tilt: Arc<dyn Motor>,
        sx45: Arc<dyn Motor>,
        sy45: Arc<dyn Motor>,
        px45: Arc<MagnetPusher>,
        py45: Arc<MagnetPusher>,
    ) -> Self {
        Self {
            pseudo,
            tilt,
            sx45,
            sy45,
            px45,
            py45,
        }
    }

    /// Move by `rel` mm along the beamline direction at `offset_deg`.
    ///
    /// Fails with [`DeviceError::MagnetsOut`] without moving anything unless
    /// both magnets are in.
    #[instrument(skip(self), err)]
    pub async fn move_sample(&self, rel: f64, offset_deg: f64) -> Result<()> {
        if self.px45.is_magnet_out().await? || self.py45.is_magnet_out().await? {
            return Err(DeviceError::MagnetsOut.into());
        }
        let tilt = self.tilt.position().await?;
        let sx45 = self.sx45.position().await?;
        let sy45 = self.sy45.position().await?;
        let (sx_target, sy_target) = pusher_targets(sx45, sy45, rel, offset_deg);
        info!(sx_target, sy_target, "moving sample");
        self.pseudo.set_position(&[tilt, sx_target, sy_target]).await
    }

    /// Move along beamline x.
    pub async fn move_sample_x(&self, rel: f64) -> Result<()> {
        self.move_sample(rel, 0.0).await
    }

    /// Move along beamline y.
    pub async fn move_sample_y(&self, rel: f64) -> Result<()> {
        self.move_sample(rel, ALPHA_DEG).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::magnet::MagnetPositions;
    use crate::pseudo::CompositeMotor;
    use lamino_driver_mock::MockMotor;

    struct Stage {
        tilt: Arc<MockMotor>,
        sx45: Arc<MockMotor>,
        sy45: Arc<MockMotor>,
        px45: Arc<MagnetPusher>,
        translation: SampleTranslation,
    }

    fn stage() -> Stage {
        let tilt = Arc::new(MockMotor::rotation("lamino_tilt").with_position(30.0));
        let sx45 = Arc::new(MockMotor::linear("sx45").with_velocity(1000.0));
        let sy45 = Arc::new(MockMotor::linear("sy45").with_velocity(1000.0));
        let positions = MagnetPositions {
            in_position: 0.0,
            out_position: 5.0,
            tolerance: 0.01,
        };
        let px45 = Arc::new(MagnetPusher::new(
            Arc::new(MockMotor::linear("px45").with_velocity(1000.0)),
            positions,
        ));
        let py45 = Arc::new(MagnetPusher::new(
            Arc::new(MockMotor::linear("py45").with_velocity(1000.0)),
            positions,
        ));
        let pseudo = Arc::new(CompositeMotor::new(
            "sample",
            vec![
                tilt.clone() as Arc<dyn Motor>,
                sx45.clone() as Arc<dyn Motor>,
                sy45.clone() as Arc<dyn Motor>,
            ],
        ));
        let translation = SampleTranslation::new(
            pseudo,
            tilt.clone(),
            sx45.clone(),
            sy45.clone(),
            px45.clone(),
            py45,
        );
        Stage {
            tilt,
            sx45,
            sy45,
            px45,
            translation,
        }
    }

    #[test]
    fn x_move_decomposes_onto_pushers() {
        let (x, y) = pusher_targets(0.0, 0.0, 1.0, 0.0);
        // cos(135°) = cos(225°) = -1/√2
        assert!((x + 2f64.sqrt()).abs() < 1e-9);
        assert!((y + 2f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn y_move_decomposes_onto_pushers() {
        let (x, y) = pusher_targets(1.0, 2.0, 1.0, ALPHA_DEG);
        // cos(45°) = 1/√2, cos(135°) = -1/√2
        assert!((x - (1.0 + 2f64.sqrt())).abs() < 1e-9);
        assert!((y - (2.0 - 2f64.sqrt())).abs() < 1e-9);
    }

    #[tokio::test]
    async fn moves_all_axes_through_pseudo_motor() {
        let stage = stage();
        stage.translation.move_sample_x(1.0).await.unwrap();

        assert_eq!(stage.tilt.targets(), vec![30.0]);
        let sx = stage.sx45.position().await.unwrap();
        let sy = stage.sy45.position().await.unwrap();
        assert!((sx + 2f64.sqrt()).abs() < 1e-9);
        assert!((sy + 2f64.sqrt()).abs() < 1e-9);
    }

    #[tokio::test]
    async fn refuses_with_magnets_out() {
        let stage = stage();
        stage.px45.move_out().await.unwrap();

        let err = stage.translation.move_sample_y(1.0).await.unwrap_err();
        assert_eq!(err.downcast_ref::<DeviceError>(), Some(&DeviceError::MagnetsOut));
        assert!(stage.sx45.targets().is_empty());
        assert!(stage.sy45.targets().is_empty());
    }
}
