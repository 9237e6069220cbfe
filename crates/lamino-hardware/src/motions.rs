//! Direct relative pusher moves
//!
//! Unlike [`SampleTranslation`](crate::SampleTranslation) these moves skip the
//! magnet check and drive the two pushers relative to where they are.

use anyhow::Result;
use lamino_core::Motor;
use tracing::instrument;

use crate::sample_translation::{ALPHA_DEG, BETA_DEG, GAMMA_DEG};

async fn move_pushers(
    distance: f64,
    offset_deg: f64,
    rmx: &dyn Motor,
    rmy: &dyn Motor,
) -> Result<()> {
    let dx = distance / (GAMMA_DEG - offset_deg).to_radians().cos();
    let dy = distance / (GAMMA_DEG + BETA_DEG - offset_deg).to_radians().cos();
    futures::try_join!(rmx.move_rel(dx), rmy.move_rel(dy))?;
    Ok(())
}

/// Move the sample by `distance` mm along beamline x.
#[instrument(skip(rmx, rmy), fields(rmx = %rmx.name(), rmy = %rmy.name()), err)]
pub async fn move_sample_x(distance: f64, rmx: &dyn Motor, rmy: &dyn Motor) -> Result<()> {
    move_pushers(distance, 0.0, rmx, rmy).await
}

/// Move the sample by `distance` mm along beamline y.
#[instrument(skip(rmx, rmy), fields(rmx = %rmx.name(), rmy = %rmy.name()), err)]
pub async fn move_sample_y(distance: f64, rmx: &dyn Motor, rmy: &dyn Motor) -> Result<()> {
    move_pushers(distance, ALPHA_DEG, rmx, rmy).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use lamino_driver_mock::MockMotor;

    #[tokio::test]
    async fn x_and_y_moves() {
        let rmx = MockMotor::linear("rmx").with_velocity(1000.0).with_position(1.0);
        let rmy = MockMotor::linear("rmy").with_velocity(1000.0).with_position(1.0);
        let root2 = 2f64.sqrt();

        move_sample_x(1.0, &rmx, &rmy).await.unwrap();
        assert!((rmx.position().await.unwrap() - (1.0 - root2)).abs() < 1e-9);
        assert!((rmy.position().await.unwrap() - (1.0 - root2)).abs() < 1e-9);

        move_sample_y(1.0, &rmx, &rmy).await.unwrap();
        assert!((rmx.position().await.unwrap() - 1.0).abs() < 1e-9);
        assert!((rmy.position().await.unwrap() - (1.0 - 2.0 * root2)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn failure_of_either_pusher_is_reported() {
        let rmx = MockMotor::linear("rmx").with_velocity(1000.0);
        let rmy = MockMotor::linear("rmy").with_velocity(1000.0);
        rmy.set_fail_moves(true);
        assert!(move_sample_x(1.0, &rmx, &rmy).await.is_err());
    }
}
