//! Dark and flat field phases shared by the laminography sequencers.
//!
//! - darks: shutter closed, one software trigger per frame
//! - flats: sample moved out with the flat motor, shutter open; the flat
//!   motor returns to the radio position afterwards

use std::sync::Arc;

use anyhow::Result;
use lamino_core::{Camera, FrameProducer, Motor, Parameter, Shutter, TriggerSource, Triggerable};
use serde_json::json;
use tracing::{debug, instrument};

use crate::experiment::{run_with_cleanup, with_recording, AcquisitionContext};

/// Default number of dark fields.
pub const DEFAULT_NUM_DARKS: usize = 50;
/// Default number of flat fields.
pub const DEFAULT_NUM_FLATS: usize = 51;

/// Devices and parameters for darks and flats.
pub struct Radiography {
    flat_motor: Arc<dyn Motor>,
    shutter: Arc<dyn Shutter>,
    camera: Arc<dyn Camera>,
    num_darks: Parameter<usize>,
    num_flats: Parameter<usize>,
    radio_position: Parameter<f64>,
    flat_position: Parameter<f64>,
}

impl Radiography {
    /// `radio_position` and `flat_position` are flat motor positions with the
    /// sample in and out of the beam.
    pub fn new(
        flat_motor: Arc<dyn Motor>,
        shutter: Arc<dyn Shutter>,
        camera: Arc<dyn Camera>,
        radio_position: f64,
        flat_position: f64,
    ) -> Self {
        let unit = flat_motor.kind().position_unit();
        Self {
            num_darks: Parameter::new("num_darks", DEFAULT_NUM_DARKS),
            num_flats: Parameter::new("num_flats", DEFAULT_NUM_FLATS),
            radio_position: Parameter::new("radio_position", radio_position).with_unit(unit),
            flat_position: Parameter::new("flat_position", flat_position).with_unit(unit),
            flat_motor,
            shutter,
            camera,
        }
    }

    /// Number of dark fields.
    pub fn num_darks(&self) -> &Parameter<usize> {
        &self.num_darks
    }

    /// Number of flat fields.
    pub fn num_flats(&self) -> &Parameter<usize> {
        &self.num_flats
    }

    /// Flat motor position with the sample in the beam.
    pub fn radio_position(&self) -> &Parameter<f64> {
        &self.radio_position
    }

    /// Flat motor position with the sample out of the beam.
    pub fn flat_position(&self) -> &Parameter<f64> {
        &self.flat_position
    }

    /// Flat motor.
    pub fn flat_motor(&self) -> &Arc<dyn Motor> {
        &self.flat_motor
    }

    /// Beam shutter.
    pub fn shutter(&self) -> &Arc<dyn Shutter> {
        &self.shutter
    }

    /// Detector.
    pub fn camera(&self) -> &Arc<dyn Camera> {
        &self.camera
    }

    pub(crate) fn parameters(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert("num_darks".into(), json!(self.num_darks.get()));
        map.insert("num_flats".into(), json!(self.num_flats.get()));
        map.insert("radio_position".into(), json!(self.radio_position.get()));
        map.insert("flat_position".into(), json!(self.flat_position.get()));
        map
    }

    /// Block the beam.
    pub async fn prepare_darks(&self) -> Result<()> {
        self.shutter.close().await
    }

    /// Move the sample out and let the beam through.
    pub async fn prepare_flats(&self) -> Result<()> {
        self.flat_motor.set_position(self.flat_position.get()).await?;
        self.shutter.open().await
    }

    /// Move the sample back into the beam.
    pub async fn finish_flats(&self) -> Result<()> {
        self.flat_motor.set_position(self.radio_position.get()).await
    }

    /// Move the sample into the beam and let the beam through.
    pub async fn prepare_radios(&self) -> Result<()> {
        self.flat_motor.set_position(self.radio_position.get()).await?;
        self.shutter.open().await
    }

    /// Take the dark fields.
    #[instrument(skip_all, err)]
    pub async fn take_darks(&self, ctx: &AcquisitionContext) -> Result<()> {
        self.prepare_darks().await?;
        self.take_triggered(self.num_darks.get(), ctx).await
    }

    /// Take the flat fields.
    #[instrument(skip_all, err)]
    pub async fn take_flats(&self, ctx: &AcquisitionContext) -> Result<()> {
        run_with_cleanup(
            async {
                self.prepare_flats().await?;
                self.take_triggered(self.num_flats.get(), ctx).await
            },
            self.finish_flats(),
        )
        .await
    }

    async fn take_triggered(&self, count: usize, ctx: &AcquisitionContext) -> Result<()> {
        self.camera
            .set_trigger_source(TriggerSource::Software)
            .await?;
        with_recording(self.camera.as_ref(), async {
            for i in 0..count {
                ctx.check_abort()?;
                self.camera.trigger().await?;
                let frame = self.camera.grab().await?;
                ctx.emit(frame).await?;
                debug!(acquisition = %ctx.kind(), frame = i, "frame stored");
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{AbortHandle, AcquisitionKind};
    use crate::walker::MemorySink;
    use lamino_core::ShutterState;
    use lamino_driver_mock::{MockCamera, MockMotor, MockShutter};

    struct Rig {
        flat: Arc<MockMotor>,
        shutter: Arc<MockShutter>,
        camera: Arc<MockCamera>,
        sink: Arc<MemorySink>,
        radiography: Radiography,
    }

    fn rig(camera: MockCamera) -> Rig {
        let flat = Arc::new(MockMotor::linear("flat").with_velocity(1000.0));
        let shutter = Arc::new(MockShutter::new());
        let camera = Arc::new(camera.with_resolution(4, 4));
        let radiography = Radiography::new(flat.clone(), shutter.clone(), camera.clone(), 0.0, 8.0);
        radiography.num_darks().set(3).unwrap();
        radiography.num_flats().set(4).unwrap();
        Rig {
            flat,
            shutter,
            camera,
            sink: Arc::new(MemorySink::new()),
            radiography,
        }
    }

    fn ctx(rig: &Rig, kind: AcquisitionKind) -> AcquisitionContext {
        AcquisitionContext::new(kind, rig.sink.clone(), AbortHandle::new())
    }

    #[tokio::test]
    async fn darks_with_closed_shutter() {
        let rig = rig(MockCamera::default());
        rig.shutter.open().await.unwrap();

        let ctx = ctx(&rig, AcquisitionKind::Darks);
        rig.radiography.take_darks(&ctx).await.unwrap();

        assert_eq!(ctx.frames(), 3);
        assert_eq!(rig.sink.count("darks"), 3);
        assert!(!rig.shutter.is_open());
        assert_eq!(rig.camera.triggers(), 3);
        assert_eq!(rig.camera.trigger_source(), TriggerSource::Software);
        assert!(!rig.camera.is_recording());
    }

    #[tokio::test]
    async fn flats_move_sample_out_and_back() {
        let rig = rig(MockCamera::default());
        let ctx = ctx(&rig, AcquisitionKind::Flats);
        rig.radiography.take_flats(&ctx).await.unwrap();

        assert_eq!(rig.sink.count("flats"), 4);
        assert_eq!(rig.flat.targets(), vec![8.0, 0.0]);
        assert_eq!(rig.shutter.history(), vec![ShutterState::Open]);
        assert!(!rig.camera.is_recording());
    }

    #[tokio::test]
    async fn flats_clean_up_after_grab_failure() {
        let rig = rig(MockCamera::default().fail_grab_after(2));
        let ctx = ctx(&rig, AcquisitionKind::Flats);
        assert!(rig.radiography.take_flats(&ctx).await.is_err());

        assert_eq!(rig.sink.count("flats"), 2);
        assert_eq!(rig.flat.targets(), vec![8.0, 0.0]);
        assert!(!rig.camera.is_recording());
    }
}
