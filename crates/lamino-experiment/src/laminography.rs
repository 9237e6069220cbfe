//! Laminography sequencers.
//!
//! Both sequencers take darks and flats through [`Radiography`] and differ
//! in how the radios are recorded:
//!
//! - [`SteppedLaminography`] stops the rotation stage at every projection
//!   angle and fires one software trigger per frame.
//! - [`ContinuousLaminography`] spins the stage at a constant velocity while
//!   the camera free-runs into its buffer. The stage is started `margin_time`
//!   early so it is at speed when recording begins.
//!
//! Radios always end with `finish_radios` (shutter closed, stage back at the
//! start angle), also when the acquisition fails or is aborted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use lamino_core::limits::{
    max_buffered_frames, DEFAULT_ADDITIONAL_MARGIN, DEFAULT_RETURN_VELOCITY,
};
use lamino_core::{ContinuousMotor, Motor, MotorState, Parameter, TriggerSource, Triggerable};
use lamino_hardware::config::{ScanConfig, ScanMode};
use lamino_hardware::Session;
use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::experiment::{
    run_with_cleanup, with_recording, AcquisitionContext, AcquisitionKind, Sequence,
};
use crate::radiography::Radiography;

/// Default number of projections.
pub const DEFAULT_NUM_PROJECTIONS: usize = 3600;
/// Default angular range (deg).
pub const DEFAULT_ANGULAR_RANGE: f64 = 360.0;

// =============================================================================
// Rotation parameters
// =============================================================================

/// Projection geometry shared by both sequencers.
pub struct Rotation {
    /// Number of radios.
    pub num_projections: Parameter<usize>,
    /// Rotation covered by the radios (deg).
    pub angular_range: Parameter<f64>,
    /// Angle of the first radio (deg).
    pub start_angle: Parameter<f64>,
    /// Store every run in its own scan directory.
    pub separate_scans: Parameter<bool>,
}

impl Default for Rotation {
    fn default() -> Self {
        Self {
            num_projections: Parameter::new("num_projections", DEFAULT_NUM_PROJECTIONS)
                .with_range(1, usize::MAX),
            angular_range: Parameter::new("angular_range", DEFAULT_ANGULAR_RANGE)
                .with_unit("deg")
                .with_validator(|range| {
                    if *range > 0.0 {
                        Ok(())
                    } else {
                        Err(anyhow!("Angular range must be positive, got {}", range))
                    }
                }),
            start_angle: Parameter::new("start_angle", 0.0).with_unit("deg"),
            separate_scans: Parameter::new("separate_scans", true),
        }
    }
}

impl Rotation {
    /// Angle of projection `index`.
    pub fn angle(&self, index: usize) -> f64 {
        let step = self.angular_range.get() / self.num_projections.get() as f64;
        self.start_angle.get() + index as f64 * step
    }

    fn apply(&self, scan: &ScanConfig) -> Result<()> {
        self.num_projections.set(scan.num_projections)?;
        self.angular_range.set(scan.angular_range)?;
        self.start_angle.set(scan.start_angle)?;
        self.separate_scans.set(scan.separate_scans)
    }

    fn insert_into(&self, map: &mut serde_json::Map<String, serde_json::Value>) {
        map.insert("num_projections".into(), json!(self.num_projections.get()));
        map.insert("angular_range".into(), json!(self.angular_range.get()));
        map.insert("start_angle".into(), json!(self.start_angle.get()));
        map.insert("separate_scans".into(), json!(self.separate_scans.get()));
    }
}

// =============================================================================
// Stepped
// =============================================================================

/// Laminography with the stage stopped at every projection angle.
pub struct SteppedLaminography {
    radiography: Radiography,
    rotation: Rotation,
    motor: Arc<dyn Motor>,
    finished: AtomicBool,
}

impl SteppedLaminography {
    /// Sequencer rotating `motor`.
    pub fn new(radiography: Radiography, motor: Arc<dyn Motor>) -> Self {
        Self {
            radiography,
            rotation: Rotation::default(),
            motor,
            finished: AtomicBool::new(false),
        }
    }

    /// Dark and flat field settings.
    pub fn radiography(&self) -> &Radiography {
        &self.radiography
    }

    /// Projection geometry.
    pub fn rotation(&self) -> &Rotation {
        &self.rotation
    }

    /// Move the sample into the beam and open the shutter.
    pub async fn prepare_radios(&self) -> Result<()> {
        self.radiography.prepare_radios().await
    }

    /// Take one radio per projection angle.
    #[instrument(skip_all, fields(motor = self.motor.name()), err)]
    pub async fn take_radios(&self, ctx: &AcquisitionContext) -> Result<()> {
        self.finished.store(false, Ordering::SeqCst);
        run_with_cleanup(self.step_through(ctx), self.finish_radios()).await
    }

    async fn step_through(&self, ctx: &AcquisitionContext) -> Result<()> {
        self.prepare_radios().await?;
        let camera = self.radiography.camera();
        camera.set_trigger_source(TriggerSource::Software).await?;
        let count = self.rotation.num_projections.get();

        with_recording(camera.as_ref(), async {
            for i in 0..count {
                ctx.check_abort()?;
                let angle = self.rotation.angle(i);
                self.motor.set_position(angle).await?;
                if let Err(e) = camera.trigger().await {
                    debug!(error = %e, projection = i, "trigger error ignored");
                }
                let frame = camera.grab().await?;
                ctx.emit(frame).await?;
                debug!(projection = i, angle, "radio stored");
            }
            Ok(())
        })
        .await
    }

    /// Close the shutter and return the stage to the start angle.
    ///
    /// Both steps run even if one fails. Once they have succeeded, further
    /// calls before the next [`take_radios`](Self::take_radios) do nothing.
    pub async fn finish_radios(&self) -> Result<()> {
        if self.finished.load(Ordering::SeqCst) {
            return Ok(());
        }
        let closed = self.radiography.prepare_darks().await;
        let returned = self.motor.set_position(self.rotation.start_angle.get()).await;
        first_error([closed, returned])?;
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Sequence for SteppedLaminography {
    fn name(&self) -> &str {
        "stepped-laminography"
    }

    fn separate_scans(&self) -> bool {
        self.rotation.separate_scans.get()
    }

    fn parameters(&self) -> serde_json::Value {
        let mut map = self.radiography.parameters();
        self.rotation.insert_into(&mut map);
        map.insert("motor".into(), json!(self.motor.name()));
        serde_json::Value::Object(map)
    }

    async fn acquire(&self, kind: AcquisitionKind, ctx: &AcquisitionContext) -> Result<()> {
        match kind {
            AcquisitionKind::Darks => self.radiography.take_darks(ctx).await,
            AcquisitionKind::Flats => self.radiography.take_flats(ctx).await,
            AcquisitionKind::Radios => self.take_radios(ctx).await,
        }
    }
}

// =============================================================================
// Continuous
// =============================================================================

/// Laminography with the stage rotating at constant velocity.
pub struct ContinuousLaminography {
    radiography: Radiography,
    rotation: Rotation,
    motor: Arc<dyn ContinuousMotor>,
    velocity: Parameter<Option<f64>>,
    additional_margin: Parameter<f64>,
    return_velocity: Parameter<f64>,
    stashed_velocity: Mutex<Option<f64>>,
    motion: Mutex<Option<JoinHandle<Result<()>>>>,
    finished: AtomicBool,
}

impl ContinuousLaminography {
    /// Sequencer rotating `motor`.
    pub fn new(radiography: Radiography, motor: Arc<dyn ContinuousMotor>) -> Self {
        let unit = motor.kind();
        Self {
            radiography,
            rotation: Rotation::default(),
            velocity: Parameter::new("velocity", None)
                .with_unit(unit.velocity_unit())
                .with_validator(|velocity: &Option<f64>| match velocity {
                    Some(v) if *v <= 0.0 => Err(anyhow!("Velocity must be positive, got {}", v)),
                    _ => Ok(()),
                }),
            additional_margin: Parameter::new("additional_margin", DEFAULT_ADDITIONAL_MARGIN)
                .with_unit(unit.position_unit())
                .with_range(0.0, f64::MAX),
            return_velocity: Parameter::new("return_velocity", DEFAULT_RETURN_VELOCITY)
                .with_unit(unit.velocity_unit())
                .with_range(f64::MIN_POSITIVE, f64::MAX),
            motor,
            stashed_velocity: Mutex::new(None),
            motion: Mutex::new(None),
            finished: AtomicBool::new(false),
        }
    }

    /// Dark and flat field settings.
    pub fn radiography(&self) -> &Radiography {
        &self.radiography
    }

    /// Projection geometry.
    pub fn rotation(&self) -> &Rotation {
        &self.rotation
    }

    /// Explicit rotation velocity; `None` derives it from the frame rate.
    pub fn velocity_parameter(&self) -> &Parameter<Option<f64>> {
        &self.velocity
    }

    /// Extra travel on both ends of the rotation.
    pub fn additional_margin(&self) -> &Parameter<f64> {
        &self.additional_margin
    }

    /// Velocity used to bring the stage back to the start angle.
    pub fn return_velocity(&self) -> &Parameter<f64> {
        &self.return_velocity
    }

    /// Rotation velocity during the radios.
    ///
    /// Without an explicit value the stage covers one projection step per
    /// camera frame.
    pub async fn velocity(&self) -> Result<f64> {
        if let Some(velocity) = self.velocity.get() {
            return Ok(velocity);
        }
        let fps = self.radiography.camera().frame_rate().await?;
        let range = self.rotation.angular_range.get();
        Ok(range * fps / self.rotation.num_projections.get() as f64)
    }

    /// Configure camera, shutter and stage for the rotation.
    pub async fn prepare_radios(&self) -> Result<()> {
        if let Some(velocity) = self.motor.motion_velocity().await? {
            *self.stashed_velocity.lock() = Some(velocity);
        }

        let camera = self.radiography.camera();
        camera.set_trigger_source(TriggerSource::Auto).await?;
        let width = camera.roi_width().await?;
        let height = camera.roi_height().await?;
        let bytes_per_pixel = camera.sensor_bitdepth().await? / 8;
        let num_buffers = self
            .rotation
            .num_projections
            .get()
            .saturating_mul(2)
            .min(max_buffered_frames(width, height, bytes_per_pixel));
        info!(num_buffers, width, height, "camera buffers");
        camera.set_num_buffers(num_buffers).await?;
        camera.set_buffered(true).await?;

        self.radiography.prepare_radios().await?;
        self.motor.set_velocity(self.return_velocity.get()).await?;
        self.motor.set_position(self.rotation.start_angle.get()).await
    }

    /// Rotate through the projection range while recording.
    #[instrument(skip_all, fields(motor = self.motor.name()), err)]
    pub async fn take_radios(&self, ctx: &AcquisitionContext) -> Result<()> {
        self.finished.store(false, Ordering::SeqCst);
        let cleanup = async {
            let returned = self.motor.set_velocity(self.return_velocity.get()).await;
            let finished = self.finish_radios().await;
            returned.and(finished)
        };
        run_with_cleanup(self.rotate(ctx), cleanup).await
    }

    async fn rotate(&self, ctx: &AcquisitionContext) -> Result<()> {
        let velocity = self.velocity().await?;
        let acceleration = self.motor.acceleration().await?;
        if velocity <= 0.0 || acceleration <= 0.0 {
            bail!(
                "Cannot rotate at velocity {} with acceleration {}",
                velocity,
                acceleration
            );
        }
        let margin_time = velocity / acceleration;
        let margin = 0.5 * velocity * margin_time + self.additional_margin.get();
        let start = self.rotation.start_angle.get();
        let end = start + self.rotation.angular_range.get() + 2.0 * margin;
        let ramp = Duration::try_from_secs_f64(margin_time)
            .with_context(|| format!("Invalid acceleration time {}s", margin_time))?;

        self.prepare_radios().await?;
        self.motor.set_velocity(velocity).await?;
        info!(velocity, margin, end, "starting rotation");
        let motor = self.motor.clone();
        let handle = tokio::spawn(async move { motor.set_position(end).await });
        *self.motion.lock() = Some(handle);

        ctx.abort().sleep(ramp).await?;

        let camera = self.radiography.camera();
        let count = self.rotation.num_projections.get();
        with_recording(camera.as_ref(), async {
            let mut reported = false;
            for i in 0..count {
                ctx.check_abort()?;
                let frame = camera.grab().await?;
                ctx.emit(frame).await?;
                if !reported && self.motion_done() {
                    warn!(projection = i, "rotation finished before the last radio");
                    reported = true;
                }
            }
            Ok(())
        })
        .await?;

        let handle = self.motion.lock().take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| anyhow!("Rotation task failed: {}", e))??;
        }
        Ok(())
    }

    fn motion_done(&self) -> bool {
        self.motion
            .lock()
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    /// Close the shutter, stop the stage and return it to the start angle.
    ///
    /// Every step runs even if an earlier one fails; the first error is
    /// returned. Once all steps have succeeded, further calls before the next
    /// [`take_radios`](Self::take_radios) do nothing.
    pub async fn finish_radios(&self) -> Result<()> {
        if self.finished.load(Ordering::SeqCst) {
            return Ok(());
        }
        let closed = self.radiography.prepare_darks().await;
        let stopped = self.stop_if_moving().await;
        let motion = self.motion.lock().take();
        if let Some(handle) = motion {
            handle.abort();
        }
        let restored = self.restore_motion_velocity().await;
        let returned = self.motor.set_position(self.rotation.start_angle.get()).await;
        first_error([closed, stopped, restored, returned])?;
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_if_moving(&self) -> Result<()> {
        if self.motor.state().await? == MotorState::Moving {
            self.motor.stop().await?;
        }
        Ok(())
    }

    async fn restore_motion_velocity(&self) -> Result<()> {
        let stashed = *self.stashed_velocity.lock();
        if let Some(velocity) = stashed {
            debug!(velocity, "restoring motion velocity");
            self.motor.set_motion_velocity(velocity).await?;
            self.stashed_velocity.lock().take();
        }
        Ok(())
    }
}

#[async_trait]
impl Sequence for ContinuousLaminography {
    fn name(&self) -> &str {
        "continuous-laminography"
    }

    fn separate_scans(&self) -> bool {
        self.rotation.separate_scans.get()
    }

    fn parameters(&self) -> serde_json::Value {
        let mut map = self.radiography.parameters();
        self.rotation.insert_into(&mut map);
        map.insert("motor".into(), json!(self.motor.name()));
        map.insert("velocity".into(), json!(self.velocity.get()));
        map.insert("additional_margin".into(), json!(self.additional_margin.get()));
        map.insert("return_velocity".into(), json!(self.return_velocity.get()));
        serde_json::Value::Object(map)
    }

    async fn acquire(&self, kind: AcquisitionKind, ctx: &AcquisitionContext) -> Result<()> {
        match kind {
            AcquisitionKind::Darks => self.radiography.take_darks(ctx).await,
            AcquisitionKind::Flats => self.radiography.take_flats(ctx).await,
            AcquisitionKind::Radios => self.take_radios(ctx).await,
        }
    }
}

// =============================================================================
// Session wiring
// =============================================================================

/// Build the sequencer described by the session's `[scan]` section.
pub fn sequence_from_session(session: &Session, mode: ScanMode) -> Result<Arc<dyn Sequence>> {
    let scan = &session.config().scan;
    let radiography = Radiography::new(
        session.motor(&scan.flat_motor)?,
        session.shutter(),
        session.camera(),
        scan.radio_position,
        scan.flat_position,
    );
    radiography.num_darks().set(scan.num_darks)?;
    radiography.num_flats().set(scan.num_flats)?;

    let sequence: Arc<dyn Sequence> = match mode {
        ScanMode::Stepped => {
            let stepped =
                SteppedLaminography::new(radiography, session.motor(&scan.rotation_motor)?);
            stepped.rotation().apply(scan)?;
            Arc::new(stepped)
        }
        ScanMode::Continuous => {
            let continuous = ContinuousLaminography::new(
                radiography,
                session.continuous_motor(&scan.rotation_motor)?,
            );
            continuous.rotation().apply(scan)?;
            continuous.velocity_parameter().set(scan.velocity)?;
            continuous.additional_margin().set(scan.additional_margin)?;
            continuous.return_velocity().set(scan.return_velocity)?;
            Arc::new(continuous)
        }
    };
    info!(sequence = sequence.name(), motor = %scan.rotation_motor, "sequence ready");
    Ok(sequence)
}

/// Return the first failed cleanup step; later failures are only logged.
fn first_error<const N: usize>(steps: [Result<()>; N]) -> Result<()> {
    let mut first = None;
    for step in steps {
        if let Err(e) = step {
            if first.is_some() {
                warn!(error = %e, "further cleanup step failed");
            } else {
                first = Some(e);
            }
        }
    }
    first.map_or(Ok(()), Err)
}
