//! Experiment runner.
//!
//! An [`Experiment`] runs the acquisitions of a [`Sequence`] (darks, flats,
//! radios) one after the other and streams their frames to a [`FrameSink`].
//! With separate scans every run goes into a fresh `scan_NNNN` directory.
//!
//! Aborting is cooperative: [`AbortHandle::abort`] makes the running
//! sequencer fail with [`DeviceError::Aborted`] at its next check, so its
//! cleanup (closing the shutter, returning motors) still runs.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use lamino_core::{DeviceError, Frame, FrameProducer, StorageRing};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::walker::{BeamSnapshot, FrameSink, Outcome, ScanManifest};

// =============================================================================
// Abort
// =============================================================================

/// Cooperative abort flag shared between a controller and a running sequence.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortHandle {
    /// Handle in the not-aborted state.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Request an abort.
    pub fn abort(&self) {
        if !self.sender.send_replace(true) {
            warn!("abort requested");
        }
    }

    /// Clear a previous abort request.
    pub fn reset(&self) {
        self.sender.send_replace(false);
    }

    /// True once an abort was requested.
    pub fn is_aborted(&self) -> bool {
        *self.sender.borrow()
    }

    /// Fail with [`DeviceError::Aborted`] if an abort was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_aborted() {
            Err(DeviceError::Aborted.into())
        } else {
            Ok(())
        }
    }

    /// Resolve once an abort is requested.
    pub async fn aborted(&self) {
        let mut rx = self.sender.subscribe();
        // The sender lives as long as self, so this only ends on abort.
        let _ = rx.wait_for(|aborted| *aborted).await;
    }

    /// Sleep unless aborted first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.aborted() => Err(DeviceError::Aborted.into()),
        }
    }
}

// =============================================================================
// Acquisitions
// =============================================================================

/// Frame series of a laminography run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionKind {
    /// Beam off
    Darks,
    /// Beam on, sample out
    Flats,
    /// Projections of the sample
    Radios,
}

impl AcquisitionKind {
    /// Directory and manifest name.
    pub fn name(&self) -> &'static str {
        match self {
            AcquisitionKind::Darks => "darks",
            AcquisitionKind::Flats => "flats",
            AcquisitionKind::Radios => "radios",
        }
    }
}

impl fmt::Display for AcquisitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a sequencer sees of the running experiment.
pub struct AcquisitionContext {
    kind: AcquisitionKind,
    sink: Arc<dyn FrameSink>,
    abort: AbortHandle,
    frames: AtomicU64,
}

impl AcquisitionContext {
    /// Context streaming into `sink`.
    pub fn new(kind: AcquisitionKind, sink: Arc<dyn FrameSink>, abort: AbortHandle) -> Self {
        Self {
            kind,
            sink,
            abort,
            frames: AtomicU64::new(0),
        }
    }

    /// Acquisition being recorded.
    pub fn kind(&self) -> AcquisitionKind {
        self.kind
    }

    /// The abort flag of the run.
    pub fn abort(&self) -> &AbortHandle {
        &self.abort
    }

    /// Fail with [`DeviceError::Aborted`] if an abort was requested.
    pub fn check_abort(&self) -> Result<()> {
        self.abort.check()
    }

    /// Store a frame.
    pub async fn emit(&self, frame: Frame) -> Result<()> {
        self.sink.write(self.kind.name(), frame).await?;
        self.frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Frames stored so far.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

/// A scan: an ordered list of acquisitions and how to take each.
#[async_trait]
pub trait Sequence: Send + Sync {
    /// Name recorded in the manifest.
    fn name(&self) -> &str;

    /// Acquisitions in run order.
    fn acquisitions(&self) -> Vec<AcquisitionKind> {
        vec![
            AcquisitionKind::Darks,
            AcquisitionKind::Flats,
            AcquisitionKind::Radios,
        ]
    }

    /// Store every run in its own scan directory.
    fn separate_scans(&self) -> bool;

    /// Current parameter values.
    fn parameters(&self) -> serde_json::Value;

    /// Take one acquisition, emitting its frames into `ctx`.
    async fn acquire(&self, kind: AcquisitionKind, ctx: &AcquisitionContext) -> Result<()>;
}

// =============================================================================
// Cleanup helpers
// =============================================================================

/// Run `body`, then `cleanup` on every exit path including panics.
///
/// The body's error wins over a cleanup error; a cleanup error after a
/// successful body is returned.
pub async fn run_with_cleanup<T, B, C>(body: B, cleanup: C) -> Result<T>
where
    B: Future<Output = Result<T>>,
    C: Future<Output = Result<()>>,
{
    let outcome = AssertUnwindSafe(body).catch_unwind().await;
    let cleaned = cleanup.await;
    match outcome {
        Ok(Ok(value)) => cleaned.map(|()| value),
        Ok(Err(e)) => {
            if let Err(cleanup_error) = cleaned {
                error!(error = %cleanup_error, "cleanup failed");
            }
            Err(e)
        }
        Err(panic) => {
            if let Err(cleanup_error) = cleaned {
                error!(error = %cleanup_error, "cleanup failed");
            }
            std::panic::resume_unwind(panic)
        }
    }
}

/// Run `body` while `camera` records; recording stops on every exit path.
pub async fn with_recording<T, C, B>(camera: &C, body: B) -> Result<T>
where
    C: FrameProducer + ?Sized,
    B: Future<Output = Result<T>>,
{
    run_with_cleanup(
        async {
            camera.start_recording().await?;
            body.await
        },
        camera.stop_recording(),
    )
    .await
}

// =============================================================================
// Experiment
// =============================================================================

/// Runs a [`Sequence`] into a [`FrameSink`].
pub struct Experiment {
    session: String,
    sequence: Arc<dyn Sequence>,
    sink: Arc<dyn FrameSink>,
    abort: AbortHandle,
    storage_ring: Option<Arc<dyn StorageRing>>,
    iteration: AtomicU32,
}

impl Experiment {
    /// Experiment with a fresh abort handle.
    pub fn new(
        session: impl Into<String>,
        sequence: Arc<dyn Sequence>,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        Self {
            session: session.into(),
            sequence,
            sink,
            abort: AbortHandle::new(),
            storage_ring: None,
            iteration: AtomicU32::new(1),
        }
    }

    /// Share an existing abort handle, e.g. one wired to Ctrl-C.
    pub fn with_abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    /// Record beam conditions in the manifest.
    pub fn with_storage_ring(mut self, storage_ring: Arc<dyn StorageRing>) -> Self {
        self.storage_ring = Some(storage_ring);
        self
    }

    /// Handle aborting this experiment.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// The sequence being run.
    pub fn sequence(&self) -> &Arc<dyn Sequence> {
        &self.sequence
    }

    async fn next_scan_name(&self) -> String {
        if !self.sequence.separate_scans() {
            return String::new();
        }
        loop {
            let iteration = self.iteration.fetch_add(1, Ordering::SeqCst);
            let name = format!("scan_{:04}", iteration);
            if !self.sink.scan_exists(&name).await {
                return name;
            }
        }
    }

    async fn beam_snapshot(&self) -> Option<BeamSnapshot> {
        let ring = self.storage_ring.as_ref()?;
        let snapshot = async {
            Ok::<_, anyhow::Error>(BeamSnapshot {
                current: ring.current().await?,
                energy: ring.energy().await?,
                lifetime: ring.lifetime().await?,
                mode: ring.state().await?,
            })
        }
        .await;
        match snapshot {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "storage ring not readable");
                None
            }
        }
    }

    /// Run every acquisition of the sequence once.
    ///
    /// The manifest is written whatever the outcome. An aborted run returns an
    /// error for which [`DeviceError::is_abort`] holds.
    pub async fn run(&self) -> Result<ScanManifest> {
        let scan = self.next_scan_name().await;
        let started = Utc::now();
        let parameters = self.sequence.parameters();
        let beam = self.beam_snapshot().await;
        self.sink.begin_scan(&scan).await?;
        info!(
            session = %self.session,
            sequence = self.sequence.name(),
            scan = %scan,
            "run started"
        );

        let mut frames = BTreeMap::new();
        let mut result = Ok(());
        for kind in self.sequence.acquisitions() {
            let ctx = AcquisitionContext::new(kind, self.sink.clone(), self.abort.clone());
            let acquired = match ctx.check_abort() {
                Ok(()) => {
                    info!(acquisition = %kind, "acquisition started");
                    self.sequence.acquire(kind, &ctx).await
                }
                Err(e) => Err(e),
            };
            frames.insert(kind.name().to_string(), ctx.frames());
            if let Err(e) = acquired {
                result = Err(e.context(format!("{} acquisition failed", kind)));
                break;
            }
            info!(acquisition = %kind, frames = ctx.frames(), "acquisition finished");
        }

        let (outcome, error) = match &result {
            Ok(()) => (Outcome::Completed, None),
            Err(e) if DeviceError::is_abort(e) => (Outcome::Aborted, Some(format!("{:#}", e))),
            Err(e) => (Outcome::Failed, Some(format!("{:#}", e))),
        };
        let manifest = ScanManifest {
            session: self.session.clone(),
            scan,
            sequence: self.sequence.name().to_string(),
            parameters,
            started,
            finished: Utc::now(),
            frames,
            outcome,
            error,
            beam,
        };

        let written = self.sink.end_scan(&manifest).await;
        match result {
            Ok(()) => {
                written?;
                info!(scan = %manifest.scan, "run completed");
                Ok(manifest)
            }
            Err(e) => {
                if let Err(write_error) = written {
                    error!(error = %write_error, "manifest not written");
                }
                warn!(outcome = ?manifest.outcome, error = %format!("{:#}", e), "run stopped");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walker::MemorySink;
    use parking_lot::Mutex;

    struct Counting {
        frames_per_acquisition: u64,
        fail_on: Option<AcquisitionKind>,
        seen: Mutex<Vec<AcquisitionKind>>,
        separate_scans: bool,
    }

    impl Counting {
        fn new(frames_per_acquisition: u64) -> Self {
            Self {
                frames_per_acquisition,
                fail_on: None,
                seen: Mutex::new(Vec::new()),
                separate_scans: true,
            }
        }
    }

    #[async_trait]
    impl Sequence for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn separate_scans(&self) -> bool {
            self.separate_scans
        }

        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({ "frames": self.frames_per_acquisition })
        }

        async fn acquire(&self, kind: AcquisitionKind, ctx: &AcquisitionContext) -> Result<()> {
            self.seen.lock().push(kind);
            for i in 0..self.frames_per_acquisition {
                ctx.check_abort()?;
                if self.fail_on == Some(kind) && i == 1 {
                    anyhow::bail!("detector lost");
                }
                ctx.emit(Frame::from_u8(1, 1, i, vec![0])).await?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn runs_go_into_numbered_scans() {
        let sink = Arc::new(MemorySink::new());
        let experiment = Experiment::new("test", Arc::new(Counting::new(3)), sink.clone());

        let first = experiment.run().await.unwrap();
        let second = experiment.run().await.unwrap();

        assert_eq!(first.scan, "scan_0001");
        assert_eq!(second.scan, "scan_0002");
        assert_eq!(first.frames["darks"], 3);
        assert_eq!(first.frames["radios"], 3);
        assert_eq!(first.outcome, Outcome::Completed);
        assert_eq!(sink.count("flats"), 6);
        assert_eq!(sink.manifests().len(), 2);
    }

    #[tokio::test]
    async fn existing_scans_are_skipped() {
        let sink = Arc::new(MemorySink::new());
        sink.begin_scan("scan_0001").await.unwrap();
        let experiment = Experiment::new("test", Arc::new(Counting::new(1)), sink.clone());
        assert_eq!(experiment.run().await.unwrap().scan, "scan_0002");
    }

    #[tokio::test]
    async fn without_separate_scans_everything_goes_to_the_root() {
        let sink = Arc::new(MemorySink::new());
        let mut sequence = Counting::new(1);
        sequence.separate_scans = false;
        let experiment = Experiment::new("test", Arc::new(sequence), sink.clone());
        experiment.run().await.unwrap();
        experiment.run().await.unwrap();
        assert_eq!(sink.scans(), vec![String::new(), String::new()]);
    }

    #[tokio::test]
    async fn failure_stops_the_run_and_is_recorded() {
        let sink = Arc::new(MemorySink::new());
        let mut sequence = Counting::new(3);
        sequence.fail_on = Some(AcquisitionKind::Flats);
        let sequence = Arc::new(sequence);
        let experiment = Experiment::new("test", sequence.clone(), sink.clone());

        let err = experiment.run().await.unwrap_err();
        assert!(format!("{:#}", err).contains("detector lost"));
        assert_eq!(
            *sequence.seen.lock(),
            vec![AcquisitionKind::Darks, AcquisitionKind::Flats]
        );

        let manifest = &sink.manifests()[0];
        assert_eq!(manifest.outcome, Outcome::Failed);
        assert_eq!(manifest.frames["flats"], 1);
        assert!(!manifest.frames.contains_key("radios"));
    }

    #[tokio::test]
    async fn abort_before_run_is_reported() {
        let sink = Arc::new(MemorySink::new());
        let experiment = Experiment::new("test", Arc::new(Counting::new(3)), sink.clone());
        experiment.abort_handle().abort();

        let err = experiment.run().await.unwrap_err();
        assert!(DeviceError::is_abort(&err));
        assert_eq!(sink.manifests()[0].outcome, Outcome::Aborted);
        assert_eq!(sink.count("darks"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_interrupts_sleep() {
        let abort = AbortHandle::new();
        let sleeper = {
            let abort = abort.clone();
            tokio::spawn(async move { abort.sleep(Duration::from_secs(3600)).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        abort.abort();
        let err = sleeper.await.unwrap().unwrap_err();
        assert!(DeviceError::is_abort(&err));

        abort.reset();
        assert!(abort.check().is_ok());
    }

    #[tokio::test]
    async fn cleanup_runs_after_error() {
        let cleaned = Mutex::new(false);
        let result: Result<()> = run_with_cleanup(
            async { Err(anyhow::anyhow!("boom")) },
            async {
                *cleaned.lock() = true;
                Ok(())
            },
        )
        .await;
        assert!(result.is_err());
        assert!(*cleaned.lock());
    }

    #[tokio::test]
    async fn cleanup_error_after_success_is_returned() {
        let result = run_with_cleanup(async { Ok(5) }, async { Err(anyhow::anyhow!("stuck")) }).await;
        assert_eq!(result.unwrap_err().to_string(), "stuck");
    }
}
