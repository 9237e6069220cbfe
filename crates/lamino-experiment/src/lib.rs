//! Laminography scans for lamino
//!
//! - [`experiment`]: runs a [`Sequence`] of acquisitions with cooperative abort
//! - [`radiography`]: dark and flat field phases
//! - [`laminography`]: stepped and continuous radio acquisition
//! - [`walker`]: frame sinks, TIFF storage and run manifests
//!
//! # Example
//!
//! ```rust,ignore
//! let session = Session::from_file(Path::new("config/lamino.toml")).await?;
//! let sequence = sequence_from_session(&session, session.config().scan.mode)?;
//! let walker = Arc::new(Walker::new(&session.config().session.data_root));
//! let experiment = Experiment::new(&session.config().session.name, sequence, walker)
//!     .with_storage_ring(session.storage_ring());
//! let manifest = experiment.run().await?;
//! ```

pub mod experiment;
pub mod laminography;
pub mod radiography;
pub mod walker;

pub use experiment::{
    run_with_cleanup, with_recording, AbortHandle, AcquisitionContext, AcquisitionKind,
    Experiment, Sequence,
};
pub use laminography::{
    sequence_from_session, ContinuousLaminography, Rotation, SteppedLaminography,
};
pub use radiography::Radiography;
pub use walker::{FrameSink, MemorySink, Outcome, ScanManifest, Walker};
