//! Frame storage.
//!
//! A [`FrameSink`] receives every frame of a run, tagged with its
//! acquisition name, plus a [`ScanManifest`] when the run ends.
//!
//! [`Walker`] lays runs out on disk:
//!
//! ```text
//! <root>/
//!   scan_0001/
//!     darks/frame_000000.tif ...
//!     flats/frame_000000.tif ...
//!     radios/frame_000000.tif ...
//!     manifest.json
//!   scan_0002/
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::codecs::tiff::TiffEncoder;
use image::{GrayImage, ImageBuffer, Luma};
use lamino_core::{Frame, StorageRingState};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// File name of the per-scan manifest.
pub const MANIFEST_FILE: &str = "manifest.json";

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Every acquisition completed
    Completed,
    /// Stopped by an abort request
    Aborted,
    /// Stopped by an error
    Failed,
}

/// Storage ring conditions at the start of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamSnapshot {
    /// Ring current (mA)
    pub current: f64,
    /// Beam energy (GeV)
    pub energy: f64,
    /// Beam lifetime (s)
    pub lifetime: f64,
    /// Operation mode
    pub mode: StorageRingState,
}

/// Summary written at the end of every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanManifest {
    /// Session name
    pub session: String,
    /// Scan directory name, empty without separate scans
    pub scan: String,
    /// Sequence that produced the frames
    pub sequence: String,
    /// Sequence parameters at the start of the run
    pub parameters: serde_json::Value,
    /// Run start
    pub started: DateTime<Utc>,
    /// Run end
    pub finished: DateTime<Utc>,
    /// Frames stored per acquisition
    pub frames: BTreeMap<String, u64>,
    /// How the run ended
    pub outcome: Outcome,
    /// Error message for failed and aborted runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Beam conditions, if a storage ring was attached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beam: Option<BeamSnapshot>,
}

/// Destination of acquired frames.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// True if a scan of that name was already stored.
    async fn scan_exists(&self, _scan: &str) -> bool {
        false
    }

    /// Start a run. An empty `scan` stores directly under the root.
    async fn begin_scan(&self, scan: &str) -> Result<()>;

    /// Store one frame of `acquisition`.
    async fn write(&self, acquisition: &str, frame: Frame) -> Result<()>;

    /// Finish the run.
    async fn end_scan(&self, manifest: &ScanManifest) -> Result<()>;
}

// =============================================================================
// Walker
// =============================================================================

#[derive(Debug)]
struct WalkerState {
    current: PathBuf,
    counters: HashMap<String, u64>,
}

/// Writes frames as TIFF files below a root directory.
pub struct Walker {
    root: PathBuf,
    state: Mutex<WalkerState>,
}

impl Walker {
    /// Walker rooted at `root`; the directory is created on first use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            state: Mutex::new(WalkerState {
                current: root.clone(),
                counters: HashMap::new(),
            }),
            root,
        }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of the current run.
    pub fn current(&self) -> PathBuf {
        self.state.lock().current.clone()
    }
}

#[async_trait]
impl FrameSink for Walker {
    async fn scan_exists(&self, scan: &str) -> bool {
        self.root.join(scan).exists()
    }

    async fn begin_scan(&self, scan: &str) -> Result<()> {
        let current = if scan.is_empty() {
            self.root.clone()
        } else {
            self.root.join(scan)
        };
        std::fs::create_dir_all(&current)
            .with_context(|| format!("Failed to create {}", current.display()))?;
        info!(path = %current.display(), "writing scan");

        let mut state = self.state.lock();
        state.current = current;
        state.counters.clear();
        Ok(())
    }

    async fn write(&self, acquisition: &str, frame: Frame) -> Result<()> {
        let (dir, index) = {
            let mut state = self.state.lock();
            let dir = state.current.join(acquisition);
            let counter = state.counters.entry(acquisition.to_string()).or_insert(0);
            let index = *counter;
            *counter += 1;
            (dir, index)
        };
        let path = dir.join(format!("frame_{:06}.tif", index));

        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            write_tiff(&frame, &path)
        })
        .await
        .map_err(|e| anyhow!("TIFF writer task failed: {}", e))?
    }

    async fn end_scan(&self, manifest: &ScanManifest) -> Result<()> {
        let path = self.current().join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(manifest)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!(path = %path.display(), "wrote manifest");
        Ok(())
    }
}

/// Write one frame as 8- or 16-bit grayscale TIFF.
pub fn write_tiff(frame: &Frame, path: &Path) -> Result<()> {
    if !frame.is_consistent() {
        return Err(anyhow!(
            "Frame data size mismatch: {} bytes for {}x{} {}bit",
            frame.data.len(),
            frame.width,
            frame.height,
            frame.bit_depth
        ));
    }

    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let encoder = TiffEncoder::new(BufWriter::new(file));

    match frame.pixels_u16() {
        Some(pixels) => {
            let img: ImageBuffer<Luma<u16>, Vec<u16>> =
                ImageBuffer::from_raw(frame.width, frame.height, pixels)
                    .ok_or_else(|| anyhow!("Failed to create 16-bit image buffer"))?;
            img.write_with_encoder(encoder)
        }
        None => {
            let img: GrayImage = ImageBuffer::from_raw(frame.width, frame.height, frame.data.clone())
                .ok_or_else(|| anyhow!("Failed to create 8-bit image buffer"))?;
            img.write_with_encoder(encoder)
        }
    }
    .with_context(|| format!("Failed to encode TIFF to {:?}", path))
}

// =============================================================================
// MemorySink
// =============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    scans: Vec<String>,
    frames: Vec<(String, Frame)>,
    manifests: Vec<ScanManifest>,
}

/// Keeps frames in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames of `acquisition` in arrival order, across all runs.
    pub fn frames(&self, acquisition: &str) -> Vec<Frame> {
        self.state
            .lock()
            .frames
            .iter()
            .filter(|(name, _)| name == acquisition)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    /// Number of frames of `acquisition`, across all runs.
    pub fn count(&self, acquisition: &str) -> usize {
        self.state
            .lock()
            .frames
            .iter()
            .filter(|(name, _)| name == acquisition)
            .count()
    }

    /// Scan names in the order the runs started.
    pub fn scans(&self) -> Vec<String> {
        self.state.lock().scans.clone()
    }

    /// Manifests of finished runs.
    pub fn manifests(&self) -> Vec<ScanManifest> {
        self.state.lock().manifests.clone()
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn scan_exists(&self, scan: &str) -> bool {
        self.state.lock().scans.iter().any(|s| s == scan)
    }

    async fn begin_scan(&self, scan: &str) -> Result<()> {
        self.state.lock().scans.push(scan.to_string());
        Ok(())
    }

    async fn write(&self, acquisition: &str, frame: Frame) -> Result<()> {
        self.state.lock().frames.push((acquisition.to_string(), frame));
        Ok(())
    }

    async fn end_scan(&self, manifest: &ScanManifest) -> Result<()> {
        self.state.lock().manifests.push(manifest.clone());
        Ok(())
    }
}
