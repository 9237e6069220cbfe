//! Mock camera with trigger modes and a recording buffer.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use lamino_core::{BufferedCamera, Frame, FrameProducer, TriggerSource, Triggerable};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::pattern::projection;

/// Configuration for [`MockCamera`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MockCameraConfig {
    /// ROI width in pixels
    pub width: u32,
    /// ROI height in pixels
    pub height: u32,
    /// Sensor bit depth
    pub bit_depth: u32,
    /// Frames per second in `AUTO` mode
    pub frame_rate: f64,
    /// Initial number of frame buffers
    pub num_buffers: usize,
}

impl Default for MockCameraConfig {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            bit_depth: 16,
            frame_rate: 100.0,
            num_buffers: 16,
        }
    }
}

#[derive(Debug)]
struct CameraState {
    trigger_source: TriggerSource,
    recording: bool,
    buffered: bool,
    num_buffers: usize,
    pending_triggers: u64,
    triggers: u64,
    frames_grabbed: u64,
    recordings: u64,
}

/// Software camera.
///
/// In `AUTO` mode `grab` paces frames at the configured frame rate. In
/// `SOFTWARE` and `EXTERNAL` mode every grab consumes one earlier trigger.
pub struct MockCamera {
    config: MockCameraConfig,
    state: Mutex<CameraState>,
    fail_grab_after: Option<u64>,
    flaky_trigger: bool,
}

impl MockCamera {
    /// Camera with the given configuration.
    pub fn new(config: MockCameraConfig) -> Self {
        let state = CameraState {
            trigger_source: TriggerSource::Auto,
            recording: false,
            buffered: false,
            num_buffers: config.num_buffers,
            pending_triggers: 0,
            triggers: 0,
            frames_grabbed: 0,
            recordings: 0,
        };
        Self {
            config,
            state: Mutex::new(state),
            fail_grab_after: None,
            flaky_trigger: false,
        }
    }

    /// Set the ROI.
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.config.width = width;
        self.config.height = height;
        self
    }

    /// Set the `AUTO` mode frame rate.
    pub fn with_frame_rate(mut self, frame_rate: f64) -> Self {
        self.config.frame_rate = frame_rate;
        self
    }

    /// Set the sensor bit depth.
    pub fn with_bit_depth(mut self, bit_depth: u32) -> Self {
        self.config.bit_depth = bit_depth;
        self
    }

    /// Fail every grab after `count` successful ones.
    pub fn fail_grab_after(mut self, count: u64) -> Self {
        self.fail_grab_after = Some(count);
        self
    }

    /// Make `trigger` report an error although the frame is still triggered.
    pub fn with_flaky_trigger(mut self) -> Self {
        self.flaky_trigger = true;
        self
    }

    /// Current trigger source.
    pub fn trigger_source(&self) -> TriggerSource {
        self.state.lock().trigger_source
    }

    /// True while recording.
    pub fn is_recording(&self) -> bool {
        self.state.lock().recording
    }

    /// True if buffered recording is enabled.
    pub fn is_buffered(&self) -> bool {
        self.state.lock().buffered
    }

    /// Frames delivered since creation.
    pub fn frames_grabbed(&self) -> u64 {
        self.state.lock().frames_grabbed
    }

    /// Software triggers received since creation.
    pub fn triggers(&self) -> u64 {
        self.state.lock().triggers
    }

    /// Number of `start_recording` calls since creation.
    pub fn recordings(&self) -> u64 {
        self.state.lock().recordings
    }

    fn max_value(&self) -> u16 {
        match self.config.bit_depth {
            0 => 1,
            depth if depth >= 16 => u16::MAX,
            depth => ((1u32 << depth) - 1) as u16,
        }
    }

    fn make_frame(&self, frame_number: u64) -> Frame {
        let angle = frame_number as f64 * 0.1;
        let pixels = projection(
            self.config.width,
            self.config.height,
            angle,
            frame_number,
            self.max_value(),
        );
        if self.config.bit_depth > 8 {
            Frame::from_u16(self.config.width, self.config.height, frame_number, &pixels)
        } else {
            let bytes = pixels.iter().map(|&p| p.min(255) as u8).collect();
            Frame::from_u8(self.config.width, self.config.height, frame_number, bytes)
        }
    }
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::new(MockCameraConfig::default())
    }
}

#[async_trait]
impl Triggerable for MockCamera {
    async fn set_trigger_source(&self, source: TriggerSource) -> Result<()> {
        debug!(%source, "mock camera trigger source");
        self.state.lock().trigger_source = source;
        Ok(())
    }

    async fn trigger(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.triggers += 1;
            if state.recording && state.trigger_source != TriggerSource::Auto {
                state.pending_triggers += 1;
            }
        }
        if self.flaky_trigger {
            bail!("Mock camera trigger reported a spurious error");
        }
        Ok(())
    }
}

#[async_trait]
impl FrameProducer for MockCamera {
    async fn start_recording(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.recording = true;
        state.recordings += 1;
        state.pending_triggers = 0;
        Ok(())
    }

    async fn stop_recording(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.recording = false;
        state.pending_triggers = 0;
        Ok(())
    }

    async fn grab(&self) -> Result<Frame> {
        let auto = {
            let mut state = self.state.lock();
            if !state.recording {
                bail!("Mock camera is not recording");
            }
            if let Some(limit) = self.fail_grab_after {
                if state.frames_grabbed >= limit {
                    bail!("Mock camera grab failed after {} frames", limit);
                }
            }
            match state.trigger_source {
                TriggerSource::Auto => true,
                TriggerSource::Software | TriggerSource::External => {
                    if state.pending_triggers == 0 {
                        return Err(anyhow!("Mock camera grab without pending trigger"));
                    }
                    state.pending_triggers -= 1;
                    false
                }
            }
        };

        if auto && self.config.frame_rate > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(1.0 / self.config.frame_rate)).await;
        }

        let frame_number = {
            let mut state = self.state.lock();
            let n = state.frames_grabbed;
            state.frames_grabbed += 1;
            n
        };
        Ok(self.make_frame(frame_number))
    }

    async fn frame_rate(&self) -> Result<f64> {
        Ok(self.config.frame_rate)
    }
}

#[async_trait]
impl BufferedCamera for MockCamera {
    async fn roi_width(&self) -> Result<u32> {
        Ok(self.config.width)
    }

    async fn roi_height(&self) -> Result<u32> {
        Ok(self.config.height)
    }

    async fn sensor_bitdepth(&self) -> Result<u32> {
        Ok(self.config.bit_depth)
    }

    async fn num_buffers(&self) -> Result<usize> {
        Ok(self.state.lock().num_buffers)
    }

    async fn set_num_buffers(&self, count: usize) -> Result<()> {
        if count == 0 {
            bail!("Number of buffers must be positive");
        }
        self.state.lock().num_buffers = count;
        Ok(())
    }

    async fn set_buffered(&self, enabled: bool) -> Result<()> {
        self.state.lock().buffered = enabled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn software_grab_needs_trigger() {
        let camera = MockCamera::default().with_resolution(8, 4);
        camera.set_trigger_source(TriggerSource::Software).await.unwrap();
        camera.start_recording().await.unwrap();

        assert!(camera.grab().await.is_err());
        camera.trigger().await.unwrap();
        let frame = camera.grab().await.unwrap();
        assert_eq!((frame.width, frame.height), (8, 4));
        assert_eq!(frame.data.len(), 8 * 4 * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_mode_paces_frames() {
        let camera = MockCamera::default().with_frame_rate(10.0);
        camera.start_recording().await.unwrap();

        let start = tokio::time::Instant::now();
        for _ in 0..5 {
            camera.grab().await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(camera.frames_grabbed(), 5);
    }

    #[tokio::test]
    async fn grab_failure_injection() {
        let camera = MockCamera::default().with_frame_rate(0.0).fail_grab_after(2);
        camera.start_recording().await.unwrap();
        assert!(camera.grab().await.is_ok());
        assert!(camera.grab().await.is_ok());
        assert!(camera.grab().await.is_err());
    }

    #[tokio::test]
    async fn flaky_trigger_still_fires() {
        let camera = MockCamera::default().with_flaky_trigger();
        camera.set_trigger_source(TriggerSource::Software).await.unwrap();
        camera.start_recording().await.unwrap();
        assert!(camera.trigger().await.is_err());
        assert!(camera.grab().await.is_ok());
    }

    #[tokio::test]
    async fn eight_bit_frames() {
        let camera = MockCamera::default().with_bit_depth(8).with_frame_rate(0.0);
        camera.start_recording().await.unwrap();
        let frame = camera.grab().await.unwrap();
        assert_eq!(frame.bit_depth, 8);
        assert!(frame.is_consistent());
    }
}
