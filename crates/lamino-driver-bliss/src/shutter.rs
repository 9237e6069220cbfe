//! Bliss shutters

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use lamino_core::limits::{DEFAULT_SETTLE_DELAY, DEFAULT_SHUTTER_TIMEOUT};
use lamino_core::{DeviceError, Shutter, ShutterState};
use tracing::{info, instrument};

/// Bliss shutter object as seen from the control system.
#[async_trait]
pub trait BlissShutterDevice: Send + Sync {
    /// Shutter name in the beamline configuration.
    fn name(&self) -> &str;

    /// Request opening.
    async fn open(&self) -> Result<()>;

    /// Request closing.
    async fn close(&self) -> Result<()>;

    /// Raw state string, e.g. `OPEN` or `CLOSED`.
    async fn state(&self) -> Result<String>;
}

/// Map a Bliss shutter state string onto [`ShutterState`].
pub fn shutter_state_from_bliss(state: &str) -> ShutterState {
    if state.contains("OPEN") {
        ShutterState::Open
    } else if state.contains("CLOSED") {
        ShutterState::Closed
    } else if state.contains("MOVING") {
        ShutterState::Moving
    } else if state.contains("FAULT") || state.contains("DISABLE") {
        ShutterState::Error
    } else {
        ShutterState::Unknown
    }
}

/// Bliss shutter exposed through the [`Shutter`] capability.
///
/// `open` and `close` return once the device reports the target state.
pub struct BlissShutter {
    device: Arc<dyn BlissShutterDevice>,
    timeout: Duration,
}

impl BlissShutter {
    /// Wrap a shutter device.
    pub fn new(device: Arc<dyn BlissShutterDevice>) -> Self {
        Self {
            device,
            timeout: DEFAULT_SHUTTER_TIMEOUT,
        }
    }

    /// Override how long to wait for a transition.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn wait_for(&self, target: ShutterState) -> Result<()> {
        let start = Instant::now();
        loop {
            match self.state().await? {
                state if state == target => return Ok(()),
                ShutterState::Error => {
                    anyhow::bail!("Shutter '{}' reported an error", self.device.name())
                }
                _ => {}
            }
            if start.elapsed() > self.timeout {
                return Err(DeviceError::Timeout {
                    what: format!("shutter '{}' to become {}", self.device.name(), target),
                    seconds: start.elapsed().as_secs_f64(),
                }
                .into());
            }
            tokio::time::sleep(DEFAULT_SETTLE_DELAY).await;
        }
    }
}

#[async_trait]
impl Shutter for BlissShutter {
    #[instrument(skip(self), fields(shutter = %self.device.name()), err)]
    async fn open(&self) -> Result<()> {
        self.device.open().await?;
        self.wait_for(ShutterState::Open).await?;
        info!("shutter open");
        Ok(())
    }

    #[instrument(skip(self), fields(shutter = %self.device.name()), err)]
    async fn close(&self) -> Result<()> {
        self.device.close().await?;
        self.wait_for(ShutterState::Closed).await?;
        info!("shutter closed");
        Ok(())
    }

    async fn state(&self) -> Result<ShutterState> {
        let raw = self.device.state().await?;
        Ok(shutter_state_from_bliss(&raw))
    }
}
