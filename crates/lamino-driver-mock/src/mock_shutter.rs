//! Mock shutter.

use anyhow::{bail, Result};
use async_trait::async_trait;
use lamino_core::{Shutter, ShutterState};
use parking_lot::Mutex;

#[derive(Debug)]
struct ShutterInner {
    state: ShutterState,
    history: Vec<ShutterState>,
    fail: bool,
}

/// Shutter that switches instantly and records every transition.
pub struct MockShutter {
    inner: Mutex<ShutterInner>,
}

impl MockShutter {
    /// Closed shutter.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ShutterInner {
                state: ShutterState::Closed,
                history: Vec::new(),
                fail: false,
            }),
        }
    }

    /// Make every following open/close fail (or succeed again).
    pub fn set_fail(&self, fail: bool) {
        self.inner.lock().fail = fail;
    }

    /// States commanded so far, in order.
    pub fn history(&self) -> Vec<ShutterState> {
        self.inner.lock().history.clone()
    }

    /// True if open.
    pub fn is_open(&self) -> bool {
        self.inner.lock().state == ShutterState::Open
    }

    fn switch(&self, target: ShutterState) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail {
            bail!("Mock shutter failed to become {}", target);
        }
        inner.state = target;
        inner.history.push(target);
        Ok(())
    }
}

impl Default for MockShutter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Shutter for MockShutter {
    async fn open(&self) -> Result<()> {
        self.switch(ShutterState::Open)
    }

    async fn close(&self) -> Result<()> {
        self.switch(ShutterState::Closed)
    }

    async fn state(&self) -> Result<ShutterState> {
        Ok(self.inner.lock().state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_transitions() {
        let shutter = MockShutter::new();
        shutter.open().await.unwrap();
        shutter.close().await.unwrap();
        assert_eq!(
            shutter.history(),
            vec![ShutterState::Open, ShutterState::Closed]
        );

        shutter.set_fail(true);
        assert!(shutter.open().await.is_err());
        assert!(!shutter.is_open());
    }
}
