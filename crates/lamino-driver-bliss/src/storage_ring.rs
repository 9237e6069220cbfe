//! ESRF storage ring telemetry

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use lamino_core::{StorageRing, StorageRingState};

/// Beam energy of the ESRF-EBS ring in GeV; machine information does not
/// publish it.
pub const ESRF_ENERGY_GEV: f64 = 6.0;

/// Machine-information server attributes.
#[async_trait]
pub trait MachineInfo: Send + Sync {
    /// `SR_Current` in mA.
    async fn sr_current(&self) -> Result<f64>;

    /// `SR_Lifetime` in s.
    async fn sr_lifetime(&self) -> Result<f64>;

    /// `SR_Mode` code.
    async fn sr_mode(&self) -> Result<i64>;
}

/// The ESRF storage ring.
pub struct EsrfStorageRing {
    machinfo: Arc<dyn MachineInfo>,
}

impl EsrfStorageRing {
    /// Read telemetry from a machine-information proxy.
    pub fn new(machinfo: Arc<dyn MachineInfo>) -> Self {
        Self { machinfo }
    }
}

#[async_trait]
impl StorageRing for EsrfStorageRing {
    async fn current(&self) -> Result<f64> {
        self.machinfo.sr_current().await
    }

    async fn energy(&self) -> Result<f64> {
        Ok(ESRF_ENERGY_GEV)
    }

    async fn lifetime(&self) -> Result<f64> {
        self.machinfo.sr_lifetime().await
    }

    async fn state(&self) -> Result<StorageRingState> {
        Ok(StorageRingState::from_mode(self.machinfo.sr_mode().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedMachineInfo;

    #[tokio::test]
    async fn telemetry_passes_through() {
        let info = Arc::new(SimulatedMachineInfo::new(199.8, 36_000.0, 1));
        let ring = EsrfStorageRing::new(info.clone());

        assert_eq!(ring.current().await.unwrap(), 199.8);
        assert_eq!(ring.energy().await.unwrap(), 6.0);
        assert_eq!(ring.lifetime().await.unwrap(), 36_000.0);
        assert_eq!(ring.state().await.unwrap(), StorageRingState::UserOperation);

        info.set_mode(3);
        assert_eq!(ring.state().await.unwrap(), StorageRingState::Shutdown);
        info.set_mode(9);
        assert_eq!(ring.state().await.unwrap(), StorageRingState::Unknown);
    }
}
