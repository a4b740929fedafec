//! Seam to the external simulation service.
//!
//! The service itself is out of scope; the engine consumes a predicted
//! outcome per transaction plus a coarse health snapshot for the health
//! loop.

use arbx_flashloan::FlashLoanTx;
use arbx_primitives::{Chain, SimulationStatus, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A simulation call failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("simulation: {0}")]
pub struct SimulationError(pub String);

/// Predicted result of executing a transaction at head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationOutcome {
    /// Whether the transaction would revert.
    pub would_revert: bool,
    /// Simulated profit in the input token's smallest unit.
    pub predicted_profit: U256,
    /// Simulated gas usage.
    pub gas_used: u64,
}

/// Health of one simulation backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimProviderHealth {
    /// Backend name.
    pub name: String,
    /// Whether it answered its last probe.
    pub healthy: bool,
}

/// Snapshot of the simulation layer's backends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationMetrics {
    /// Per-backend health.
    pub providers: Vec<SimProviderHealth>,
}

impl SimulationMetrics {
    /// Collapses the snapshot into the health-record classification.
    pub fn status(metrics: Option<&SimulationMetrics>) -> SimulationStatus {
        match metrics {
            None => SimulationStatus::NotConfigured,
            Some(metrics) if metrics.providers.iter().any(|p| p.healthy) => {
                SimulationStatus::Healthy
            }
            Some(_) => SimulationStatus::Degraded,
        }
    }
}

/// The simulation calls the pipeline makes.
#[async_trait]
pub trait SimulationClient: Send + Sync + std::fmt::Debug {
    /// Simulates the transaction on the given chain.
    async fn simulate(
        &self,
        chain: Chain,
        tx: &FlashLoanTx,
    ) -> Result<SimulationOutcome, SimulationError>;

    /// Current backend health, if the client tracks it.
    fn metrics(&self) -> Option<SimulationMetrics>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(SimulationMetrics::status(None), SimulationStatus::NotConfigured);

        let degraded = SimulationMetrics {
            providers: vec![SimProviderHealth { name: "tenderly".into(), healthy: false }],
        };
        assert_eq!(SimulationMetrics::status(Some(&degraded)), SimulationStatus::Degraded);

        let healthy = SimulationMetrics {
            providers: vec![
                SimProviderHealth { name: "tenderly".into(), healthy: false },
                SimProviderHealth { name: "local-fork".into(), healthy: true },
            ],
        };
        assert_eq!(SimulationMetrics::status(Some(&healthy)), SimulationStatus::Healthy);
    }
}
