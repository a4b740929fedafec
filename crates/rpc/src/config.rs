use arbx_primitives::Chain;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Duration};

/// One chain's RPC endpoint and signing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainEndpoint {
    /// HTTP JSON-RPC URL.
    pub http_url: String,
    /// Hex-encoded private key for the executing wallet. Typically injected
    /// from the environment by the config loader, never committed.
    pub private_key: Option<String>,
}

/// Request batching knobs, per chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchConfig {
    /// Master switch for batch providers.
    pub enabled: bool,
    /// Calls accumulated before a flush.
    pub max_batch_size: usize,
    /// Longest a call waits for the batch to fill.
    #[serde(with = "humantime_serde")]
    pub batch_timeout: Duration,
    /// Pending-call bound; submissions beyond it are refused.
    pub max_queue_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_batch_size: 10,
            batch_timeout: Duration::from_millis(20),
            max_queue_size: 1000,
        }
    }
}

/// Provider-service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RpcConfig {
    /// Endpoints per chain.
    pub endpoints: BTreeMap<Chain, ChainEndpoint>,
    /// Health-check cadence.
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,
    /// Consecutive health-check failures that trigger a reconnect.
    pub reconnect_threshold: u32,
    /// Batching settings.
    pub batch: BatchConfig,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoints: BTreeMap::new(),
            health_check_interval: Duration::from_secs(30),
            reconnect_threshold: 3,
            batch: BatchConfig::default(),
        }
    }
}
