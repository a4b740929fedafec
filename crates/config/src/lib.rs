//! Configuration for the arbx daemon.
//!
//! Everything is injected at construction; the engine refuses to start on an
//! absent or invalid file. Service-level sections ([`QueueConfig`],
//! [`BreakerConfig`], [`RpcConfig`], the flash-loan table) are defined by
//! their service crates; this crate aggregates them and adds the
//! engine-level sections.

use arbx_circuit_breaker::BreakerConfig;
use arbx_flashloan::FlashLoanTable;
use arbx_primitives::U256;
use arbx_queue::QueueConfig;
use arbx_rpc::RpcConfig;
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

/// Worker-pool and per-execution limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionConfig {
    /// Fixed number of pipeline workers.
    pub worker_count: usize,
    /// Process-level deadline for one execution attempt.
    #[serde(with = "humantime_serde")]
    pub execution_timeout: Duration,
    /// Opportunities below this confidence are rejected outright.
    pub min_confidence: f64,
    /// Risk gate: largest input amount the engine will trade, in wei.
    /// Zero disables the check.
    pub max_input_amount_wei: U256,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            execution_timeout: Duration::from_secs(30),
            min_confidence: 0.5,
            max_input_amount_wei: U256::ZERO,
        }
    }
}

/// Upstream consumer knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsumerConfig {
    /// Stream the opportunities arrive on.
    pub stream: String,
    /// Poll cadence when the broker has nothing buffered.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Cadence for sweeping pending-but-unacknowledged messages.
    /// `0` disables the sweep entirely.
    pub stale_pending_cleanup_interval_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            stream: "opportunities".to_string(),
            poll_interval: Duration::from_millis(100),
            stale_pending_cleanup_interval_ms: 60_000,
        }
    }
}

/// Health-monitor knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthConfig {
    /// Tick cadence.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Length bound for the health stream.
    pub health_stream_max_len: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(30), health_stream_max_len: 500 }
    }
}

/// Lock-conflict tracker knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerConfig {
    /// Entry bound enforced by cleanup.
    pub max_entries: usize,
    /// Rolling observation window.
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Minimum entry age before a conflict can be reported.
    #[serde(with = "humantime_serde")]
    pub min_age: Duration,
    /// Conflicts inside the window that constitute a report.
    pub conflict_threshold: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            window: Duration::from_secs(60),
            min_age: Duration::from_secs(5),
            conflict_threshold: 3,
        }
    }
}

/// External simulation layer knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimulationConfig {
    /// Whether simulation gating is active at all.
    pub enabled: bool,
    /// Executions are skipped when the simulated profit, minus gas, falls
    /// below this many wei.
    pub min_profit_wei: U256,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self { enabled: false, min_profit_wei: U256::ZERO }
    }
}

/// Runtime feature flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureFlags {
    /// Fan quote requests out through the batch quoter.
    pub use_batched_quoter: bool,
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Name this instance reports in events.
    pub instance_id: String,
    /// Queue bounds.
    pub queue: QueueConfig,
    /// Circuit-breaker tuning.
    pub circuit_breaker: BreakerConfig,
    /// Flash-loan provider table, chain keyed.
    pub flash_loans: FlashLoanTable,
    /// RPC endpoints and health checking.
    pub rpc: RpcConfig,
    /// Worker pool and execution limits.
    pub execution: ExecutionConfig,
    /// Upstream consumer.
    pub consumer: ConsumerConfig,
    /// Health monitor.
    pub health: HealthConfig,
    /// Lock-conflict tracker.
    pub lock_tracker: TrackerConfig,
    /// Simulation gating.
    pub simulation: SimulationConfig,
    /// Feature flags.
    pub features: FeatureFlags,
}

/// Configuration loading/validation failures. All fatal: the daemon refuses
/// to start.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config {path}: {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`EngineConfig`].
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A section fails its invariants.
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl EngineConfig {
    /// Reads and validates a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.queue.validate().map_err(|err| ConfigError::Invalid(err.to_string()))?;
        if self.instance_id.is_empty() {
            return Err(ConfigError::Invalid("instanceId must not be empty".to_string()))
        }
        if self.execution.worker_count == 0 {
            return Err(ConfigError::Invalid("execution.workerCount must be positive".to_string()))
        }
        if !(0.0..=1.0).contains(&self.execution.min_confidence) {
            return Err(ConfigError::Invalid(
                "execution.minConfidence must be within [0, 1]".to_string(),
            ))
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuitBreaker.failureThreshold must be positive".to_string(),
            ))
        }
        if self.lock_tracker.max_entries == 0 || self.lock_tracker.conflict_threshold == 0 {
            return Err(ConfigError::Invalid(
                "lockTracker bounds must be positive".to_string(),
            ))
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbx_primitives::Chain;
    use similar_asserts::assert_eq;

    fn valid() -> EngineConfig {
        EngineConfig { instance_id: "exec-1".to_string(), ..Default::default() }
    }

    #[test]
    fn default_round_trips_through_toml() {
        let config = valid();
        let raw = toml::to_string(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn validation_rejects_bad_sections() {
        let mut config = valid();
        config.execution.worker_count = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.instance_id.clear();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.queue.low_water_mark = config.queue.high_water_mark;
        assert!(config.validate().is_err());

        assert!(valid().validate().is_ok());
    }

    #[test]
    fn parses_chain_keyed_tables() {
        let raw = r#"
            instanceId = "exec-2"

            [queue]
            maxSize = 100
            highWaterMark = 80
            lowWaterMark = 20

            [flashLoans.ethereum]
            protocol = "aave_v3"
            wrapperAddress = "0xa1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1"
            approvedRouters = ["0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D"]

            [rpc.endpoints.ethereum]
            httpUrl = "http://localhost:8545"
        "#;
        let config: EngineConfig = toml::from_str(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.queue.max_size, 100);
        assert_eq!(config.flash_loans[&Chain::Ethereum].protocol, "aave_v3");
        assert_eq!(
            config.rpc.endpoints[&Chain::Ethereum].http_url,
            "http://localhost:8545"
        );
    }

    #[test]
    fn load_rejects_missing_file() {
        let missing = EngineConfig::load("/definitely/not/here.toml");
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn load_reads_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arbx.toml");
        std::fs::write(&path, toml::to_string(&valid()).unwrap()).unwrap();
        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.instance_id, "exec-1");
    }
}
