//! Records published to the downstream event streams, and the sink seam they
//! are published through.

use crate::{Chain, FlashLoanProtocol, StatsSnapshot};
use alloy_primitives::U256;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

/// Stream receiving one record per terminal execution decision.
pub const EXECUTION_RESULTS_STREAM: &str = "execution-results";
/// Stream receiving circuit-breaker state transitions.
pub const CIRCUIT_BREAKER_STREAM: &str = "circuit-breaker";
/// Size-capped stream receiving one record per health tick.
pub const HEALTH_STREAM: &str = "health";
/// Administrative command channel.
pub const SYSTEM_COMMANDS_STREAM: &str = "system-commands";
/// Administrative failover channel.
pub const SYSTEM_FAILOVER_STREAM: &str = "system-failover";

/// State of one chain's circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Traffic allowed.
    Closed,
    /// Traffic blocked.
    Open,
    /// Limited probe traffic allowed.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("CLOSED"),
            CircuitState::Open => f.write_str("OPEN"),
            CircuitState::HalfOpen => f.write_str("HALF_OPEN"),
        }
    }
}

/// Terminal status of one opportunity's trip through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Dispatch reached the chain and the transaction landed profitably.
    Success,
    /// A gate decided not to execute; nothing was sent on-chain.
    Skipped,
    /// Dispatch was attempted and failed.
    Failed,
    /// The per-execution deadline elapsed.
    Timeout,
}

/// One record on the `execution-results` stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    /// Opportunity the decision is about.
    pub opportunity_id: String,
    /// Chain the opportunity targeted.
    pub chain: Chain,
    /// Flash-loan protocol used, when one was selected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<FlashLoanProtocol>,
    /// Terminal status.
    pub status: ExecutionStatus,
    /// Gas consumed by the landed transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
    /// Realized profit in the input token's smallest unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realized_profit: Option<U256>,
    /// Failure or skip reason, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Decision time, unix milliseconds.
    pub timestamp_ms: u64,
    /// Engine instance that made the decision.
    pub instance_id: String,
}

/// One record on the `circuit-breaker` stream, emitted per real transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerEvent {
    /// Chain whose breaker transitioned.
    pub chain: Chain,
    /// State before the transition.
    pub previous_state: CircuitState,
    /// State after the transition.
    pub new_state: CircuitState,
    /// Human-readable trigger.
    pub reason: String,
    /// Consecutive failures at transition time.
    pub consecutive_failures: u32,
    /// Remaining cooldown when the event fired.
    pub cooldown_remaining_ms: u64,
    /// Transition time, unix milliseconds.
    pub timestamp_ms: u64,
    /// Engine instance the breaker belongs to.
    pub instance_id: String,
}

/// Coarse health classification of the external simulation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStatus {
    /// No simulation metrics snapshot available.
    NotConfigured,
    /// At least one simulation provider is healthy.
    Healthy,
    /// Simulation configured but no provider healthy.
    Degraded,
}

/// Overall service status reported on the health stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Fully operational.
    Healthy,
    /// Running with reduced capability.
    Degraded,
    /// Shutting down or unable to execute.
    Unhealthy,
}

/// One record on the `health` stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    /// Logical service name, e.g. `execution-engine`.
    pub service: String,
    /// Instance name.
    pub name: String,
    /// Overall status.
    pub status: HealthStatus,
    /// Current queue depth.
    pub queue_size: usize,
    /// Whether the queue is refusing enqueues.
    pub queue_paused: bool,
    /// Workers currently mid-pipeline.
    pub active_executions: usize,
    /// Broker messages pulled but not yet acknowledged.
    pub pending_opportunities: usize,
    /// Counter snapshot.
    pub stats: StatsSnapshot,
    /// Simulation layer classification.
    pub simulation_status: SimulationStatus,
    /// Tick time, unix milliseconds.
    pub timestamp_ms: u64,
}

/// Error appending to an event stream.
#[derive(Debug, Clone, thiserror::Error)]
#[error("event sink: {0}")]
pub struct SinkError(pub String);

/// Append-only access to the downstream event broker.
///
/// Call sites treat publishes as fire-and-forget: failures are logged by the
/// caller and never propagated into the execution path.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    /// Appends a record to the named stream.
    async fn append(&self, stream: &str, payload: serde_json::Value) -> Result<(), SinkError>;

    /// Appends to the named stream, trimming it to approximately `max_len`
    /// entries.
    async fn append_capped(
        &self,
        stream: &str,
        payload: serde_json::Value,
        max_len: usize,
    ) -> Result<(), SinkError>;

    /// Best-effort upsert of a service-health key.
    async fn set_key(&self, key: &str, payload: serde_json::Value) -> Result<(), SinkError>;
}

/// Shared, nullable handle to the current [`EventSink`].
///
/// The engine swaps the sink out (to `None`) during shutdown; producers must
/// tolerate a missing sink by silently skipping the publish.
#[derive(Clone, Default)]
pub struct SharedSink(Arc<RwLock<Option<Arc<dyn EventSink>>>>);

impl SharedSink {
    /// Creates a handle holding the given sink.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self(Arc::new(RwLock::new(Some(sink))))
    }

    /// Creates a handle with no sink attached.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the current sink, or `None` during shutdown.
    pub fn get(&self) -> Option<Arc<dyn EventSink>> {
        self.0.read().clone()
    }

    /// Replaces the current sink.
    pub fn set(&self, sink: Arc<dyn EventSink>) {
        *self.0.write() = Some(sink);
    }

    /// Detaches the sink; subsequent publishes are skipped.
    pub fn take(&self) -> Option<Arc<dyn EventSink>> {
        self.0.write().take()
    }
}

impl fmt::Debug for SharedSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSink").field("attached", &self.get().is_some()).finish()
    }
}
