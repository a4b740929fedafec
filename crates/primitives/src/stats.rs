//! Process-wide execution counters.
//!
//! Counters only ever increase during a process lifetime. Readers take a
//! per-field-consistent snapshot; cross-field consistency is not needed for
//! monitoring.

use metrics::atomics::AtomicU64;
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering::Relaxed;

/// Shared counters covering every decision path of the execution core.
///
/// One instance is created by the engine and shared with every service that
/// records outcomes. All mutations are atomic increments on named fields.
#[derive(Debug, Default)]
pub struct ExecutionStats {
    /// Opportunities pulled off the upstream stream.
    pub opportunities_received: AtomicU64,
    /// Opportunities rejected before entering the pipeline.
    pub opportunities_rejected: AtomicU64,
    /// Pipeline runs that reached the dispatch stage.
    pub execution_attempts: AtomicU64,
    /// Dispatches that landed and made profit.
    pub successful_executions: AtomicU64,
    /// Dispatches that failed terminally.
    pub failed_executions: AtomicU64,
    /// Pipeline runs cancelled by the per-execution deadline.
    pub execution_timeouts: AtomicU64,
    /// Enqueue attempts refused by the bounded queue.
    pub queue_rejects: AtomicU64,
    /// Per-opportunity lock contention events.
    pub lock_conflicts: AtomicU64,
    /// Crash-orphaned locks recovered by the conflict tracker.
    pub stale_lock_recoveries: AtomicU64,
    /// Requests rejected by provider validation.
    pub validation_errors: AtomicU64,
    /// Simulations actually performed.
    pub simulations_performed: AtomicU64,
    /// Simulations skipped (not configured or below thresholds).
    pub simulations_skipped: AtomicU64,
    /// Simulations predicting an on-chain revert.
    pub predicted_reverts: AtomicU64,
    /// Simulations rejecting the trade as unprofitable.
    pub simulation_profit_rejections: AtomicU64,
    /// Simulation calls that errored.
    pub simulation_errors: AtomicU64,
    /// Circuit breakers tripped open.
    pub circuit_breaker_trips: AtomicU64,
    /// Executions blocked by an open breaker.
    pub circuit_breaker_blocks: AtomicU64,
    /// Opportunities rejected by risk checks.
    pub risk_rejections: AtomicU64,
    /// RPC providers rebuilt after repeated health-check failures.
    pub provider_reconnections: AtomicU64,
    /// Individual provider health-check failures.
    pub provider_health_check_failures: AtomicU64,
}

impl ExecutionStats {
    /// Takes a plain-integer copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            opportunities_received: self.opportunities_received.load(Relaxed),
            opportunities_rejected: self.opportunities_rejected.load(Relaxed),
            execution_attempts: self.execution_attempts.load(Relaxed),
            successful_executions: self.successful_executions.load(Relaxed),
            failed_executions: self.failed_executions.load(Relaxed),
            execution_timeouts: self.execution_timeouts.load(Relaxed),
            queue_rejects: self.queue_rejects.load(Relaxed),
            lock_conflicts: self.lock_conflicts.load(Relaxed),
            stale_lock_recoveries: self.stale_lock_recoveries.load(Relaxed),
            validation_errors: self.validation_errors.load(Relaxed),
            simulations_performed: self.simulations_performed.load(Relaxed),
            simulations_skipped: self.simulations_skipped.load(Relaxed),
            predicted_reverts: self.predicted_reverts.load(Relaxed),
            simulation_profit_rejections: self.simulation_profit_rejections.load(Relaxed),
            simulation_errors: self.simulation_errors.load(Relaxed),
            circuit_breaker_trips: self.circuit_breaker_trips.load(Relaxed),
            circuit_breaker_blocks: self.circuit_breaker_blocks.load(Relaxed),
            risk_rejections: self.risk_rejections.load(Relaxed),
            provider_reconnections: self.provider_reconnections.load(Relaxed),
            provider_health_check_failures: self.provider_health_check_failures.load(Relaxed),
        }
    }
}

/// Plain-integer copy of [`ExecutionStats`], serializable into health records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub opportunities_received: u64,
    pub opportunities_rejected: u64,
    pub execution_attempts: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub execution_timeouts: u64,
    pub queue_rejects: u64,
    pub lock_conflicts: u64,
    pub stale_lock_recoveries: u64,
    pub validation_errors: u64,
    pub simulations_performed: u64,
    pub simulations_skipped: u64,
    pub predicted_reverts: u64,
    pub simulation_profit_rejections: u64,
    pub simulation_errors: u64,
    pub circuit_breaker_trips: u64,
    pub circuit_breaker_blocks: u64,
    pub risk_rejections: u64,
    pub provider_reconnections: u64,
    pub provider_health_check_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let stats = ExecutionStats::default();
        stats.opportunities_received.fetch_add(3, Relaxed);
        stats.circuit_breaker_trips.fetch_add(1, Relaxed);

        let snap = stats.snapshot();
        assert_eq!(snap.opportunities_received, 3);
        assert_eq!(snap.circuit_breaker_trips, 1);
        assert_eq!(snap.failed_executions, 0);
    }
}
