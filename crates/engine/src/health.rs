//! Periodic health loop.
//!
//! Each tick assembles a health record, publishes it best-effort, and runs
//! the bounded-cache maintenance (gas baselines, lock-conflict tracker).
//! Every step is individually guarded: a tick logs failures and always
//! completes.

use crate::{
    coordinator::PipelineState, gas::GasBaselines, simulation::{SimulationClient, SimulationMetrics},
    streams::OpportunitySource, tracker::LockConflictTracker,
};
use arbx_config::{ConsumerConfig, HealthConfig};
use arbx_primitives::{
    Clock, ExecutionStats, HealthRecord, HealthStatus, SharedSink, HEALTH_STREAM,
};
use std::sync::{atomic::Ordering, Arc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The periodic health monitor.
pub struct HealthMonitor {
    config: HealthConfig,
    consumer: ConsumerConfig,
    instance_id: String,
    stats: Arc<ExecutionStats>,
    sink: SharedSink,
    state: Arc<PipelineState>,
    source: Arc<dyn OpportunitySource>,
    tracker: Arc<LockConflictTracker>,
    gas: Arc<GasBaselines>,
    simulator: Option<Arc<dyn SimulationClient>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("interval", &self.config.interval)
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

impl HealthMonitor {
    /// Creates a monitor over the engine's shared state.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: HealthConfig,
        consumer: ConsumerConfig,
        instance_id: String,
        stats: Arc<ExecutionStats>,
        sink: SharedSink,
        state: Arc<PipelineState>,
        source: Arc<dyn OpportunitySource>,
        tracker: Arc<LockConflictTracker>,
        gas: Arc<GasBaselines>,
        simulator: Option<Arc<dyn SimulationClient>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            consumer,
            instance_id,
            stats,
            sink,
            state,
            source,
            tracker,
            gas,
            simulator,
            clock,
        }
    }

    /// Spawns the tick timer and, when enabled, the stale-pending sweep
    /// timer. Both stop on cancellation.
    pub(crate) fn start(self: Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let monitor = Arc::clone(&self);
        let tick_cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick_cancel.cancelled() => break,
                    _ = ticker.tick() => monitor.tick().await,
                }
            }
        }));

        // a zero interval disables the sweep entirely
        let sweep_ms = self.consumer.stale_pending_cleanup_interval_ms;
        if sweep_ms > 0 {
            let monitor = Arc::clone(&self);
            handles.push(tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval(std::time::Duration::from_millis(sweep_ms));
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => match monitor.source.reclaim_stale().await {
                            Ok(0) => {}
                            Ok(reclaimed) => {
                                info!(target: "engine::health", reclaimed, "stale pending messages requeued");
                            }
                            Err(err) => {
                                warn!(target: "engine::health", %err, "stale-pending sweep failed");
                            }
                        },
                    }
                }
            }));
        }

        info!(target: "engine::health", interval = ?self.config.interval, "health monitor started");
        handles
    }

    /// One tick. Public within the crate for tests.
    pub(crate) async fn tick(&self) {
        let record = self.assemble_record();

        // publish + service-health key, tolerated missing during shutdown
        if let Some(sink) = self.sink.get() {
            match serde_json::to_value(&record) {
                Ok(payload) => {
                    if let Err(err) = sink
                        .append_capped(HEALTH_STREAM, payload.clone(), self.config.health_stream_max_len)
                        .await
                    {
                        error!(target: "engine::health", %err, "health record publish failed");
                    }
                    let key = format!("service-health:{}", self.instance_id);
                    if let Err(err) = sink.set_key(&key, payload).await {
                        debug!(target: "engine::health", %err, "service-health key update failed");
                    }
                }
                Err(err) => error!(target: "engine::health", %err, "health record encoding failed"),
            }
        }

        self.gas.trim();
        self.tracker.cleanup();

        metrics::gauge!("arbx_queue_depth", record.queue_size as f64);
        metrics::gauge!("arbx_active_executions", record.active_executions as f64);
        debug!(
            target: "engine::health",
            queue = record.queue_size,
            paused = record.queue_paused,
            active = record.active_executions,
            pending = record.pending_opportunities,
            simulation = ?record.simulation_status,
            "health tick"
        );
    }

    fn assemble_record(&self) -> HealthRecord {
        let (queue_size, queue_paused) = {
            let queue = self.state.queue.lock();
            (queue.len(), queue.is_paused())
        };
        let simulation_status = SimulationMetrics::status(
            self.simulator.as_ref().and_then(|sim| sim.metrics()).as_ref(),
        );
        let status = if queue_paused { HealthStatus::Degraded } else { HealthStatus::Healthy };

        HealthRecord {
            service: "arbitrage-execution".to_string(),
            name: self.instance_id.clone(),
            status,
            queue_size,
            queue_paused,
            active_executions: self.state.active_executions.load(Ordering::Relaxed),
            pending_opportunities: self.source.pending(),
            stats: self.stats.snapshot(),
            simulation_status,
            timestamp_ms: self.clock.now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::MemoryBroker;
    use arbx_config::TrackerConfig;
    use arbx_primitives::{Chain, EventSink, ManualClock, U256};

    fn monitor(broker: Arc<MemoryBroker>, clock: Arc<ManualClock>) -> HealthMonitor {
        let gas = Arc::new(GasBaselines::with_clock(clock.clone()));
        HealthMonitor::new(
            HealthConfig { health_stream_max_len: 3, ..Default::default() },
            ConsumerConfig::default(),
            "exec-test".to_string(),
            Arc::new(ExecutionStats::default()),
            SharedSink::new(broker.clone() as Arc<dyn EventSink>),
            Arc::new(PipelineState::new(Default::default())),
            broker as Arc<dyn OpportunitySource>,
            Arc::new(LockConflictTracker::with_clock(TrackerConfig::default(), clock.clone())),
            gas,
            None,
            clock,
        )
    }

    #[tokio::test]
    async fn tick_publishes_record_and_key() {
        let broker = Arc::new(MemoryBroker::new());
        let clock = Arc::new(ManualClock::new(7_000));
        let monitor = monitor(broker.clone(), clock);

        monitor.tick().await;

        let records = broker.stream(HEALTH_STREAM);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], "exec-test");
        assert_eq!(records[0]["simulationStatus"], "not_configured");
        assert_eq!(records[0]["timestampMs"], 7_000);
        assert!(broker.key("service-health:exec-test").is_some());
    }

    #[tokio::test]
    async fn health_stream_is_size_bounded() {
        let broker = Arc::new(MemoryBroker::new());
        let clock = Arc::new(ManualClock::new(0));
        let monitor = monitor(broker.clone(), clock);

        for _ in 0..5 {
            monitor.tick().await;
        }
        assert_eq!(broker.stream(HEALTH_STREAM).len(), 3);
    }

    #[tokio::test]
    async fn tick_trims_gas_baselines() {
        let broker = Arc::new(MemoryBroker::new());
        let clock = Arc::new(ManualClock::new(10 * 60 * 1000));
        let monitor = monitor(broker, clock);

        monitor.gas.record_at(Chain::Bsc, U256::from(1u64), 60_000);
        monitor.gas.record_at(Chain::Bsc, U256::from(2u64), 10 * 60 * 1000);
        monitor.tick().await;
        assert_eq!(monitor.gas.history(Chain::Bsc).len(), 1);
    }

    #[tokio::test]
    async fn missing_sink_is_tolerated() {
        let broker = Arc::new(MemoryBroker::new());
        let clock = Arc::new(ManualClock::new(0));
        let mut monitor = monitor(broker, clock);
        monitor.sink = SharedSink::empty();
        // must not panic or error
        monitor.tick().await;
    }
}
