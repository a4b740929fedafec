//! Engine assembly and lifecycle.

use crate::{
    coordinator::{Pipeline, PipelineState},
    gas::GasBaselines,
    health::HealthMonitor,
    quotes::{BatchQuoteManager, BatchQuoter, DexLookup, ProfitCalculator},
    simulation::SimulationClient,
    streams::OpportunitySource,
    tracker::LockConflictTracker,
};
use arbx_circuit_breaker::CircuitBreakerManager;
use arbx_config::{ConfigError, EngineConfig};
use arbx_flashloan::ProviderRegistry;
use arbx_primitives::{
    Chain, Clock, ExecutionStats, SharedSink, SystemClock, SYSTEM_FAILOVER_STREAM,
};
use arbx_rpc::{ProviderService, RpcError};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering::Relaxed},
        Arc,
    },
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Failures constructing or starting the engine. All fatal.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The configuration is absent or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A provider or wallet could not be constructed.
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// The external collaborators the engine is wired to.
///
/// Everything here is a seam: production wires broker clients and the real
/// quote/simulation services, tests wire in-memory doubles.
pub struct ExternalServices {
    /// Upstream opportunity stream.
    pub source: Arc<dyn OpportunitySource>,
    /// Downstream event broker.
    pub sink: SharedSink,
    /// Sequential profit calculator, the quote fallback.
    pub sequential_calculator: Arc<dyn ProfitCalculator>,
    /// Batch quoters per chain, empty when unavailable.
    pub batch_quoters: HashMap<Chain, Arc<dyn BatchQuoter>>,
    /// DEX-name-to-router resolution for named hops.
    pub dex_lookup: Option<DexLookup>,
    /// External simulation service.
    pub simulator: Option<Arc<dyn SimulationClient>>,
}

impl std::fmt::Debug for ExternalServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalServices")
            .field("batch_quoter_chains", &self.batch_quoters.keys().collect::<Vec<_>>())
            .field("has_simulator", &self.simulator.is_some())
            .finish()
    }
}

/// The arbitrage execution engine.
///
/// Construction wires every service with injected dependencies and no
/// back-references; `start` spawns the consumer, the worker pool, the health
/// monitor and the provider health loop; `stop` drains and tears down.
#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    pipeline: Arc<Pipeline>,
    health: Arc<HealthMonitor>,
    providers: Arc<ProviderService>,
    cancel: Mutex<CancellationToken>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("running", &self.inner.running.load(Relaxed))
            .finish()
    }
}

impl ExecutionEngine {
    /// Builds the engine with the wall clock.
    pub fn new(config: EngineConfig, services: ExternalServices) -> Result<Self, EngineError> {
        Self::with_clock(config, services, Arc::new(SystemClock))
    }

    /// Builds the engine with an injected clock, for deterministic tests.
    pub fn with_clock(
        config: EngineConfig,
        services: ExternalServices,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let stats = Arc::new(ExecutionStats::default());
        let state = Arc::new(PipelineState::new(config.queue));

        // the pause callback feeds the consumer's pull gate
        {
            let paused_flag = Arc::clone(&state.consumption_paused);
            let mut queue = state.queue.lock();
            queue.on_pause_state_change(Box::new(move |paused| {
                paused_flag.store(paused, Relaxed);
                metrics::gauge!("arbx_queue_paused", if paused { 1.0 } else { 0.0 });
                info!(target: "engine::queue", paused, "queue pause state changed");
            }));
        }

        let breakers = Arc::new(CircuitBreakerManager::with_clock(
            config.circuit_breaker.clone(),
            Arc::clone(&stats),
            services.sink.clone(),
            config.instance_id.clone(),
            Arc::clone(&clock),
        ));
        let registry =
            Arc::new(ProviderRegistry::with_clock(config.flash_loans.clone(), Arc::clone(&clock)));
        let providers =
            Arc::new(ProviderService::new(config.rpc.clone(), Arc::clone(&stats))?);
        let tracker = Arc::new(LockConflictTracker::with_clock(
            config.lock_tracker,
            Arc::clone(&clock),
        ));
        let gas = Arc::new(GasBaselines::with_clock(Arc::clone(&clock)));
        let quotes = Arc::new(BatchQuoteManager::new(
            config.features.use_batched_quoter,
            services.batch_quoters,
            services.sequential_calculator,
            Arc::clone(&registry),
            services.dex_lookup,
        ));

        let pipeline = Arc::new(Pipeline {
            config: config.clone(),
            state: Arc::clone(&state),
            breakers,
            registry,
            providers: Arc::clone(&providers),
            quotes,
            simulator: services.simulator.clone(),
            tracker: Arc::clone(&tracker),
            gas: Arc::clone(&gas),
            stats: Arc::clone(&stats),
            sink: services.sink.clone(),
            source: Arc::clone(&services.source),
            clock: Arc::clone(&clock),
        });

        let health = Arc::new(HealthMonitor::new(
            config.health.clone(),
            config.consumer.clone(),
            config.instance_id.clone(),
            stats,
            services.sink,
            state,
            services.source,
            tracker,
            gas,
            services.simulator,
            clock,
        ));

        Ok(Self {
            inner: Arc::new(EngineInner {
                pipeline,
                health,
                providers,
                cancel: Mutex::new(CancellationToken::new()),
                tasks: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
            }),
        })
    }

    /// Process-wide execution counters.
    pub fn stats(&self) -> Arc<ExecutionStats> {
        Arc::clone(&self.inner.pipeline.stats)
    }

    /// The provider service, for operator introspection.
    pub fn providers(&self) -> Arc<ProviderService> {
        Arc::clone(&self.inner.providers)
    }

    /// Spawns the consumer, the worker pool, the health monitor and the
    /// provider health loop. Idempotent.
    pub fn start(&self) {
        if self.inner.running.swap(true, Relaxed) {
            warn!(target: "engine", "start called while already running");
            return
        }
        let cancel = CancellationToken::new();
        *self.inner.cancel.lock() = cancel.clone();
        // stop() leaves the queue in standby; a restart lifts it
        self.inner.pipeline.state.queue.lock().resume();

        let mut tasks = self.inner.tasks.lock();
        tasks.push(tokio::spawn(
            Arc::clone(&self.inner.pipeline).consumer_loop(cancel.clone()),
        ));
        for worker in 0..self.inner.pipeline.config.execution.worker_count {
            tasks.push(tokio::spawn(
                Arc::clone(&self.inner.pipeline).worker_loop(worker, cancel.clone()),
            ));
        }
        tasks.extend(Arc::clone(&self.inner.health).start(cancel));
        self.inner.providers.start_health_checks();

        info!(
            target: "engine",
            instance = %self.inner.pipeline.config.instance_id,
            workers = self.inner.pipeline.config.execution.worker_count,
            "execution engine started"
        );
    }

    /// Graceful shutdown: stop accepting work, cancel the timers, drain
    /// in-flight workers up to the execution deadline, then close provider
    /// resources and detach the sink. Idempotent.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Relaxed) {
            return
        }
        info!(target: "engine", "execution engine stopping");

        // refuse further enqueues while in-flight work drains
        self.inner.pipeline.state.queue.lock().pause();
        self.inner.cancel.lock().cancel();

        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        let aborts: Vec<_> = tasks.iter().map(|task| task.abort_handle()).collect();
        let drain = futures::future::join_all(tasks);
        let deadline = self.inner.pipeline.config.execution.execution_timeout;
        if tokio::time::timeout(deadline, drain).await.is_err() {
            warn!(target: "engine", "shutdown drain deadline elapsed, aborting tasks");
            for abort in aborts {
                abort.abort();
            }
        }

        self.inner.providers.clear().await;

        // announce the handoff before the sink goes away
        if let Some(sink) = self.inner.pipeline.sink.get() {
            let signal = serde_json::json!({
                "instanceId": self.inner.pipeline.config.instance_id,
                "signal": "shutdown",
                "timestampMs": self.inner.pipeline.clock.now_ms(),
            });
            if let Err(err) = sink.append(SYSTEM_FAILOVER_STREAM, signal).await {
                warn!(target: "engine", %err, "failover signal publish failed");
            }
        }
        self.inner.pipeline.sink.take();
        info!(target: "engine", "execution engine stopped");
    }

    /// Drops queued work and releases resources without the drain. Safe to
    /// call after a failed start; idempotent.
    pub async fn clear(&self) {
        self.inner.cancel.lock().cancel();
        self.inner.tasks.lock().drain(..).for_each(|task| task.abort());
        self.inner.pipeline.state.queue.lock().clear();
        self.inner.pipeline.state.locks.lock().clear();
        self.inner.pipeline.state.pending_acks.lock().clear();
        self.inner.providers.clear().await;
        self.inner.running.store(false, Relaxed);
    }
}
