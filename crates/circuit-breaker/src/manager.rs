use crate::{BreakerConfig, CircuitBreaker, Transition};
use arbx_primitives::{
    BreakerEvent, Chain, CircuitState, Clock, ExecutionStats, SharedSink, SystemClock,
    CIRCUIT_BREAKER_STREAM,
};
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    sync::{atomic::Ordering::Relaxed, Arc},
};
use tracing::{debug, info, warn};

/// Lazily populated fleet of per-chain breakers.
///
/// One chain's transitions never touch another chain's breaker; that is the
/// fault-isolation guarantee the manager exists for. The map takes a write
/// lock only on first use of a chain, every later access is a read lock.
#[derive(Debug)]
pub struct CircuitBreakerManager {
    config: BreakerConfig,
    breakers: RwLock<HashMap<Chain, Arc<CircuitBreaker>>>,
    stats: Arc<ExecutionStats>,
    sink: SharedSink,
    instance_id: String,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerManager {
    /// Creates a manager with the system clock.
    pub fn new(
        config: BreakerConfig,
        stats: Arc<ExecutionStats>,
        sink: SharedSink,
        instance_id: impl Into<String>,
    ) -> Self {
        Self::with_clock(config, stats, sink, instance_id, Arc::new(SystemClock))
    }

    /// Creates a manager with an injected clock, for deterministic tests.
    pub fn with_clock(
        config: BreakerConfig,
        stats: Arc<ExecutionStats>,
        sink: SharedSink,
        instance_id: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
            stats,
            sink,
            instance_id: instance_id.into(),
            clock,
        }
    }

    /// Whether an execution on `chain` may proceed.
    ///
    /// Fail-open when breakers are disabled by config. Otherwise creates the
    /// chain's breaker on first use, in `CLOSED` state.
    pub fn can_execute(&self, chain: Chain) -> bool {
        if !self.config.enabled {
            return true
        }
        let breaker = self.breaker(chain);
        let (allowed, transition) = breaker.can_execute(self.clock.now_ms());
        if let Some(transition) = transition {
            self.publish(chain, transition);
        }
        if !allowed {
            self.stats.circuit_breaker_blocks.fetch_add(1, Relaxed);
            metrics::counter!("arbx_circuit_breaker_blocks", 1, "chain" => chain.to_string());
        }
        allowed
    }

    /// Records a successful execution on `chain`.
    pub fn record_success(&self, chain: Chain) {
        if !self.config.enabled {
            return
        }
        if let Some(transition) = self.breaker(chain).record_success(self.clock.now_ms()) {
            self.publish(chain, transition);
        }
    }

    /// Records a failed execution on `chain`.
    pub fn record_failure(&self, chain: Chain) {
        if !self.config.enabled {
            return
        }
        if let Some(transition) = self.breaker(chain).record_failure(self.clock.now_ms()) {
            if transition.current == CircuitState::Open {
                self.stats.circuit_breaker_trips.fetch_add(1, Relaxed);
                metrics::counter!("arbx_circuit_breaker_trips", 1, "chain" => chain.to_string());
            }
            self.publish(chain, transition);
        }
    }

    /// Administratively opens the chain's breaker.
    pub fn force_open(&self, chain: Chain, reason: &str) {
        if let Some(transition) = self.breaker(chain).force_open(self.clock.now_ms(), reason) {
            warn!(target: "breaker", %chain, reason, "breaker forced open");
            self.publish(chain, transition);
        }
    }

    /// Administratively closes the chain's breaker.
    pub fn force_close(&self, chain: Chain) {
        if let Some(transition) = self.breaker(chain).force_close(self.clock.now_ms()) {
            info!(target: "breaker", %chain, "breaker forced closed");
            self.publish(chain, transition);
        }
    }

    /// Current state of the chain's breaker, if one exists yet.
    pub fn state(&self, chain: Chain) -> Option<CircuitState> {
        self.breakers.read().get(&chain).map(|breaker| breaker.state())
    }

    /// Snapshot of all instantiated breakers, for health reporting.
    pub fn states(&self) -> Vec<(Chain, CircuitState)> {
        self.breakers
            .read()
            .iter()
            .map(|(chain, breaker)| (*chain, breaker.state()))
            .collect()
    }

    fn breaker(&self, chain: Chain) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(&chain) {
            return Arc::clone(breaker)
        }
        let mut breakers = self.breakers.write();
        Arc::clone(
            breakers.entry(chain).or_insert_with(|| Arc::new(CircuitBreaker::new(&self.config))),
        )
    }

    /// Publishes a transition to the `circuit-breaker` stream.
    ///
    /// Fire-and-forget: a missing sink (shutdown) skips silently, append
    /// failures are logged and never reach the execution path.
    fn publish(&self, chain: Chain, transition: Transition) {
        info!(
            target: "breaker",
            %chain,
            from = %transition.previous,
            to = %transition.current,
            reason = %transition.reason,
            "breaker transition"
        );

        let Some(sink) = self.sink.get() else { return };
        let event = BreakerEvent {
            chain,
            previous_state: transition.previous,
            new_state: transition.current,
            reason: transition.reason,
            consecutive_failures: transition.consecutive_failures,
            cooldown_remaining_ms: transition.cooldown_remaining_ms,
            timestamp_ms: self.clock.now_ms(),
            instance_id: self.instance_id.clone(),
        };
        let payload = match serde_json::to_value(&event) {
            Ok(payload) => payload,
            Err(err) => {
                debug!(target: "breaker", %err, "failed to encode breaker event");
                return
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = sink.append(CIRCUIT_BREAKER_STREAM, payload).await {
                        debug!(target: "breaker", %err, "breaker event publish failed");
                    }
                });
            }
            Err(_) => {
                debug!(target: "breaker", "no runtime, breaker event dropped");
            }
        }
    }
}
