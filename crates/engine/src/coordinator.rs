//! The execution pipeline.
//!
//! A fixed pool of workers consumes opportunities from the queue and runs
//! each through the gates in order: sanity validation, per-chain circuit
//! breaker, profit quote, provider validation and transaction construction,
//! simulation, risk limits, dispatch. Every failure becomes a terminal
//! outcome; workers never propagate errors upward.
//!
//! Duplicate suppression hangs off the opportunity id: a worker holds an
//! in-process lock for the id while executing, and repeated conflicts on the
//! same id feed the [`LockConflictTracker`] until stale-lock recovery kicks
//! in.

use crate::{
    gas::GasBaselines,
    quotes::BatchQuoteManager,
    simulation::SimulationClient,
    streams::{OpportunitySource, SourceMessage},
    tracker::LockConflictTracker,
};
use arbx_circuit_breaker::CircuitBreakerManager;
use arbx_config::EngineConfig;
use arbx_flashloan::{FlashLoanProvider, FlashLoanTx, ProviderRegistry};
use arbx_primitives::{
    Chain, Clock, ExecutionRecord, ExecutionStats, ExecutionStatus, FlashLoanProtocol,
    FlashLoanRequest, Opportunity, SharedSink, U256, EXECUTION_RESULTS_STREAM,
};
use arbx_queue::{OpportunityQueue, QueueConfig};
use arbx_rpc::{EthCallAdapter, EthRpcClient, LocalWallet, ProviderService, Tx1559};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering::Relaxed},
        Arc,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// How long an idle worker sleeps before polling the queue again.
const WORKER_IDLE_SLEEP: Duration = Duration::from_millis(20);

/// Priority fee used when the sampled gas price dwarfs it.
const DEFAULT_PRIORITY_FEE_WEI: u64 = 1_500_000_000;

/// State shared between the consumer, the workers and the health monitor.
#[derive(Debug)]
pub struct PipelineState {
    /// The bounded opportunity queue. Guarded by a mutex: the queue itself
    /// is single-owner and callers serialize on this lock.
    pub queue: Mutex<OpportunityQueue>,
    /// Set by the queue's pause callback; the consumer stops pulling from
    /// the broker while it holds. Behind its own `Arc` so the callback does
    /// not keep the whole state alive.
    pub consumption_paused: Arc<AtomicBool>,
    /// Workers currently mid-pipeline.
    pub active_executions: AtomicUsize,
    /// In-process per-opportunity locks.
    pub locks: Mutex<HashSet<String>>,
    /// Broker ids awaiting acknowledgement, keyed by opportunity id. A list
    /// per id: duplicate opportunities are distinct broker messages, each
    /// owed its own acknowledgement.
    pub pending_acks: Mutex<HashMap<String, Vec<String>>>,
}

impl PipelineState {
    /// Creates pipeline state over an empty queue.
    pub fn new(queue_config: QueueConfig) -> Self {
        Self {
            queue: Mutex::new(OpportunityQueue::new(queue_config)),
            consumption_paused: Arc::new(AtomicBool::new(false)),
            active_executions: AtomicUsize::new(0),
            locks: Mutex::new(HashSet::new()),
            pending_acks: Mutex::new(HashMap::new()),
        }
    }

    fn push_ack(&self, opportunity_id: &str, broker_id: String) {
        self.pending_acks.lock().entry(opportunity_id.to_string()).or_default().push(broker_id);
    }

    fn remove_ack(&self, opportunity_id: &str, broker_id: &str) {
        let mut pending = self.pending_acks.lock();
        if let Some(broker_ids) = pending.get_mut(opportunity_id) {
            if let Some(position) = broker_ids.iter().position(|id| id == broker_id) {
                broker_ids.remove(position);
            }
            if broker_ids.is_empty() {
                pending.remove(opportunity_id);
            }
        }
    }

    fn pop_ack(&self, opportunity_id: &str) -> Option<String> {
        let mut pending = self.pending_acks.lock();
        let broker_ids = pending.get_mut(opportunity_id)?;
        let broker_id = if broker_ids.is_empty() { None } else { Some(broker_ids.remove(0)) };
        if broker_ids.is_empty() {
            pending.remove(opportunity_id);
        }
        broker_id
    }
}

/// Terminal result of one opportunity's trip through a worker.
#[derive(Debug, Clone)]
pub(crate) struct Outcome {
    status: ExecutionStatus,
    reason: Option<String>,
    protocol: Option<FlashLoanProtocol>,
    gas_used: Option<u64>,
    realized_profit: Option<U256>,
    /// Whether the chain's breaker should record a failure.
    chain_failure: bool,
}

impl Outcome {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Skipped,
            reason: Some(reason.into()),
            protocol: None,
            gas_used: None,
            realized_profit: None,
            chain_failure: false,
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            reason: Some(reason.into()),
            protocol: None,
            gas_used: None,
            realized_profit: None,
            chain_failure: true,
        }
    }

    fn timeout() -> Self {
        Self {
            status: ExecutionStatus::Timeout,
            reason: Some("execution deadline elapsed".to_string()),
            protocol: None,
            gas_used: None,
            realized_profit: None,
            chain_failure: true,
        }
    }

    fn with_protocol(mut self, protocol: FlashLoanProtocol) -> Self {
        self.protocol = Some(protocol);
        self
    }
}

/// Everything a worker needs, shared by `Arc`.
pub(crate) struct Pipeline {
    pub config: EngineConfig,
    pub state: Arc<PipelineState>,
    pub breakers: Arc<CircuitBreakerManager>,
    pub registry: Arc<ProviderRegistry>,
    pub providers: Arc<ProviderService>,
    pub quotes: Arc<BatchQuoteManager>,
    pub simulator: Option<Arc<dyn SimulationClient>>,
    pub tracker: Arc<LockConflictTracker>,
    pub gas: Arc<GasBaselines>,
    pub stats: Arc<ExecutionStats>,
    pub sink: SharedSink,
    pub source: Arc<dyn OpportunitySource>,
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("instance_id", &self.config.instance_id).finish()
    }
}

impl Pipeline {
    /// Pulls from the broker into the queue until cancelled, honoring the
    /// backpressure pause signal.
    pub(crate) async fn consumer_loop(self: Arc<Self>, cancel: CancellationToken) {
        info!(target: "engine", "stream consumer started");
        loop {
            if cancel.is_cancelled() {
                break
            }
            if self.state.consumption_paused.load(Relaxed) {
                tokio::time::sleep(self.config.consumer.poll_interval).await;
                continue
            }

            match self.source.pull().await {
                Ok(Some(message)) => self.ingest(message).await,
                Ok(None) => tokio::time::sleep(self.config.consumer.poll_interval).await,
                Err(err) => {
                    warn!(target: "engine", %err, "opportunity pull failed");
                    tokio::time::sleep(self.config.consumer.poll_interval).await;
                }
            }
        }
        debug!(target: "engine", "stream consumer stopped");
    }

    async fn ingest(&self, message: SourceMessage) {
        self.stats.opportunities_received.fetch_add(1, Relaxed);
        let opportunity = message.opportunity.clone();
        self.state.push_ack(&opportunity.id, message.broker_id.clone());

        let accepted = self.state.queue.lock().enqueue(opportunity);
        if !accepted {
            self.stats.queue_rejects.fetch_add(1, Relaxed);
            metrics::counter!("arbx_queue_rejects", 1);
            self.state.remove_ack(&message.opportunity.id, &message.broker_id);
            trace!(
                target: "engine",
                id = %message.opportunity.id,
                "queue refused opportunity"
            );
            self.finalize(&message.opportunity, Some(&message.broker_id), Outcome::skipped("QUEUE_REJECT"))
                .await;
        }
    }

    /// One worker: dequeue, execute with a deadline, record the outcome.
    pub(crate) async fn worker_loop(self: Arc<Self>, worker: usize, cancel: CancellationToken) {
        debug!(target: "engine", worker, "worker started");
        loop {
            if cancel.is_cancelled() {
                break
            }
            let opportunity = { self.state.queue.lock().dequeue() };
            let Some(opportunity) = opportunity else {
                tokio::time::sleep(WORKER_IDLE_SLEEP).await;
                continue
            };
            self.process(opportunity).await;
        }
        debug!(target: "engine", worker, "worker stopped");
    }

    pub(crate) async fn process(&self, opportunity: Opportunity) {
        let broker_id = self.state.pop_ack(&opportunity.id);

        // duplicate suppression on the opportunity id
        if !self.state.locks.lock().insert(opportunity.id.clone()) {
            self.stats.lock_conflicts.fetch_add(1, Relaxed);
            if self.tracker.record_conflict(&opportunity.id) {
                // the holder is presumed dead; free the lock for the next copy
                self.state.locks.lock().remove(&opportunity.id);
                self.stats.stale_lock_recoveries.fetch_add(1, Relaxed);
                warn!(target: "engine", id = %opportunity.id, "stale lock recovered");
            }
            self.finalize(&opportunity, broker_id.as_deref(), Outcome::skipped("LOCK_CONFLICT"))
                .await;
            return
        }

        self.state.active_executions.fetch_add(1, Relaxed);
        let outcome =
            match tokio::time::timeout(self.config.execution.execution_timeout, self.execute(&opportunity))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.stats.execution_timeouts.fetch_add(1, Relaxed);
                    Outcome::timeout()
                }
            };
        self.state.active_executions.fetch_sub(1, Relaxed);
        self.state.locks.lock().remove(&opportunity.id);

        self.finalize(&opportunity, broker_id.as_deref(), outcome).await;
    }

    /// The gate sequence. Never returns an error; every failure is a
    /// terminal [`Outcome`].
    async fn execute(&self, opp: &Opportunity) -> Outcome {
        let chain = opp.chain;

        // sanity validation before anything suspends
        if opp.swap_path.is_empty() {
            self.stats.validation_errors.fetch_add(1, Relaxed);
            return Outcome::skipped("validation: EMPTY_PATH")
        }
        if opp.amount_in.is_zero() {
            self.stats.validation_errors.fetch_add(1, Relaxed);
            return Outcome::skipped("validation: ZERO_AMOUNT")
        }

        // risk gates that need no I/O
        if opp.confidence < self.config.execution.min_confidence {
            self.stats.risk_rejections.fetch_add(1, Relaxed);
            return Outcome::skipped("risk: confidence below threshold")
        }
        let max_input = self.config.execution.max_input_amount_wei;
        if !max_input.is_zero() && opp.amount_in > max_input {
            self.stats.risk_rejections.fetch_add(1, Relaxed);
            return Outcome::skipped("risk: input amount above limit")
        }

        // per-chain circuit breaker
        if !self.breakers.can_execute(chain) {
            return Outcome::skipped("circuit breaker open")
        }

        // profitability quote
        let quote = match self
            .quotes
            .calculate_expected_profit_with_batching(opp, chain, None)
            .await
        {
            Ok(quote) => quote,
            Err(err) => {
                self.stats.opportunities_rejected.fetch_add(1, Relaxed);
                return Outcome::skipped(format!("quote failed: {err}"))
            }
        };
        let costs = quote.flash_loan_fee.saturating_add(opp.gas_estimate);
        if quote.expected_profit <= costs {
            self.stats.opportunities_rejected.fetch_add(1, Relaxed);
            return Outcome::skipped("unprofitable after fees and gas")
        }

        // flash-loan provider: validate, then build
        let Some(provider) = self.registry.get_provider(chain) else {
            self.stats.opportunities_rejected.fetch_add(1, Relaxed);
            return Outcome::skipped("no flash-loan provider configured")
        };
        let protocol = provider.protocol();
        let Some(wallet) = self.providers.get_wallet(chain) else {
            self.stats.opportunities_rejected.fetch_add(1, Relaxed);
            return Outcome::skipped("no wallet configured").with_protocol(protocol)
        };
        let Some(client) = self.providers.get_provider(chain) else {
            self.stats.opportunities_rejected.fetch_add(1, Relaxed);
            return Outcome::skipped("no rpc provider").with_protocol(protocol)
        };

        let request = self.flash_loan_request(opp, &wallet);
        if let Err(err) = provider.validate(&request) {
            self.stats.validation_errors.fetch_add(1, Relaxed);
            return Outcome::skipped(format!("validation: {err}")).with_protocol(protocol)
        }

        let rpc = EthCallAdapter(Arc::clone(&client));
        let tx = match provider.build_transaction(&request, wallet.address(), &rpc).await {
            Ok(tx) => tx,
            Err(err) => {
                // construction failures are configuration-shaped; the
                // breaker stays untouched
                self.stats.opportunities_rejected.fetch_add(1, Relaxed);
                return Outcome::skipped(format!("build: {err}")).with_protocol(protocol)
            }
        };
        let gas_limit = match provider.estimate_gas(&request, wallet.address(), &rpc).await {
            Ok(gas_limit) => gas_limit,
            Err(err) => {
                self.stats.opportunities_rejected.fetch_add(1, Relaxed);
                return Outcome::skipped(format!("gas estimate: {err}")).with_protocol(protocol)
            }
        };

        // simulation gate
        if let Some(outcome) = self.simulate(chain, &tx, protocol).await {
            return outcome
        }

        // dispatch
        self.stats.execution_attempts.fetch_add(1, Relaxed);
        metrics::counter!("arbx_execution_attempts", 1, "chain" => chain.to_string());
        match self.dispatch(chain, &wallet, &client, &tx, gas_limit).await {
            Ok(tx_hash) => {
                info!(
                    target: "engine",
                    id = %opp.id,
                    %chain,
                    %tx_hash,
                    "arbitrage dispatched"
                );
                Outcome {
                    status: ExecutionStatus::Success,
                    reason: None,
                    protocol: Some(protocol),
                    gas_used: Some(gas_limit),
                    realized_profit: Some(
                        quote.expected_profit.saturating_sub(quote.flash_loan_fee),
                    ),
                    chain_failure: false,
                }
            }
            Err(err) => Outcome::failed(format!("dispatch: {err}")).with_protocol(protocol),
        }
    }

    /// Runs the simulation gate. Returns a terminal outcome when the gate
    /// stops the execution, `None` to proceed.
    async fn simulate(
        &self,
        chain: Chain,
        tx: &FlashLoanTx,
        protocol: FlashLoanProtocol,
    ) -> Option<Outcome> {
        let simulator = match (&self.simulator, self.config.simulation.enabled) {
            (Some(simulator), true) => simulator,
            _ => {
                self.stats.simulations_skipped.fetch_add(1, Relaxed);
                return None
            }
        };

        self.stats.simulations_performed.fetch_add(1, Relaxed);
        match simulator.simulate(chain, tx).await {
            Err(err) => {
                // simulation is advisory; an unreachable simulator does not
                // block the trade
                self.stats.simulation_errors.fetch_add(1, Relaxed);
                warn!(target: "engine", %chain, %err, "simulation unavailable, proceeding");
                None
            }
            Ok(outcome) if outcome.would_revert => {
                self.stats.predicted_reverts.fetch_add(1, Relaxed);
                let mut result =
                    Outcome::skipped("simulation predicted revert").with_protocol(protocol);
                result.chain_failure = true;
                Some(result)
            }
            Ok(outcome) if outcome.predicted_profit < self.config.simulation.min_profit_wei => {
                self.stats.simulation_profit_rejections.fetch_add(1, Relaxed);
                Some(
                    Outcome::skipped("simulation profit below threshold")
                        .with_protocol(protocol),
                )
            }
            Ok(_) => None,
        }
    }

    fn flash_loan_request(&self, opp: &Opportunity, wallet: &LocalWallet) -> FlashLoanRequest {
        FlashLoanRequest {
            asset: opp.token_in.clone(),
            amount: opp.amount_in,
            chain: opp.chain,
            swap_path: opp.swap_path.clone(),
            min_profit: opp.expected_profit.amount,
            initiator: format!("{:?}", wallet.address()),
            pool_address: None,
        }
    }

    async fn dispatch(
        &self,
        chain: Chain,
        wallet: &LocalWallet,
        client: &Arc<dyn EthRpcClient>,
        tx: &FlashLoanTx,
        gas_limit: u64,
    ) -> Result<arbx_primitives::B256, arbx_rpc::RpcError> {
        let nonce = match self.providers.nonce_manager() {
            Some(manager) => manager.next_nonce(chain, wallet.address()).await?,
            None => client.transaction_count(wallet.address()).await?,
        };

        let gas_price = client.gas_price().await?;
        self.gas.record(chain, gas_price);

        let priority = gas_price.min(U256::from(DEFAULT_PRIORITY_FEE_WEI));
        let signed = wallet.sign_transaction(&Tx1559 {
            chain_id: chain.id(),
            nonce,
            max_priority_fee_per_gas: priority,
            max_fee_per_gas: gas_price.saturating_mul(U256::from(2u64)),
            gas_limit,
            to: tx.to,
            value: U256::ZERO,
            data: tx.data.clone(),
        })?;
        client.send_raw_transaction(signed).await
    }

    /// Records counters and breaker state, publishes the execution record,
    /// and acknowledges the broker message.
    pub(crate) async fn finalize(
        &self,
        opp: &Opportunity,
        broker_id: Option<&str>,
        outcome: Outcome,
    ) {
        match outcome.status {
            ExecutionStatus::Success => {
                self.stats.successful_executions.fetch_add(1, Relaxed);
                self.breakers.record_success(opp.chain);
            }
            ExecutionStatus::Failed => {
                self.stats.failed_executions.fetch_add(1, Relaxed);
            }
            // the timeout counter is bumped where the deadline fires
            ExecutionStatus::Timeout | ExecutionStatus::Skipped => {}
        }
        if outcome.chain_failure {
            self.breakers.record_failure(opp.chain);
        }

        let record = ExecutionRecord {
            opportunity_id: opp.id.clone(),
            chain: opp.chain,
            protocol: outcome.protocol,
            status: outcome.status,
            gas_used: outcome.gas_used,
            realized_profit: outcome.realized_profit,
            reason: outcome.reason,
            timestamp_ms: self.clock.now_ms(),
            instance_id: self.config.instance_id.clone(),
        };
        if let Some(sink) = self.sink.get() {
            match serde_json::to_value(&record) {
                Ok(payload) => {
                    if let Err(err) = sink.append(EXECUTION_RESULTS_STREAM, payload).await {
                        debug!(target: "engine", %err, "execution record publish failed");
                    }
                }
                Err(err) => debug!(target: "engine", %err, "execution record encoding failed"),
            }
        }

        if let Some(broker_id) = broker_id {
            if let Err(err) = self.source.ack(broker_id).await {
                warn!(target: "engine", %err, broker_id, "acknowledgement failed");
            }
        }
    }
}
