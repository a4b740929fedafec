use crate::{
    batch::BatchProvider,
    client::{EthRpcClient, HttpRpcClient, RpcError},
    config::{ChainEndpoint, RpcConfig},
    wallet::{LocalWallet, NonceManager},
};
use arbx_primitives::{Chain, Clock, ExecutionStats, SystemClock};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Listener fired after a provider has been rebuilt.
pub type ReconnectCallback = Box<dyn Fn(Chain) + Send + Sync>;

type ClientFactory =
    Box<dyn Fn(Chain, &ChainEndpoint) -> Result<Arc<dyn EthRpcClient>, RpcError> + Send + Sync>;

/// Health of one chain's provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    /// Whether the last check succeeded.
    pub healthy: bool,
    /// Time of the last check, unix milliseconds.
    pub last_check_ms: u64,
    /// Checks failed in a row.
    pub consecutive_failures: u32,
}

/// Owns the RPC client and wallet for every configured chain.
///
/// All health mutations funnel through `update_provider_health`, which is
/// what keeps the cached healthy-count exact; nothing else may touch the
/// health map.
pub struct ProviderService {
    config: RpcConfig,
    providers: RwLock<HashMap<Chain, Arc<dyn EthRpcClient>>>,
    wallets: HashMap<Chain, Arc<LocalWallet>>,
    health: RwLock<HashMap<Chain, ProviderHealth>>,
    /// Cached count of healthy providers, so the query is O(1).
    healthy_count: AtomicUsize,
    /// Re-entrancy guard: a tick that fires while the previous cycle is
    /// still running is skipped.
    is_checking_health: AtomicBool,
    stats: Arc<ExecutionStats>,
    clock: Arc<dyn Clock>,
    factory: ClientFactory,
    on_reconnect: Mutex<Option<ReconnectCallback>>,
    nonce_manager: Mutex<Option<Arc<dyn NonceManager>>>,
    batch_providers: RwLock<HashMap<Chain, Arc<BatchProvider>>>,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ProviderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderService")
            .field("chains", &self.providers.read().keys().collect::<Vec<_>>())
            .field("healthy_count", &self.healthy_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl ProviderService {
    /// Builds clients and wallets for every configured endpoint.
    pub fn new(config: RpcConfig, stats: Arc<ExecutionStats>) -> Result<Self, RpcError> {
        Self::with_factory(
            config,
            stats,
            Arc::new(SystemClock),
            Box::new(|_chain, endpoint| {
                Ok(Arc::new(HttpRpcClient::new(&endpoint.http_url)?) as Arc<dyn EthRpcClient>)
            }),
        )
    }

    /// Test seam: injected clock and client factory.
    pub fn with_factory(
        config: RpcConfig,
        stats: Arc<ExecutionStats>,
        clock: Arc<dyn Clock>,
        factory: ClientFactory,
    ) -> Result<Self, RpcError> {
        let mut providers = HashMap::new();
        let mut wallets = HashMap::new();
        let mut health = HashMap::new();
        let now_ms = clock.now_ms();

        for (chain, endpoint) in &config.endpoints {
            providers.insert(*chain, factory(*chain, endpoint)?);
            if let Some(key) = &endpoint.private_key {
                wallets.insert(*chain, Arc::new(LocalWallet::from_hex(key, chain.id())?));
            }
            health.insert(
                *chain,
                ProviderHealth { healthy: true, last_check_ms: now_ms, consecutive_failures: 0 },
            );
        }

        let healthy = health.len();
        Ok(Self {
            config,
            providers: RwLock::new(providers),
            wallets,
            health: RwLock::new(health),
            healthy_count: AtomicUsize::new(healthy),
            is_checking_health: AtomicBool::new(false),
            stats,
            clock,
            factory,
            on_reconnect: Mutex::new(None),
            nonce_manager: Mutex::new(None),
            batch_providers: RwLock::new(HashMap::new()),
            health_task: Mutex::new(None),
        })
    }

    /// The chain's RPC client.
    pub fn get_provider(&self, chain: Chain) -> Option<Arc<dyn EthRpcClient>> {
        self.providers.read().get(&chain).cloned()
    }

    /// The chain's signing wallet, if a key is configured.
    pub fn get_wallet(&self, chain: Chain) -> Option<Arc<LocalWallet>> {
        self.wallets.get(&chain).cloned()
    }

    /// Copy of the current health map.
    pub fn get_health_map(&self) -> HashMap<Chain, ProviderHealth> {
        self.health.read().clone()
    }

    /// Number of healthy providers. O(1), served from the cached count.
    pub fn healthy_count(&self) -> usize {
        self.healthy_count.load(Ordering::Relaxed)
    }

    /// Registers the single reconnect listener.
    pub fn on_provider_reconnect(&self, cb: ReconnectCallback) {
        *self.on_reconnect.lock() = Some(cb);
    }

    /// Installs an external nonce allocator.
    pub fn set_nonce_manager(&self, nm: Arc<dyn NonceManager>) {
        *self.nonce_manager.lock() = Some(nm);
    }

    /// The installed nonce allocator, if any.
    pub fn nonce_manager(&self) -> Option<Arc<dyn NonceManager>> {
        self.nonce_manager.lock().clone()
    }

    /// Whether batch providers are configured.
    pub fn is_batching_enabled(&self) -> bool {
        self.config.batch.enabled
    }

    /// The chain's batch provider, created on first use. `None` when
    /// batching is disabled or the chain is unknown.
    pub fn get_batch_provider(&self, chain: Chain) -> Option<Arc<BatchProvider>> {
        if !self.config.batch.enabled {
            return None
        }
        if let Some(existing) = self.batch_providers.read().get(&chain) {
            return Some(Arc::clone(existing))
        }
        let endpoint = self.config.endpoints.get(&chain)?;
        let client = match HttpRpcClient::new(&endpoint.http_url) {
            Ok(client) => Arc::new(client),
            Err(err) => {
                warn!(target: "rpc", %chain, %err, "failed to build batch provider");
                return None
            }
        };
        let provider = Arc::new(BatchProvider::new(client, self.config.batch.clone()));
        let mut batch_providers = self.batch_providers.write();
        Some(Arc::clone(batch_providers.entry(chain).or_insert(provider)))
    }

    /// Starts the periodic health loop.
    pub fn start_health_checks(self: &Arc<Self>) {
        let mut task = self.health_task.lock();
        if task.is_some() {
            return
        }
        let service = Arc::clone(self);
        let interval = self.config.health_check_interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                service.run_health_cycle().await;
            }
        }));
        info!(target: "rpc", interval = ?interval, "provider health checks started");
    }

    /// Stops the periodic health loop.
    pub fn stop_health_checks(&self) {
        if let Some(task) = self.health_task.lock().take() {
            task.abort();
            debug!(target: "rpc", "provider health checks stopped");
        }
    }

    /// One pass over every provider. Public for tests and manual probes.
    pub async fn run_health_cycle(&self) {
        if self
            .is_checking_health
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(target: "rpc", "previous health cycle still running, tick skipped");
            return
        }
        // released on every exit path, including panics in a check
        let _guard = FlagGuard(&self.is_checking_health);

        let clients: Vec<(Chain, Arc<dyn EthRpcClient>)> =
            self.providers.read().iter().map(|(chain, c)| (*chain, Arc::clone(c))).collect();

        for (chain, client) in clients {
            match client.block_number().await {
                Ok(block) => {
                    trace!(target: "rpc", %chain, block, "health check ok");
                    self.update_provider_health(chain, true);
                }
                Err(err) => {
                    warn!(target: "rpc", %chain, %err, "health check failed");
                    self.stats.provider_health_check_failures.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("arbx_provider_health_check_failures", 1, "chain" => chain.to_string());
                    let failures = self.update_provider_health(chain, false);
                    if failures >= self.config.reconnect_threshold {
                        self.attempt_provider_reconnection(chain);
                    }
                }
            }
        }
        metrics::gauge!("arbx_healthy_providers", self.healthy_count() as f64);
    }

    /// Sole mutator of the health map. Returns the consecutive-failure count
    /// after the update.
    fn update_provider_health(&self, chain: Chain, healthy: bool) -> u32 {
        let mut health = self.health.write();
        let entry = health.entry(chain).or_insert(ProviderHealth {
            healthy: true,
            last_check_ms: 0,
            consecutive_failures: 0,
        });

        if healthy && !entry.healthy {
            self.healthy_count.fetch_add(1, Ordering::Relaxed);
        } else if !healthy && entry.healthy {
            self.healthy_count.fetch_sub(1, Ordering::Relaxed);
        }

        entry.healthy = healthy;
        entry.last_check_ms = self.clock.now_ms();
        entry.consecutive_failures =
            if healthy { 0 } else { entry.consecutive_failures.saturating_add(1) };
        entry.consecutive_failures
    }

    /// Rebuilds the chain's client from config after repeated failures.
    fn attempt_provider_reconnection(&self, chain: Chain) {
        let Some(endpoint) = self.config.endpoints.get(&chain) else { return };
        match (self.factory)(chain, endpoint) {
            Ok(client) => {
                self.providers.write().insert(chain, client);
                // the failure streak restarts for the fresh client; the
                // healthy flag stays down until a check passes
                if let Some(entry) = self.health.write().get_mut(&chain) {
                    entry.consecutive_failures = 0;
                }
                self.stats.provider_reconnections.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("arbx_provider_reconnections", 1, "chain" => chain.to_string());
                info!(target: "rpc", %chain, "provider rebuilt after repeated failures");
                if let Some(cb) = self.on_reconnect.lock().as_ref() {
                    cb(chain);
                }
            }
            Err(err) => {
                warn!(target: "rpc", %chain, %err, "provider reconnection failed");
            }
        }
    }

    /// Tears the service down: health loop stopped, batch providers shut
    /// down (errors logged, never raised), maps emptied. Idempotent.
    pub async fn clear(&self) {
        self.stop_health_checks();

        let batch_providers: Vec<_> =
            self.batch_providers.write().drain().map(|(_, provider)| provider).collect();
        for provider in batch_providers {
            provider.shutdown().await;
        }

        self.providers.write().clear();
        self.health.write().clear();
        self.healthy_count.store(0, Ordering::Relaxed);
        debug!(target: "rpc", "provider service cleared");
    }
}

struct FlagGuard<'a>(&'a AtomicBool);

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::CallRequest;
    use alloy_primitives::{Address, Bytes, B256, U256};
    use arbx_primitives::ManualClock;
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Debug)]
    struct MockClient {
        fail: AtomicBool,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl MockClient {
        fn healthy() -> Self {
            Self { fail: AtomicBool::new(false), delay: Duration::ZERO, calls: AtomicUsize::new(0) }
        }

        fn failing() -> Self {
            Self { fail: AtomicBool::new(true), delay: Duration::ZERO, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl EthRpcClient for MockClient {
        async fn block_number(&self) -> Result<u64, RpcError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail.load(Ordering::Relaxed) {
                Err(RpcError::Transport("mock outage".to_string()))
            } else {
                Ok(1)
            }
        }

        async fn gas_price(&self) -> Result<U256, RpcError> {
            Ok(U256::from(1u64))
        }

        async fn call(&self, _req: CallRequest) -> Result<Bytes, RpcError> {
            Ok(Bytes::new())
        }

        async fn estimate_gas(&self, _req: CallRequest) -> Result<u64, RpcError> {
            Ok(21_000)
        }

        async fn transaction_count(&self, _address: Address) -> Result<u64, RpcError> {
            Ok(0)
        }

        async fn send_raw_transaction(&self, _raw: Bytes) -> Result<B256, RpcError> {
            Ok(B256::ZERO)
        }
    }

    fn config(chains: &[Chain]) -> RpcConfig {
        let mut endpoints = std::collections::BTreeMap::new();
        for chain in chains {
            endpoints.insert(
                *chain,
                ChainEndpoint { http_url: "http://localhost:8545".to_string(), private_key: None },
            );
        }
        RpcConfig { endpoints, ..Default::default() }
    }

    fn service_with(
        chains: &[Chain],
        build: impl Fn(Chain) -> Arc<MockClient> + Send + Sync + 'static,
    ) -> (Arc<ProviderService>, Arc<ExecutionStats>) {
        let stats = Arc::new(ExecutionStats::default());
        let service = ProviderService::with_factory(
            config(chains),
            Arc::clone(&stats),
            Arc::new(ManualClock::new(1_000)),
            Box::new(move |chain, _| Ok(build(chain) as Arc<dyn EthRpcClient>)),
        )
        .unwrap();
        (Arc::new(service), stats)
    }

    #[tokio::test]
    async fn healthy_count_tracks_transitions() {
        let (service, _stats) = service_with(&[Chain::Ethereum, Chain::Arbitrum], |chain| {
            if chain == Chain::Ethereum {
                Arc::new(MockClient::failing())
            } else {
                Arc::new(MockClient::healthy())
            }
        });

        assert_eq!(service.healthy_count(), 2);
        service.run_health_cycle().await;
        assert_eq!(service.healthy_count(), 1);

        let health = service.get_health_map();
        assert!(!health[&Chain::Ethereum].healthy);
        assert_eq!(health[&Chain::Ethereum].consecutive_failures, 1);
        assert!(health[&Chain::Arbitrum].healthy);
    }

    #[tokio::test]
    async fn reconnects_after_threshold_failures() {
        let constructed = Arc::new(AtomicUsize::new(0));
        let constructed2 = Arc::clone(&constructed);
        let (service, stats) = service_with(&[Chain::Ethereum], move |_| {
            constructed2.fetch_add(1, Ordering::Relaxed);
            Arc::new(MockClient::failing())
        });
        let reconnected = Arc::new(AtomicUsize::new(0));
        let reconnected2 = Arc::clone(&reconnected);
        service.on_provider_reconnect(Box::new(move |_| {
            reconnected2.fetch_add(1, Ordering::Relaxed);
        }));

        for _ in 0..3 {
            service.run_health_cycle().await;
        }

        // initial build plus one reconnect
        assert_eq!(constructed.load(Ordering::Relaxed), 2);
        assert_eq!(reconnected.load(Ordering::Relaxed), 1);
        let snap = stats.snapshot();
        assert_eq!(snap.provider_reconnections, 1);
        assert_eq!(snap.provider_health_check_failures, 3);
        // failure streak restarts for the fresh client
        assert_eq!(service.get_health_map()[&Chain::Ethereum].consecutive_failures, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn overlapping_cycles_are_skipped() {
        let client = Arc::new(MockClient {
            fail: AtomicBool::new(false),
            delay: Duration::from_millis(100),
            calls: AtomicUsize::new(0),
        });
        let client2 = Arc::clone(&client);
        let (service, _stats) = service_with(&[Chain::Ethereum], move |_| Arc::clone(&client2));

        let slow = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.run_health_cycle().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        // second cycle hits the guard and returns without probing
        service.run_health_cycle().await;
        slow.await.unwrap();

        assert_eq!(client.calls.load(Ordering::Relaxed), 1);
        // the guard is released once the slow cycle finishes
        service.run_health_cycle().await;
        assert_eq!(client.calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let (service, _stats) = service_with(&[Chain::Ethereum], |_| Arc::new(MockClient::healthy()));
        service.clear().await;
        assert_eq!(service.healthy_count(), 0);
        assert!(service.get_provider(Chain::Ethereum).is_none());
        service.clear().await;
    }

    #[test]
    fn wallets_follow_configured_keys() {
        let mut cfg = config(&[Chain::Ethereum]);
        cfg.endpoints.get_mut(&Chain::Ethereum).unwrap().private_key = Some(
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80".to_string(),
        );
        let service = ProviderService::with_factory(
            cfg,
            Arc::new(ExecutionStats::default()),
            Arc::new(ManualClock::new(0)),
            Box::new(|_, _| Ok(Arc::new(MockClient::healthy()) as Arc<dyn EthRpcClient>)),
        )
        .unwrap();
        let wallet = service.get_wallet(Chain::Ethereum).unwrap();
        assert_eq!(wallet.chain_id(), Chain::Ethereum.id());
        assert!(service.get_wallet(Chain::Base).is_none());
    }
}
