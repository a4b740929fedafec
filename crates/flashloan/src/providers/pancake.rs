//! PancakeSwap V3 flash loans.
//!
//! The flash pool is selected at runtime: either the request pins one, or the
//! factory is queried over the preferred fee tiers. Discovery results are
//! cached for five minutes.

use crate::{
    abi::{swap_path_sol, IPancakeArbWrapper, IPancakeV3Factory},
    error::{ProviderError, RpcCallError, ValidationError},
    fees::fee_info,
    provider::{EthCall, FlashLoanProvider, FlashLoanTx, DEADLINE_SLACK_SECS},
    validation::{normalize_routers, validate_request, ValidationContext},
};
use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use arbx_primitives::{
    parse_address, Chain, Clock, FeeInfo, FlashLoanProtocol, FlashLoanRequest,
    ProviderCapabilities, SupportStatus,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use schnellru::{ByLength, LruMap};
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, trace};

const PANCAKE_CHAINS: &[Chain] =
    &[Chain::Bsc, Chain::Ethereum, Chain::Base, Chain::Arbitrum, Chain::Zksync];

/// Tier preference for pool discovery, in "hundredths of a bip" units.
const PREFERRED_FEE_TIERS: [u32; 4] = [2500, 500, 10000, 100];

const PANCAKE_GAS_FALLBACK: u64 = 600_000;

const POOL_CACHE_TTL_MS: u64 = 5 * 60 * 1000;
const POOL_CACHE_CAPACITY: u32 = 256;

#[derive(Debug, Clone, Copy)]
struct CachedPool {
    pool: Address,
    fee_tier: u32,
    cached_at_ms: u64,
}

/// PancakeSwap V3 provider.
#[derive(Debug)]
pub struct PancakeswapV3Provider {
    chain: Chain,
    wrapper: Address,
    factory: Address,
    /// Default tier used for fee quotes before a pool is selected.
    fee_tier: u32,
    approved_original: Vec<String>,
    approved: HashSet<String>,
    pool_cache: Mutex<LruMap<(String, String), CachedPool>>,
    clock: Arc<dyn Clock>,
}

impl PancakeswapV3Provider {
    /// Creates a provider. `fee_tier` defaults to the 0.25% tier.
    pub fn new(
        chain: Chain,
        wrapper: Address,
        factory: Address,
        fee_tier: Option<u32>,
        approved_routers: Vec<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let approved = normalize_routers(&approved_routers);
        Self {
            chain,
            wrapper,
            factory,
            fee_tier: fee_tier.unwrap_or(2500),
            approved_original: approved_routers,
            approved,
            pool_cache: Mutex::new(LruMap::new(ByLength::new(POOL_CACHE_CAPACITY))),
            clock,
        }
    }

    fn cache_key(token_a: &str, token_b: &str) -> (String, String) {
        let a = token_a.trim().to_lowercase();
        let b = token_b.trim().to_lowercase();
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Finds the flash pool for the pair, preferring the 2500 tier.
    async fn discover_pool(
        &self,
        token_a: &str,
        token_b: &str,
        rpc: &dyn EthCall,
    ) -> Result<(Address, u32), ProviderError> {
        let key = Self::cache_key(token_a, token_b);
        let now_ms = self.clock.now_ms();

        if let Some(cached) = self.pool_cache.lock().get(&key) {
            if now_ms.saturating_sub(cached.cached_at_ms) < POOL_CACHE_TTL_MS {
                trace!(target: "flashloan", pool = %cached.pool, "pool cache hit");
                return Ok((cached.pool, cached.fee_tier))
            }
        }

        let a = parse_address(token_a)
            .map_err(|_| ValidationError::InvalidAsset(token_a.to_string()))?;
        let b = parse_address(token_b)
            .map_err(|_| ValidationError::InvalidAsset(token_b.to_string()))?;

        for tier in PREFERRED_FEE_TIERS {
            let call = IPancakeV3Factory::getPoolCall {
                tokenA: a,
                tokenB: b,
                fee: tier,
            };
            let returndata = match rpc.call(self.factory, call.abi_encode().into()).await {
                Ok(returndata) => returndata,
                Err(err) => return Err(ProviderError::Rpc(err)),
            };
            let pool = IPancakeV3Factory::getPoolCall::abi_decode_returns(&returndata, true)
                .map_err(|err| RpcCallError(format!("getPool decode: {err}")))?
                .pool;
            if pool != Address::ZERO {
                debug!(target: "flashloan", %pool, tier, "discovered flash pool");
                self.pool_cache
                    .lock()
                    .insert(key, CachedPool { pool, fee_tier: tier, cached_at_ms: now_ms });
                return Ok((pool, tier))
            }
        }

        Err(ProviderError::MissingPool {
            token_a: token_a.to_string(),
            token_b: token_b.to_string(),
        })
    }

    async fn resolve_pool(
        &self,
        req: &FlashLoanRequest,
        rpc: &dyn EthCall,
    ) -> Result<Address, ProviderError> {
        if let Some(pool) = &req.pool_address {
            return parse_address(pool)
                .map_err(|_| ValidationError::Config(format!("malformed pool override {pool}")).into())
        }
        // the flash pool is the first hop's pair
        let counter_token = &req.swap_path[0].token_out;
        let (pool, _) = self.discover_pool(&req.asset, counter_token, rpc).await?;
        Ok(pool)
    }
}

#[async_trait]
impl FlashLoanProvider for PancakeswapV3Provider {
    fn protocol(&self) -> FlashLoanProtocol {
        FlashLoanProtocol::PancakeswapV3
    }

    fn chain(&self) -> Chain {
        self.chain
    }

    fn is_available(&self) -> bool {
        self.wrapper != Address::ZERO
            && self.factory != Address::ZERO
            && PANCAKE_CHAINS.contains(&self.chain)
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_multi_hop: true,
            supports_multi_asset: false,
            max_loan_amount: None,
            supported_tokens: Vec::new(),
            status: if self.is_available() {
                SupportStatus::FullySupported
            } else {
                SupportStatus::NotImplemented
            },
        }
    }

    /// Fee tiers are "hundredths of a bip": bps = tier / 100.
    fn calculate_fee(&self, amount: U256) -> FeeInfo {
        fee_info(FlashLoanProtocol::PancakeswapV3, amount, u64::from(self.fee_tier) / 100)
    }

    fn approved_routers(&self) -> &[String] {
        &self.approved_original
    }

    fn validate(&self, req: &FlashLoanRequest) -> Result<(), ValidationError> {
        validate_request(
            &ValidationContext {
                chain: self.chain,
                approved_routers: &self.approved,
                // an open router set on the pancake wrapper is a misconfig
                empty_routers_fail_closed: true,
            },
            req,
        )
    }

    async fn build_calldata(
        &self,
        req: &FlashLoanRequest,
        rpc: &dyn EthCall,
    ) -> Result<Bytes, ProviderError> {
        let pool = self.resolve_pool(req, rpc).await?;
        let asset = parse_address(&req.asset)
            .map_err(|_| ValidationError::InvalidAsset(req.asset.clone()))?;
        let deadline = U256::from(self.clock.now_secs() + DEADLINE_SLACK_SECS);
        let call = IPancakeArbWrapper::executeArbitrage_1Call {
            pool,
            asset,
            amount: req.amount,
            swapPath: swap_path_sol(&req.swap_path)?,
            minProfit: req.min_profit,
            deadline,
        };
        Ok(call.abi_encode().into())
    }

    async fn build_transaction(
        &self,
        req: &FlashLoanRequest,
        from: Address,
        rpc: &dyn EthCall,
    ) -> Result<FlashLoanTx, ProviderError> {
        let data = self.build_calldata(req, rpc).await?;
        Ok(FlashLoanTx { to: self.wrapper, from, data })
    }

    async fn estimate_gas(
        &self,
        req: &FlashLoanRequest,
        from: Address,
        rpc: &dyn EthCall,
    ) -> Result<u64, ProviderError> {
        let tx = match self.build_transaction(req, from, rpc).await {
            Ok(tx) => tx,
            Err(err) => {
                trace!(target: "flashloan", %err, "gas estimate fell back to constant");
                return Ok(PANCAKE_GAS_FALLBACK)
            }
        };
        match rpc.estimate_gas(&tx).await {
            Ok(gas) => Ok(gas),
            Err(err) => {
                trace!(target: "flashloan", %err, "gas estimate fell back to constant");
                Ok(PANCAKE_GAS_FALLBACK)
            }
        }
    }
}
