//! Profit estimation, batched when the feature flag allows it.
//!
//! The batch quoter simulates a whole swap path in one on-chain call. Any
//! failure — transport, partial simulation, an unresolvable router — falls
//! back to the sequential calculator, so quoting can degrade but not break
//! the pipeline.

use arbx_flashloan::ProviderRegistry;
use arbx_primitives::{eq_address_ignore_case, parse_address, Chain, Opportunity, U256};
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, warn};

/// Quote failures. All of them resolve to the sequential fallback inside the
/// manager; they only escape when the fallback itself fails.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QuoteError {
    /// A router could not be resolved through the DEX lookup.
    #[error("unknown router for hop {hop}: {name}")]
    UnknownRouter {
        /// Hop index.
        hop: usize,
        /// The unresolvable name.
        name: String,
    },
    /// The quoter or calculator call failed.
    #[error("quote backend: {0}")]
    Backend(String),
}

/// One hop's quote request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    /// Router handling the hop.
    pub router: String,
    /// Input token.
    pub token_in: String,
    /// Output token.
    pub token_out: String,
    /// Input amount; zero on hops fed by the previous hop on-chain.
    pub amount_in: U256,
}

/// Result of a batched path simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSimulation {
    /// Whether every hop simulated successfully.
    pub all_success: bool,
    /// Simulated end-to-end profit.
    pub expected_profit: U256,
}

/// On-chain batch quoter for one chain.
#[async_trait]
pub trait BatchQuoter: Send + Sync + std::fmt::Debug {
    /// Simulates the whole path in one call.
    async fn simulate_arbitrage_path(
        &self,
        requests: &[QuoteRequest],
        input_amount: U256,
        block_number: Option<u64>,
    ) -> Result<PathSimulation, QuoteError>;
}

/// Sequential per-hop profit calculator, the always-available fallback.
#[async_trait]
pub trait ProfitCalculator: Send + Sync + std::fmt::Debug {
    /// Estimates profit hop by hop.
    async fn expected_profit(&self, opp: &Opportunity) -> Result<U256, QuoteError>;
}

/// Resolves a DEX name to its router address for hops that carry a name
/// instead of an address.
pub type DexLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// A finished profit quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfitQuote {
    /// Expected profit in the input token's smallest unit.
    pub expected_profit: U256,
    /// Flash-loan fee for the configured provider on that chain.
    pub flash_loan_fee: U256,
}

/// Feature-flagged fan-out of quote requests.
pub struct BatchQuoteManager {
    use_batched_quoter: bool,
    quoters: HashMap<Chain, Arc<dyn BatchQuoter>>,
    sequential: Arc<dyn ProfitCalculator>,
    registry: Arc<ProviderRegistry>,
    dex_lookup: Option<DexLookup>,
}

impl std::fmt::Debug for BatchQuoteManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchQuoteManager")
            .field("use_batched_quoter", &self.use_batched_quoter)
            .field("quoter_chains", &self.quoters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BatchQuoteManager {
    /// Creates a manager.
    pub fn new(
        use_batched_quoter: bool,
        quoters: HashMap<Chain, Arc<dyn BatchQuoter>>,
        sequential: Arc<dyn ProfitCalculator>,
        registry: Arc<ProviderRegistry>,
        dex_lookup: Option<DexLookup>,
    ) -> Self {
        Self { use_batched_quoter, quoters, sequential, registry, dex_lookup }
    }

    /// Expected profit and flash-loan fee for the opportunity.
    ///
    /// Batched when the flag is on and the chain has a quoter; sequential
    /// otherwise and on every batched failure.
    pub async fn calculate_expected_profit_with_batching(
        &self,
        opp: &Opportunity,
        chain: Chain,
        block_number: Option<u64>,
    ) -> Result<ProfitQuote, QuoteError> {
        let quoter = self.quoters.get(&chain);
        if !self.use_batched_quoter || quoter.is_none() {
            return self.sequential_quote(opp, chain).await
        }
        let quoter = quoter.expect("checked above");

        let requests = match self.build_quote_requests(opp) {
            Ok(requests) => requests,
            Err(err) => {
                warn!(target: "engine::quotes", %err, "BatchQuoter error, using fallback");
                return self.sequential_quote(opp, chain).await
            }
        };

        match quoter.simulate_arbitrage_path(&requests, opp.amount_in, block_number).await {
            Err(err) => {
                warn!(target: "engine::quotes", %err, "BatchQuoter error, using fallback");
                self.sequential_quote(opp, chain).await
            }
            Ok(simulation) if !simulation.all_success => {
                debug!(target: "engine::quotes", "Batched simulation failed, using fallback");
                self.sequential_quote(opp, chain).await
            }
            Ok(simulation) => Ok(ProfitQuote {
                expected_profit: simulation.expected_profit,
                flash_loan_fee: self.flash_loan_fee(chain, opp.amount_in),
            }),
        }
    }

    fn flash_loan_fee(&self, chain: Chain, amount: U256) -> U256 {
        self.registry
            .get_provider(chain)
            .map(|provider| provider.calculate_fee(amount).fee_amount)
            .unwrap_or_default()
    }

    async fn sequential_quote(&self, opp: &Opportunity, chain: Chain) -> Result<ProfitQuote, QuoteError> {
        let expected_profit = self.sequential.expected_profit(opp).await?;
        Ok(ProfitQuote { expected_profit, flash_loan_fee: self.flash_loan_fee(chain, opp.amount_in) })
    }

    /// Builds the request batch: the 2-hop buy/sell form, or one request per
    /// hop with the input amount on the first hop only.
    fn build_quote_requests(&self, opp: &Opportunity) -> Result<Vec<QuoteRequest>, QuoteError> {
        if opp.swap_path.len() == 2
            && eq_address_ignore_case(&opp.swap_path[0].token_in, &opp.swap_path[1].token_out)
        {
            let buy = &opp.swap_path[0];
            let sell = &opp.swap_path[1];
            return Ok(vec![
                QuoteRequest {
                    router: self.resolve_router(0, &buy.router)?,
                    token_in: buy.token_in.clone(),
                    token_out: buy.token_out.clone(),
                    amount_in: opp.amount_in,
                },
                QuoteRequest {
                    router: self.resolve_router(1, &sell.router)?,
                    token_in: sell.token_in.clone(),
                    token_out: sell.token_out.clone(),
                    // fed on-chain from the buy hop's output
                    amount_in: U256::ZERO,
                },
            ])
        }

        opp.swap_path
            .iter()
            .enumerate()
            .map(|(hop, step)| {
                Ok(QuoteRequest {
                    router: self.resolve_router(hop, &step.router)?,
                    token_in: step.token_in.clone(),
                    token_out: step.token_out.clone(),
                    amount_in: if hop == 0 { opp.amount_in } else { U256::ZERO },
                })
            })
            .collect()
    }

    /// A hop may carry a router address or a DEX name; names go through the
    /// lookup. A name with no lookup entry is an error (converted to the
    /// fallback path by the caller).
    fn resolve_router(&self, hop: usize, router: &str) -> Result<String, QuoteError> {
        if parse_address(router).is_ok() {
            return Ok(router.to_string())
        }
        self.dex_lookup
            .as_ref()
            .and_then(|lookup| lookup(router))
            .ok_or_else(|| QuoteError::UnknownRouter { hop, name: router.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbx_flashloan::{FlashLoanTable, ProviderEntry};
    use arbx_primitives::{Address, OpportunityKind, ProfitEstimate, SwapStep};
    use parking_lot::Mutex;

    const ROUTER: &str = "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D";
    const WETH: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";
    const DAI: &str = "0x6B175474E89094C44Da98b954EedeAC495271d0F";

    #[derive(Debug)]
    struct FixedQuoter {
        result: Result<PathSimulation, QuoteError>,
        seen: Mutex<Vec<Vec<QuoteRequest>>>,
    }

    #[async_trait]
    impl BatchQuoter for FixedQuoter {
        async fn simulate_arbitrage_path(
            &self,
            requests: &[QuoteRequest],
            _input_amount: U256,
            _block_number: Option<u64>,
        ) -> Result<PathSimulation, QuoteError> {
            self.seen.lock().push(requests.to_vec());
            self.result.clone()
        }
    }

    #[derive(Debug)]
    struct FixedCalculator(U256);

    #[async_trait]
    impl ProfitCalculator for FixedCalculator {
        async fn expected_profit(&self, _opp: &Opportunity) -> Result<U256, QuoteError> {
            Ok(self.0)
        }
    }

    fn registry() -> Arc<ProviderRegistry> {
        let mut table = FlashLoanTable::new();
        table.insert(
            Chain::Ethereum,
            ProviderEntry {
                protocol: "aave_v3".to_string(),
                wrapper_address: Some(format!("{:?}", Address::repeat_byte(0xa1))),
                ..Default::default()
            },
        );
        Arc::new(ProviderRegistry::new(table))
    }

    fn opp(path: Vec<SwapStep>) -> Opportunity {
        Opportunity {
            id: "o".to_string(),
            kind: OpportunityKind::CrossDex,
            chain: Chain::Ethereum,
            dest_chain: None,
            token_in: WETH.to_string(),
            token_out: DAI.to_string(),
            amount_in: U256::from(1_000_000u64),
            expected_profit: ProfitEstimate { bps: 10, amount: U256::from(100u64), usd: 0.1 },
            confidence: 0.9,
            gas_estimate: U256::ZERO,
            discovered_at: 0,
            swap_path: path,
        }
    }

    fn two_hop() -> Vec<SwapStep> {
        vec![
            SwapStep {
                router: ROUTER.to_string(),
                token_in: WETH.to_string(),
                token_out: DAI.to_string(),
                min_out: U256::ZERO,
            },
            SwapStep {
                router: ROUTER.to_string(),
                token_in: DAI.to_string(),
                token_out: WETH.to_string(),
                min_out: U256::ZERO,
            },
        ]
    }

    fn manager(flag: bool, quoter: Arc<FixedQuoter>, fallback: U256) -> BatchQuoteManager {
        let mut quoters: HashMap<Chain, Arc<dyn BatchQuoter>> = HashMap::new();
        quoters.insert(Chain::Ethereum, quoter);
        BatchQuoteManager::new(
            flag,
            quoters,
            Arc::new(FixedCalculator(fallback)),
            registry(),
            None,
        )
    }

    #[tokio::test]
    async fn flag_off_uses_sequential() {
        let quoter = Arc::new(FixedQuoter {
            result: Ok(PathSimulation { all_success: true, expected_profit: U256::from(999u64) }),
            seen: Mutex::new(Vec::new()),
        });
        let manager = manager(false, Arc::clone(&quoter), U256::from(7u64));

        let quote = manager
            .calculate_expected_profit_with_batching(&opp(two_hop()), Chain::Ethereum, None)
            .await
            .unwrap();
        assert_eq!(quote.expected_profit, U256::from(7u64));
        assert!(quoter.seen.lock().is_empty());
        // aave fee: 1_000_000 * 9 / 10_000
        assert_eq!(quote.flash_loan_fee, U256::from(900u64));
    }

    #[tokio::test]
    async fn batched_success_returns_simulated_profit() {
        let quoter = Arc::new(FixedQuoter {
            result: Ok(PathSimulation { all_success: true, expected_profit: U256::from(999u64) }),
            seen: Mutex::new(Vec::new()),
        });
        let manager = manager(true, Arc::clone(&quoter), U256::from(7u64));

        let quote = manager
            .calculate_expected_profit_with_batching(&opp(two_hop()), Chain::Ethereum, Some(1))
            .await
            .unwrap();
        assert_eq!(quote.expected_profit, U256::from(999u64));

        // 2-hop form: amount on the buy hop only
        let seen = quoter.seen.lock();
        assert_eq!(seen[0].len(), 2);
        assert_eq!(seen[0][0].amount_in, U256::from(1_000_000u64));
        assert_eq!(seen[0][1].amount_in, U256::ZERO);
    }

    #[tokio::test]
    async fn partial_simulation_falls_back() {
        let quoter = Arc::new(FixedQuoter {
            result: Ok(PathSimulation { all_success: false, expected_profit: U256::ZERO }),
            seen: Mutex::new(Vec::new()),
        });
        let manager = manager(true, quoter, U256::from(7u64));
        let quote = manager
            .calculate_expected_profit_with_batching(&opp(two_hop()), Chain::Ethereum, None)
            .await
            .unwrap();
        assert_eq!(quote.expected_profit, U256::from(7u64));
    }

    #[tokio::test]
    async fn quoter_error_falls_back() {
        let quoter = Arc::new(FixedQuoter {
            result: Err(QuoteError::Backend("rpc down".to_string())),
            seen: Mutex::new(Vec::new()),
        });
        let manager = manager(true, quoter, U256::from(7u64));
        let quote = manager
            .calculate_expected_profit_with_batching(&opp(two_hop()), Chain::Ethereum, None)
            .await
            .unwrap();
        assert_eq!(quote.expected_profit, U256::from(7u64));
    }

    #[tokio::test]
    async fn named_router_without_lookup_falls_back() {
        let quoter = Arc::new(FixedQuoter {
            result: Ok(PathSimulation { all_success: true, expected_profit: U256::from(999u64) }),
            seen: Mutex::new(Vec::new()),
        });
        let mut path = two_hop();
        path.push(SwapStep {
            router: "quickswap".to_string(),
            token_in: WETH.to_string(),
            token_out: WETH.to_string(),
            min_out: U256::ZERO,
        });
        let manager = manager(true, Arc::clone(&quoter), U256::from(7u64));

        let quote = manager
            .calculate_expected_profit_with_batching(&opp(path), Chain::Ethereum, None)
            .await
            .unwrap();
        // request construction failed before the quoter was reached
        assert!(quoter.seen.lock().is_empty());
        assert_eq!(quote.expected_profit, U256::from(7u64));
    }

    #[tokio::test]
    async fn named_router_resolves_through_lookup() {
        let quoter = Arc::new(FixedQuoter {
            result: Ok(PathSimulation { all_success: true, expected_profit: U256::from(42u64) }),
            seen: Mutex::new(Vec::new()),
        });
        let mut quoters: HashMap<Chain, Arc<dyn BatchQuoter>> = HashMap::new();
        quoters.insert(Chain::Ethereum, Arc::clone(&quoter) as Arc<dyn BatchQuoter>);
        let lookup: DexLookup = Arc::new(|name| {
            (name == "quickswap").then(|| ROUTER.to_string())
        });
        let manager = BatchQuoteManager::new(
            true,
            quoters,
            Arc::new(FixedCalculator(U256::from(7u64))),
            registry(),
            Some(lookup),
        );

        let mut path = two_hop();
        path[0].router = "quickswap".to_string();
        // three hops so the n-hop form is used
        path.push(SwapStep {
            router: ROUTER.to_string(),
            token_in: WETH.to_string(),
            token_out: WETH.to_string(),
            min_out: U256::ZERO,
        });

        let quote = manager
            .calculate_expected_profit_with_batching(&opp(path), Chain::Ethereum, None)
            .await
            .unwrap();
        assert_eq!(quote.expected_profit, U256::from(42u64));
        let seen = quoter.seen.lock();
        assert_eq!(seen[0][0].router, ROUTER);
        assert_eq!(seen[0][2].amount_in, U256::ZERO);
    }
}
