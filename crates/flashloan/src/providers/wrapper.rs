//! Pool/vault protocols driven through the arbitrage wrapper contract.
//!
//! Aave V3, Balancer V2 and SyncSwap share the wrapper ABI; only the fee,
//! the chain allow-list and the gas fallback differ.

use crate::{
    abi::{swap_path_sol, IArbWrapper},
    error::{ProviderError, ValidationError},
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
use std::{collections::HashSet, sync::Arc};
use tracing::trace;

const AAVE_V3_CHAINS: &[Chain] = &[
    Chain::Ethereum,
    Chain::Arbitrum,
    Chain::Optimism,
    Chain::Base,
    Chain::Polygon,
    Chain::Avalanche,
];
const BALANCER_V2_CHAINS: &[Chain] =
    &[Chain::Ethereum, Chain::Arbitrum, Chain::Optimism, Chain::Base, Chain::Polygon];
const SYNCSWAP_CHAINS: &[Chain] = &[Chain::Zksync];

// Observed upper bounds for a 2-3 hop execution, used when live estimation
// is unavailable.
const AAVE_V3_GAS_FALLBACK: u64 = 650_000;
const BALANCER_V2_GAS_FALLBACK: u64 = 550_000;
const SYNCSWAP_GAS_FALLBACK: u64 = 700_000;

/// A wrapper-contract provider instance.
#[derive(Debug)]
pub struct WrapperProvider {
    protocol: FlashLoanProtocol,
    chain: Chain,
    wrapper: Address,
    fee_bps: u64,
    allowed_chains: &'static [Chain],
    gas_fallback: u64,
    status: SupportStatus,
    supports_multi_asset: bool,
    approved_original: Vec<String>,
    approved: HashSet<String>,
    clock: Arc<dyn Clock>,
}

impl WrapperProvider {
    fn new(
        protocol: FlashLoanProtocol,
        chain: Chain,
        wrapper: Address,
        fee_bps: u64,
        allowed_chains: &'static [Chain],
        gas_fallback: u64,
        status: SupportStatus,
        supports_multi_asset: bool,
        approved_routers: Vec<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let approved = normalize_routers(&approved_routers);
        Self {
            protocol,
            chain,
            wrapper,
            fee_bps,
            allowed_chains,
            gas_fallback,
            status,
            supports_multi_asset,
            approved_original: approved_routers,
            approved,
            clock,
        }
    }

    /// Aave V3 pool loans, 9 bps.
    pub fn aave_v3(
        chain: Chain,
        wrapper: Address,
        approved_routers: Vec<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(
            FlashLoanProtocol::AaveV3,
            chain,
            wrapper,
            FlashLoanProtocol::AaveV3.default_fee_bps(),
            AAVE_V3_CHAINS,
            AAVE_V3_GAS_FALLBACK,
            SupportStatus::FullySupported,
            false,
            approved_routers,
            clock,
        )
    }

    /// Balancer V2 vault loans, zero fee.
    pub fn balancer_v2(
        chain: Chain,
        wrapper: Address,
        approved_routers: Vec<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(
            FlashLoanProtocol::BalancerV2,
            chain,
            wrapper,
            FlashLoanProtocol::BalancerV2.default_fee_bps(),
            BALANCER_V2_CHAINS,
            BALANCER_V2_GAS_FALLBACK,
            SupportStatus::FullySupported,
            true,
            approved_routers,
            clock,
        )
    }

    /// SyncSwap vault loans on zkSync. Coverage depends on vault liquidity,
    /// so support is reported as partial.
    pub fn syncswap(
        chain: Chain,
        wrapper: Address,
        approved_routers: Vec<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(
            FlashLoanProtocol::Syncswap,
            chain,
            wrapper,
            FlashLoanProtocol::Syncswap.default_fee_bps(),
            SYNCSWAP_CHAINS,
            SYNCSWAP_GAS_FALLBACK,
            SupportStatus::PartialSupport,
            false,
            approved_routers,
            clock,
        )
    }

    fn encode(&self, req: &FlashLoanRequest) -> Result<Bytes, ProviderError> {
        let asset = parse_address(&req.asset)
            .map_err(|_| ValidationError::InvalidAsset(req.asset.clone()))?;
        let deadline = U256::from(self.clock.now_secs() + DEADLINE_SLACK_SECS);
        let call = IArbWrapper::executeArbitrage_0Call {
            asset,
            amount: req.amount,
            swapPath: swap_path_sol(&req.swap_path)?,
            minProfit: req.min_profit,
            deadline,
        };
        Ok(call.abi_encode().into())
    }
}

#[async_trait]
impl FlashLoanProvider for WrapperProvider {
    fn protocol(&self) -> FlashLoanProtocol {
        self.protocol
    }

    fn chain(&self) -> Chain {
        self.chain
    }

    fn is_available(&self) -> bool {
        self.wrapper != Address::ZERO && self.allowed_chains.contains(&self.chain)
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_multi_hop: true,
            supports_multi_asset: self.supports_multi_asset,
            max_loan_amount: None,
            supported_tokens: Vec::new(),
            status: if self.is_available() { self.status } else { SupportStatus::NotImplemented },
        }
    }

    fn calculate_fee(&self, amount: U256) -> FeeInfo {
        fee_info(self.protocol, amount, self.fee_bps)
    }

    fn approved_routers(&self) -> &[String] {
        &self.approved_original
    }

    fn validate(&self, req: &FlashLoanRequest) -> Result<(), ValidationError> {
        validate_request(
            &ValidationContext {
                chain: self.chain,
                approved_routers: &self.approved,
                empty_routers_fail_closed: false,
            },
            req,
        )
    }

    async fn build_calldata(
        &self,
        req: &FlashLoanRequest,
        _rpc: &dyn EthCall,
    ) -> Result<Bytes, ProviderError> {
        self.encode(req)
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
                return Ok(self.gas_fallback)
            }
        };
        match rpc.estimate_gas(&tx).await {
            Ok(gas) => Ok(gas),
            Err(err) => {
                trace!(target: "flashloan", %err, protocol = %self.protocol, "gas estimate fell back to constant");
                Ok(self.gas_fallback)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcCallError;
    use arbx_primitives::{ManualClock, SwapStep};

    const WETH: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";
    const DAI: &str = "0x6B175474E89094C44Da98b954EedeAC495271d0F";
    const ROUTER: &str = "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D";

    #[derive(Debug)]
    struct FailingRpc;

    #[async_trait]
    impl EthCall for FailingRpc {
        async fn call(&self, _to: Address, _data: Bytes) -> Result<Bytes, RpcCallError> {
            Err(RpcCallError("offline".to_string()))
        }

        async fn estimate_gas(&self, _tx: &FlashLoanTx) -> Result<u64, RpcCallError> {
            Err(RpcCallError("offline".to_string()))
        }
    }

    fn wrapper_address() -> Address {
        Address::repeat_byte(0xa1)
    }

    fn request() -> FlashLoanRequest {
        FlashLoanRequest {
            asset: WETH.to_string(),
            amount: U256::from(10u64).pow(U256::from(18u64)),
            chain: Chain::Ethereum,
            swap_path: vec![
                SwapStep {
                    router: ROUTER.to_string(),
                    token_in: WETH.to_string(),
                    token_out: DAI.to_string(),
                    min_out: U256::from(1u64),
                },
                SwapStep {
                    router: ROUTER.to_string(),
                    token_in: DAI.to_string(),
                    token_out: WETH.to_string(),
                    min_out: U256::from(1u64),
                },
            ],
            min_profit: U256::from(1u64),
            initiator: "0x0000000000000000000000000000000000000001".to_string(),
            pool_address: None,
        }
    }

    #[test]
    fn availability_requires_nonzero_wrapper_and_allowed_chain() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let available =
            WrapperProvider::aave_v3(Chain::Ethereum, wrapper_address(), vec![], clock.clone());
        assert!(available.is_available());

        let zero_wrapper =
            WrapperProvider::aave_v3(Chain::Ethereum, Address::ZERO, vec![], clock.clone());
        assert!(!zero_wrapper.is_available());

        // syncswap only runs on zksync
        let wrong_chain =
            WrapperProvider::syncswap(Chain::Ethereum, wrapper_address(), vec![], clock);
        assert!(!wrong_chain.is_available());
    }

    #[tokio::test]
    async fn calldata_embeds_clock_deadline() {
        let clock = ManualClock::new(1_700_000_000_000);
        let provider = WrapperProvider::aave_v3(
            Chain::Ethereum,
            wrapper_address(),
            vec![],
            Arc::new(clock.clone()),
        );
        let req = request();
        provider.validate(&req).unwrap();

        let a = provider.build_calldata(&req, &FailingRpc).await.unwrap();
        let b = provider.build_calldata(&req, &FailingRpc).await.unwrap();
        assert_eq!(a, b);

        // advancing past a second shifts the embedded deadline
        clock.advance_ms(1_000);
        let c = provider.build_calldata(&req, &FailingRpc).await.unwrap();
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn estimate_gas_falls_back_on_rpc_failure() {
        let provider = WrapperProvider::balancer_v2(
            Chain::Ethereum,
            wrapper_address(),
            vec![],
            Arc::new(ManualClock::new(0)),
        );
        let gas = provider
            .estimate_gas(&request(), Address::ZERO, &FailingRpc)
            .await
            .unwrap();
        assert_eq!(gas, BALANCER_V2_GAS_FALLBACK);
    }

    #[test]
    fn approved_routers_keep_original_case() {
        let provider = WrapperProvider::aave_v3(
            Chain::Ethereum,
            wrapper_address(),
            vec![ROUTER.to_string()],
            Arc::new(ManualClock::new(0)),
        );
        assert_eq!(provider.approved_routers(), &[ROUTER.to_string()]);

        // membership is case-insensitive
        let mut req = request();
        req.swap_path[0].router = ROUTER.to_lowercase();
        assert!(provider.validate(&req).is_ok());
    }
}
