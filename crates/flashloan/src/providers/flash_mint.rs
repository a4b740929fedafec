//! EIP-3156-style providers: MakerDAO's DssFlash and Morpho Blue.
//!
//! Both are called on the pool contract directly; the arbitrage path rides in
//! the opaque `data` argument using the shared inner encoding.

use crate::{
    abi::{encode_inner_loan_data, IDssFlash, IMorphoBlue},
    error::{ProviderError, ValidationError},
    fees::fee_info,
    provider::{EthCall, FlashLoanProvider, FlashLoanTx, DEADLINE_SLACK_SECS},
    validation::{normalize_routers, validate_request, ValidationContext},
};
use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use arbx_primitives::{
    eq_address_ignore_case, Chain, Clock, FeeInfo, FlashLoanProtocol, FlashLoanRequest,
    ProviderCapabilities, SupportStatus,
};
use async_trait::async_trait;
use std::{collections::HashSet, sync::Arc};
use tracing::trace;

/// DAI on Ethereum mainnet; the only asset DssFlash mints.
pub const DAI_ADDRESS: &str = "0x6B175474E89094C44Da98b954EedeAC495271d0F";

const MORPHO_CHAINS: &[Chain] = &[Chain::Ethereum, Chain::Base];

const DAI_GAS_FALLBACK: u64 = 500_000;
const MORPHO_GAS_FALLBACK: u64 = 450_000;

/// MakerDAO DssFlash flash mint, 1 bps, DAI on Ethereum only.
#[derive(Debug)]
pub struct DaiFlashMintProvider {
    chain: Chain,
    /// DssFlash module the transaction targets.
    pool: Address,
    /// Borrower contract passed as the EIP-3156 receiver.
    receiver: Address,
    approved_original: Vec<String>,
    approved: HashSet<String>,
    clock: Arc<dyn Clock>,
}

impl DaiFlashMintProvider {
    /// Creates the provider.
    pub fn new(
        chain: Chain,
        pool: Address,
        receiver: Address,
        approved_routers: Vec<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let approved = normalize_routers(&approved_routers);
        Self { chain, pool, receiver, approved_original: approved_routers, approved, clock }
    }
}

#[async_trait]
impl FlashLoanProvider for DaiFlashMintProvider {
    fn protocol(&self) -> FlashLoanProtocol {
        FlashLoanProtocol::DaiFlashMint
    }

    fn chain(&self) -> Chain {
        self.chain
    }

    fn is_available(&self) -> bool {
        self.pool != Address::ZERO
            && self.receiver != Address::ZERO
            && self.chain == Chain::Ethereum
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_multi_hop: true,
            supports_multi_asset: false,
            max_loan_amount: None,
            supported_tokens: vec![DAI_ADDRESS.to_string()],
            status: if self.is_available() {
                SupportStatus::FullySupported
            } else {
                SupportStatus::NotImplemented
            },
        }
    }

    fn calculate_fee(&self, amount: U256) -> FeeInfo {
        fee_info(
            FlashLoanProtocol::DaiFlashMint,
            amount,
            FlashLoanProtocol::DaiFlashMint.default_fee_bps(),
        )
    }

    fn approved_routers(&self) -> &[String] {
        &self.approved_original
    }

    fn validate(&self, req: &FlashLoanRequest) -> Result<(), ValidationError> {
        // protocol prelude before the shared pipeline
        if !eq_address_ignore_case(&req.asset, DAI_ADDRESS) {
            return Err(ValidationError::AssetNotDai(req.asset.clone()))
        }
        if req.chain != Chain::Ethereum {
            return Err(ValidationError::ChainNotSupported {
                protocol: FlashLoanProtocol::DaiFlashMint,
                chain: req.chain,
            })
        }
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
        let deadline = U256::from(self.clock.now_secs() + DEADLINE_SLACK_SECS);
        let data = encode_inner_loan_data(&req.swap_path, req.min_profit, deadline)?;
        let call = IDssFlash::flashLoan_0Call {
            receiver: self.receiver,
            token: arbx_primitives::parse_address(DAI_ADDRESS)
                .map_err(|_| ValidationError::InvalidAsset(DAI_ADDRESS.to_string()))?,
            amount: req.amount,
            data: data.to_vec(),
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
        Ok(FlashLoanTx { to: self.pool, from, data })
    }

    async fn estimate_gas(
        &self,
        req: &FlashLoanRequest,
        from: Address,
        rpc: &dyn EthCall,
    ) -> Result<u64, ProviderError> {
        estimate_or_fallback(self, req, from, rpc, DAI_GAS_FALLBACK).await
    }
}

/// Morpho Blue flash loans, zero fee, Ethereum and Base.
#[derive(Debug)]
pub struct MorphoProvider {
    chain: Chain,
    /// Morpho Blue singleton the transaction targets.
    pool: Address,
    approved_original: Vec<String>,
    approved: HashSet<String>,
    clock: Arc<dyn Clock>,
}

impl MorphoProvider {
    /// Creates the provider.
    pub fn new(
        chain: Chain,
        pool: Address,
        approved_routers: Vec<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let approved = normalize_routers(&approved_routers);
        Self { chain, pool, approved_original: approved_routers, approved, clock }
    }
}

#[async_trait]
impl FlashLoanProvider for MorphoProvider {
    fn protocol(&self) -> FlashLoanProtocol {
        FlashLoanProtocol::Morpho
    }

    fn chain(&self) -> Chain {
        self.chain
    }

    fn is_available(&self) -> bool {
        self.pool != Address::ZERO && MORPHO_CHAINS.contains(&self.chain)
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

    fn calculate_fee(&self, amount: U256) -> FeeInfo {
        fee_info(FlashLoanProtocol::Morpho, amount, FlashLoanProtocol::Morpho.default_fee_bps())
    }

    fn approved_routers(&self) -> &[String] {
        &self.approved_original
    }

    fn validate(&self, req: &FlashLoanRequest) -> Result<(), ValidationError> {
        if !MORPHO_CHAINS.contains(&req.chain) {
            return Err(ValidationError::ChainNotSupported {
                protocol: FlashLoanProtocol::Morpho,
                chain: req.chain,
            })
        }
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
        let token = arbx_primitives::parse_address(&req.asset)
            .map_err(|_| ValidationError::InvalidAsset(req.asset.clone()))?;
        let deadline = U256::from(self.clock.now_secs() + DEADLINE_SLACK_SECS);
        let data = encode_inner_loan_data(&req.swap_path, req.min_profit, deadline)?;
        let call = IMorphoBlue::flashLoan_1Call { token, assets: req.amount, data: data.to_vec() };
        Ok(call.abi_encode().into())
    }

    async fn build_transaction(
        &self,
        req: &FlashLoanRequest,
        from: Address,
        rpc: &dyn EthCall,
    ) -> Result<FlashLoanTx, ProviderError> {
        let data = self.build_calldata(req, rpc).await?;
        Ok(FlashLoanTx { to: self.pool, from, data })
    }

    async fn estimate_gas(
        &self,
        req: &FlashLoanRequest,
        from: Address,
        rpc: &dyn EthCall,
    ) -> Result<u64, ProviderError> {
        estimate_or_fallback(self, req, from, rpc, MORPHO_GAS_FALLBACK).await
    }
}

async fn estimate_or_fallback<P: FlashLoanProvider + ?Sized>(
    provider: &P,
    req: &FlashLoanRequest,
    from: Address,
    rpc: &dyn EthCall,
    fallback: u64,
) -> Result<u64, ProviderError> {
    let tx = match provider.build_transaction(req, from, rpc).await {
        Ok(tx) => tx,
        Err(err) => {
            trace!(target: "flashloan", %err, "gas estimate fell back to constant");
            return Ok(fallback)
        }
    };
    match rpc.estimate_gas(&tx).await {
        Ok(gas) => Ok(gas),
        Err(err) => {
            trace!(target: "flashloan", %err, protocol = %provider.protocol(), "gas estimate fell back to constant");
            Ok(fallback)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcCallError;
    use arbx_primitives::{ManualClock, SwapStep};

    const WETH: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";
    const ROUTER: &str = "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D";

    #[derive(Debug)]
    struct OfflineRpc;

    #[async_trait]
    impl EthCall for OfflineRpc {
        async fn call(&self, _to: Address, _data: Bytes) -> Result<Bytes, RpcCallError> {
            Err(RpcCallError("offline".into()))
        }
        async fn estimate_gas(&self, _tx: &FlashLoanTx) -> Result<u64, RpcCallError> {
            Err(RpcCallError("offline".into()))
        }
    }

    fn dai_request() -> FlashLoanRequest {
        FlashLoanRequest {
            asset: DAI_ADDRESS.to_lowercase(),
            amount: U256::from(10_000u64),
            chain: Chain::Ethereum,
            swap_path: vec![
                SwapStep {
                    router: ROUTER.to_string(),
                    token_in: DAI_ADDRESS.to_string(),
                    token_out: WETH.to_string(),
                    min_out: U256::from(1u64),
                },
                SwapStep {
                    router: ROUTER.to_string(),
                    token_in: WETH.to_string(),
                    token_out: DAI_ADDRESS.to_string(),
                    min_out: U256::from(1u64),
                },
            ],
            min_profit: U256::from(1u64),
            initiator: "0x0000000000000000000000000000000000000001".to_string(),
            pool_address: None,
        }
    }

    fn dai_provider() -> DaiFlashMintProvider {
        DaiFlashMintProvider::new(
            Chain::Ethereum,
            Address::repeat_byte(0xdd),
            Address::repeat_byte(0xa1),
            vec![],
            Arc::new(ManualClock::new(0)),
        )
    }

    #[test]
    fn dai_prelude_runs_before_shared_pipeline() {
        let provider = dai_provider();

        // wrong asset reports ASSET_NOT_DAI even though the amount is zero too
        let mut req = dai_request();
        req.asset = WETH.to_string();
        req.amount = U256::ZERO;
        assert_eq!(provider.validate(&req).unwrap_err().code(), "ASSET_NOT_DAI");

        // wrong chain reports CHAIN_NOT_SUPPORTED, not CHAIN_MISMATCH
        let mut req = dai_request();
        req.chain = Chain::Polygon;
        assert_eq!(provider.validate(&req).unwrap_err().code(), "CHAIN_NOT_SUPPORTED");

        assert!(provider.validate(&dai_request()).is_ok());
    }

    #[tokio::test]
    async fn dai_transaction_targets_the_flash_module() {
        let provider = dai_provider();
        let tx = provider
            .build_transaction(&dai_request(), Address::repeat_byte(0x01), &OfflineRpc)
            .await
            .unwrap();
        assert_eq!(tx.to, Address::repeat_byte(0xdd));
        assert_eq!(&tx.data[..4], IDssFlash::flashLoan_0Call::SELECTOR);
    }

    #[test]
    fn morpho_chain_allow_list() {
        let provider = MorphoProvider::new(
            Chain::Base,
            Address::repeat_byte(0x10),
            vec![],
            Arc::new(ManualClock::new(0)),
        );
        let mut req = dai_request();
        req.chain = Chain::Arbitrum;
        assert_eq!(provider.validate(&req).unwrap_err().code(), "CHAIN_NOT_SUPPORTED");
    }

    #[tokio::test]
    async fn morpho_estimate_falls_back() {
        let provider = MorphoProvider::new(
            Chain::Ethereum,
            Address::repeat_byte(0x10),
            vec![],
            Arc::new(ManualClock::new(0)),
        );
        let gas =
            provider.estimate_gas(&dai_request(), Address::ZERO, &OfflineRpc).await.unwrap();
        assert_eq!(gas, MORPHO_GAS_FALLBACK);
    }
}
