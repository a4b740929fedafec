//! Placeholder provider for configured-but-unimplemented protocols.
//!
//! Fee math keeps working so upstream profitability estimation stays
//! meaningful; every execution path is refused.

use crate::{
    error::{ProviderError, ValidationError},
    fees::fee_info,
    provider::{EthCall, FlashLoanProvider, FlashLoanTx},
};
use alloy_primitives::{Address, Bytes, U256};
use arbx_primitives::{
    Chain, FeeInfo, FlashLoanProtocol, FlashLoanRequest, ProviderCapabilities, SupportStatus,
};
use async_trait::async_trait;

/// The catch-all provider for unknown protocol names.
#[derive(Debug)]
pub struct UnsupportedProvider {
    chain: Chain,
    /// The configured protocol name, kept for error messages.
    label: String,
    fee_bps: u64,
}

impl UnsupportedProvider {
    /// Creates a placeholder for `label` with an optional fee override.
    pub fn new(chain: Chain, label: impl Into<String>, fee_bps: Option<u64>) -> Self {
        Self { chain, label: label.into(), fee_bps: fee_bps.unwrap_or_default() }
    }
}

#[async_trait]
impl FlashLoanProvider for UnsupportedProvider {
    fn protocol(&self) -> FlashLoanProtocol {
        FlashLoanProtocol::Unsupported
    }

    fn chain(&self) -> Chain {
        self.chain
    }

    fn is_available(&self) -> bool {
        false
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_multi_hop: false,
            supports_multi_asset: false,
            max_loan_amount: None,
            supported_tokens: Vec::new(),
            status: SupportStatus::NotImplemented,
        }
    }

    fn calculate_fee(&self, amount: U256) -> FeeInfo {
        fee_info(FlashLoanProtocol::Unsupported, amount, self.fee_bps)
    }

    fn approved_routers(&self) -> &[String] {
        &[]
    }

    fn validate(&self, _req: &FlashLoanRequest) -> Result<(), ValidationError> {
        Err(ValidationError::UnsupportedProtocol(self.label.clone()))
    }

    async fn build_calldata(
        &self,
        _req: &FlashLoanRequest,
        _rpc: &dyn EthCall,
    ) -> Result<Bytes, ProviderError> {
        Err(ProviderError::NotImplemented(FlashLoanProtocol::Unsupported))
    }

    async fn build_transaction(
        &self,
        _req: &FlashLoanRequest,
        _from: Address,
        _rpc: &dyn EthCall,
    ) -> Result<FlashLoanTx, ProviderError> {
        Err(ProviderError::NotImplemented(FlashLoanProtocol::Unsupported))
    }

    async fn estimate_gas(
        &self,
        _req: &FlashLoanRequest,
        _from: Address,
        _rpc: &dyn EthCall,
    ) -> Result<u64, ProviderError> {
        Err(ProviderError::NotImplemented(FlashLoanProtocol::Unsupported))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_math_works_without_execution() {
        let provider = UnsupportedProvider::new(Chain::Polygon, "dodo_v2", Some(4));
        let fee = provider.calculate_fee(U256::from(10_000u64));
        assert_eq!(fee.fee_amount, U256::from(4u64));
        assert!(!provider.is_available());
    }

    #[test]
    fn validate_always_refuses() {
        let provider = UnsupportedProvider::new(Chain::Polygon, "dodo_v2", None);
        let req = FlashLoanRequest {
            asset: String::new(),
            amount: U256::ZERO,
            chain: Chain::Polygon,
            swap_path: vec![],
            min_profit: U256::ZERO,
            initiator: String::new(),
            pool_address: None,
        };
        assert_eq!(provider.validate(&req).unwrap_err().code(), "UNSUPPORTED_PROTOCOL");
    }
}
