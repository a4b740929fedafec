use crate::{Chain, SwapStep};
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The flash-loan protocols the engine knows how to drive.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FlashLoanProtocol {
    /// Aave V3 pool-based loan through the wrapper contract.
    AaveV3,
    /// Balancer V2 vault loan, zero fee.
    BalancerV2,
    /// SyncSwap vault loan, zkSync only.
    Syncswap,
    /// PancakeSwap V3 pool flash, fee follows the pool's fee tier.
    PancakeswapV3,
    /// MakerDAO DssFlash EIP-3156 flash mint, DAI only.
    DaiFlashMint,
    /// Morpho Blue zero-fee flash loan.
    Morpho,
    /// Catch-all for protocols configured but not implemented; fee math
    /// works, execution does not.
    Unsupported,
}

impl FlashLoanProtocol {
    /// Default protocol fee in basis points.
    ///
    /// PancakeSwap's fee follows the selected pool's fee tier and is resolved
    /// per request; the value here is the 0.25% tier the pool discovery
    /// prefers.
    pub const fn default_fee_bps(&self) -> u64 {
        match self {
            FlashLoanProtocol::AaveV3 => 9,
            FlashLoanProtocol::BalancerV2 => 0,
            FlashLoanProtocol::Syncswap => 30,
            FlashLoanProtocol::PancakeswapV3 => 25,
            FlashLoanProtocol::DaiFlashMint => 1,
            FlashLoanProtocol::Morpho => 0,
            FlashLoanProtocol::Unsupported => 0,
        }
    }
}

/// A validated-input request for one flash-loan execution, derived from an
/// [`Opportunity`](crate::Opportunity).
///
/// Invariant: passed through a provider's `validate` before any on-chain
/// interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashLoanRequest {
    /// Borrowed asset (wire format address).
    pub asset: String,
    /// Borrow amount in the asset's smallest unit.
    pub amount: U256,
    /// Chain the loan executes on.
    pub chain: Chain,
    /// The arbitrage path run inside the loan. At least one step; the last
    /// step's output token must equal the first step's input token.
    pub swap_path: Vec<SwapStep>,
    /// Minimum profit for the wrapper contract to accept the execution.
    pub min_profit: U256,
    /// Address initiating the loan (the wallet).
    pub initiator: String,
    /// Pool override for protocols that select pools at runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_address: Option<String>,
}

/// Fee quote for a flash loan of a given size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeInfo {
    /// Fee in basis points.
    pub fee_bps: u64,
    /// Absolute fee in the asset's smallest unit, floor-rounded.
    pub fee_amount: U256,
    /// Protocol the quote came from.
    pub protocol: FlashLoanProtocol,
}

/// How completely a provider supports its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportStatus {
    /// All operations implemented and configured.
    FullySupported,
    /// Usable with caveats (e.g. restricted token set).
    PartialSupport,
    /// Placeholder only; execution paths are unimplemented.
    NotImplemented,
}

/// Static capabilities a provider reports for planning and dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCapabilities {
    /// Whether paths with more than one hop are supported.
    pub supports_multi_hop: bool,
    /// Whether more than one asset can be borrowed at once.
    pub supports_multi_asset: bool,
    /// Upper bound on the loan size, if the protocol has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_loan_amount: Option<U256>,
    /// Tokens the provider will lend, empty meaning "any".
    pub supported_tokens: Vec<String>,
    /// Overall support level.
    pub status: SupportStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn protocol_names_are_snake_case() {
        assert_eq!(FlashLoanProtocol::AaveV3.to_string(), "aave_v3");
        assert_eq!(FlashLoanProtocol::PancakeswapV3.to_string(), "pancakeswap_v3");
        assert_eq!(
            FlashLoanProtocol::from_str("dai_flash_mint").unwrap(),
            FlashLoanProtocol::DaiFlashMint
        );
    }

    #[test]
    fn default_fees_match_catalog() {
        assert_eq!(FlashLoanProtocol::AaveV3.default_fee_bps(), 9);
        assert_eq!(FlashLoanProtocol::BalancerV2.default_fee_bps(), 0);
        assert_eq!(FlashLoanProtocol::Syncswap.default_fee_bps(), 30);
        assert_eq!(FlashLoanProtocol::DaiFlashMint.default_fee_bps(), 1);
        assert_eq!(FlashLoanProtocol::Morpho.default_fee_bps(), 0);
    }
}
