use arbx_primitives::Chain;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-chain provider configuration, one entry per chain.
pub type FlashLoanTable = BTreeMap<Chain, ProviderEntry>;

/// Static configuration for one chain's flash-loan provider.
///
/// `protocol` is free-form on purpose: a protocol name the registry does not
/// recognize produces the `unsupported` placeholder provider instead of a
/// config error, so fee estimation keeps working while execution is blocked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderEntry {
    /// Protocol name, e.g. `aave_v3`.
    pub protocol: String,
    /// Wrapper contract executing the arbitrage. Doubles as the EIP-3156
    /// receiver for flash-mint protocols.
    pub wrapper_address: Option<String>,
    /// Pool or vault entry point for protocols called directly.
    pub pool_address: Option<String>,
    /// Factory for protocols that discover pools at runtime.
    pub factory_address: Option<String>,
    /// Fee override in basis points; used by the `unsupported` placeholder.
    pub fee_bps: Option<u64>,
    /// Preferred fee tier, in hundredths of a bip (PancakeSwap).
    pub fee_tier: Option<u32>,
    /// Routers the wrapper may be pointed at. Empty means "open" for every
    /// protocol except pancakeswap_v3, which fails closed.
    pub approved_routers: Vec<String>,
}
