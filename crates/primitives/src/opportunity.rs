use crate::Chain;
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

/// The strategy family an opportunity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpportunityKind {
    /// Buy on one DEX, sell on another.
    CrossDex,
    /// Three-token cycle on a single chain.
    Triangular,
    /// Arbitrary-length path.
    NHop,
    /// Flash-loan funded execution.
    FlashLoan,
}

/// One hop of a swap path.
///
/// Addresses stay in wire format (strings) until validation; the upstream
/// feed makes no guarantee they are well formed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapStep {
    /// Router contract handling this hop.
    pub router: String,
    /// Input token of the hop.
    pub token_in: String,
    /// Output token of the hop.
    pub token_out: String,
    /// Minimum acceptable output, in the output token's smallest unit.
    pub min_out: U256,
}

/// Profit expectation attached to an opportunity by the upstream detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfitEstimate {
    /// Expected profit as basis points of the input amount.
    pub bps: u32,
    /// Expected absolute profit in the input token's smallest unit.
    pub amount: U256,
    /// Rough USD estimate, for operator dashboards only.
    pub usd: f64,
}

/// A candidate arbitrage trade emitted by the upstream detector.
///
/// Lives in the queue for milliseconds to seconds and is consumed exactly
/// once by one worker. The `id` is the single identity key used for
/// duplicate suppression: two opportunities sharing an id must never both
/// execute.
///
/// Field names follow the upstream wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    /// Stable id, unique within a short TTL.
    pub id: String,
    /// Strategy family.
    pub kind: OpportunityKind,
    /// Chain the trade executes on.
    pub chain: Chain,
    /// Destination chain for bridged strategies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_chain: Option<Chain>,
    /// Input token (wire format).
    pub token_in: String,
    /// Output token (wire format).
    pub token_out: String,
    /// Input amount in the input token's smallest unit.
    pub amount_in: U256,
    /// Detector profit expectation.
    pub expected_profit: ProfitEstimate,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f64,
    /// Estimated total gas cost in wei.
    pub gas_estimate: U256,
    /// Wall-clock discovery time, unix milliseconds.
    pub discovered_at: u64,
    /// Ordered swap path.
    pub swap_path: Vec<SwapStep>,
}

impl Opportunity {
    /// Age of the opportunity relative to `now_ms`, saturating at zero.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.discovered_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opportunity_wire_field_names() {
        let opp = Opportunity {
            id: "opp-1".to_string(),
            kind: OpportunityKind::CrossDex,
            chain: Chain::Arbitrum,
            dest_chain: None,
            token_in: "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2".to_string(),
            token_out: "0xdac17f958d2ee523a2206206994597c13d831ec7".to_string(),
            amount_in: U256::from(1_000u64),
            expected_profit: ProfitEstimate { bps: 12, amount: U256::from(3u64), usd: 1.2 },
            confidence: 0.9,
            gas_estimate: U256::from(200_000u64),
            discovered_at: 1_700_000_000_000,
            swap_path: vec![],
        };

        let json = serde_json::to_value(&opp).unwrap();
        assert_eq!(json["kind"], "cross-dex");
        assert!(json.get("tokenIn").is_some());
        assert!(json.get("amountIn").is_some());
        assert!(json.get("discoveredAt").is_some());
        // absent dest chain is omitted entirely
        assert!(json.get("destChain").is_none());
    }

    #[test]
    fn swap_step_roundtrip() {
        let step = SwapStep {
            router: "0x7a250d5630b4cf539739df2c5dacb4c659f2488d".to_string(),
            token_in: "0xa".to_string(),
            token_out: "0xb".to_string(),
            min_out: U256::from(5u64),
        };
        let json = serde_json::to_string(&step).unwrap();
        assert_eq!(serde_json::from_str::<SwapStep>(&json).unwrap(), step);
    }

    #[test]
    fn age_saturates() {
        let opp = Opportunity {
            id: "x".into(),
            kind: OpportunityKind::NHop,
            chain: Chain::Ethereum,
            dest_chain: None,
            token_in: String::new(),
            token_out: String::new(),
            amount_in: U256::ZERO,
            expected_profit: ProfitEstimate { bps: 0, amount: U256::ZERO, usd: 0.0 },
            confidence: 0.0,
            gas_estimate: U256::ZERO,
            discovered_at: 10,
            swap_path: vec![],
        };
        assert_eq!(opp.age_ms(5), 0);
        assert_eq!(opp.age_ms(25), 15);
    }
}
