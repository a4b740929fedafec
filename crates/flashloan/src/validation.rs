//! Shared request-validation pipeline.
//!
//! Checks run in a fixed order and the first failure wins, so a request with
//! several defects always reports the same code. Protocol-specific preludes
//! (DAI asset check, chain allow-lists) run before this pipeline in the
//! providers that have them.

use crate::error::ValidationError;
use arbx_primitives::{eq_address_ignore_case, parse_address, Chain, FlashLoanRequest};
use std::collections::HashSet;

/// Per-provider inputs to the shared pipeline.
#[derive(Debug)]
pub(crate) struct ValidationContext<'a> {
    /// Chain the provider serves.
    pub chain: Chain,
    /// Lowercased approved-router set. Empty means "open" unless
    /// `empty_routers_fail_closed` is set.
    pub approved_routers: &'a HashSet<String>,
    /// Treat an empty approved set as misconfiguration.
    pub empty_routers_fail_closed: bool,
}

/// Runs the shared checks in pipeline order.
pub(crate) fn validate_request(
    ctx: &ValidationContext<'_>,
    req: &FlashLoanRequest,
) -> Result<(), ValidationError> {
    // 1. chain
    if req.chain != ctx.chain {
        return Err(ValidationError::ChainMismatch { request: req.chain, provider: ctx.chain })
    }

    // 2. asset format
    if parse_address(&req.asset).is_err() {
        return Err(ValidationError::InvalidAsset(req.asset.clone()))
    }

    // 3. amount
    if req.amount.is_zero() {
        return Err(ValidationError::ZeroAmount)
    }

    // 4. path presence
    if req.swap_path.is_empty() {
        return Err(ValidationError::EmptyPath)
    }

    // 5a. router format, all steps
    for (index, step) in req.swap_path.iter().enumerate() {
        if parse_address(&step.router).is_err() {
            return Err(ValidationError::InvalidRouter { index, router: step.router.clone() })
        }
    }

    // 5b. router approval
    if ctx.approved_routers.is_empty() {
        if ctx.empty_routers_fail_closed {
            return Err(ValidationError::Config("approved router set is empty".to_string()))
        }
        // open set: any well-formed router is allowed
    } else {
        for (index, step) in req.swap_path.iter().enumerate() {
            if !ctx.approved_routers.contains(&step.router.trim().to_lowercase()) {
                return Err(ValidationError::UnapprovedRouter {
                    index,
                    router: step.router.clone(),
                })
            }
        }
    }

    // 6. cycle
    let first = &req.swap_path[0];
    let last = &req.swap_path[req.swap_path.len() - 1];
    if !eq_address_ignore_case(&first.token_in, &last.token_out) {
        return Err(ValidationError::InvalidCycle {
            first_in: first.token_in.clone(),
            last_out: last.token_out.clone(),
        })
    }

    // 7. asset matches the path input
    if !eq_address_ignore_case(&req.asset, &first.token_in) {
        return Err(ValidationError::AssetMismatch {
            asset: req.asset.clone(),
            first_in: first.token_in.clone(),
        })
    }

    Ok(())
}

/// Lowercases an approved-router list into the membership set.
pub(crate) fn normalize_routers(routers: &[String]) -> HashSet<String> {
    routers.iter().map(|router| router.trim().to_lowercase()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use arbx_primitives::SwapStep;

    const WETH: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";
    const DAI: &str = "0x6B175474E89094C44Da98b954EedeAC495271d0F";
    const ROUTER: &str = "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D";

    fn request() -> FlashLoanRequest {
        FlashLoanRequest {
            asset: WETH.to_string(),
            amount: U256::from(1_000u64),
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
                    token_out: WETH.to_lowercase(),
                    min_out: U256::from(1u64),
                },
            ],
            min_profit: U256::from(1u64),
            initiator: "0x0000000000000000000000000000000000000001".to_string(),
            pool_address: None,
        }
    }

    fn ctx(routers: &HashSet<String>) -> ValidationContext<'_> {
        ValidationContext {
            chain: Chain::Ethereum,
            approved_routers: routers,
            empty_routers_fail_closed: false,
        }
    }

    #[test]
    fn accepts_valid_request() {
        let routers = HashSet::new();
        assert!(validate_request(&ctx(&routers), &request()).is_ok());
    }

    #[test]
    fn first_error_wins() {
        // S3: wrong chain AND zero amount reports the chain mismatch
        let routers = HashSet::new();
        let mut req = request();
        req.chain = Chain::Polygon;
        req.amount = U256::ZERO;
        let err = validate_request(&ctx(&routers), &req).unwrap_err();
        assert_eq!(err.code(), "CHAIN_MISMATCH");
    }

    #[test]
    fn pipeline_order() {
        let routers = HashSet::new();
        let cases: Vec<(Box<dyn Fn(&mut FlashLoanRequest)>, &str)> = vec![
            (Box::new(|r| r.asset = "garbage".to_string()), "INVALID_ASSET"),
            (Box::new(|r| r.amount = U256::ZERO), "ZERO_AMOUNT"),
            (Box::new(|r| r.swap_path.clear()), "EMPTY_PATH"),
            (Box::new(|r| r.swap_path[1].router = "0x123".to_string()), "INVALID_ROUTER"),
            (Box::new(|r| r.swap_path[1].token_out = DAI.to_string()), "INVALID_CYCLE"),
            (
                Box::new(|r| {
                    r.asset = DAI.to_string();
                    r.swap_path[0].token_in = WETH.to_string();
                }),
                "ASSET_MISMATCH",
            ),
        ];
        for (mutate, code) in cases {
            let mut req = request();
            mutate(&mut req);
            let err = validate_request(&ctx(&routers), &req).unwrap_err();
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn router_format_checked_before_membership() {
        // step 0 unapproved but well-formed, step 1 malformed:
        // the format pass over all steps runs first
        let routers = normalize_routers(&["0x0000000000000000000000000000000000000009".to_string()]);
        let mut req = request();
        req.swap_path[1].router = "bogus".to_string();
        let err = validate_request(&ctx(&routers), &req).unwrap_err();
        assert_eq!(err.code(), "INVALID_ROUTER");
    }

    #[test]
    fn approved_set_is_case_insensitive() {
        let routers = normalize_routers(&[ROUTER.to_string()]);
        let mut req = request();
        req.swap_path[0].router = ROUTER.to_uppercase().replace("0X", "0x");
        // membership is checked on the lowercased router
        assert!(validate_request(&ctx(&routers), &req).is_ok());
    }

    #[test]
    fn unapproved_router_rejected() {
        let routers = normalize_routers(&["0x0000000000000000000000000000000000000009".to_string()]);
        let err = validate_request(&ctx(&routers), &request()).unwrap_err();
        assert_eq!(err.code(), "UNAPPROVED_ROUTER");
    }

    #[test]
    fn empty_set_fails_closed_when_configured() {
        let routers = HashSet::new();
        let ctx = ValidationContext {
            chain: Chain::Ethereum,
            approved_routers: &routers,
            empty_routers_fail_closed: true,
        };
        let err = validate_request(&ctx, &request()).unwrap_err();
        assert_eq!(err.code(), "CONFIG");
    }

    #[test]
    fn cycle_check_is_case_insensitive() {
        // request() already mixes cases on the closing token
        let routers = HashSet::new();
        assert!(validate_request(&ctx(&routers), &request()).is_ok());
    }
}
