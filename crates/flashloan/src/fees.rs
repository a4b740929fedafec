//! Flash-loan fee math.

use alloy_primitives::{U256, U512};
use arbx_primitives::{FeeInfo, FlashLoanProtocol};

/// Fee denominator: fees are expressed in basis points.
pub const FEE_DENOMINATOR_BPS: u64 = 10_000;

/// Computes `amount * fee_bps / 10_000`, truncating toward zero.
///
/// The intermediate product is widened so the computation cannot overflow;
/// for any `fee_bps <= 10_000` the fee never exceeds `amount`.
pub fn flash_loan_fee(amount: U256, fee_bps: u64) -> U256 {
    let product = U512::from(amount) * U512::from(fee_bps);
    (product / U512::from(FEE_DENOMINATOR_BPS)).saturating_to::<U256>()
}

/// Builds a [`FeeInfo`] quote.
pub(crate) fn fee_info(protocol: FlashLoanProtocol, amount: U256, fee_bps: u64) -> FeeInfo {
    FeeInfo { fee_bps, fee_amount: flash_loan_fee(amount, fee_bps), protocol }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn catalog_fees() {
        // S2: 1 ETH at 9 bps (aave_v3)
        let one_eth = U256::from(10u64).pow(U256::from(18u64));
        assert_eq!(flash_loan_fee(one_eth, 9), U256::from(900_000_000_000_000u64));

        // balancer_v2 is free
        assert_eq!(flash_loan_fee(one_eth, 0), U256::ZERO);

        // dai flash mint: 10_000 DAI at 1 bps is exactly 1 DAI
        let ten_thousand_dai = U256::from(10_000u64) * one_eth;
        assert_eq!(flash_loan_fee(ten_thousand_dai, 1), one_eth);
    }

    #[test]
    fn truncates_toward_zero() {
        // 999 * 9 / 10_000 = 0.8991 -> 0
        assert_eq!(flash_loan_fee(U256::from(999u64), 9), U256::ZERO);
        assert_eq!(flash_loan_fee(U256::from(1112u64), 9), U256::from(1u64));
    }

    #[test]
    fn max_amount_does_not_overflow() {
        assert_eq!(flash_loan_fee(U256::MAX, FEE_DENOMINATOR_BPS), U256::MAX);
        assert!(flash_loan_fee(U256::MAX, 9999) < U256::MAX);
    }

    proptest! {
        /// Property: fee never exceeds the amount; equality only at 10_000 bps.
        #[test]
        fn fee_bounded_by_amount(amount_words in any::<[u64; 4]>(), fee_bps in 0u64..=FEE_DENOMINATOR_BPS) {
            let amount = U256::from_limbs(amount_words);
            let fee = flash_loan_fee(amount, fee_bps);
            prop_assert!(fee <= amount);
            if fee == amount && amount > U256::ZERO {
                prop_assert_eq!(fee_bps, FEE_DENOMINATOR_BPS);
            }
        }
    }
}
