//! ABI definitions for the wrapper contracts and flash-loan entry points.

use crate::error::ValidationError;
use alloy_primitives::{Bytes, U256};
use alloy_sol_types::{sol, SolValue};
use arbx_primitives::{parse_address, SwapStep};

sol! {
    /// One hop of the arbitrage path, as the on-chain executors consume it.
    #[derive(Debug, PartialEq, Eq)]
    struct SwapStepSol {
        address router;
        address tokenIn;
        address tokenOut;
        uint256 minOut;
    }

    /// Wrapper contract shared by the pool/vault protocols.
    interface IArbWrapper {
        function executeArbitrage(
            address asset,
            uint256 amount,
            SwapStepSol[] calldata swapPath,
            uint256 minProfit,
            uint256 deadline
        ) external;
    }

    /// PancakeSwap V3 wrapper; the flash pool is selected at runtime.
    interface IPancakeArbWrapper {
        function executeArbitrage(
            address pool,
            address asset,
            uint256 amount,
            SwapStepSol[] calldata swapPath,
            uint256 minProfit,
            uint256 deadline
        ) external;
    }

    /// MakerDAO DssFlash, EIP-3156.
    interface IDssFlash {
        function flashLoan(
            address receiver,
            address token,
            uint256 amount,
            bytes calldata data
        ) external returns (bool);
    }

    /// Morpho Blue flash loans.
    interface IMorphoBlue {
        function flashLoan(address token, uint256 assets, bytes calldata data) external;
    }

    /// PancakeSwap V3 factory, for pool discovery.
    interface IPancakeV3Factory {
        function getPool(
            address tokenA,
            address tokenB,
            uint24 fee
        ) external view returns (address pool);
    }
}

/// Converts a validated wire-format path into its ABI form.
///
/// Callers run `validate` first; a parse failure here means they did not.
pub(crate) fn swap_path_sol(path: &[SwapStep]) -> Result<Vec<SwapStepSol>, ValidationError> {
    path.iter()
        .enumerate()
        .map(|(index, step)| {
            Ok(SwapStepSol {
                router: parse_address(&step.router).map_err(|_| {
                    ValidationError::InvalidRouter { index, router: step.router.clone() }
                })?,
                tokenIn: parse_address(&step.token_in)
                    .map_err(|_| ValidationError::InvalidAsset(step.token_in.clone()))?,
                tokenOut: parse_address(&step.token_out)
                    .map_err(|_| ValidationError::InvalidAsset(step.token_out.clone()))?,
                minOut: step.min_out,
            })
        })
        .collect()
}

/// Inner data blob carried through EIP-3156-style `flashLoan` calls:
/// `(tuple(address,address,address,uint256)[], uint256, uint256)`.
pub fn encode_inner_loan_data(
    path: &[SwapStep],
    min_profit: U256,
    deadline: U256,
) -> Result<Bytes, ValidationError> {
    let steps = swap_path_sol(path)?;
    Ok((steps, min_profit, deadline).abi_encode_params().into())
}
