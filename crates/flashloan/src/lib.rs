//! Flash-loan provider registry and calldata construction.
//!
//! Heterogeneous protocols (pool-based wrappers, EIP-3156 flash mints,
//! zero-fee vaults) sit behind one [`FlashLoanProvider`] interface. The
//! [`ProviderRegistry`] is the only legitimate constructor: it builds at most
//! one provider per chain from the static configuration table and caches it.
//!
//! Request validation runs a fixed pipeline (first failure wins) before any
//! on-chain interaction; fee math and calldata construction are pure and
//! never suspend.

mod abi;
mod config;
mod error;
mod fees;
mod provider;
mod providers;
mod registry;
mod validation;

pub use abi::{encode_inner_loan_data, SwapStepSol};
pub use config::{FlashLoanTable, ProviderEntry};
pub use error::{ProviderError, RpcCallError, ValidationError};
pub use fees::{flash_loan_fee, FEE_DENOMINATOR_BPS};
pub use provider::{EthCall, FlashLoanProvider, FlashLoanTx};
pub use providers::{
    DaiFlashMintProvider, MorphoProvider, PancakeswapV3Provider, UnsupportedProvider,
    WrapperProvider, DAI_ADDRESS,
};
pub use registry::ProviderRegistry;
