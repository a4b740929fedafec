//! Per-protocol provider implementations.

mod flash_mint;
mod pancake;
mod unsupported;
mod wrapper;

pub use flash_mint::{DaiFlashMintProvider, MorphoProvider, DAI_ADDRESS};
pub use pancake::PancakeswapV3Provider;
pub use unsupported::UnsupportedProvider;
pub use wrapper::WrapperProvider;
