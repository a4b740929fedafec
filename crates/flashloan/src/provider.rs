use crate::error::{ProviderError, RpcCallError, ValidationError};
use alloy_primitives::{Address, Bytes, U256};
use arbx_primitives::{Chain, FeeInfo, FlashLoanProtocol, FlashLoanRequest, ProviderCapabilities};
use async_trait::async_trait;
use std::fmt;

/// An unsigned transaction ready for the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashLoanTx {
    /// Wrapper contract or pool/vault, per protocol.
    pub to: Address,
    /// The executing wallet.
    pub from: Address,
    /// ABI-encoded calldata.
    pub data: Bytes,
}

/// Minimal RPC surface providers need: `eth_call` for pool discovery and
/// `eth_estimateGas` for live estimation.
///
/// Implemented by the RPC provider service; test doubles stub it.
#[async_trait]
pub trait EthCall: Send + Sync {
    /// Executes a read-only contract call, returning the raw return data.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcCallError>;

    /// Estimates gas for the given transaction.
    async fn estimate_gas(&self, tx: &FlashLoanTx) -> Result<u64, RpcCallError>;
}

/// One flash-loan protocol on one chain.
///
/// Constructed only by the [`ProviderRegistry`](crate::ProviderRegistry).
/// `validate` must pass before `build_calldata` / `build_transaction` are
/// called; the builders re-parse addresses and surface violations as errors
/// rather than panicking.
#[async_trait]
pub trait FlashLoanProvider: Send + Sync + fmt::Debug {
    /// The protocol this provider drives.
    fn protocol(&self) -> FlashLoanProtocol;

    /// The chain this provider serves.
    fn chain(&self) -> Chain;

    /// True iff the configured contract address is nonzero and the chain is
    /// in the protocol's allow-list.
    fn is_available(&self) -> bool;

    /// Static capability report.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Fee quote for a loan of `amount`. Works even on providers that cannot
    /// execute (used by upstream profitability estimation).
    fn calculate_fee(&self, amount: U256) -> FeeInfo;

    /// The configured approved-router list, original casing.
    fn approved_routers(&self) -> &[String];

    /// Runs the protocol prelude plus the shared validation pipeline.
    fn validate(&self, req: &FlashLoanRequest) -> Result<(), ValidationError>;

    /// Builds the protocol calldata. Deterministic for identical inputs up
    /// to the embedded deadline.
    async fn build_calldata(
        &self,
        req: &FlashLoanRequest,
        rpc: &dyn EthCall,
    ) -> Result<Bytes, ProviderError>;

    /// Builds the full unsigned transaction.
    async fn build_transaction(
        &self,
        req: &FlashLoanRequest,
        from: Address,
        rpc: &dyn EthCall,
    ) -> Result<FlashLoanTx, ProviderError>;

    /// Attempts live gas estimation, falling back to the protocol's
    /// documented constant on any error. Only the `unsupported` placeholder
    /// returns an error here.
    async fn estimate_gas(
        &self,
        req: &FlashLoanRequest,
        from: Address,
        rpc: &dyn EthCall,
    ) -> Result<u64, ProviderError>;
}

/// Seconds added to the clock when stamping calldata deadlines.
pub(crate) const DEADLINE_SLACK_SECS: u64 = 300;
