//! Per-chain RPC plumbing.
//!
//! [`ProviderService`] owns one JSON-RPC client and one wallet per configured
//! chain, health-checks them on a fixed cadence, rebuilds clients after
//! repeated failures, and optionally multiplexes requests through a batching
//! provider. The service is the single mutator of its health map so the
//! cached healthy-count can never drift.

mod batch;
mod client;
mod config;
mod service;
mod wallet;

pub use batch::BatchProvider;
pub use client::{CallRequest, EthCallAdapter, EthRpcClient, HttpRpcClient, RpcError};
pub use config::{BatchConfig, ChainEndpoint, RpcConfig};
pub use service::{ProviderHealth, ProviderService, ReconnectCallback};
pub use wallet::{LocalWallet, NonceManager, Tx1559};
