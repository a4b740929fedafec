use alloy_primitives::{Address, Bytes, B256, U256};
use arbx_flashloan::{EthCall, FlashLoanTx, RpcCallError};
use async_trait::async_trait;
use jsonrpsee::{
    core::client::ClientT,
    http_client::{HttpClient, HttpClientBuilder},
    rpc_params,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Errors from the JSON-RPC transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    /// The endpoint could not be reached or rejected the request.
    #[error("rpc transport: {0}")]
    Transport(String),
    /// The endpoint answered with something unparseable.
    #[error("rpc response: {0}")]
    Response(String),
    /// No client exists for the requested chain.
    #[error("no provider configured for chain {0}")]
    UnknownChain(String),
}

/// The call/estimate shape shared by `eth_call` and `eth_estimateGas`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    /// Sender, when relevant to the estimate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    /// Callee contract.
    pub to: Address,
    /// Calldata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
    /// Value attached to the call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
}

/// The RPC surface the engine needs per chain.
#[async_trait]
pub trait EthRpcClient: Send + Sync + std::fmt::Debug {
    /// `eth_blockNumber`.
    async fn block_number(&self) -> Result<u64, RpcError>;

    /// `eth_gasPrice`.
    async fn gas_price(&self) -> Result<U256, RpcError>;

    /// `eth_call` at the latest block.
    async fn call(&self, req: CallRequest) -> Result<Bytes, RpcError>;

    /// `eth_estimateGas`.
    async fn estimate_gas(&self, req: CallRequest) -> Result<u64, RpcError>;

    /// `eth_getTransactionCount` for the pending block.
    async fn transaction_count(&self, address: Address) -> Result<u64, RpcError>;

    /// `eth_sendRawTransaction`.
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, RpcError>;
}

/// HTTP JSON-RPC client backed by `jsonrpsee`.
#[derive(Debug)]
pub struct HttpRpcClient {
    url: String,
    client: HttpClient,
}

impl HttpRpcClient {
    /// Connects to the endpoint. Fails only on a malformed URL; the endpoint
    /// is not probed here.
    pub fn new(url: impl Into<String>) -> Result<Self, RpcError> {
        let url = url.into();
        let client = HttpClientBuilder::default()
            .build(&url)
            .map_err(|err| RpcError::Transport(err.to_string()))?;
        Ok(Self { url, client })
    }

    /// The endpoint URL this client talks to.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn inner(&self) -> &HttpClient {
        &self.client
    }

    fn quantity(raw: U256, what: &str) -> Result<u64, RpcError> {
        raw.try_into().map_err(|_| RpcError::Response(format!("{what} out of u64 range: {raw}")))
    }
}

#[async_trait]
impl EthRpcClient for HttpRpcClient {
    async fn block_number(&self) -> Result<u64, RpcError> {
        let raw: U256 = self
            .client
            .request("eth_blockNumber", rpc_params![])
            .await
            .map_err(|err| RpcError::Transport(err.to_string()))?;
        Self::quantity(raw, "block number")
    }

    async fn gas_price(&self) -> Result<U256, RpcError> {
        self.client
            .request("eth_gasPrice", rpc_params![])
            .await
            .map_err(|err| RpcError::Transport(err.to_string()))
    }

    async fn call(&self, req: CallRequest) -> Result<Bytes, RpcError> {
        self.client
            .request("eth_call", rpc_params![req, "latest"])
            .await
            .map_err(|err| RpcError::Transport(err.to_string()))
    }

    async fn estimate_gas(&self, req: CallRequest) -> Result<u64, RpcError> {
        let raw: U256 = self
            .client
            .request("eth_estimateGas", rpc_params![req])
            .await
            .map_err(|err| RpcError::Transport(err.to_string()))?;
        Self::quantity(raw, "gas estimate")
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, RpcError> {
        let raw: U256 = self
            .client
            .request("eth_getTransactionCount", rpc_params![address, "pending"])
            .await
            .map_err(|err| RpcError::Transport(err.to_string()))?;
        Self::quantity(raw, "nonce")
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, RpcError> {
        self.client
            .request("eth_sendRawTransaction", rpc_params![raw])
            .await
            .map_err(|err| RpcError::Transport(err.to_string()))
    }
}

/// Adapts any [`EthRpcClient`] to the narrow [`EthCall`] seam the flash-loan
/// providers use.
#[derive(Debug, Clone)]
pub struct EthCallAdapter(pub Arc<dyn EthRpcClient>);

#[async_trait]
impl EthCall for EthCallAdapter {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcCallError> {
        self.0
            .call(CallRequest { to, data: Some(data), ..Default::default() })
            .await
            .map_err(|err| RpcCallError(err.to_string()))
    }

    async fn estimate_gas(&self, tx: &FlashLoanTx) -> Result<u64, RpcCallError> {
        self.0
            .estimate_gas(CallRequest {
                from: Some(tx.from),
                to: tx.to,
                data: Some(tx.data.clone()),
                value: None,
            })
            .await
            .map_err(|err| RpcCallError(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_request_wire_shape() {
        let req = CallRequest {
            from: None,
            to: Address::repeat_byte(0x22),
            data: Some(Bytes::from(vec![0xde, 0xad])),
            value: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["to"], format!("{:?}", Address::repeat_byte(0x22)).to_lowercase());
        assert_eq!(json["data"], "0xdead");
        assert!(json.get("from").is_none());
        assert!(json.get("value").is_none());
    }

    #[test]
    fn rejects_malformed_url() {
        assert!(HttpRpcClient::new("not a url").is_err());
    }
}
