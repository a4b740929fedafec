//! Request batching.
//!
//! A batch provider queues JSON-RPC calls and flushes them as one wire
//! request when the batch fills or its timeout elapses. Useful on endpoints
//! that meter per-request rather than per-method.

use crate::{
    client::{HttpRpcClient, RpcError},
    config::BatchConfig,
};
use async_trait::async_trait;
use jsonrpsee::core::{
    client::ClientT,
    params::{ArrayParams, BatchRequestBuilder},
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, trace, warn};

/// Sends an assembled batch over the wire. Split out so tests can stub the
/// transport.
#[async_trait]
pub(crate) trait BatchDispatch: Send + Sync + std::fmt::Debug {
    /// Dispatches the calls in order; the result vector is index-aligned.
    async fn dispatch(
        &self,
        calls: &[(String, Vec<Value>)],
    ) -> Result<Vec<Result<Value, RpcError>>, RpcError>;
}

#[async_trait]
impl BatchDispatch for HttpRpcClient {
    async fn dispatch(
        &self,
        calls: &[(String, Vec<Value>)],
    ) -> Result<Vec<Result<Value, RpcError>>, RpcError> {
        let mut batch = BatchRequestBuilder::new();
        for (method, params) in calls {
            let mut array = ArrayParams::new();
            for param in params {
                array
                    .insert(param)
                    .map_err(|err| RpcError::Response(err.to_string()))?;
            }
            batch
                .insert(method.as_str(), array)
                .map_err(|err| RpcError::Response(err.to_string()))?;
        }
        let response = self
            .inner()
            .batch_request::<Value>(batch)
            .await
            .map_err(|err| RpcError::Transport(err.to_string()))?;
        Ok(response
            .into_iter()
            .map(|entry| entry.map_err(|err| RpcError::Transport(err.to_string())))
            .collect())
    }
}

struct PendingCall {
    method: String,
    params: Vec<Value>,
    respond: oneshot::Sender<Result<Value, RpcError>>,
}

/// One chain's batching front-end.
pub struct BatchProvider {
    sender: Mutex<Option<mpsc::Sender<PendingCall>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for BatchProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchProvider")
            .field("running", &self.worker.lock().is_some())
            .finish()
    }
}

impl BatchProvider {
    /// Spawns the flush worker over the given transport.
    pub(crate) fn spawn(dispatch: Arc<dyn BatchDispatch>, config: BatchConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.max_queue_size.max(1));
        let worker = tokio::spawn(flush_loop(dispatch, config, receiver));
        Self { sender: Mutex::new(Some(sender)), worker: Mutex::new(Some(worker)) }
    }

    /// Creates a batch provider over an HTTP client.
    pub fn new(client: Arc<HttpRpcClient>, config: BatchConfig) -> Self {
        Self::spawn(client, config)
    }

    /// Enqueues one call and waits for its slot of the batch response.
    ///
    /// Refused immediately when the pending queue is full or the provider is
    /// shut down.
    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let (respond, receive) = oneshot::channel();
        let call = PendingCall { method: method.to_string(), params, respond };

        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or_else(|| RpcError::Transport("batch provider is shut down".to_string()))?;
        sender.try_send(call).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                RpcError::Transport("batch queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                RpcError::Transport("batch provider is shut down".to_string())
            }
        })?;

        receive
            .await
            .map_err(|_| RpcError::Transport("batch worker dropped the call".to_string()))?
    }

    /// `eth_blockNumber` through the batch.
    pub async fn block_number(&self) -> Result<u64, RpcError> {
        let value = self.request("eth_blockNumber", Vec::new()).await?;
        let raw = value
            .as_str()
            .ok_or_else(|| RpcError::Response(format!("unexpected block number: {value}")))?;
        u64::from_str_radix(raw.trim_start_matches("0x"), 16)
            .map_err(|err| RpcError::Response(err.to_string()))
    }

    /// Stops the worker, failing any still-pending calls. Errors are logged
    /// and swallowed; shutdown never propagates failures.
    pub async fn shutdown(&self) {
        let sender = self.sender.lock().take();
        drop(sender);
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                warn!(target: "rpc", %err, "batch worker ended abnormally");
            }
        }
        debug!(target: "rpc", "batch provider shut down");
    }
}

async fn flush_loop(
    dispatch: Arc<dyn BatchDispatch>,
    config: BatchConfig,
    mut receiver: mpsc::Receiver<PendingCall>,
) {
    while let Some(first) = receiver.recv().await {
        let mut pending = vec![first];

        let window = tokio::time::sleep(config.batch_timeout);
        tokio::pin!(window);
        while pending.len() < config.max_batch_size {
            tokio::select! {
                _ = &mut window => break,
                next = receiver.recv() => match next {
                    Some(call) => pending.push(call),
                    None => break,
                },
            }
        }

        trace!(target: "rpc", calls = pending.len(), "flushing rpc batch");
        let calls: Vec<(String, Vec<Value>)> =
            pending.iter().map(|call| (call.method.clone(), call.params.clone())).collect();

        match dispatch.dispatch(&calls).await {
            Ok(results) => {
                for (call, result) in pending.into_iter().zip(results) {
                    let _ = call.respond.send(result);
                }
            }
            Err(err) => {
                debug!(target: "rpc", %err, "rpc batch failed");
                for call in pending {
                    let _ = call.respond.send(Err(err.clone()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::atomic::{AtomicUsize, Ordering}, time::Duration};

    #[derive(Debug)]
    struct EchoDispatch {
        batches: AtomicUsize,
    }

    #[async_trait]
    impl BatchDispatch for EchoDispatch {
        async fn dispatch(
            &self,
            calls: &[(String, Vec<Value>)],
        ) -> Result<Vec<Result<Value, RpcError>>, RpcError> {
            self.batches.fetch_add(1, Ordering::Relaxed);
            Ok(calls.iter().map(|(method, _)| Ok(Value::String(method.clone()))).collect())
        }
    }

    fn config(max_batch_size: usize) -> BatchConfig {
        BatchConfig {
            enabled: true,
            max_batch_size,
            batch_timeout: Duration::from_millis(10),
            max_queue_size: 8,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn coalesces_concurrent_calls() {
        let dispatch = Arc::new(EchoDispatch { batches: AtomicUsize::new(0) });
        let provider = Arc::new(BatchProvider::spawn(dispatch.clone(), config(4)));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let provider = Arc::clone(&provider);
                tokio::spawn(async move {
                    provider.request(&format!("eth_method{i}"), Vec::new()).await
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        // four calls landed in at most two wire batches
        assert!(dispatch.batches.load(Ordering::Relaxed) <= 2);
    }

    #[tokio::test]
    async fn request_after_shutdown_is_refused() {
        let dispatch = Arc::new(EchoDispatch { batches: AtomicUsize::new(0) });
        let provider = BatchProvider::spawn(dispatch, config(4));
        provider.shutdown().await;
        assert!(provider.request("eth_blockNumber", Vec::new()).await.is_err());
        // shutdown is idempotent
        provider.shutdown().await;
    }

    #[tokio::test]
    async fn block_number_parses_quantity() {
        #[derive(Debug)]
        struct FixedDispatch;
        #[async_trait]
        impl BatchDispatch for FixedDispatch {
            async fn dispatch(
                &self,
                calls: &[(String, Vec<Value>)],
            ) -> Result<Vec<Result<Value, RpcError>>, RpcError> {
                Ok(calls.iter().map(|_| Ok(Value::String("0x10".to_string()))).collect())
            }
        }

        let provider = BatchProvider::spawn(Arc::new(FixedDispatch), config(1));
        assert_eq!(provider.block_number().await.unwrap(), 16);
    }
}
