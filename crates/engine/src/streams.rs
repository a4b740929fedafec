//! Seams to the external event broker.
//!
//! The broker itself is out of scope; the engine only needs a pull+ack
//! source for opportunities and an append sink for events. [`MemoryBroker`]
//! implements both for tests and single-process development runs.

use arbx_primitives::{EventSink, Opportunity, SinkError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// A message pulled off the opportunity stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMessage {
    /// Broker-assigned id, acknowledged on terminal decision.
    pub broker_id: String,
    /// The payload.
    pub opportunity: Opportunity,
}

/// Broker-side failures.
#[derive(Debug, Clone, thiserror::Error)]
#[error("opportunity source: {0}")]
pub struct SourceError(pub String);

/// Pull+acknowledge access to the upstream opportunity stream.
#[async_trait]
pub trait OpportunitySource: Send + Sync + std::fmt::Debug {
    /// Pulls the next buffered message, if any. Pulled messages stay pending
    /// until acknowledged.
    async fn pull(&self) -> Result<Option<SourceMessage>, SourceError>;

    /// Acknowledges a terminal decision for the message.
    async fn ack(&self, broker_id: &str) -> Result<(), SourceError>;

    /// Requeues messages that have been pending longer than the broker's
    /// visibility window. Returns how many were reclaimed.
    async fn reclaim_stale(&self) -> Result<usize, SourceError>;

    /// Messages pulled but not yet acknowledged.
    fn pending(&self) -> usize;
}

#[derive(Debug, Default)]
struct MemoryBrokerInner {
    ready: VecDeque<SourceMessage>,
    pending: HashMap<String, SourceMessage>,
    streams: HashMap<String, Vec<serde_json::Value>>,
    keys: HashMap<String, serde_json::Value>,
    next_id: u64,
}

/// In-process broker double: an opportunity queue plus named append-only
/// streams. Used by tests and by development runs without a real broker.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    inner: Mutex<MemoryBrokerInner>,
}

impl MemoryBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an opportunity onto the stream.
    pub fn push(&self, opportunity: Opportunity) {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let broker_id = format!("msg-{}", inner.next_id);
        inner.ready.push_back(SourceMessage { broker_id, opportunity });
    }

    /// Everything appended to the named stream so far.
    pub fn stream(&self, name: &str) -> Vec<serde_json::Value> {
        self.inner.lock().streams.get(name).cloned().unwrap_or_default()
    }

    /// The last value written to a key.
    pub fn key(&self, name: &str) -> Option<serde_json::Value> {
        self.inner.lock().keys.get(name).cloned()
    }
}

#[async_trait]
impl OpportunitySource for MemoryBroker {
    async fn pull(&self) -> Result<Option<SourceMessage>, SourceError> {
        let mut inner = self.inner.lock();
        match inner.ready.pop_front() {
            Some(message) => {
                inner.pending.insert(message.broker_id.clone(), message.clone());
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    async fn ack(&self, broker_id: &str) -> Result<(), SourceError> {
        self.inner.lock().pending.remove(broker_id);
        Ok(())
    }

    async fn reclaim_stale(&self) -> Result<usize, SourceError> {
        // the in-memory double has no visibility window; everything pending
        // goes straight back to ready
        let mut inner = self.inner.lock();
        let reclaimed: Vec<SourceMessage> = inner.pending.drain().map(|(_, m)| m).collect();
        let count = reclaimed.len();
        inner.ready.extend(reclaimed);
        Ok(count)
    }

    fn pending(&self) -> usize {
        self.inner.lock().pending.len()
    }
}

#[async_trait]
impl EventSink for MemoryBroker {
    async fn append(&self, stream: &str, payload: serde_json::Value) -> Result<(), SinkError> {
        self.inner.lock().streams.entry(stream.to_string()).or_default().push(payload);
        Ok(())
    }

    async fn append_capped(
        &self,
        stream: &str,
        payload: serde_json::Value,
        max_len: usize,
    ) -> Result<(), SinkError> {
        let mut inner = self.inner.lock();
        let entries = inner.streams.entry(stream.to_string()).or_default();
        entries.push(payload);
        if entries.len() > max_len {
            let excess = entries.len() - max_len;
            entries.drain(..excess);
        }
        Ok(())
    }

    async fn set_key(&self, key: &str, payload: serde_json::Value) -> Result<(), SinkError> {
        self.inner.lock().keys.insert(key.to_string(), payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbx_primitives::{Chain, OpportunityKind, ProfitEstimate, U256};

    fn opp(id: &str) -> Opportunity {
        Opportunity {
            id: id.to_string(),
            kind: OpportunityKind::CrossDex,
            chain: Chain::Ethereum,
            dest_chain: None,
            token_in: String::new(),
            token_out: String::new(),
            amount_in: U256::from(1u64),
            expected_profit: ProfitEstimate { bps: 0, amount: U256::ZERO, usd: 0.0 },
            confidence: 1.0,
            gas_estimate: U256::ZERO,
            discovered_at: 0,
            swap_path: vec![],
        }
    }

    #[tokio::test]
    async fn pull_ack_lifecycle() {
        let broker = MemoryBroker::new();
        broker.push(opp("a"));

        let message = broker.pull().await.unwrap().unwrap();
        assert_eq!(broker.pending(), 1);
        broker.ack(&message.broker_id).await.unwrap();
        assert_eq!(broker.pending(), 0);
        assert!(broker.pull().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reclaim_requeues_pending() {
        let broker = MemoryBroker::new();
        broker.push(opp("a"));
        broker.pull().await.unwrap().unwrap();

        assert_eq!(broker.reclaim_stale().await.unwrap(), 1);
        assert_eq!(broker.pending(), 0);
        assert!(broker.pull().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn capped_append_trims_oldest() {
        let broker = MemoryBroker::new();
        for i in 0..5 {
            broker
                .append_capped("health", serde_json::json!({ "tick": i }), 3)
                .await
                .unwrap();
        }
        let entries = broker.stream("health");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0]["tick"], 2);
    }
}
