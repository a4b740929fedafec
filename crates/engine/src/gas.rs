//! Per-chain gas-price baselines.
//!
//! Each dispatch samples the chain's gas price into a short history used for
//! anomaly checks and dashboards. The health loop trims the history so it
//! can never grow without bound.

use arbx_primitives::{Chain, Clock, SystemClock, U256};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};

/// Entries older than this are dropped on trim.
const BASELINE_MAX_AGE_MS: u64 = 5 * 60 * 1000;
/// Most-recent entries kept per chain after age filtering.
const BASELINE_MAX_LEN: usize = 100;

/// One gas-price sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasBaselineEntry {
    /// Sampled price, wei.
    pub price: U256,
    /// Sample time, unix milliseconds.
    pub timestamp_ms: u64,
}

/// Bounded per-chain gas-price history.
#[derive(Debug)]
pub struct GasBaselines {
    clock: Arc<dyn Clock>,
    baselines: Mutex<HashMap<Chain, Vec<GasBaselineEntry>>>,
}

impl Default for GasBaselines {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl GasBaselines {
    /// Creates an empty history with an injected clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock, baselines: Mutex::new(HashMap::new()) }
    }

    /// Appends a sample for the chain.
    pub fn record(&self, chain: Chain, price: U256) {
        let entry = GasBaselineEntry { price, timestamp_ms: self.clock.now_ms() };
        self.baselines.lock().entry(chain).or_default().push(entry);
    }

    /// Test/diagnostic seam: appends a sample with an explicit timestamp.
    pub fn record_at(&self, chain: Chain, price: U256, timestamp_ms: u64) {
        self.baselines
            .lock()
            .entry(chain)
            .or_default()
            .push(GasBaselineEntry { price, timestamp_ms });
    }

    /// Copy of one chain's history.
    pub fn history(&self, chain: Chain) -> Vec<GasBaselineEntry> {
        self.baselines.lock().get(&chain).cloned().unwrap_or_default()
    }

    /// The most recent sample for the chain.
    pub fn latest(&self, chain: Chain) -> Option<GasBaselineEntry> {
        self.baselines.lock().get(&chain).and_then(|entries| entries.last().copied())
    }

    /// Drops entries older than five minutes, then caps each chain's history
    /// to the 100 most recent. Invoked by the health loop.
    pub fn trim(&self) {
        let now_ms = self.clock.now_ms();
        let mut baselines = self.baselines.lock();
        for entries in baselines.values_mut() {
            entries.retain(|entry| now_ms.saturating_sub(entry.timestamp_ms) <= BASELINE_MAX_AGE_MS);
            if entries.len() > BASELINE_MAX_LEN {
                let excess = entries.len() - BASELINE_MAX_LEN;
                entries.drain(..excess);
            }
        }
        baselines.retain(|_, entries| !entries.is_empty());
    }
}
