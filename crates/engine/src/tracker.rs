//! Lock-conflict tracking.
//!
//! Per-opportunity locks normally clear within one execution. A lock that
//! keeps colliding inside a rolling window is evidence of a crash-orphaned
//! holder, and the tracker reports it once the entry is old enough for the
//! legitimate holder to have finished.

use arbx_config::TrackerConfig;
use arbx_primitives::{Clock, SystemClock};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

/// Conflict history for one opportunity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ConflictEntry {
    first_seen_ms: u64,
    last_seen_ms: u64,
    count: u32,
}

/// Bounded, windowed conflict counter.
#[derive(Debug)]
pub struct LockConflictTracker {
    config: TrackerConfig,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, ConflictEntry>>,
}

impl LockConflictTracker {
    /// Creates a tracker with the wall clock.
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a tracker with an injected clock.
    pub fn with_clock(config: TrackerConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock, entries: Mutex::new(HashMap::new()) }
    }

    /// Records one conflict on `id`.
    ///
    /// Returns true iff the id has now conflicted at least
    /// `conflict_threshold` times inside the window *and* the entry is at
    /// least `min_age` old — the signature of an orphaned lock.
    pub fn record_conflict(&self, id: &str) -> bool {
        let now_ms = self.clock.now_ms();
        let window_ms = self.config.window.as_millis() as u64;
        let min_age_ms = self.config.min_age.as_millis() as u64;
        let mut entries = self.entries.lock();

        let entry = match entries.get_mut(id) {
            None => {
                entries.insert(
                    id.to_string(),
                    ConflictEntry { first_seen_ms: now_ms, last_seen_ms: now_ms, count: 1 },
                );
                return false
            }
            Some(entry) => entry,
        };

        if now_ms.saturating_sub(entry.last_seen_ms) > window_ms {
            // the old streak went quiet; start a fresh one
            *entry = ConflictEntry { first_seen_ms: now_ms, last_seen_ms: now_ms, count: 1 };
            return false
        }

        entry.count = entry.count.saturating_add(1);
        entry.last_seen_ms = now_ms;
        entry.count >= self.config.conflict_threshold
            && now_ms.saturating_sub(entry.first_seen_ms) >= min_age_ms
    }

    /// Drops entries older than twice the window, then evicts oldest-first
    /// down to `max_entries`. Invoked by the health loop.
    pub fn cleanup(&self) {
        let now_ms = self.clock.now_ms();
        let horizon_ms = 2 * self.config.window.as_millis() as u64;
        let mut entries = self.entries.lock();

        entries.retain(|_, entry| now_ms.saturating_sub(entry.first_seen_ms) <= horizon_ms);

        if entries.len() > self.config.max_entries {
            let mut by_age: Vec<(String, u64)> =
                entries.iter().map(|(id, entry)| (id.clone(), entry.first_seen_ms)).collect();
            by_age.sort_by_key(|(_, first_seen)| *first_seen);
            let excess = entries.len() - self.config.max_entries;
            for (id, _) in by_age.into_iter().take(excess) {
                entries.remove(&id);
            }
            debug!(target: "engine", evicted = excess, "lock-conflict tracker trimmed");
        }
    }

    /// Number of tracked ids.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the tracker is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

static GLOBAL_TRACKER: Lazy<RwLock<Option<Arc<LockConflictTracker>>>> =
    Lazy::new(|| RwLock::new(None));

/// Process-wide tracker, created with defaults on first access.
///
/// Prefer constructor injection; this accessor exists for call sites with no
/// path to the engine's instance.
pub fn get_lock_conflict_tracker() -> Arc<LockConflictTracker> {
    if let Some(tracker) = GLOBAL_TRACKER.read().as_ref() {
        return Arc::clone(tracker)
    }
    let mut slot = GLOBAL_TRACKER.write();
    Arc::clone(
        slot.get_or_insert_with(|| Arc::new(LockConflictTracker::new(TrackerConfig::default()))),
    )
}

/// Drops the process-wide tracker; the next access builds a fresh one.
/// For shutdown and test isolation.
pub fn reset_lock_conflict_tracker() {
    *GLOBAL_TRACKER.write() = None;
}
