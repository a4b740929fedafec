//! Bounded opportunity queue with hysteresis backpressure.
//!
//! The queue couples the upstream stream consumer to the worker pool. Two
//! water marks give the pause signal hysteresis: crossing the high mark on
//! insert engages backpressure, and only draining down to the low mark
//! releases it, so the pause callback does not flap around a single
//! threshold.
//!
//! The queue is single-owner FIFO. It is not internally synchronized across
//! multiple writers; the coordinator serializes access.

use arbx_primitives::Opportunity;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Bounds and water marks for [`OpportunityQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    /// Hard capacity; enqueues beyond this are refused.
    pub max_size: usize,
    /// Depth at which backpressure engages.
    pub high_water_mark: usize,
    /// Depth at which engaged backpressure releases.
    pub low_water_mark: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_size: 1000, high_water_mark: 800, low_water_mark: 200 }
    }
}

impl QueueConfig {
    /// Checks `0 < low_water_mark < high_water_mark <= max_size`.
    pub fn validate(&self) -> Result<(), QueueConfigError> {
        if self.low_water_mark == 0
            || self.low_water_mark >= self.high_water_mark
            || self.high_water_mark > self.max_size
        {
            return Err(QueueConfigError {
                max_size: self.max_size,
                high_water_mark: self.high_water_mark,
                low_water_mark: self.low_water_mark,
            })
        }
        Ok(())
    }
}

/// Invalid water-mark configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "queue config requires 0 < low < high <= max, got low={low_water_mark} high={high_water_mark} max={max_size}"
)]
pub struct QueueConfigError {
    /// Configured capacity.
    pub max_size: usize,
    /// Configured high water mark.
    pub high_water_mark: usize,
    /// Configured low water mark.
    pub low_water_mark: usize,
}

/// Listener invoked with the new effective pause state on every transition.
pub type PauseCallback = Box<dyn Fn(bool) + Send + Sync>;

/// Bounded FIFO of pending opportunities with hysteresis backpressure and a
/// separate, externally driven standby flag.
///
/// Effective paused state is `backpressure_engaged || manually_paused`; the
/// registered callback fires exactly once per change of the effective state.
pub struct OpportunityQueue {
    config: QueueConfig,
    queue: VecDeque<Opportunity>,
    /// Hysteresis state: engaged between the high and low water marks.
    backpressure_engaged: bool,
    /// Standby mode. Externally triggered, never auto-released.
    manually_paused: bool,
    on_pause_change: Option<PauseCallback>,
}

impl std::fmt::Debug for OpportunityQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpportunityQueue")
            .field("config", &self.config)
            .field("len", &self.queue.len())
            .field("backpressure_engaged", &self.backpressure_engaged)
            .field("manually_paused", &self.manually_paused)
            .finish()
    }
}

impl OpportunityQueue {
    /// Creates an empty queue with the given bounds.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            queue: VecDeque::new(),
            backpressure_engaged: false,
            manually_paused: false,
            on_pause_change: None,
        }
    }

    /// Registers the single pause listener, replacing any previous one.
    pub fn on_pause_state_change(&mut self, cb: PauseCallback) {
        self.on_pause_change = Some(cb);
    }

    /// Attempts to append an opportunity.
    ///
    /// Returns false when the queue is at capacity, backpressure is engaged,
    /// or the queue is in standby.
    pub fn enqueue(&mut self, opp: Opportunity) -> bool {
        if self.is_paused() || self.queue.len() >= self.config.max_size {
            return false
        }

        let was_paused = self.is_paused();
        self.queue.push_back(opp);

        // High mark wins over the low mark on degenerate configs.
        if !self.backpressure_engaged && self.queue.len() >= self.config.high_water_mark {
            self.backpressure_engaged = true;
            debug!(target: "engine::queue", len = self.queue.len(), "backpressure engaged");
        }
        self.notify_if_changed(was_paused);
        true
    }

    /// Removes and returns the oldest opportunity.
    pub fn dequeue(&mut self) -> Option<Opportunity> {
        let was_paused = self.is_paused();
        let opp = self.queue.pop_front()?;

        if self.backpressure_engaged && self.queue.len() <= self.config.low_water_mark {
            self.backpressure_engaged = false;
            debug!(target: "engine::queue", len = self.queue.len(), "backpressure released");
        }
        self.notify_if_changed(was_paused);
        Some(opp)
    }

    /// Current depth.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Effective pause state: backpressure or standby.
    pub fn is_paused(&self) -> bool {
        self.backpressure_engaged || self.manually_paused
    }

    /// Whether hysteresis backpressure is currently engaged.
    pub fn is_backpressured(&self) -> bool {
        self.backpressure_engaged
    }

    /// Enters standby mode. Enqueues are refused until [`Self::resume`].
    pub fn pause(&mut self) {
        let was_paused = self.is_paused();
        self.manually_paused = true;
        self.notify_if_changed(was_paused);
    }

    /// Leaves standby mode. Backpressure, if engaged, still pauses the queue.
    pub fn resume(&mut self) {
        let was_paused = self.is_paused();
        self.manually_paused = false;
        self.notify_if_changed(was_paused);
    }

    /// Drops all queued opportunities, releasing backpressure if engaged.
    pub fn clear(&mut self) {
        let was_paused = self.is_paused();
        self.queue.clear();
        if self.backpressure_engaged {
            self.backpressure_engaged = false;
            debug!(target: "engine::queue", "backpressure released on clear");
        }
        self.notify_if_changed(was_paused);
    }

    fn notify_if_changed(&self, was_paused: bool) {
        let now_paused = self.is_paused();
        if now_paused != was_paused {
            if let Some(cb) = &self.on_pause_change {
                cb(now_paused);
            }
        }
    }
}
