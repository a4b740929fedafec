use arbx_primitives::CircuitState;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning for one chain's breaker. Shared by every breaker the manager
/// creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerConfig {
    /// Master switch. Disabled means every execution is allowed (fail-open).
    pub enabled: bool,
    /// Consecutive failures that trip `CLOSED -> OPEN`.
    pub failure_threshold: u32,
    /// How long an open breaker blocks before probing is allowed.
    #[serde(with = "humantime_serde")]
    pub cooldown_period: Duration,
    /// Concurrent probes admitted while `HALF_OPEN`.
    pub half_open_max_attempts: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            cooldown_period: Duration::from_secs(300),
            half_open_max_attempts: 1,
        }
    }
}

/// A state change observed on a breaker, for event publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// State before.
    pub previous: CircuitState,
    /// State after.
    pub current: CircuitState,
    /// What caused the change.
    pub reason: String,
    /// Consecutive failure count at transition time.
    pub consecutive_failures: u32,
    /// Cooldown remaining at transition time.
    pub cooldown_remaining_ms: u64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    /// Time of the most recent `OPEN` transition.
    opened_at_ms: u64,
    /// Probes currently in flight while `HALF_OPEN`.
    half_open_probes: u32,
}

/// One chain's breaker.
///
/// Time is passed in by the caller so the state machine stays clock-free and
/// deterministic under test. All operations are O(1) and allocation-free
/// except when they produce a [`Transition`].
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown_ms: u64,
    half_open_max_attempts: u32,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a breaker in `CLOSED` state.
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            cooldown_ms: config.cooldown_period.as_millis() as u64,
            half_open_max_attempts: config.half_open_max_attempts.max(1),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at_ms: 0,
                half_open_probes: 0,
            }),
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Consecutive failure count.
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Whether a call may proceed right now.
    ///
    /// An open breaker whose cooldown has elapsed moves to `HALF_OPEN` here
    /// and admits the caller as the first probe.
    pub fn can_execute(&self, now_ms: u64) -> (bool, Option<Transition>) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => (true, None),
            CircuitState::Open => {
                if now_ms.saturating_sub(inner.opened_at_ms) >= self.cooldown_ms {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_probes = 1;
                    let transition = Transition {
                        previous: CircuitState::Open,
                        current: CircuitState::HalfOpen,
                        reason: "cooldown elapsed".to_string(),
                        consecutive_failures: inner.consecutive_failures,
                        cooldown_remaining_ms: 0,
                    };
                    (true, Some(transition))
                } else {
                    (false, None)
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_probes < self.half_open_max_attempts {
                    inner.half_open_probes += 1;
                    (true, None)
                } else {
                    (false, None)
                }
            }
        }
    }

    /// Records a successful call.
    pub fn record_success(&self, _now_ms: u64) -> Option<Transition> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::Open => {
                inner.consecutive_failures = 0;
                None
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.half_open_probes = 0;
                Some(Transition {
                    previous: CircuitState::HalfOpen,
                    current: CircuitState::Closed,
                    reason: "probe succeeded".to_string(),
                    consecutive_failures: 0,
                    cooldown_remaining_ms: 0,
                })
            }
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self, now_ms: u64) -> Option<Transition> {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at_ms = now_ms;
                    Some(Transition {
                        previous: CircuitState::Closed,
                        current: CircuitState::Open,
                        reason: "failure threshold reached".to_string(),
                        consecutive_failures: inner.consecutive_failures,
                        cooldown_remaining_ms: self.cooldown_ms,
                    })
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at_ms = now_ms;
                inner.half_open_probes = 0;
                Some(Transition {
                    previous: CircuitState::HalfOpen,
                    current: CircuitState::Open,
                    reason: "probe failed".to_string(),
                    consecutive_failures: inner.consecutive_failures,
                    cooldown_remaining_ms: self.cooldown_ms,
                })
            }
            // already open, nothing to trip
            CircuitState::Open => None,
        }
    }

    /// Administratively opens the breaker.
    pub fn force_open(&self, now_ms: u64, reason: &str) -> Option<Transition> {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Open {
            return None
        }
        let previous = inner.state;
        inner.state = CircuitState::Open;
        inner.opened_at_ms = now_ms;
        inner.half_open_probes = 0;
        Some(Transition {
            previous,
            current: CircuitState::Open,
            reason: format!("forced open: {reason}"),
            consecutive_failures: inner.consecutive_failures,
            cooldown_remaining_ms: self.cooldown_ms,
        })
    }

    /// Administratively closes the breaker and clears its failure count.
    pub fn force_close(&self, now_ms: u64) -> Option<Transition> {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Closed {
            return None
        }
        let previous = inner.state;
        let cooldown_remaining_ms = (inner.opened_at_ms + self.cooldown_ms).saturating_sub(now_ms);
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.half_open_probes = 0;
        Some(Transition {
            previous,
            current: CircuitState::Closed,
            reason: "forced close".to_string(),
            consecutive_failures: 0,
            cooldown_remaining_ms,
        })
    }
}
