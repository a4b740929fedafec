//! Per-chain circuit-breaker fleet.
//!
//! One breaker per chain isolates RPC collapse on one chain from execution on
//! every other chain. Breakers are created lazily in `CLOSED` state; the
//! state machine is the classic three-state breaker:
//!
//! ```text
//!          Nth consecutive failure
//! CLOSED ---------------------------> OPEN
//!   ^                                  |
//!   | success while probing            | cooldown elapsed
//!   |                                  v
//!   +------------------------------ HALF_OPEN
//!              any failure while probing reopens
//! ```
//!
//! The hot-path operations ([`CircuitBreakerManager::can_execute`],
//! [`CircuitBreakerManager::record_success`],
//! [`CircuitBreakerManager::record_failure`]) are O(1): one map read plus a
//! short uncontended lock over a handful of integers. No I/O happens on the
//! hot path; transition events are published fire-and-forget on a spawned
//! task.

mod breaker;
mod manager;

pub use breaker::{BreakerConfig, CircuitBreaker, Transition};
pub use manager::CircuitBreakerManager;
