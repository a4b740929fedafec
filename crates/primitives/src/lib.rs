//! Commonly used types in arbx.
//!
//! This crate contains the chain catalog, the opportunity and flash-loan data
//! model shared between the execution pipeline and the flash-loan providers,
//! the process-wide execution counters, and the event records published to the
//! downstream streams.

mod address;
mod chain;
mod events;
mod flashloan;
mod opportunity;
mod stats;
mod time;

pub use address::{eq_address_ignore_case, is_zero_address, parse_address, AddressParseError};
pub use chain::Chain;
pub use events::{
    BreakerEvent, CircuitState, EventSink, ExecutionRecord, ExecutionStatus, HealthRecord,
    HealthStatus, SharedSink, SimulationStatus, SinkError, CIRCUIT_BREAKER_STREAM,
    EXECUTION_RESULTS_STREAM, HEALTH_STREAM, SYSTEM_COMMANDS_STREAM, SYSTEM_FAILOVER_STREAM,
};
pub use flashloan::{
    FeeInfo, FlashLoanProtocol, FlashLoanRequest, ProviderCapabilities, SupportStatus,
};
pub use opportunity::{Opportunity, OpportunityKind, ProfitEstimate, SwapStep};
pub use stats::{ExecutionStats, StatsSnapshot};
pub use time::{Clock, ManualClock, SystemClock};

// Re-exported for downstream crates so they don't need a direct alloy dependency
// for the common cases.
pub use alloy_primitives::{Address, Bytes, B256, U256};
