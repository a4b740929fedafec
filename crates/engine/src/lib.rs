//! The arbitrage execution core.
//!
//! Wires the bounded queue, the per-chain circuit-breaker fleet, the
//! flash-loan registry, the RPC provider service and the health loop into a
//! worker pipeline:
//!
//! ```text
//! broker -> consumer -> queue -> worker -> validation -> breaker -> quote
//!        -> provider.validate + build -> simulation -> risk -> dispatch
//!        -> stats + breaker + execution-results stream
//! ```
//!
//! External collaborators (broker, quoters, simulation) enter through the
//! trait seams in [`streams`], [`quotes`] and [`simulation`]; everything
//! else is owned here.

mod coordinator;
mod engine;
mod gas;
mod health;
mod quotes;
mod simulation;
mod streams;
mod tracker;

pub use coordinator::PipelineState;
pub use engine::{EngineError, ExecutionEngine, ExternalServices};
pub use gas::{GasBaselineEntry, GasBaselines};
pub use health::HealthMonitor;
pub use quotes::{
    BatchQuoteManager, BatchQuoter, DexLookup, PathSimulation, ProfitCalculator, ProfitQuote,
    QuoteError, QuoteRequest,
};
pub use simulation::{
    SimProviderHealth, SimulationClient, SimulationError, SimulationMetrics, SimulationOutcome,
};
pub use streams::{MemoryBroker, OpportunitySource, SourceError, SourceMessage};
pub use tracker::{get_lock_conflict_tracker, reset_lock_conflict_tracker, LockConflictTracker};

/// Sequential calculator that trusts the detector's own profit estimate.
///
/// The production fallback calls the DEX pricing layer; development runs and
/// tests use this passthrough.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetectorEstimateCalculator;

#[async_trait::async_trait]
impl ProfitCalculator for DetectorEstimateCalculator {
    async fn expected_profit(
        &self,
        opp: &arbx_primitives::Opportunity,
    ) -> Result<arbx_primitives::U256, QuoteError> {
        Ok(opp.expected_profit.amount)
    }
}
