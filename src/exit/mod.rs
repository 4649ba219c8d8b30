// =============================================================================
// Exit Management Module
// =============================================================================
//
// Stop/target placement for new trades and the per-position trailing state
// machine evaluated once per scan cycle.

pub mod stops;
pub mod trailing;

pub use stops::{CommissionInput, DynamicStopCalculator, StopDistances, StopPlan, StopRequest};
pub use trailing::{BreakevenPolicy, TrailOutcome, TrailedPosition, TrailingStopEngine};
