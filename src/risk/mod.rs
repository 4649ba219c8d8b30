// =============================================================================
// Risk Module
// =============================================================================
//
// Exposure tracking, trade sizing, drawdown admission gate and expected-value
// estimates.

pub mod correlation;
pub mod drawdown;
pub mod expectancy;
pub mod sizing;

pub use correlation::{CorrelationGroup, CorrelationLedger, ExposureKey};
pub use drawdown::{Admission, DrawdownGuard, DrawdownLimits, DrawdownState, PauseReason};
pub use expectancy::{expected_value, model_from_table, TradeEconomics, WinRateModel};
pub use sizing::{PositionSizer, SizingBreakdown, SizingRequest};
