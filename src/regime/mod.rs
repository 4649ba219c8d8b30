// =============================================================================
// Regime Module
// =============================================================================
//
// Volatility regime classification from a precomputed ATR series. The regime
// scales stop and target distances (LOW 0.8, MEDIUM 1.0, HIGH 1.3).

pub mod volatility;

pub use volatility::{VolatilityRegime, VolatilityRegimeClassifier, VolatilitySnapshot};
