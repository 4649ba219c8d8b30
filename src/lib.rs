// =============================================================================
// FX Exit Engine: adaptive risk and exit management for FX trade candidates
// =============================================================================
//
// Candidate signals come in, sized trade intents with protective levels go
// out, and open positions are trailed until they close. Signal generation,
// order routing and indicator computation belong to collaborators.
// =============================================================================

pub mod decision_envelope;
pub mod engine;
pub mod error;
pub mod exit;
pub mod feed;
pub mod history;
pub mod pip_scale;
pub mod regime;
pub mod risk;
pub mod runtime_config;
pub mod session;
pub mod structure;
pub mod types;

pub use engine::{CycleReport, ScanEngine, ScanInput, SymbolMarket};
pub use error::{ConfigError, StopRejection, SymbolFault};
pub use runtime_config::EngineConfig;
