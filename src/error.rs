// =============================================================================
// Error taxonomy
// =============================================================================
//
// Per-symbol faults skip one symbol for one cycle. Stop rejections drop one
// candidate. Configuration errors abort startup before the first scan.
// =============================================================================

use thiserror::Error;

/// Why a symbol could not be analysed this cycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SymbolFault {
    #[error("{symbol}: insufficient {what} (need {needed}, have {available})")]
    DataInsufficient {
        symbol: String,
        what: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("{symbol}: stale or missing market data: {reason}")]
    StaleOrMissingMarketData { symbol: String, reason: String },

    #[error("{symbol}: no pip-size rule for price {price}")]
    AmbiguousPipSize { symbol: String, price: f64 },
}

impl SymbolFault {
    pub fn symbol(&self) -> &str {
        match self {
            Self::DataInsufficient { symbol, .. }
            | Self::StaleOrMissingMarketData { symbol, .. }
            | Self::AmbiguousPipSize { symbol, .. } => symbol,
        }
    }

    pub fn stale(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StaleOrMissingMarketData {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }
}

/// Why the stop calculator refused a candidate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StopRejection {
    /// The commission-aware target floor lies beyond the strategy's max target.
    #[error("uneconomical: target floor {floor_pips:.1} pips exceeds max {tp_max:.1}")]
    Uneconomical { floor_pips: f64, tp_max: f64 },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

/// Every problem found while validating the configuration.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid configuration: {}", .0.join("; "))]
pub struct ConfigError(pub Vec<String>);

impl ConfigError {
    pub fn single(msg: impl Into<String>) -> Self {
        Self(vec![msg.into()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_lists_every_problem() {
        let err = ConfigError(vec!["a out of range".into(), "b missing".into()]);
        assert_eq!(
            err.to_string(),
            "invalid configuration: a out of range; b missing"
        );
    }

    #[test]
    fn fault_exposes_symbol() {
        let f = SymbolFault::stale("EURUSD", "feed timeout");
        assert_eq!(f.symbol(), "EURUSD");
        assert!(f.to_string().contains("feed timeout"));
    }
}
