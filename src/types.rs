// =============================================================================
// Shared types used across the exit & risk engine
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Broker-assigned position identifier.
pub type Ticket = u64;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    /// +1.0 for buys, -1.0 for sells.
    pub fn sign(self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }

    /// Signed favorable move from `from` to `to`, in price units.
    pub fn favorable_move(self, from: f64, to: f64) -> f64 {
        (to - from) * self.sign()
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Signal families the engine knows how to place exits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    TrendFollowing,
    MeanReversion,
    Breakout,
    Momentum,
    MultiTimeframe,
    Fibonacci,
}

impl StrategyId {
    pub const ALL: [StrategyId; 6] = [
        Self::TrendFollowing,
        Self::MeanReversion,
        Self::Breakout,
        Self::Momentum,
        Self::MultiTimeframe,
        Self::Fibonacci,
    ];
}

impl std::fmt::Display for StrategyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TrendFollowing => write!(f, "TREND_FOLLOWING"),
            Self::MeanReversion => write!(f, "MEAN_REVERSION"),
            Self::Breakout => write!(f, "BREAKOUT"),
            Self::Momentum => write!(f, "MOMENTUM"),
            Self::MultiTimeframe => write!(f, "MULTI_TIMEFRAME"),
            Self::Fibonacci => write!(f, "FIBONACCI"),
        }
    }
}

/// A single OHLCV bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceBar {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

/// Candidate produced by the (external) signal generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSignal {
    pub symbol: String,
    pub direction: Direction,
    pub strategy_id: StrategyId,
    /// Signal confidence on a 0-100 scale.
    pub confidence: f64,
    /// Intended entry. Falls back to the last close when absent.
    #[serde(default)]
    pub entry_price: Option<f64>,
}

/// Fully specified order handed to the execution collaborator.
/// Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeIntent {
    pub id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub sl_price: f64,
    /// `None` when trailing replaces the fixed target.
    pub tp_price: Option<f64>,
    pub lots: f64,
    pub use_trailing_stop: bool,
    pub trailing_distance_pips: f64,
    pub strategy_id: StrategyId,
    pub confidence: f64,
    pub sl_pips: f64,
    pub tp_pips: f64,
    pub pip_size: f64,
    pub expected_value: f64,
    pub created_at: DateTime<Utc>,
}

/// Open position as reported by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionView {
    pub ticket: Ticket,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub volume: f64,
    pub current_sl: f64,
    #[serde(default)]
    pub current_tp: Option<f64>,
    pub current_price: f64,
}

/// Trailing state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrailingState {
    Inactive,
    Active,
}

impl std::fmt::Display for TrailingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactive => write!(f, "INACTIVE"),
            Self::Active => write!(f, "ACTIVE"),
        }
    }
}

/// Why a stop was moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModificationReason {
    Trailing,
    Breakeven,
    TargetCleared,
}

/// Stop-modification command for the execution collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopModification {
    pub ticket: Ticket,
    pub new_sl: f64,
    /// Target to keep on the order. `None` removes it.
    pub take_profit: Option<f64>,
    pub reason: ModificationReason,
}

/// Which boundary price crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitTrigger {
    StopLoss,
    TakeProfit,
}

impl std::fmt::Display for ExitTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "SL"),
            Self::TakeProfit => write!(f, "TP"),
        }
    }
}

/// Boundary crossing seen during a scan. The close itself is external.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedExit {
    pub ticket: Ticket,
    pub symbol: String,
    pub trigger: ExitTrigger,
    pub exit_price: f64,
    /// Realized distance from entry in pips (negative for a loss).
    pub pips: f64,
}

/// Account snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountState {
    pub equity: f64,
    pub balance: f64,
}

/// One closed trade, persisted to the history store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcomeRecord {
    pub ticket: Ticket,
    pub symbol: String,
    pub direction: Direction,
    #[serde(default)]
    pub strategy_id: Option<StrategyId>,
    /// Signal confidence at entry, when the trade came from an intent.
    #[serde(default)]
    pub confidence: Option<f64>,
    pub lots: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pips: f64,
    /// Net of commission.
    pub pnl: f64,
    pub closed_at: DateTime<Utc>,
}

/// Round to a fixed number of decimals.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let f = 10f64.powi(decimals);
    (value * f).round() / f
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn favorable_move_is_signed_by_direction() {
        assert!((Direction::Buy.favorable_move(1.0, 1.5) - 0.5).abs() < 1e-12);
        assert!((Direction::Sell.favorable_move(1.0, 1.5) + 0.5).abs() < 1e-12);
    }

    #[test]
    fn strategy_ids_serialise_snake_case() {
        let json = serde_json::to_string(&StrategyId::MultiTimeframe).unwrap();
        assert_eq!(json, "\"multi_timeframe\"");
        let back: StrategyId = serde_json::from_str("\"trend_following\"").unwrap();
        assert_eq!(back, StrategyId::TrendFollowing);
    }
}
