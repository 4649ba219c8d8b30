// =============================================================================
// Expectancy: win-rate models and expected value per candidate
// =============================================================================
//
// The win-rate estimate is a pluggable pure function of (strategy,
// confidence). The default is linear in confidence; a calibrated per-strategy
// curve from configuration replaces it where present.
//
//   EV = p * (gross_win - cost) - (1 - p) * (gross_loss + cost)
//
// where cost is the round-trip commission.
// =============================================================================

use std::collections::BTreeMap;

use crate::runtime_config::CalibrationPoint;
use crate::types::StrategyId;

pub trait WinRateModel: Send + Sync {
    /// Probability in (0, 1) that a trade of this family at `confidence`
    /// reaches its target.
    fn win_rate(&self, strategy: StrategyId, confidence: f64) -> f64;
}

/// 0.55 at confidence 50, +0.30 per 100 points, clamped to [0.55, 0.85].
#[derive(Debug, Clone, Copy)]
pub struct LinearWinRate {
    pub floor: f64,
    pub ceiling: f64,
    pub slope: f64,
}

impl Default for LinearWinRate {
    fn default() -> Self {
        Self {
            floor: 0.55,
            ceiling: 0.85,
            slope: 0.30,
        }
    }
}

impl WinRateModel for LinearWinRate {
    fn win_rate(&self, _strategy: StrategyId, confidence: f64) -> f64 {
        (self.floor + (confidence - 50.0) / 100.0 * self.slope).clamp(self.floor, self.ceiling)
    }
}

/// Piecewise-linear curve per strategy; flat beyond the end points.
#[derive(Debug, Clone)]
pub struct CalibratedWinRate {
    curves: BTreeMap<StrategyId, Vec<CalibrationPoint>>,
    fallback: LinearWinRate,
}

impl CalibratedWinRate {
    pub fn new(table: &BTreeMap<StrategyId, Vec<CalibrationPoint>>) -> Self {
        let curves = table
            .iter()
            .filter(|(_, pts)| !pts.is_empty())
            .map(|(id, pts)| {
                let mut pts = pts.clone();
                pts.sort_by(|a, b| a.confidence.total_cmp(&b.confidence));
                (*id, pts)
            })
            .collect();
        Self {
            curves,
            fallback: LinearWinRate::default(),
        }
    }
}

fn interpolate(points: &[CalibrationPoint], x: f64) -> f64 {
    let first = points[0];
    let last = points[points.len() - 1];
    if x <= first.confidence {
        return first.win_rate;
    }
    if x >= last.confidence {
        return last.win_rate;
    }
    for pair in points.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if x >= a.confidence && x <= b.confidence {
            let span = b.confidence - a.confidence;
            if span <= 0.0 {
                return b.win_rate;
            }
            let w = (x - a.confidence) / span;
            return a.win_rate + w * (b.win_rate - a.win_rate);
        }
    }
    last.win_rate
}

impl WinRateModel for CalibratedWinRate {
    fn win_rate(&self, strategy: StrategyId, confidence: f64) -> f64 {
        match self.curves.get(&strategy) {
            Some(points) => interpolate(points, confidence),
            None => self.fallback.win_rate(strategy, confidence),
        }
    }
}

/// Linear model unless the table has at least one curve.
pub fn model_from_table(table: &BTreeMap<StrategyId, Vec<CalibrationPoint>>) -> Box<dyn WinRateModel> {
    if table.values().any(|c| !c.is_empty()) {
        Box::new(CalibratedWinRate::new(table))
    } else {
        Box::new(LinearWinRate::default())
    }
}

/// Money inputs for one candidate.
#[derive(Debug, Clone, Copy)]
pub struct TradeEconomics {
    pub sl_pips: f64,
    pub tp_pips: f64,
    pub lots: f64,
    pub pip_value_per_lot: f64,
    /// Per lot, per side.
    pub commission_per_lot: f64,
}

pub fn expected_value(win_rate: f64, e: &TradeEconomics) -> f64 {
    let per_pip = e.lots * e.pip_value_per_lot;
    let cost = e.commission_per_lot * 2.0;
    let net_win = e.tp_pips * per_pip - cost;
    let net_loss = e.sl_pips * per_pip + cost;
    win_rate * net_win - (1.0 - win_rate) * net_loss
}
