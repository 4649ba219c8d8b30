// =============================================================================
// Position Sizer
// =============================================================================
//
//   base       = equity * risk_per_trade / (sl_pips * pip_value_per_lot)
//   confidence = clamp(0.7 + (conf - 50) / 100, 0.7, 1.3)
//   corr       = 1 - correlation_factor * 0.5
//   raw        = base * confidence * corr
//   lots       = floor_to_step(clamp(raw, min_lot, min(max_lot, ceiling)))
//
// Correlation only ever halves the size. Vetoing a trade is the drawdown
// guard's job.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::round_to;

const MAX_CORRELATION_CUT: f64 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct SizingRequest {
    pub equity: f64,
    pub sl_pips: f64,
    pub pip_value_per_lot: f64,
    /// 0-100.
    pub confidence: f64,
    pub correlation_factor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizingBreakdown {
    pub base_lots: f64,
    pub confidence_multiplier: f64,
    pub correlation_multiplier: f64,
    /// Before bounds and lot-step rounding.
    pub raw_lots: f64,
    pub lots: f64,
    /// Whether a bound changed the raw size.
    pub bounded: bool,
}

pub fn confidence_multiplier(confidence: f64) -> f64 {
    (0.7 + (confidence - 50.0) / 100.0).clamp(0.7, 1.3)
}

#[derive(Debug, Clone, Copy)]
pub struct PositionSizer {
    pub risk_per_trade: f64,
    pub min_lot: f64,
    pub max_lot: f64,
    pub lot_step: f64,
    pub lot_ceiling: f64,
}

impl PositionSizer {
    fn upper(&self) -> f64 {
        self.max_lot.min(self.lot_ceiling)
    }

    fn floor_to_step(&self, lots: f64) -> f64 {
        if self.lot_step <= 0.0 {
            return lots;
        }
        // Small epsilon so 0.25 / 0.01 = 24.999... still floors to 25.
        round_to(((lots / self.lot_step) + 1e-9).floor() * self.lot_step, 8)
    }

    pub fn size(&self, req: &SizingRequest) -> SizingBreakdown {
        let risk_amount = req.equity.max(0.0) * self.risk_per_trade;
        let per_lot_risk = req.sl_pips * req.pip_value_per_lot;
        let base = if per_lot_risk > 0.0 {
            risk_amount / per_lot_risk
        } else {
            0.0
        };

        let conf_mult = confidence_multiplier(req.confidence);
        let corr_mult = 1.0 - req.correlation_factor.clamp(0.0, 1.0) * MAX_CORRELATION_CUT;
        let raw = base * conf_mult * corr_mult;

        let lo = self.min_lot;
        let hi = self.upper().max(lo);
        let bounded_raw = raw.clamp(lo, hi);
        let lots = self.floor_to_step(bounded_raw).max(lo).min(hi);

        debug!(
            base = format!("{:.4}", base),
            conf_mult = format!("{:.2}", conf_mult),
            corr_mult = format!("{:.2}", corr_mult),
            raw = format!("{:.4}", raw),
            lots,
            "position sized"
        );

        SizingBreakdown {
            base_lots: base,
            confidence_multiplier: conf_mult,
            correlation_multiplier: corr_mult,
            raw_lots: raw,
            lots,
            bounded: (bounded_raw - raw).abs() > f64::EPSILON,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sizer() -> PositionSizer {
        PositionSizer {
            risk_per_trade: 0.01,
            min_lot: 0.01,
            max_lot: 100.0,
            lot_step: 0.01,
            lot_ceiling: 5.0,
        }
    }

    fn req(corr: f64) -> SizingRequest {
        SizingRequest {
            equity: 10_000.0,
            sl_pips: 20.0,
            pip_value_per_lot: 10.0,
            confidence: 80.0,
            correlation_factor: corr,
        }
    }

    #[test]
    fn base_size_from_risk_budget() {
        let b = sizer().size(&req(0.0));
        assert!((b.base_lots - 0.5).abs() < 1e-12);
        assert!((b.confidence_multiplier - 1.0).abs() < 1e-12);
        assert!((b.lots - 0.5).abs() < 1e-9);
    }

    #[test]
    fn full_correlation_halves_size() {
        let s = sizer();
        let free = s.size(&req(0.0));
        let full = s.size(&req(1.0));
        assert!((full.raw_lots - free.raw_lots * 0.5).abs() < 1e-12);
        assert!((full.lots - 0.25).abs() < 1e-9);
    }

    #[test]
    fn confidence_multiplier_is_clamped() {
        assert!((confidence_multiplier(0.0) - 0.7).abs() < 1e-12);
        assert!((confidence_multiplier(65.0) - 0.85).abs() < 1e-12);
        assert!((confidence_multiplier(100.0) - 1.2).abs() < 1e-12);
        assert!((confidence_multiplier(150.0) - 1.3).abs() < 1e-12);
    }

    #[test]
    fn ceiling_and_floor_bound_the_result() {
        let s = sizer();
        let mut r = req(0.0);
        r.equity = 10_000_000.0;
        let b = s.size(&r);
        assert_eq!(b.lots, 5.0);
        assert!(b.bounded);

        r.equity = 10.0;
        let b = s.size(&r);
        assert_eq!(b.lots, 0.01);
        assert!(b.bounded);
    }

    #[test]
    fn lots_are_floored_to_step() {
        let s = sizer();
        let mut r = req(0.0);
        r.sl_pips = 27.0; // 100 / 270 = 0.37037
        let b = s.size(&r);
        assert!((b.lots - 0.37).abs() < 1e-9);
    }
}
