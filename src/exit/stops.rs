// =============================================================================
// Dynamic Stop Calculator: ATR-scaled SL/TP with structure and cost floors
// =============================================================================
//
// Pipeline for one candidate:
//
//   1. Base (sl_mult, tp_mult) from the strategy table.
//   2. Scale both by session x volatility-regime x trend adjustments.
//      Trend adjustment is 1.2 for trend-sensitive families in a strong trend.
//   3. pips = clip(ATR / pip * mult, min, max). If TP <= SL after clipping,
//      TP is widened to SL * 1.2. Crypto symbols widen every bound by their
//      volatility multiplier (`range_scale`); FX uses 1.0.
//   4. Structure override: a swing against the trade that is closer than the
//      stop pulls SL to 110 % of its distance; a favorable zone closer than
//      the target pulls TP to 90 % of its distance. Re-clip and re-apply 3.
//   5. Commission floor: TP must cover the round-trip commission at the
//      chosen lot size and the strategy floor. If the floor is beyond the
//      strategy's max target the candidate is uneconomical.
//
// Steps 1-4 depend only on market context and run per symbol in parallel.
// Step 5 needs the lot size, which itself depends on the SL from step 4.
// =============================================================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::StopRejection;
use crate::regime::VolatilityRegime;
use crate::runtime_config::StrategyProfile;
use crate::structure::{MarketStructure, TrendStrength};
use crate::types::{round_to, Direction, StrategyId};

/// Minimum TP/SL ratio enforced after clipping.
const MIN_REWARD_RATIO: f64 = 1.2;
/// Stop sits 10 % beyond a nearer swing point.
const STRUCTURE_SL_BUFFER: f64 = 1.10;
/// Target stops 90 % of the way to a nearer zone.
const STRUCTURE_TP_FRACTION: f64 = 0.90;
/// Trend adjustment for trend-sensitive families in a strong trend.
const STRONG_TREND_ADJ: f64 = 1.2;

/// Market context for one candidate.
#[derive(Debug, Clone, Copy)]
pub struct StopRequest<'a> {
    pub strategy_id: StrategyId,
    pub direction: Direction,
    pub entry_price: f64,
    /// ATR in price units.
    pub atr: f64,
    pub regime: VolatilityRegime,
    pub session_multiplier: f64,
    pub trend: TrendStrength,
    pub structure: Option<&'a MarketStructure>,
    pub pip_size: f64,
    /// Multiplier on the strategy's min/max bounds.
    pub range_scale: f64,
}

/// Lot-dependent cost inputs for step 5.
#[derive(Debug, Clone, Copy)]
pub struct CommissionInput {
    /// Charged per lot on each side.
    pub commission_per_lot: f64,
    pub lot_size: f64,
    pub pip_value_per_lot: f64,
}

/// SL/TP distances in pips plus the factors that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopDistances {
    pub sl_pips: f64,
    pub tp_pips: f64,
    pub sl_mult: f64,
    pub tp_mult: f64,
    /// ATR-derived distances before clipping.
    pub raw_sl_pips: f64,
    pub raw_tp_pips: f64,
    pub structure_sl: bool,
    pub structure_tp: bool,
    /// Set when step 5 raised the target.
    pub commission_floor_applied: bool,
    pub range_scale: f64,
}

/// Final plan with absolute price levels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopPlan {
    pub distances: StopDistances,
    pub sl_price: f64,
    pub tp_price: f64,
}

impl StopPlan {
    pub fn sl_pips(&self) -> f64 {
        self.distances.sl_pips
    }

    pub fn tp_pips(&self) -> f64 {
        self.distances.tp_pips
    }
}

/// SL and TP prices for a pip distance on each side of `entry`.
pub fn price_levels(
    direction: Direction,
    entry: f64,
    sl_pips: f64,
    tp_pips: f64,
    pip_size: f64,
) -> (f64, f64) {
    let s = direction.sign();
    (entry - s * sl_pips * pip_size, entry + s * tp_pips * pip_size)
}

/// Smallest target (pips) whose gross profit covers both commission legs.
pub fn commission_min_tp_pips(c: &CommissionInput) -> f64 {
    let per_pip = c.lot_size * c.pip_value_per_lot;
    if per_pip > 0.0 {
        c.commission_per_lot * 2.0 / per_pip
    } else {
        f64::INFINITY
    }
}

fn clip_pair(p: &StrategyProfile, scale: f64, sl: f64, tp: f64) -> (f64, f64) {
    let sl = sl.clamp(p.sl_min * scale, p.sl_max * scale);
    let mut tp = tp.clamp(p.tp_min * scale, p.tp_max * scale);
    if tp <= sl {
        tp = tp.max(sl * MIN_REWARD_RATIO);
    }
    (sl, tp)
}

#[derive(Debug, Clone)]
pub struct DynamicStopCalculator {
    profiles: BTreeMap<StrategyId, StrategyProfile>,
}

impl DynamicStopCalculator {
    pub fn new(profiles: BTreeMap<StrategyId, StrategyProfile>) -> Self {
        Self { profiles }
    }

    pub fn profile(&self, id: StrategyId) -> Result<&StrategyProfile, StopRejection> {
        self.profiles
            .get(&id)
            .ok_or_else(|| StopRejection::InvariantViolation(format!("no profile for {}", id)))
    }

    /// Combined multiplier for one base multiplier (step 2).
    pub fn scaled_multiplier(
        profile: &StrategyProfile,
        base: f64,
        regime: VolatilityRegime,
        session_multiplier: f64,
        trend: TrendStrength,
    ) -> f64 {
        let trend_adj = if profile.trend_sensitive && trend.strong {
            STRONG_TREND_ADJ
        } else {
            1.0
        };
        base * session_multiplier * regime.adjustment() * trend_adj
    }

    /// Steps 1-4.
    pub fn compute_distances(&self, req: &StopRequest<'_>) -> Result<StopDistances, StopRejection> {
        let p = self.profile(req.strategy_id)?;

        if !(req.pip_size > 0.0 && req.atr.is_finite() && req.atr > 0.0) {
            return Err(StopRejection::InvariantViolation(format!(
                "atr {} / pip {} unusable",
                req.atr, req.pip_size
            )));
        }
        if !(req.range_scale.is_finite() && req.range_scale > 0.0) {
            return Err(StopRejection::InvariantViolation(format!(
                "range scale {} unusable",
                req.range_scale
            )));
        }
        let scale = req.range_scale;

        // ── Steps 1-2: multipliers ───────────────────────────────────
        let sl_mult =
            Self::scaled_multiplier(p, p.sl_mult, req.regime, req.session_multiplier, req.trend);
        let tp_mult =
            Self::scaled_multiplier(p, p.tp_mult, req.regime, req.session_multiplier, req.trend);

        // ── Step 3: ATR distances, clipped ───────────────────────────
        let atr_pips = req.atr / req.pip_size;
        let raw_sl = atr_pips * sl_mult;
        let raw_tp = atr_pips * tp_mult;
        let (mut sl, mut tp) = clip_pair(p, scale, raw_sl, raw_tp);

        // ── Step 4: structure override ───────────────────────────────
        let mut structure_sl = false;
        let mut structure_tp = false;
        if let Some(structure) = req.structure {
            if let Some(level) = structure.nearest_adverse_swing(req.direction, req.entry_price) {
                let dist = (req.entry_price - level).abs() / req.pip_size;
                if dist > 0.0 && dist < sl {
                    sl = dist * STRUCTURE_SL_BUFFER;
                    structure_sl = true;
                }
            }
            if let Some(level) = structure.nearest_favorable_zone(req.direction, req.entry_price) {
                let dist = (level - req.entry_price).abs() / req.pip_size;
                if dist > 0.0 && dist < tp {
                    tp = dist * STRUCTURE_TP_FRACTION;
                    structure_tp = true;
                }
            }
            if structure_sl || structure_tp {
                (sl, tp) = clip_pair(p, scale, sl, tp);
            }
        }

        let out = StopDistances {
            sl_pips: round_to(sl, 2),
            tp_pips: round_to(tp, 2),
            sl_mult,
            tp_mult,
            raw_sl_pips: raw_sl,
            raw_tp_pips: raw_tp,
            structure_sl,
            structure_tp,
            commission_floor_applied: false,
            range_scale: scale,
        };

        debug!(
            strategy = %req.strategy_id,
            regime = %req.regime,
            sl_mult = format!("{:.3}", sl_mult),
            tp_mult = format!("{:.3}", tp_mult),
            raw_sl = format!("{:.1}", raw_sl),
            raw_tp = format!("{:.1}", raw_tp),
            sl_pips = out.sl_pips,
            tp_pips = out.tp_pips,
            structure_sl,
            structure_tp,
            "stop distances computed"
        );

        check_invariants(&out)?;
        Ok(out)
    }

    /// Step 5.
    pub fn apply_commission_floor(
        &self,
        strategy_id: StrategyId,
        distances: StopDistances,
        commission: &CommissionInput,
    ) -> Result<StopDistances, StopRejection> {
        let p = self.profile(strategy_id)?;
        let scale = distances.range_scale;
        let tp_max = p.tp_max * scale;
        let floor = round_to(
            (p.tp_floor * scale).max(commission_min_tp_pips(commission)),
            2,
        );

        if floor > tp_max {
            debug!(
                strategy = %strategy_id,
                floor_pips = format!("{:.1}", floor),
                tp_max,
                "uneconomical: commission floor beyond max target"
            );
            return Err(StopRejection::Uneconomical {
                floor_pips: floor,
                tp_max,
            });
        }

        let mut out = distances;
        if out.tp_pips < floor {
            out.tp_pips = floor;
            out.commission_floor_applied = true;
        }

        check_invariants(&out)?;
        Ok(out)
    }

    /// Full pipeline for a known lot size.
    pub fn compute(
        &self,
        req: &StopRequest<'_>,
        commission: &CommissionInput,
    ) -> Result<StopPlan, StopRejection> {
        let d = self.compute_distances(req)?;
        let d = self.apply_commission_floor(req.strategy_id, d, commission)?;
        let (sl_price, tp_price) =
            price_levels(req.direction, req.entry_price, d.sl_pips, d.tp_pips, req.pip_size);
        Ok(StopPlan {
            distances: d,
            sl_price,
            tp_price,
        })
    }
}

fn check_invariants(d: &StopDistances) -> Result<(), StopRejection> {
    if !(d.sl_pips > 0.0 && d.tp_pips > d.sl_pips && d.tp_pips.is_finite()) {
        let msg = format!("sl {:.2} / tp {:.2} pips", d.sl_pips, d.tp_pips);
        error!(detail = %msg, "stop invariant violated, candidate rejected");
        return Err(StopRejection::InvariantViolation(msg));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
