// =============================================================================
// Market Structure Analyzer
// =============================================================================
//
// Extracts swing points, clustered support/resistance zones and trend strength
// from a bar window. ATR and ADX are supplied by the caller; this module does
// not compute indicators.
//
// Clustering tolerance is `k * ATR / price` as a fraction of price. With the
// default k = 0.5 and a EURUSD-like ATR of ~11 pips that is ~0.05 %.
// =============================================================================

pub mod swing;
pub mod zones;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SymbolFault;
use crate::types::{Direction, PriceBar};

pub use swing::{detect_swings, SwingKind, SwingPoint};
pub use zones::{cluster_zones, SupportResistanceZone};

/// ADX reading with its strong/weak classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendStrength {
    pub adx: f64,
    pub strong: bool,
}

impl TrendStrength {
    pub fn weak() -> Self {
        Self {
            adx: 0.0,
            strong: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketStructure {
    pub swings: Vec<SwingPoint>,
    pub zones: Vec<SupportResistanceZone>,
    pub trend: TrendStrength,
    /// Fractional tolerance the zones were clustered with.
    pub tolerance: f64,
}

impl MarketStructure {
    /// Nearest swing on the losing side of `entry`: the highest swing low
    /// below a buy, the lowest swing high above a sell.
    pub fn nearest_adverse_swing(&self, direction: Direction, entry: f64) -> Option<f64> {
        match direction {
            Direction::Buy => self
                .swings
                .iter()
                .filter(|s| s.kind == SwingKind::Low && s.price < entry)
                .map(|s| s.price)
                .reduce(f64::max),
            Direction::Sell => self
                .swings
                .iter()
                .filter(|s| s.kind == SwingKind::High && s.price > entry)
                .map(|s| s.price)
                .reduce(f64::min),
        }
    }

    /// Nearest zone centre on the winning side of `entry`.
    pub fn nearest_favorable_zone(&self, direction: Direction, entry: f64) -> Option<f64> {
        match direction {
            Direction::Buy => self
                .zones
                .iter()
                .map(|z| z.price_center)
                .filter(|c| *c > entry)
                .reduce(f64::min),
            Direction::Sell => self
                .zones
                .iter()
                .map(|z| z.price_center)
                .filter(|c| *c < entry)
                .reduce(f64::max),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MarketStructureAnalyzer {
    pub radius: usize,
    pub tolerance_k: f64,
    pub strong_adx: f64,
}

impl Default for MarketStructureAnalyzer {
    fn default() -> Self {
        Self {
            radius: 5,
            tolerance_k: 0.5,
            strong_adx: 25.0,
        }
    }
}

impl MarketStructureAnalyzer {
    pub fn new(radius: usize, tolerance_k: f64, strong_adx: f64) -> Self {
        Self {
            radius: radius.max(1),
            tolerance_k,
            strong_adx,
        }
    }

    pub fn trend_strength(&self, adx: f64) -> TrendStrength {
        TrendStrength {
            adx,
            strong: adx.is_finite() && adx >= self.strong_adx,
        }
    }

    pub fn analyze(
        &self,
        symbol: &str,
        bars: &[PriceBar],
        atr: f64,
        adx: f64,
    ) -> Result<MarketStructure, SymbolFault> {
        let needed = 2 * self.radius + 1;
        if bars.len() < needed {
            return Err(SymbolFault::DataInsufficient {
                symbol: symbol.to_string(),
                what: "bars",
                needed,
                available: bars.len(),
            });
        }

        let price = bars[bars.len() - 1].close;
        if !(price.is_finite() && price > 0.0) {
            return Err(SymbolFault::stale(symbol, format!("last close {}", price)));
        }
        if !(atr.is_finite() && atr > 0.0) {
            return Err(SymbolFault::stale(symbol, format!("ATR {}", atr)));
        }

        let swings = detect_swings(bars, self.radius);
        let tolerance = self.tolerance_k * atr / price;
        let prices: Vec<f64> = swings.iter().map(|s| s.price).collect();
        let zones = cluster_zones(&prices, tolerance);
        let trend = self.trend_strength(adx);

        debug!(
            symbol,
            swings = swings.len(),
            zones = zones.len(),
            tolerance = format!("{:.5}", tolerance),
            adx = format!("{:.1}", adx),
            strong = trend.strong,
            "structure analysed"
        );

        Ok(MarketStructure {
            swings,
            zones,
            trend,
            tolerance,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn wave(n: usize) -> Vec<PriceBar> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let mid = 1.1000 + (i as f64 * 0.5).sin() * 0.0030;
                PriceBar {
                    open_time: t0 + Duration::minutes(15 * i as i64),
                    open: mid,
                    high: mid + 0.0004,
                    low: mid - 0.0004,
                    close: mid,
                    volume: 1.0,
                }
            })
            .collect()
    }

    #[test]
    fn too_few_bars_is_data_insufficient() {
        let err = MarketStructureAnalyzer::default()
            .analyze("EURUSD", &wave(10), 0.0011, 30.0)
            .unwrap_err();
        assert_eq!(
            err,
            SymbolFault::DataInsufficient {
                symbol: "EURUSD".into(),
                what: "bars",
                needed: 11,
                available: 10,
            }
        );
    }

    #[test]
    fn oscillating_prices_produce_swings_and_zones() {
        let s = MarketStructureAnalyzer::default()
            .analyze("EURUSD", &wave(120), 0.0011, 30.0)
            .unwrap();
        assert!(s.swings.iter().any(|p| p.kind == SwingKind::High));
        assert!(s.swings.iter().any(|p| p.kind == SwingKind::Low));
        assert!(!s.zones.is_empty());
        assert!(s.trend.strong);
        for pair in s.zones.windows(2) {
            assert!(pair[0].upper() < pair[1].lower());
        }
    }

    #[test]
    fn adx_threshold_is_inclusive() {
        let a = MarketStructureAnalyzer::default();
        assert!(a.trend_strength(25.0).strong);
        assert!(!a.trend_strength(24.9).strong);
        assert!(!a.trend_strength(f64::NAN).strong);
    }

    #[test]
    fn zero_atr_is_stale_data() {
        let err = MarketStructureAnalyzer::default()
            .analyze("EURUSD", &wave(40), 0.0, 30.0)
            .unwrap_err();
        assert!(matches!(err, SymbolFault::StaleOrMissingMarketData { .. }));
    }

    #[test]
    fn nearest_levels_respect_direction() {
        let s = MarketStructure {
            swings: vec![
                SwingPoint { index: 1, price: 1.0950, kind: SwingKind::Low },
                SwingPoint { index: 3, price: 1.0980, kind: SwingKind::Low },
                SwingPoint { index: 5, price: 1.1040, kind: SwingKind::High },
            ],
            zones: vec![
                SupportResistanceZone { price_center: 1.0960, touch_count: 2, tolerance_band: 0.0005 },
                SupportResistanceZone { price_center: 1.1050, touch_count: 3, tolerance_band: 0.0005 },
                SupportResistanceZone { price_center: 1.1100, touch_count: 1, tolerance_band: 0.0005 },
            ],
            trend: TrendStrength::weak(),
            tolerance: 0.0005,
        };
        assert_eq!(s.nearest_adverse_swing(Direction::Buy, 1.1000), Some(1.0980));
        assert_eq!(s.nearest_adverse_swing(Direction::Sell, 1.1000), Some(1.1040));
        assert_eq!(s.nearest_favorable_zone(Direction::Buy, 1.1000), Some(1.1050));
        assert_eq!(s.nearest_favorable_zone(Direction::Sell, 1.1000), Some(1.0960));
        assert_eq!(s.nearest_adverse_swing(Direction::Sell, 1.2000), None);
    }
}
