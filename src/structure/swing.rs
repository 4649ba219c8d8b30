// =============================================================================
// Swing point detection
// =============================================================================
//
// Bar i is a swing high when its high is >= every high within `radius` bars
// on each side; a swing low is the mirror on lows. Only bars with a full
// radius on both sides are eligible, so the first and last `radius` bars
// never qualify.

use serde::{Deserialize, Serialize};

use crate::types::PriceBar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwingKind {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub index: usize,
    pub price: f64,
    pub kind: SwingKind,
}

/// All swing highs and lows in bar order.
pub fn detect_swings(bars: &[PriceBar], radius: usize) -> Vec<SwingPoint> {
    let n = bars.len();
    if radius == 0 || n < 2 * radius + 1 {
        return Vec::new();
    }

    let mut out = Vec::new();
    for i in radius..n - radius {
        let window = &bars[i - radius..=i + radius];
        let high = bars[i].high;
        let low = bars[i].low;

        if window.iter().all(|b| high >= b.high) {
            out.push(SwingPoint {
                index: i,
                price: high,
                kind: SwingKind::High,
            });
        }
        if window.iter().all(|b| low <= b.low) {
            out.push(SwingPoint {
                index: i,
                price: low,
                kind: SwingKind::Low,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    pub(crate) fn bars_from(highs_lows: &[(f64, f64)]) -> Vec<PriceBar> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        highs_lows
            .iter()
            .enumerate()
            .map(|(i, (h, l))| PriceBar {
                open_time: t0 + Duration::minutes(15 * i as i64),
                open: (h + l) / 2.0,
                high: *h,
                low: *l,
                close: (h + l) / 2.0,
                volume: 100.0,
            })
            .collect()
    }

    #[test]
    fn finds_single_peak_and_trough() {
        // Peak at 3, trough at 7 with radius 2.
        let hl = [
            (1.10, 1.09),
            (1.11, 1.10),
            (1.12, 1.11),
            (1.15, 1.12),
            (1.12, 1.11),
            (1.11, 1.10),
            (1.10, 1.08),
            (1.09, 1.05),
            (1.10, 1.07),
            (1.11, 1.08),
            (1.12, 1.09),
        ];
        let swings = detect_swings(&bars_from(&hl), 2);
        assert!(swings
            .iter()
            .any(|s| s.kind == SwingKind::High && s.index == 3 && (s.price - 1.15).abs() < 1e-12));
        assert!(swings
            .iter()
            .any(|s| s.kind == SwingKind::Low && s.index == 7 && (s.price - 1.05).abs() < 1e-12));
    }

    #[test]
    fn edges_are_never_swings() {
        let hl = [(2.0, 1.0), (1.5, 1.2), (1.4, 1.3), (1.5, 1.2), (2.0, 1.0)];
        let swings = detect_swings(&bars_from(&hl), 2);
        assert!(swings.iter().all(|s| s.index == 2));
    }

    #[test]
    fn swing_high_dominates_its_radius() {
        let hl: Vec<(f64, f64)> = (0..40)
            .map(|i| {
                let x = (i as f64 * 0.7).sin() * 0.01 + 1.1;
                (x + 0.001, x - 0.001)
            })
            .collect();
        let bars = bars_from(&hl);
        for s in detect_swings(&bars, 3) {
            let w = &bars[s.index - 3..=s.index + 3];
            match s.kind {
                SwingKind::High => assert!(w.iter().all(|b| s.price >= b.high)),
                SwingKind::Low => assert!(w.iter().all(|b| s.price <= b.low)),
            }
        }
    }

    #[test]
    fn too_few_bars_yield_nothing() {
        let hl = [(1.0, 0.9); 4];
        assert!(detect_swings(&bars_from(&hl), 2).is_empty());
    }
}
