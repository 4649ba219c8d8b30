// =============================================================================
// Support / resistance zones
// =============================================================================
//
// Swing prices are sorted and clustered greedily: a price joins the current
// cluster while its relative distance to the cluster mean is within
// `tolerance` (a fraction of price). Each cluster becomes a zone centred on
// the member mean with a band of `tolerance * center` on each side.
//
// A merge pass then folds together neighbours whose bands touch, weighting
// the new centre by touch count, until no two zones overlap.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SupportResistanceZone {
    pub price_center: f64,
    pub touch_count: usize,
    /// Half-width of the zone in price units.
    pub tolerance_band: f64,
}

impl SupportResistanceZone {
    pub fn lower(&self) -> f64 {
        self.price_center - self.tolerance_band
    }

    pub fn upper(&self) -> f64 {
        self.price_center + self.tolerance_band
    }
}

/// Cluster `prices` into non-overlapping zones, ordered by price.
pub fn cluster_zones(prices: &[f64], tolerance: f64) -> Vec<SupportResistanceZone> {
    let mut sorted: Vec<f64> = prices
        .iter()
        .copied()
        .filter(|p| p.is_finite() && *p > 0.0)
        .collect();
    if sorted.is_empty() {
        return Vec::new();
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let tolerance = tolerance.max(0.0);
    let mut zones = Vec::new();
    let mut sum = sorted[0];
    let mut count = 1usize;

    for &p in &sorted[1..] {
        let mean = sum / count as f64;
        if (p - mean).abs() / mean <= tolerance {
            sum += p;
            count += 1;
        } else {
            zones.push(make_zone(sum / count as f64, count, tolerance));
            sum = p;
            count = 1;
        }
    }
    zones.push(make_zone(sum / count as f64, count, tolerance));

    merge_overlapping(zones, tolerance)
}

fn make_zone(center: f64, touch_count: usize, tolerance: f64) -> SupportResistanceZone {
    SupportResistanceZone {
        price_center: center,
        touch_count,
        tolerance_band: center * tolerance,
    }
}

fn merge_overlapping(
    mut zones: Vec<SupportResistanceZone>,
    tolerance: f64,
) -> Vec<SupportResistanceZone> {
    loop {
        let mut merged = false;
        let mut out: Vec<SupportResistanceZone> = Vec::with_capacity(zones.len());

        for z in zones {
            match out.last_mut() {
                Some(prev) if prev.upper() >= z.lower() => {
                    let n = prev.touch_count + z.touch_count;
                    let center = (prev.price_center * prev.touch_count as f64
                        + z.price_center * z.touch_count as f64)
                        / n as f64;
                    *prev = make_zone(center, n, tolerance);
                    merged = true;
                }
                _ => out.push(z),
            }
        }

        zones = out;
        if !merged {
            return zones;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_disjoint(zones: &[SupportResistanceZone]) {
        for pair in zones.windows(2) {
            assert!(
                pair[0].upper() < pair[1].lower(),
                "zones overlap: {:?} / {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn nearby_swings_form_one_zone() {
        let zones = cluster_zones(&[1.1000, 1.1003, 1.0998, 1.1200], 0.0005);
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0].touch_count, 3);
        assert!((zones[0].price_center - 1.100033).abs() < 1e-5);
        assert_eq!(zones[1].touch_count, 1);
        assert_disjoint(&zones);
    }

    #[test]
    fn merge_pass_removes_touching_bands() {
        // Clusters at ~1.1000 and ~1.1010 with a band of 0.055% each touch.
        let zones = cluster_zones(&[1.1000, 1.1001, 1.1010, 1.1011], 0.00055);
        assert_eq!(zones.len(), 1, "{:?}", zones);
        assert_eq!(zones[0].touch_count, 4);
    }

    #[test]
    fn zero_tolerance_keeps_distinct_prices() {
        let zones = cluster_zones(&[1.0, 2.0, 2.0, 3.0], 0.0);
        assert_eq!(zones.len(), 3);
        assert_eq!(zones[1].touch_count, 2);
        assert_disjoint(&zones);
    }

    #[test]
    fn empty_and_invalid_input() {
        assert!(cluster_zones(&[], 0.001).is_empty());
        assert!(cluster_zones(&[f64::NAN, -1.0], 0.001).is_empty());
    }
}
