// =============================================================================
// Volatility Regime Classifier: ATR percentile bucketing
// =============================================================================
//
// The latest ATR is ranked against the trailing window:
//
//     rank = 100 * |{ v in window : v < latest }| / (n - 1)
//
//   [0, 30)   LOW
//   [30, 70)  MEDIUM
//   [70, 100] HIGH
//
// With fewer than `min_samples` usable values the regime is MEDIUM.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::trace;

const LOW_UPPER: f64 = 30.0;
const HIGH_LOWER: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolatilityRegime {
    Low,
    Medium,
    High,
}

impl VolatilityRegime {
    pub fn from_percentile(rank: f64) -> Self {
        if rank < LOW_UPPER {
            Self::Low
        } else if rank < HIGH_LOWER {
            Self::Medium
        } else {
            Self::High
        }
    }

    /// Multiplier applied to stop and target distances.
    pub fn adjustment(self) -> f64 {
        match self {
            Self::Low => 0.8,
            Self::Medium => 1.0,
            Self::High => 1.3,
        }
    }
}

impl std::fmt::Display for VolatilityRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolatilitySnapshot {
    pub atr_value: f64,
    pub percentile_rank: f64,
    pub regime: VolatilityRegime,
    /// Usable samples the rank was computed from.
    pub samples: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct VolatilityRegimeClassifier {
    pub window: usize,
    pub min_samples: usize,
}

impl Default for VolatilityRegimeClassifier {
    fn default() -> Self {
        Self {
            window: 100,
            min_samples: 20,
        }
    }
}

impl VolatilityRegimeClassifier {
    pub fn new(window: usize, min_samples: usize) -> Self {
        Self {
            window: window.max(2),
            min_samples: min_samples.max(2),
        }
    }

    pub fn classify(&self, atr_series: &[f64]) -> VolatilitySnapshot {
        let start = atr_series.len().saturating_sub(self.window);
        let usable: Vec<f64> = atr_series[start..]
            .iter()
            .copied()
            .filter(|v| v.is_finite() && *v > 0.0)
            .collect();

        let latest = usable.last().copied().unwrap_or(0.0);

        if usable.len() < self.min_samples {
            trace!(samples = usable.len(), "too few ATR samples, regime MEDIUM");
            return VolatilitySnapshot {
                atr_value: latest,
                percentile_rank: 50.0,
                regime: VolatilityRegime::Medium,
                samples: usable.len(),
            };
        }

        let below = usable.iter().filter(|v| **v < latest).count();
        let rank = 100.0 * below as f64 / (usable.len() - 1) as f64;

        VolatilitySnapshot {
            atr_value: latest,
            percentile_rank: rank,
            regime: VolatilityRegime::from_percentile(rank),
            samples: usable.len(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<f64> {
        (1..=n).map(|i| i as f64 * 0.0001).collect()
    }

    #[test]
    fn highest_value_is_high_regime() {
        let snap = VolatilityRegimeClassifier::default().classify(&ramp(50));
        assert!((snap.percentile_rank - 100.0).abs() < 1e-9);
        assert_eq!(snap.regime, VolatilityRegime::High);
    }

    #[test]
    fn lowest_value_is_low_regime() {
        let mut s = ramp(50);
        s.push(0.00001);
        let snap = VolatilityRegimeClassifier::default().classify(&s);
        assert_eq!(snap.percentile_rank, 0.0);
        assert_eq!(snap.regime, VolatilityRegime::Low);
    }

    #[test]
    fn middle_value_is_medium() {
        let mut s = ramp(41);
        s.push(0.00205);
        let snap = VolatilityRegimeClassifier::default().classify(&s);
        // 20 of 41 history values lie below the latest: 20 / 41.
        assert!((snap.percentile_rank - 100.0 * 20.0 / 41.0).abs() < 1e-9);
        assert_eq!(snap.regime, VolatilityRegime::Medium);
    }

    #[test]
    fn only_trailing_window_counts() {
        // Old huge values fall outside the 100-sample window.
        let mut s = vec![1.0; 50];
        s.extend(ramp(100));
        let snap = VolatilityRegimeClassifier::default().classify(&s);
        assert_eq!(snap.samples, 100);
        assert_eq!(snap.regime, VolatilityRegime::High);
    }

    #[test]
    fn too_few_samples_defaults_to_medium() {
        let snap = VolatilityRegimeClassifier::default().classify(&ramp(19));
        assert_eq!(snap.regime, VolatilityRegime::Medium);
        assert_eq!(snap.samples, 19);
    }

    #[test]
    fn non_finite_samples_are_ignored() {
        let mut s = ramp(19);
        s.push(f64::NAN);
        s.push(0.0);
        let snap = VolatilityRegimeClassifier::default().classify(&s);
        assert_eq!(snap.regime, VolatilityRegime::Medium);
    }

    #[test]
    fn bucket_edges() {
        assert_eq!(VolatilityRegime::from_percentile(29.999), VolatilityRegime::Low);
        assert_eq!(VolatilityRegime::from_percentile(30.0), VolatilityRegime::Medium);
        assert_eq!(VolatilityRegime::from_percentile(70.0), VolatilityRegime::High);
    }
}
