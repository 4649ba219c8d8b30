// =============================================================================
// Trade History Store: append-only JSON lines
// =============================================================================
//
// One `TradeOutcomeRecord` per closed trade, one JSON object per line. On
// startup the file is replayed into the drawdown guard so a restart inside a
// pause window stays paused. Malformed lines are skipped with a warning.
//
// The same records feed per-strategy performance (logged at startup and
// shutdown) and, when enough trades exist, calibrated win-rate curves:
// outcomes are bucketed by entry confidence in 10-point steps and each
// bucket with at least `min_samples` trades becomes one curve point.
// =============================================================================

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::runtime_config::{CalibrationPoint, EngineConfig};
use crate::types::{StrategyId, TradeOutcomeRecord};

/// Calibrated win rates are kept inside this band.
const MIN_CALIBRATED_WIN_RATE: f64 = 0.01;
const MAX_CALIBRATED_WIN_RATE: f64 = 0.99;
const CONFIDENCE_BUCKET: f64 = 10.0;

#[derive(Debug, Clone)]
pub struct TradeHistoryStore {
    path: PathBuf,
}

impl TradeHistoryStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &TradeOutcomeRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("failed to serialise trade outcome")?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open trade history {}", self.path.display()))?;

        writeln!(file, "{}", line)
            .with_context(|| format!("failed to append to {}", self.path.display()))?;

        debug!(ticket = record.ticket, pnl = record.pnl, "trade outcome persisted");
        Ok(())
    }

    /// All readable records in file order. A missing file is an empty history.
    pub fn load(&self) -> Result<Vec<TradeOutcomeRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = std::fs::File::open(&self.path)
            .with_context(|| format!("failed to open trade history {}", self.path.display()))?;

        let mut out = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("failed to read {}", self.path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TradeOutcomeRecord>(&line) {
                Ok(r) => out.push(r),
                Err(e) => warn!(line = n + 1, error = %e, "skipping malformed history line"),
            }
        }

        info!(path = %self.path.display(), records = out.len(), "trade history loaded");
        Ok(out)
    }
}

// =============================================================================
// Strategy performance
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StrategyStats {
    pub trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub net_pnl: f64,
    pub net_pips: f64,
}

impl StrategyStats {
    fn record(&mut self, r: &TradeOutcomeRecord) {
        self.trades += 1;
        if r.pnl > 0.0 {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.net_pnl += r.pnl;
        self.net_pips += r.pips;
    }

    pub fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.trades as f64
        }
    }
}

/// Fold outcomes per strategy. Records without a strategy (adopted
/// positions) are left out.
pub fn strategy_performance(records: &[TradeOutcomeRecord]) -> BTreeMap<StrategyId, StrategyStats> {
    let mut out: BTreeMap<StrategyId, StrategyStats> = BTreeMap::new();
    for r in records {
        if let Some(id) = r.strategy_id {
            out.entry(id).or_default().record(r);
        }
    }
    out
}

pub fn log_strategy_performance(stats: &BTreeMap<StrategyId, StrategyStats>) {
    if stats.is_empty() {
        info!("no closed trades with a strategy yet");
        return;
    }
    for (id, s) in stats {
        info!(
            strategy = %id,
            trades = s.trades,
            wins = s.wins,
            losses = s.losses,
            win_rate = format!("{:.1}%", s.win_rate() * 100.0),
            net_pnl = format!("{:.2}", s.net_pnl),
            net_pips = format!("{:.1}", s.net_pips),
            "strategy performance"
        );
    }
}

/// Win-rate curves from realised outcomes. Strategies with no bucket of at
/// least `min_samples` trades get no curve.
pub fn calibrate_win_rates(
    records: &[TradeOutcomeRecord],
    min_samples: usize,
) -> BTreeMap<StrategyId, Vec<CalibrationPoint>> {
    // (strategy, bucket) -> (trades, wins, confidence sum)
    let mut buckets: BTreeMap<(StrategyId, i64), (usize, usize, f64)> = BTreeMap::new();
    for r in records {
        let (Some(id), Some(conf)) = (r.strategy_id, r.confidence) else {
            continue;
        };
        if !conf.is_finite() {
            continue;
        }
        let b = buckets
            .entry((id, (conf / CONFIDENCE_BUCKET).floor() as i64))
            .or_insert((0, 0, 0.0));
        b.0 += 1;
        if r.pnl > 0.0 {
            b.1 += 1;
        }
        b.2 += conf;
    }

    let mut out: BTreeMap<StrategyId, Vec<CalibrationPoint>> = BTreeMap::new();
    for ((id, _), (trades, wins, conf_sum)) in buckets {
        if trades < min_samples.max(1) {
            continue;
        }
        out.entry(id).or_default().push(CalibrationPoint {
            confidence: conf_sum / trades as f64,
            win_rate: (wins as f64 / trades as f64)
                .clamp(MIN_CALIBRATED_WIN_RATE, MAX_CALIBRATED_WIN_RATE),
        });
    }

    debug!(strategies = out.len(), min_samples, "win rates calibrated from history");
    out
}

/// Fill `config.win_rate_table` from history for strategies that have no
/// configured curve. Returns the strategies that gained one.
pub fn apply_history_calibration(
    config: &mut EngineConfig,
    records: &[TradeOutcomeRecord],
) -> Vec<StrategyId> {
    if !config.calibrate_from_history {
        return Vec::new();
    }
    let mut added = Vec::new();
    for (id, curve) in calibrate_win_rates(records, config.calibration_min_samples) {
        if !config.win_rate_table.contains_key(&id) {
            config.win_rate_table.insert(id, curve);
            added.push(id);
        }
    }
    if !added.is_empty() {
        info!(strategies = ?added, "win-rate curves calibrated from trade history");
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;
    use chrono::{TimeZone, Utc};

    fn record(ticket: u64, pnl: f64) -> TradeOutcomeRecord {
        TradeOutcomeRecord {
            ticket,
            symbol: "EURUSD".into(),
            direction: Direction::Buy,
            strategy_id: None,
            confidence: None,
            lots: 0.1,
            entry_price: 1.1,
            exit_price: 1.101,
            pips: 10.0,
            pnl,
            closed_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn append_then_load_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = TradeHistoryStore::new(dir.path().join("history.jsonl"));
        store.append(&record(1, 10.0)).unwrap();
        store.append(&record(2, -5.0)).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, vec![record(1, 10.0), record(2, -5.0)]);
    }

    fn strategy_record(id: StrategyId, confidence: f64, pnl: f64) -> TradeOutcomeRecord {
        TradeOutcomeRecord {
            strategy_id: Some(id),
            confidence: Some(confidence),
            ..record(0, pnl)
        }
    }

    #[test]
    fn performance_folds_per_strategy() {
        let records = vec![
            strategy_record(StrategyId::Breakout, 70.0, 20.0),
            strategy_record(StrategyId::Breakout, 72.0, -10.0),
            strategy_record(StrategyId::Breakout, 75.0, 15.0),
            strategy_record(StrategyId::Momentum, 60.0, -8.0),
            record(9, 100.0),
        ];
        let stats = strategy_performance(&records);
        assert_eq!(stats.len(), 2);

        let b = stats[&StrategyId::Breakout];
        assert_eq!((b.trades, b.wins, b.losses), (3, 2, 1));
        assert!((b.net_pnl - 25.0).abs() < 1e-9);
        assert!((b.win_rate() - 2.0 / 3.0).abs() < 1e-12);

        let m = stats[&StrategyId::Momentum];
        assert_eq!((m.trades, m.wins), (1, 0));
    }

    #[test]
    fn calibration_needs_enough_samples_per_bucket() {
        let mut records = Vec::new();
        // 60s bucket: 3 wins out of 4.
        for (i, pnl) in [10.0, 10.0, -5.0, 10.0].into_iter().enumerate() {
            records.push(strategy_record(StrategyId::Fibonacci, 60.0 + i as f64, pnl));
        }
        // 80s bucket: only 2 trades.
        records.push(strategy_record(StrategyId::Fibonacci, 82.0, 10.0));
        records.push(strategy_record(StrategyId::Fibonacci, 84.0, 10.0));
        // No confidence: ignored.
        records.push(TradeOutcomeRecord {
            confidence: None,
            ..strategy_record(StrategyId::Fibonacci, 0.0, -1.0)
        });

        let curves = calibrate_win_rates(&records, 3);
        let curve = &curves[&StrategyId::Fibonacci];
        assert_eq!(curve.len(), 1);
        assert!((curve[0].confidence - 61.5).abs() < 1e-9);
        assert!((curve[0].win_rate - 0.75).abs() < 1e-12);

        assert!(calibrate_win_rates(&records, 10).is_empty());
    }

    #[test]
    fn calibrated_win_rate_stays_inside_open_interval() {
        let records: Vec<_> = (0..5)
            .map(|_| strategy_record(StrategyId::Momentum, 55.0, 5.0))
            .collect();
        let curves = calibrate_win_rates(&records, 5);
        assert!((curves[&StrategyId::Momentum][0].win_rate - 0.99).abs() < 1e-12);
    }

    #[test]
    fn configured_curves_win_over_history() {
        let records: Vec<_> = (0..4)
            .flat_map(|_| {
                [
                    strategy_record(StrategyId::Breakout, 71.0, 10.0),
                    strategy_record(StrategyId::Momentum, 71.0, -10.0),
                ]
            })
            .collect();

        let mut cfg = EngineConfig::default();
        cfg.calibration_min_samples = 4;
        cfg.win_rate_table.insert(
            StrategyId::Breakout,
            vec![CalibrationPoint { confidence: 70.0, win_rate: 0.6 }],
        );
        let added = apply_history_calibration(&mut cfg, &records);
        assert_eq!(added, vec![StrategyId::Momentum]);
        assert_eq!(cfg.win_rate_table[&StrategyId::Breakout][0].win_rate, 0.6);
        assert!((cfg.win_rate_table[&StrategyId::Momentum][0].win_rate - 0.01).abs() < 1e-12);
        assert!(cfg.validate().is_ok());

        let mut off = EngineConfig::default();
        off.calibrate_from_history = false;
        off.calibration_min_samples = 4;
        assert!(apply_history_calibration(&mut off, &records).is_empty());
        assert!(off.win_rate_table.is_empty());
    }

    #[test]
    fn missing_file_is_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = TradeHistoryStore::new(dir.path().join("none.jsonl"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let store = TradeHistoryStore::new(&path);
        store.append(&record(1, 1.0)).unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "{{not json"))
            .unwrap();
        store.append(&record(3, 2.0)).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].ticket, 3);
    }
}
