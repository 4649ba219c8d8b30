// =============================================================================
// Engine Configuration: every recognised option, validated once at startup
// =============================================================================
//
// All fields carry a serde default so an older or partial JSON file still
// loads. `validate` collects every out-of-range value in one pass and the
// binary refuses to start a scan loop until it passes.
//
// Persistence uses an atomic tmp + rename pattern.
// =============================================================================

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::pip_scale::CryptoAsset;
use crate::session::{default_sessions, SessionContext, SessionWindow};
use crate::types::StrategyId;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<String> {
    [
        "EURUSD", "GBPUSD", "USDJPY", "AUDUSD", "USDCAD", "USDCHF", "NZDUSD", "EURJPY",
        "GBPJPY", "EURGBP", "XAUUSD",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_risk_per_trade() -> f64 {
    0.01
}

fn default_max_concurrent_trades() -> u32 {
    5
}

fn default_max_trades_per_scan() -> u32 {
    3
}

fn default_min_confidence() -> f64 {
    60.0
}

fn default_commission_per_lot() -> f64 {
    6.0
}

fn default_pip_value_per_lot() -> f64 {
    10.0
}

fn default_min_lot() -> f64 {
    0.01
}

fn default_max_lot() -> f64 {
    100.0
}

fn default_lot_step() -> f64 {
    0.01
}

fn default_lot_ceiling() -> f64 {
    5.0
}

fn default_max_daily_loss() -> f64 {
    0.03
}

fn default_max_hourly_loss() -> f64 {
    0.01
}

fn default_max_consecutive_losses() -> u32 {
    5
}

fn default_pause_minutes() -> i64 {
    60
}

fn default_rolling_window_minutes() -> i64 {
    60
}

fn default_scan_interval_secs() -> u64 {
    45
}

fn default_breakeven_pips() -> f64 {
    15.0
}

fn default_breakeven_buffer_pips() -> f64 {
    1.0
}

fn default_volatility_window() -> usize {
    100
}

fn default_volatility_min_samples() -> usize {
    20
}

fn default_swing_radius() -> usize {
    5
}

fn default_zone_tolerance_k() -> f64 {
    0.5
}

fn default_strong_adx() -> f64 {
    25.0
}

fn default_max_bar_age_minutes() -> i64 {
    30
}

fn default_calibration_min_samples() -> usize {
    30
}

fn default_history_path() -> String {
    "trade_history.jsonl".to_string()
}

fn default_correlation_groups() -> Vec<CorrelationGroupConfig> {
    let group = |id: &str, members: &[&str]| CorrelationGroupConfig {
        id: id.to_string(),
        members: members.iter().map(|s| s.to_string()).collect(),
    };
    vec![
        group("eur_gbp_usd", &["EURUSD", "GBPUSD", "EURGBP"]),
        group("aud_nzd", &["AUDUSD", "NZDUSD", "AUDNZD"]),
        group("jpy_crosses", &["USDJPY", "EURJPY", "GBPJPY"]),
        group("cad", &["USDCAD", "CADJPY"]),
        group("chf", &["USDCHF", "CHFJPY"]),
    ]
}

// =============================================================================
// StrategyProfile
// =============================================================================

/// Stop/target table row for one signal family. Distances are in pips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyProfile {
    pub sl_mult: f64,
    pub tp_mult: f64,
    pub sl_min: f64,
    pub sl_max: f64,
    pub tp_min: f64,
    pub tp_max: f64,

    /// Minimum target regardless of commission (12 standard, 10 scalping).
    pub tp_floor: f64,

    /// Whether a strong trend widens this family's distances.
    #[serde(default)]
    pub trend_sensitive: bool,

    /// Confidence at or above which new trades trail. `None` never trails.
    #[serde(default)]
    pub trail_min_confidence: Option<f64>,

    /// Trailing distance as a multiple of ATR (clipped to the SL bounds).
    #[serde(default = "default_trail_atr_mult")]
    pub trail_atr_mult: f64,

    /// Keep the fixed target as a ceiling once trailing is active.
    #[serde(default)]
    pub keep_target_when_trailing: bool,
}

fn default_trail_atr_mult() -> f64 {
    1.0
}

impl StrategyProfile {
    #[allow(clippy::too_many_arguments)]
    fn table_row(
        sl_mult: f64,
        tp_mult: f64,
        sl: (f64, f64),
        tp: (f64, f64),
        tp_floor: f64,
        trend_sensitive: bool,
        trail_min_confidence: Option<f64>,
    ) -> Self {
        Self {
            sl_mult,
            tp_mult,
            sl_min: sl.0,
            sl_max: sl.1,
            tp_min: tp.0,
            tp_max: tp.1,
            tp_floor,
            trend_sensitive,
            trail_min_confidence,
            trail_atr_mult: default_trail_atr_mult(),
            keep_target_when_trailing: false,
        }
    }

    /// Whether a signal of this family at `confidence` should trail.
    pub fn trails_at(&self, confidence: f64) -> bool {
        self.trail_min_confidence
            .map(|min| confidence >= min)
            .unwrap_or(false)
    }
}

pub fn default_strategy_profiles() -> BTreeMap<StrategyId, StrategyProfile> {
    use StrategyId::*;
    let mut m = BTreeMap::new();
    m.insert(
        TrendFollowing,
        StrategyProfile::table_row(1.5, 3.0, (8.0, 25.0), (15.0, 45.0), 12.0, true, Some(70.0)),
    );
    m.insert(
        MeanReversion,
        StrategyProfile::table_row(0.8, 1.2, (6.0, 15.0), (10.0, 25.0), 12.0, false, None),
    );
    m.insert(
        Breakout,
        StrategyProfile::table_row(1.2, 2.5, (10.0, 25.0), (20.0, 50.0), 12.0, true, Some(0.0)),
    );
    m.insert(
        Momentum,
        StrategyProfile::table_row(0.9, 1.5, (5.0, 12.0), (8.0, 20.0), 10.0, false, None),
    );
    m.insert(
        MultiTimeframe,
        StrategyProfile::table_row(1.8, 3.5, (12.0, 30.0), (30.0, 75.0), 12.0, false, Some(75.0)),
    );
    m.insert(
        Fibonacci,
        StrategyProfile::table_row(1.0, 2.0, (8.0, 20.0), (16.0, 40.0), 12.0, false, None),
    );
    m
}

// =============================================================================
// Correlation groups & win-rate calibration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationGroupConfig {
    pub id: String,
    pub members: Vec<String>,
}

/// One point of a calibrated confidence -> win-rate curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub confidence: f64,
    pub win_rate: f64,
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration for the exit & risk engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // --- Universe -----------------------------------------------------------

    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    // --- Admission ----------------------------------------------------------

    /// Fraction of equity risked per trade (0.01 = 1 %).
    #[serde(default = "default_risk_per_trade")]
    pub risk_per_trade: f64,

    #[serde(default = "default_max_concurrent_trades")]
    pub max_concurrent_trades: u32,

    #[serde(default = "default_max_trades_per_scan")]
    pub max_trades_per_scan: u32,

    /// Signals below this confidence (0-100) never reach sizing.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    // --- Costs & lots -------------------------------------------------------

    /// Commission charged per lot on each side of the trade.
    #[serde(default = "default_commission_per_lot")]
    pub commission_per_lot: f64,

    /// Account-currency value of one pip on one standard lot.
    #[serde(default = "default_pip_value_per_lot")]
    pub pip_value_per_lot: f64,

    /// Per-symbol pip value overrides.
    #[serde(default)]
    pub pip_values: HashMap<String, f64>,

    #[serde(default = "default_min_lot")]
    pub min_lot: f64,

    /// Broker maximum.
    #[serde(default = "default_max_lot")]
    pub max_lot: f64,

    #[serde(default = "default_lot_step")]
    pub lot_step: f64,

    /// Engine-wide ceiling on a single trade's size.
    #[serde(default = "default_lot_ceiling")]
    pub lot_ceiling: f64,

    // --- Drawdown guard -----------------------------------------------------

    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: f64,

    #[serde(default = "default_max_hourly_loss")]
    pub max_hourly_loss: f64,

    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,

    #[serde(default = "default_pause_minutes")]
    pub pause_minutes: i64,

    #[serde(default = "default_rolling_window_minutes")]
    pub rolling_window_minutes: i64,

    // --- Scan loop ----------------------------------------------------------

    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,

    /// Bars older than this are treated as stale market data.
    #[serde(default = "default_max_bar_age_minutes")]
    pub max_bar_age_minutes: i64,

    // --- Break-even lock ----------------------------------------------------

    #[serde(default = "default_true")]
    pub enable_breakeven: bool,

    #[serde(default = "default_breakeven_pips")]
    pub breakeven_pips: f64,

    #[serde(default = "default_breakeven_buffer_pips")]
    pub breakeven_buffer_pips: f64,

    // --- Analysis -----------------------------------------------------------

    #[serde(default = "default_volatility_window")]
    pub volatility_window: usize,

    #[serde(default = "default_volatility_min_samples")]
    pub volatility_min_samples: usize,

    #[serde(default = "default_swing_radius")]
    pub swing_radius: usize,

    /// Zone clustering tolerance as a multiple of ATR / price.
    #[serde(default = "default_zone_tolerance_k")]
    pub zone_tolerance_k: f64,

    #[serde(default = "default_strong_adx")]
    pub strong_adx: f64,

    // --- Tables -------------------------------------------------------------

    #[serde(default = "default_strategy_profiles")]
    pub strategies: BTreeMap<StrategyId, StrategyProfile>,

    #[serde(default = "default_sessions")]
    pub sessions: Vec<SessionWindow>,

    #[serde(default = "default_correlation_groups")]
    pub correlation_groups: Vec<CorrelationGroupConfig>,

    /// Quote currency (exotic pairs priced 10-100) or crypto ticker -> pip
    /// size.
    #[serde(default)]
    pub pip_overrides: HashMap<String, f64>,

    /// Calibrated win-rate curves. Strategies without a curve use the
    /// linear confidence model.
    #[serde(default)]
    pub win_rate_table: BTreeMap<StrategyId, Vec<CalibrationPoint>>,

    /// Derive curves from trade history for strategies the table leaves out.
    #[serde(default = "default_true")]
    pub calibrate_from_history: bool,

    /// Trades needed in a confidence bucket before it becomes a curve point.
    #[serde(default = "default_calibration_min_samples")]
    pub calibration_min_samples: usize,

    // --- Persistence --------------------------------------------------------

    #[serde(default = "default_history_path")]
    pub history_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            risk_per_trade: default_risk_per_trade(),
            max_concurrent_trades: default_max_concurrent_trades(),
            max_trades_per_scan: default_max_trades_per_scan(),
            min_confidence: default_min_confidence(),
            commission_per_lot: default_commission_per_lot(),
            pip_value_per_lot: default_pip_value_per_lot(),
            pip_values: HashMap::new(),
            min_lot: default_min_lot(),
            max_lot: default_max_lot(),
            lot_step: default_lot_step(),
            lot_ceiling: default_lot_ceiling(),
            max_daily_loss: default_max_daily_loss(),
            max_hourly_loss: default_max_hourly_loss(),
            max_consecutive_losses: default_max_consecutive_losses(),
            pause_minutes: default_pause_minutes(),
            rolling_window_minutes: default_rolling_window_minutes(),
            scan_interval_secs: default_scan_interval_secs(),
            max_bar_age_minutes: default_max_bar_age_minutes(),
            enable_breakeven: true,
            breakeven_pips: default_breakeven_pips(),
            breakeven_buffer_pips: default_breakeven_buffer_pips(),
            volatility_window: default_volatility_window(),
            volatility_min_samples: default_volatility_min_samples(),
            swing_radius: default_swing_radius(),
            zone_tolerance_k: default_zone_tolerance_k(),
            strong_adx: default_strong_adx(),
            strategies: default_strategy_profiles(),
            sessions: default_sessions(),
            correlation_groups: default_correlation_groups(),
            pip_overrides: HashMap::new(),
            win_rate_table: BTreeMap::new(),
            calibrate_from_history: true,
            calibration_min_samples: default_calibration_min_samples(),
            history_path: default_history_path(),
        }
    }
}

fn check_range(problems: &mut Vec<String>, name: &str, value: f64, lo: f64, hi: f64) {
    if !(value >= lo && value <= hi) {
        problems.push(format!("{} = {} outside [{}, {}]", name, value, lo, hi));
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            risk_per_trade = config.risk_per_trade,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist using an atomic write (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    /// Pip value per standard lot for `symbol`. Crypto lots are one coin, so
    /// a pip is worth the pip size itself unless `pip_values` says otherwise.
    pub fn pip_value_for(&self, symbol: &str, pip_size: f64) -> f64 {
        if let Some(v) = self.pip_values.get(&symbol.to_uppercase()) {
            return *v;
        }
        if CryptoAsset::detect(symbol).is_some() {
            pip_size
        } else {
            self.pip_value_per_lot
        }
    }

    /// Check every option against its legal range. Returns all problems at
    /// once.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let mut p = Vec::new();

        check_range(&mut p, "risk_per_trade", self.risk_per_trade, 0.001, 0.05);
        check_range(
            &mut p,
            "max_concurrent_trades",
            self.max_concurrent_trades as f64,
            1.0,
            20.0,
        );
        check_range(
            &mut p,
            "max_trades_per_scan",
            self.max_trades_per_scan as f64,
            1.0,
            20.0,
        );
        check_range(&mut p, "min_confidence", self.min_confidence, 30.0, 100.0);
        check_range(&mut p, "commission_per_lot", self.commission_per_lot, 0.0, 20.0);
        check_range(&mut p, "pip_value_per_lot", self.pip_value_per_lot, 0.01, 1000.0);
        check_range(&mut p, "max_daily_loss", self.max_daily_loss, 0.01, 0.10);
        check_range(&mut p, "max_hourly_loss", self.max_hourly_loss, 0.005, 0.03);
        check_range(
            &mut p,
            "max_consecutive_losses",
            self.max_consecutive_losses as f64,
            3.0,
            10.0,
        );
        check_range(&mut p, "pause_minutes", self.pause_minutes as f64, 1.0, 1440.0);
        check_range(
            &mut p,
            "rolling_window_minutes",
            self.rolling_window_minutes as f64,
            1.0,
            1440.0,
        );
        check_range(
            &mut p,
            "scan_interval_secs",
            self.scan_interval_secs as f64,
            15.0,
            300.0,
        );
        check_range(&mut p, "breakeven_pips", self.breakeven_pips, 5.0, 50.0);
        if !(self.breakeven_buffer_pips >= 0.0 && self.breakeven_buffer_pips < self.breakeven_pips) {
            p.push(format!(
                "breakeven_buffer_pips = {} must be in [0, breakeven_pips)",
                self.breakeven_buffer_pips
            ));
        }
        if self.max_bar_age_minutes < 1 {
            p.push("max_bar_age_minutes must be at least 1".to_string());
        }

        // Lots.
        if !(self.lot_ceiling > 0.0 && self.lot_ceiling <= 100.0) {
            p.push(format!("lot_ceiling = {} outside (0, 100]", self.lot_ceiling));
        }
        if !(self.lot_step > 0.0) {
            p.push(format!("lot_step = {} must be positive", self.lot_step));
        }
        if !(self.min_lot > 0.0 && self.min_lot <= self.max_lot.min(self.lot_ceiling)) {
            p.push(format!(
                "min_lot = {} must be positive and below max_lot/lot_ceiling",
                self.min_lot
            ));
        }
        for (sym, v) in &self.pip_values {
            if !(*v > 0.0) {
                p.push(format!("pip_values[{}] = {} must be positive", sym, v));
            }
        }

        // Analysis.
        if self.volatility_min_samples < 2 || self.volatility_min_samples > self.volatility_window {
            p.push(format!(
                "volatility_min_samples = {} must be in [2, volatility_window]",
                self.volatility_min_samples
            ));
        }
        check_range(&mut p, "swing_radius", self.swing_radius as f64, 1.0, 50.0);
        check_range(&mut p, "zone_tolerance_k", self.zone_tolerance_k, 0.01, 5.0);
        check_range(&mut p, "strong_adx", self.strong_adx, 0.0, 100.0);

        // Strategy table.
        for id in StrategyId::ALL {
            match self.strategies.get(&id) {
                None => p.push(format!("strategy {} has no profile", id)),
                Some(s) => {
                    if !(s.sl_mult > 0.0 && s.tp_mult > 0.0) {
                        p.push(format!("strategy {} multipliers must be positive", id));
                    }
                    if !(s.sl_min > 0.0 && s.sl_min <= s.sl_max) {
                        p.push(format!("strategy {} requires 0 < sl_min <= sl_max", id));
                    }
                    if !(s.tp_min > 0.0 && s.tp_min <= s.tp_max) {
                        p.push(format!("strategy {} requires 0 < tp_min <= tp_max", id));
                    }
                    if s.tp_max < s.sl_max * 1.2 {
                        p.push(format!(
                            "strategy {} requires tp_max >= 1.2 x sl_max ({} < {})",
                            id,
                            s.tp_max,
                            s.sl_max * 1.2
                        ));
                    }
                    if !(s.tp_floor > 0.0 && s.tp_floor <= s.tp_max) {
                        p.push(format!("strategy {} tp_floor outside (0, tp_max]", id));
                    }
                    if !(s.trail_atr_mult > 0.0) {
                        p.push(format!("strategy {} trail_atr_mult must be positive", id));
                    }
                }
            }
        }

        // Sessions.
        if let Err(ConfigError(session_problems)) = SessionContext::new(self.sessions.clone()) {
            p.extend(session_problems);
        }

        // Correlation groups.
        for g in &self.correlation_groups {
            if g.members.is_empty() {
                p.push(format!("correlation group {} has no members", g.id));
            }
        }

        for (ccy, pip) in &self.pip_overrides {
            if !(*pip > 0.0 && *pip <= 1.0) {
                p.push(format!("pip_overrides[{}] = {} outside (0, 1]", ccy, pip));
            }
        }

        if self.calibration_min_samples == 0 {
            p.push("calibration_min_samples must be at least 1".to_string());
        }

        for (id, curve) in &self.win_rate_table {
            if curve.is_empty() {
                p.push(format!("win_rate_table[{}] is empty", id));
            }
            for pt in curve {
                if !(pt.win_rate > 0.0 && pt.win_rate < 1.0) {
                    p.push(format!("win_rate_table[{}] has win_rate {} outside (0, 1)", id, pt.win_rate));
                }
            }
        }

        if p.is_empty() {
            Ok(())
        } else {
            Err(ConfigError(p))
        }
    }
}
