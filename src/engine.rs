// =============================================================================
// Scan Engine: one risk-and-exit cycle over positions and candidate signals
// =============================================================================
//
// Cycle order:
//
//   1. Reconcile and trail open positions (stop modifications, observed exits).
//   2. Drawdown admission. While paused every candidate is blocked before any
//      stop or sizing work happens.
//   3. Per-symbol analysis in parallel: pip size, volatility regime, market
//      structure. Faults are classified per symbol and never abort the cycle.
//   4. Stop distances and expected value per candidate; rank by EV.
//   5. Under the book lock: capacity and scan limits, correlation-aware
//      sizing, commission floor, intent emission, exposure reservation.
//
// Shared mutable state (correlation ledger, drawdown state, trailing map)
// lives in a single `RiskBook` behind one mutex.
// =============================================================================

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::decision_envelope::{AdmissionDecision, DecisionLayer};
use crate::error::{ConfigError, StopRejection, SymbolFault};
use crate::exit::stops::{price_levels, CommissionInput, DynamicStopCalculator, StopDistances, StopRequest};
use crate::exit::trailing::{BreakevenPolicy, TrailOutcome, TrailingStopEngine};
use crate::pip_scale::{crypto_session_multiplier, CryptoAsset, PipScale};
use crate::regime::{VolatilityRegimeClassifier, VolatilitySnapshot};
use crate::risk::correlation::{CorrelationGroup, CorrelationLedger, ExposureKey};
use crate::risk::drawdown::{Admission, DrawdownGuard, DrawdownLimits, DrawdownState};
use crate::risk::expectancy::{expected_value, model_from_table, TradeEconomics, WinRateModel};
use crate::risk::sizing::{PositionSizer, SizingRequest};
use crate::runtime_config::{EngineConfig, StrategyProfile};
use crate::session::SessionContext;
use crate::structure::{MarketStructure, MarketStructureAnalyzer};
use crate::types::{
    round_to, AccountState, CandidateSignal, Direction, ObservedExit, PositionView, PriceBar,
    StopModification, Ticket, TradeIntent, TradeOutcomeRecord,
};

// =============================================================================
// Inputs & outputs
// =============================================================================

/// Market data for one symbol as delivered by the data collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolMarket {
    pub symbol: String,
    #[serde(default)]
    pub bars: Vec<PriceBar>,
    /// ATR in price units, aligned to `bars`.
    #[serde(default)]
    pub atr_series: Vec<f64>,
    #[serde(default)]
    pub adx: Option<f64>,
    /// Set by the collaborator when retrieval failed.
    #[serde(default)]
    pub error: Option<String>,
}

/// Everything one cycle needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanInput {
    pub now: DateTime<Utc>,
    pub account: AccountState,
    #[serde(default)]
    pub markets: Vec<SymbolMarket>,
    #[serde(default)]
    pub signals: Vec<CandidateSignal>,
    #[serde(default)]
    pub positions: Vec<PositionView>,
}

/// Pure per-symbol analysis result.
#[derive(Debug, Clone)]
pub struct SymbolAnalysis {
    pub symbol: String,
    pub pip_size: f64,
    pub last_price: f64,
    pub volatility: VolatilitySnapshot,
    pub structure: MarketStructure,
    pub crypto: Option<CryptoAsset>,
}

impl SymbolAnalysis {
    /// Widening factor for the strategy stop range.
    pub fn range_scale(&self) -> f64 {
        self.crypto.map_or(1.0, |c| c.volatility_multiplier())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    /// Set when the drawdown guard short-circuited admission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<Admission>,
    pub intents: Vec<TradeIntent>,
    pub modifications: Vec<StopModification>,
    pub exits: Vec<ObservedExit>,
    pub decisions: Vec<AdmissionDecision>,
    #[serde(serialize_with = "serialize_faults")]
    pub faults: Vec<SymbolFault>,
    /// Tickets dropped because the broker no longer reports them.
    pub released_tickets: Vec<Ticket>,
}

fn serialize_faults<S: serde::Serializer>(
    faults: &[SymbolFault],
    s: S,
) -> Result<S::Ok, S::Error> {
    s.collect_seq(faults.iter().map(|f| f.to_string()))
}

impl CycleReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            paused: None,
            intents: Vec::new(),
            modifications: Vec::new(),
            exits: Vec::new(),
            decisions: Vec::new(),
            faults: Vec::new(),
            released_tickets: Vec::new(),
        }
    }
}

// =============================================================================
// Shared state
// =============================================================================

struct RiskBook {
    ledger: CorrelationLedger,
    guard: DrawdownGuard,
    trailing: TrailingStopEngine,
}

/// Candidate that passed analysis and stop placement, awaiting admission.
struct Ranked<'a> {
    signal: &'a CandidateSignal,
    analysis: &'a SymbolAnalysis,
    profile: &'a StrategyProfile,
    entry: f64,
    distances: StopDistances,
    win_rate: f64,
    ev_per_lot: f64,
}

// =============================================================================
// ScanEngine
// =============================================================================

pub struct ScanEngine {
    config: EngineConfig,
    pip_scale: PipScale,
    volatility: VolatilityRegimeClassifier,
    sessions: SessionContext,
    analyzer: MarketStructureAnalyzer,
    stops: DynamicStopCalculator,
    sizer: PositionSizer,
    win_rate: Box<dyn WinRateModel>,
    book: Mutex<RiskBook>,
}

impl ScanEngine {
    /// Validate `config` and build every component from it.
    pub fn new(config: EngineConfig, starting_equity: f64) -> Result<Self, ConfigError> {
        config.validate()?;

        let sessions = SessionContext::new(config.sessions.clone())?;
        let breakeven = config.enable_breakeven.then_some(BreakevenPolicy {
            trigger_pips: config.breakeven_pips,
            buffer_pips: config.breakeven_buffer_pips,
        });

        let book = RiskBook {
            ledger: CorrelationLedger::new(&config.correlation_groups),
            guard: DrawdownGuard::new(DrawdownLimits::from_config(&config), starting_equity),
            trailing: TrailingStopEngine::new(breakeven),
        };

        info!(
            symbols = config.symbols.len(),
            strategies = config.strategies.len(),
            groups = config.correlation_groups.len(),
            calibrated = !config.win_rate_table.is_empty(),
            "ScanEngine initialised"
        );

        Ok(Self {
            pip_scale: PipScale::new(&config.pip_overrides),
            volatility: VolatilityRegimeClassifier::new(
                config.volatility_window,
                config.volatility_min_samples,
            ),
            sessions,
            analyzer: MarketStructureAnalyzer::new(
                config.swing_radius,
                config.zone_tolerance_k,
                config.strong_adx,
            ),
            stops: DynamicStopCalculator::new(config.strategies.clone()),
            sizer: PositionSizer {
                risk_per_trade: config.risk_per_trade,
                min_lot: config.min_lot,
                max_lot: config.max_lot,
                lot_step: config.lot_step,
                lot_ceiling: config.lot_ceiling,
            },
            win_rate: model_from_table(&config.win_rate_table),
            book: Mutex::new(book),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Per-symbol analysis (pure)
    // -------------------------------------------------------------------------

    pub fn analyze_symbol(
        &self,
        market: &SymbolMarket,
        now: DateTime<Utc>,
    ) -> Result<SymbolAnalysis, SymbolFault> {
        let symbol = market.symbol.as_str();

        if let Some(reason) = &market.error {
            return Err(SymbolFault::stale(symbol, reason.clone()));
        }
        let last = market
            .bars
            .last()
            .ok_or_else(|| SymbolFault::stale(symbol, "no bars"))?;

        let age = now - last.open_time;
        if age > Duration::minutes(self.config.max_bar_age_minutes) {
            return Err(SymbolFault::stale(
                symbol,
                format!("last bar is {} minutes old", age.num_minutes()),
            ));
        }
        if market.atr_series.is_empty() {
            return Err(SymbolFault::DataInsufficient {
                symbol: symbol.to_string(),
                what: "ATR samples",
                needed: 1,
                available: 0,
            });
        }
        let adx = market
            .adx
            .ok_or_else(|| SymbolFault::stale(symbol, "ADX missing"))?;

        let last_price = last.close;
        let pip_size = self.pip_scale.resolve(symbol, last_price)?;
        let volatility = self.volatility.classify(&market.atr_series);
        let structure = self
            .analyzer
            .analyze(symbol, &market.bars, volatility.atr_value, adx)?;

        Ok(SymbolAnalysis {
            symbol: symbol.to_string(),
            pip_size,
            last_price,
            volatility,
            structure,
            crypto: CryptoAsset::detect(symbol),
        })
    }

    // -------------------------------------------------------------------------
    // Scan cycle
    // -------------------------------------------------------------------------

    pub fn run_cycle(&self, input: &ScanInput) -> CycleReport {
        let now = input.now;
        let mut report = CycleReport::new(now);

        // ── 1. Open positions ────────────────────────────────────────
        let admission = {
            let mut book = self.book.lock();
            self.manage_positions(&mut book, input, &mut report);
            book.guard.roll_day(now, input.account.equity);
            book.guard.admission(now)
        };

        // ── 2. Drawdown gate ─────────────────────────────────────────
        if let Admission::Paused { until, reason } = admission {
            info!(
                %reason,
                until = %until.to_rfc3339(),
                candidates = input.signals.len(),
                "admission paused, candidates blocked"
            );
            for sig in &input.signals {
                report.decisions.push(AdmissionDecision::blocked(
                    sig,
                    DecisionLayer::Drawdown,
                    format!("{} pause until {}", reason, until.to_rfc3339()),
                    now,
                ));
            }
            report.paused = Some(admission);
            return report;
        }

        // ── 3. Per-symbol analysis ───────────────────────────────────
        let mut eligible = Vec::new();
        for sig in &input.signals {
            if sig.confidence < self.config.min_confidence {
                debug!(symbol = %sig.symbol, confidence = sig.confidence, "below min confidence");
                report.decisions.push(AdmissionDecision::skipped(
                    sig,
                    DecisionLayer::Confidence,
                    format!(
                        "confidence {:.1} below {:.1}",
                        sig.confidence, self.config.min_confidence
                    ),
                    now,
                ));
            } else {
                eligible.push(sig);
            }
        }

        let mut wanted: Vec<&str> = eligible.iter().map(|s| s.symbol.as_str()).collect();
        wanted.sort_unstable();
        wanted.dedup();

        let markets: HashMap<&str, &SymbolMarket> = input
            .markets
            .iter()
            .map(|m| (m.symbol.as_str(), m))
            .collect();

        let analyses: HashMap<&str, Result<SymbolAnalysis, SymbolFault>> = wanted
            .par_iter()
            .map(|sym| {
                let result = match markets.get(sym) {
                    Some(m) => self.analyze_symbol(m, now),
                    None => Err(SymbolFault::stale(*sym, "no market data delivered")),
                };
                (*sym, result)
            })
            .collect();

        for sym in &wanted {
            if let Some(Err(fault)) = analyses.get(sym) {
                warn!(symbol = sym, fault = %fault, "symbol skipped this cycle");
                report.faults.push(fault.clone());
            }
        }

        // ── 4. Stops & expectancy ────────────────────────────────────
        let session = self.sessions.resolve(now);
        let mut ranked: Vec<Ranked<'_>> = Vec::new();

        for sig in eligible {
            let analysis = match analyses.get(sig.symbol.as_str()) {
                Some(Ok(a)) => a,
                Some(Err(fault)) => {
                    report.decisions.push(AdmissionDecision::blocked(
                        sig,
                        DecisionLayer::MarketData,
                        fault.to_string(),
                        now,
                    ));
                    continue;
                }
                None => continue,
            };

            let entry = sig.entry_price.unwrap_or(analysis.last_price);
            if !(entry.is_finite() && entry > 0.0) {
                report.decisions.push(AdmissionDecision::blocked(
                    sig,
                    DecisionLayer::MarketData,
                    format!("unusable entry price {}", entry),
                    now,
                ));
                continue;
            }

            let profile = match self.stops.profile(sig.strategy_id) {
                Ok(p) => p,
                Err(e) => {
                    report
                        .decisions
                        .push(AdmissionDecision::blocked(sig, DecisionLayer::Stops, e.to_string(), now));
                    continue;
                }
            };

            // Crypto trades around the clock; liquidity replaces the FX session.
            let session_multiplier = match analysis.crypto {
                Some(_) => crypto_session_multiplier(now),
                None => session.volatility_multiplier,
            };

            let req = StopRequest {
                strategy_id: sig.strategy_id,
                direction: sig.direction,
                entry_price: entry,
                atr: analysis.volatility.atr_value,
                regime: analysis.volatility.regime,
                session_multiplier,
                trend: analysis.structure.trend,
                structure: Some(&analysis.structure),
                pip_size: analysis.pip_size,
                range_scale: analysis.range_scale(),
            };

            let distances = match self.stops.compute_distances(&req) {
                Ok(d) => d,
                Err(e) => {
                    report
                        .decisions
                        .push(AdmissionDecision::blocked(sig, DecisionLayer::Stops, e.to_string(), now));
                    continue;
                }
            };

            let pip_value = self.config.pip_value_for(&sig.symbol, analysis.pip_size);
            let win_rate = self.win_rate.win_rate(sig.strategy_id, sig.confidence);
            let ev_per_lot = expected_value(
                win_rate,
                &TradeEconomics {
                    sl_pips: distances.sl_pips,
                    tp_pips: distances.tp_pips,
                    lots: 1.0,
                    pip_value_per_lot: pip_value,
                    commission_per_lot: self.config.commission_per_lot,
                },
            );

            if ev_per_lot <= 0.0 {
                report.decisions.push(AdmissionDecision::skipped(
                    sig,
                    DecisionLayer::Expectancy,
                    format!("expected value {:.2} per lot", ev_per_lot),
                    now,
                ));
                continue;
            }

            ranked.push(Ranked {
                signal: sig,
                analysis,
                profile,
                entry,
                distances,
                win_rate,
                ev_per_lot,
            });
        }

        ranked.sort_by(|a, b| b.ev_per_lot.total_cmp(&a.ev_per_lot));

        // ── 5. Admission, sizing, emission ───────────────────────────
        {
            let mut book = self.book.lock();
            self.admit_ranked(&mut book, input, ranked, &mut report);
        }

        info!(
            session = %session.name,
            intents = report.intents.len(),
            modifications = report.modifications.len(),
            exits = report.exits.len(),
            faults = report.faults.len(),
            "scan cycle complete"
        );

        report
    }

    fn manage_positions(&self, book: &mut RiskBook, input: &ScanInput, report: &mut CycleReport) {
        let open: HashSet<Ticket> = input.positions.iter().map(|p| p.ticket).collect();

        report.released_tickets = book.trailing.retain_open(&open);
        for t in book.ledger.retain_open(&open) {
            if !report.released_tickets.contains(&t) {
                report.released_tickets.push(t);
            }
        }

        for pos in &input.positions {
            if !book.ledger.contains_ticket(pos.ticket) {
                book.ledger
                    .adopt(pos.ticket, &pos.symbol, pos.direction, pos.volume);
            }
            if !book.trailing.contains(pos.ticket) {
                match self.pip_scale.resolve(&pos.symbol, pos.entry_price) {
                    Ok(pip) => book.trailing.adopt(pos, pip),
                    Err(fault) => {
                        warn!(ticket = pos.ticket, fault = %fault, "cannot manage position");
                        report.faults.push(fault);
                        continue;
                    }
                }
            }

            match book.trailing.update(pos.ticket, pos.current_price) {
                TrailOutcome::Tightened(m) => report.modifications.push(m),
                TrailOutcome::Crossed(x) => report.exits.push(x),
                TrailOutcome::Held | TrailOutcome::Unknown => {}
            }
        }
    }

    fn admit_ranked(
        &self,
        book: &mut RiskBook,
        input: &ScanInput,
        ranked: Vec<Ranked<'_>>,
        report: &mut CycleReport,
    ) {
        let now = input.now;
        let mut busy: HashSet<String> = input
            .positions
            .iter()
            .map(|p| p.symbol.to_uppercase())
            .collect();
        let mut open_count = book.ledger.len();
        let mut emitted = 0u32;

        for c in ranked {
            let sig = c.signal;

            if emitted >= self.config.max_trades_per_scan {
                report.decisions.push(AdmissionDecision::skipped(
                    sig,
                    DecisionLayer::ScanLimit,
                    format!("{} intents already emitted this scan", emitted),
                    now,
                ));
                continue;
            }
            if let Admission::Paused { reason, .. } = book.guard.admission(now) {
                report.decisions.push(AdmissionDecision::blocked(
                    sig,
                    DecisionLayer::Drawdown,
                    reason.to_string(),
                    now,
                ));
                continue;
            }
            if open_count >= self.config.max_concurrent_trades as usize {
                report.decisions.push(AdmissionDecision::blocked(
                    sig,
                    DecisionLayer::Capacity,
                    format!("{} of {} trades open", open_count, self.config.max_concurrent_trades),
                    now,
                ));
                continue;
            }
            if busy.contains(&sig.symbol.to_uppercase()) {
                report.decisions.push(AdmissionDecision::blocked(
                    sig,
                    DecisionLayer::Capacity,
                    "symbol already has an open trade",
                    now,
                ));
                continue;
            }

            // ── Sizing ───────────────────────────────────────────────
            let pip_value = self.config.pip_value_for(&sig.symbol, c.analysis.pip_size);
            let correlation = book.ledger.correlation_factor(&sig.symbol, sig.direction);
            let sizing = self.sizer.size(&SizingRequest {
                equity: input.account.equity,
                sl_pips: c.distances.sl_pips,
                pip_value_per_lot: pip_value,
                confidence: sig.confidence,
                correlation_factor: correlation,
            });

            // ── Commission floor ─────────────────────────────────────
            let commission = CommissionInput {
                commission_per_lot: self.config.commission_per_lot,
                lot_size: sizing.lots,
                pip_value_per_lot: pip_value,
            };
            let distances = match self.stops.apply_commission_floor(
                sig.strategy_id,
                c.distances,
                &commission,
            ) {
                Ok(d) => d,
                Err(e @ StopRejection::Uneconomical { .. }) => {
                    debug!(symbol = %sig.symbol, lots = sizing.lots, reason = %e, "candidate uneconomical");
                    report.decisions.push(AdmissionDecision::skipped(
                        sig,
                        DecisionLayer::Stops,
                        e.to_string(),
                        now,
                    ));
                    continue;
                }
                Err(e) => {
                    report.decisions.push(AdmissionDecision::blocked(
                        sig,
                        DecisionLayer::Stops,
                        e.to_string(),
                        now,
                    ));
                    continue;
                }
            };

            let pip = c.analysis.pip_size;
            let (sl_price, tp_price) =
                price_levels(sig.direction, c.entry, distances.sl_pips, distances.tp_pips, pip);
            let sides_ok = match sig.direction {
                Direction::Buy => sl_price < c.entry && tp_price > c.entry,
                Direction::Sell => sl_price > c.entry && tp_price < c.entry,
            };
            if !sides_ok || !(sizing.lots > 0.0 && sizing.lots <= self.config.lot_ceiling) {
                error!(
                    symbol = %sig.symbol,
                    entry = c.entry,
                    sl_price,
                    tp_price,
                    lots = sizing.lots,
                    "intent invariant violated, candidate rejected"
                );
                report.decisions.push(AdmissionDecision::blocked(
                    sig,
                    DecisionLayer::Stops,
                    "invariant violated: levels or lots out of range",
                    now,
                ));
                continue;
            }

            // ── Trailing ─────────────────────────────────────────────
            let use_trailing = c.profile.trails_at(sig.confidence);
            let trailing_distance_pips = if use_trailing {
                let atr_pips = c.analysis.volatility.atr_value / pip;
                let scale = c.analysis.range_scale();
                round_to(
                    (atr_pips * c.profile.trail_atr_mult)
                        .clamp(c.profile.sl_min * scale, c.profile.sl_max * scale),
                    1,
                )
            } else {
                0.0
            };

            let expected = expected_value(
                c.win_rate,
                &TradeEconomics {
                    sl_pips: distances.sl_pips,
                    tp_pips: distances.tp_pips,
                    lots: sizing.lots,
                    pip_value_per_lot: pip_value,
                    commission_per_lot: self.config.commission_per_lot,
                },
            );

            let intent = TradeIntent {
                id: Uuid::new_v4(),
                symbol: sig.symbol.clone(),
                direction: sig.direction,
                entry_price: c.entry,
                sl_price,
                tp_price: Some(tp_price),
                lots: sizing.lots,
                use_trailing_stop: use_trailing,
                trailing_distance_pips,
                strategy_id: sig.strategy_id,
                confidence: sig.confidence,
                sl_pips: distances.sl_pips,
                tp_pips: distances.tp_pips,
                pip_size: pip,
                expected_value: round_to(expected, 2),
                created_at: now,
            };

            book.ledger
                .reserve(intent.id, &intent.symbol, intent.direction, intent.lots);
            open_count += 1;
            emitted += 1;
            busy.insert(sig.symbol.to_uppercase());

            info!(
                symbol = %intent.symbol,
                direction = %intent.direction,
                strategy = %intent.strategy_id,
                lots = intent.lots,
                sl_pips = intent.sl_pips,
                tp_pips = intent.tp_pips,
                trailing = intent.use_trailing_stop,
                correlation = format!("{:.2}", correlation),
                ev = intent.expected_value,
                regime = %c.analysis.volatility.regime,
                "trade intent emitted"
            );

            report
                .decisions
                .push(AdmissionDecision::allow(sig, intent.id, now));
            report.intents.push(intent);
        }
    }

    // -------------------------------------------------------------------------
    // Execution events
    // -------------------------------------------------------------------------

    /// Broker filled an emitted intent.
    pub fn on_position_opened(&self, intent: &TradeIntent, ticket: Ticket) -> Option<StopModification> {
        let keep_target = self
            .config
            .strategies
            .get(&intent.strategy_id)
            .map(|p| p.keep_target_when_trailing)
            .unwrap_or(false);
        let mut book = self.book.lock();
        book.ledger.bind_ticket(intent.id, ticket);
        book.trailing.register(ticket, intent, keep_target)
    }

    /// Broker refused an emitted intent.
    pub fn on_order_rejected(&self, intent_id: Uuid) {
        let released = self.book.lock().ledger.release(ExposureKey::Intent(intent_id));
        debug!(%intent_id, released, "order rejected, exposure released");
    }

    /// Position closed; feeds the drawdown guard.
    pub fn on_position_closed(&self, outcome: &TradeOutcomeRecord) {
        let mut book = self.book.lock();
        book.trailing.on_position_closed(outcome.ticket);
        book.ledger.release(ExposureKey::Ticket(outcome.ticket));
        book.guard.record_outcome(outcome.pnl, outcome.closed_at);
        info!(
            ticket = outcome.ticket,
            symbol = %outcome.symbol,
            pips = outcome.pips,
            pnl = outcome.pnl,
            "position closed"
        );
    }

    /// Pull back every pending intent in `report` when the guard paused after
    /// the report was built, i.e. one of its own exits was the trigger. Each
    /// withdrawn intent has its exposure released and its decision turned
    /// into a drawdown block. Returns the number withdrawn.
    pub fn withdraw_if_paused(&self, report: &mut CycleReport, now: DateTime<Utc>) -> usize {
        if report.intents.is_empty() {
            return 0;
        }
        let mut book = self.book.lock();
        let admission = book.guard.admission(now);
        let Admission::Paused { until, reason } = admission else {
            return 0;
        };

        let withdrawn: Vec<TradeIntent> = report.intents.drain(..).collect();
        for intent in &withdrawn {
            book.ledger.release(ExposureKey::Intent(intent.id));
            if let Some(d) = report
                .decisions
                .iter_mut()
                .find(|d| d.intent_id == Some(intent.id))
            {
                d.withdraw(
                    DecisionLayer::Drawdown,
                    format!("{} pause until {}", reason, until.to_rfc3339()),
                );
            }
        }
        report.paused = Some(admission);

        warn!(
            %reason,
            until = %until.to_rfc3339(),
            withdrawn = withdrawn.len(),
            "guard paused by this cycle's exits, pending intents withdrawn"
        );
        withdrawn.len()
    }

    /// Rebuild drawdown state from persisted outcomes.
    pub fn replay_history(&self, records: &[TradeOutcomeRecord]) {
        let mut book = self.book.lock();
        for r in records {
            book.guard.record_outcome(r.pnl, r.closed_at);
        }
        info!(records = records.len(), "trade history replayed into drawdown guard");
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    pub fn admission(&self, now: DateTime<Utc>) -> Admission {
        self.book.lock().guard.admission(now)
    }

    pub fn drawdown_state(&self) -> DrawdownState {
        self.book.lock().guard.state().clone()
    }

    pub fn correlation_snapshot(&self) -> Vec<CorrelationGroup> {
        self.book.lock().ledger.snapshot()
    }

    pub fn tracked_positions(&self) -> usize {
        self.book.lock().trailing.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
