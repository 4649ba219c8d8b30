// =============================================================================
// Feed & Order Sink: collaborator seams for the standalone binary
// =============================================================================
//
// `SnapshotFeed` reads one `ScanInput` from a JSON file the data collaborator
// keeps current. `OrderSink` is where intents and stop modifications go; the
// bundled `PaperOrderSink` fills everything locally so the engine can run
// without a broker.
//
// `dispatch_cycle` hands one `CycleReport` to a sink in a fixed order:
// stop modifications, then closes (recorded before anything new is opened),
// then a second admission check, then new orders.
// =============================================================================

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::engine::{CycleReport, ScanEngine, ScanInput, SymbolMarket};
use crate::history::TradeHistoryStore;
use crate::runtime_config::EngineConfig;
use crate::types::{
    round_to, ObservedExit, PositionView, StopModification, StrategyId, Ticket, TradeIntent,
    TradeOutcomeRecord,
};

// ---------------------------------------------------------------------------
// Snapshot feed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SnapshotFeed {
    path: PathBuf,
}

impl SnapshotFeed {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<ScanInput> {
        let data = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read snapshot {}", self.path.display()))?;
        let input: ScanInput = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse snapshot {}", self.path.display()))?;
        debug!(
            markets = input.markets.len(),
            signals = input.signals.len(),
            positions = input.positions.len(),
            "snapshot loaded"
        );
        Ok(input)
    }
}

// ---------------------------------------------------------------------------
// Order sink
// ---------------------------------------------------------------------------

pub trait OrderSink: Send {
    /// Place an order for `intent`; returns the broker ticket.
    fn submit(&mut self, intent: &TradeIntent) -> Result<Ticket>;

    /// Apply a stop/target change to an open position.
    fn modify(&mut self, modification: &StopModification) -> Result<()>;

    /// Close a position the engine observed crossing its stop or target.
    fn close(&mut self, exit: &ObservedExit, at: DateTime<Utc>) -> Result<TradeOutcomeRecord>;

    fn open_positions(&self) -> Vec<PositionView>;
}

#[derive(Debug, Clone)]
struct PaperPosition {
    view: PositionView,
    strategy_id: StrategyId,
    confidence: f64,
    pip_size: f64,
}

/// Local fills at the intent's entry price.
#[derive(Debug)]
pub struct PaperOrderSink {
    positions: BTreeMap<Ticket, PaperPosition>,
    next_ticket: Ticket,
    config: EngineConfig,
}

impl PaperOrderSink {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            positions: BTreeMap::new(),
            next_ticket: 1000,
            config: config.clone(),
        }
    }

    /// Update each position's price from the latest close of its symbol.
    pub fn mark_to_market(&mut self, markets: &[SymbolMarket]) {
        for pos in self.positions.values_mut() {
            let last = markets
                .iter()
                .find(|m| m.symbol.eq_ignore_ascii_case(&pos.view.symbol))
                .and_then(|m| m.bars.last());
            if let Some(bar) = last {
                if bar.close.is_finite() && bar.close > 0.0 {
                    pos.view.current_price = bar.close;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl OrderSink for PaperOrderSink {
    fn submit(&mut self, intent: &TradeIntent) -> Result<Ticket> {
        if !(intent.lots > 0.0) {
            bail!("refusing paper fill with {} lots", intent.lots);
        }
        let ticket = self.next_ticket;
        self.next_ticket += 1;

        self.positions.insert(
            ticket,
            PaperPosition {
                view: PositionView {
                    ticket,
                    symbol: intent.symbol.clone(),
                    direction: intent.direction,
                    entry_price: intent.entry_price,
                    volume: intent.lots,
                    current_sl: intent.sl_price,
                    current_tp: intent.tp_price,
                    current_price: intent.entry_price,
                },
                strategy_id: intent.strategy_id,
                confidence: intent.confidence,
                pip_size: intent.pip_size,
            },
        );

        info!(
            ticket,
            symbol = %intent.symbol,
            direction = %intent.direction,
            lots = intent.lots,
            entry = intent.entry_price,
            "paper fill"
        );
        Ok(ticket)
    }

    fn modify(&mut self, modification: &StopModification) -> Result<()> {
        let Some(pos) = self.positions.get_mut(&modification.ticket) else {
            bail!("no paper position with ticket {}", modification.ticket);
        };
        pos.view.current_sl = modification.new_sl;
        pos.view.current_tp = modification.take_profit;
        debug!(
            ticket = modification.ticket,
            sl = format!("{:.5}", modification.new_sl),
            reason = ?modification.reason,
            "paper stop modified"
        );
        Ok(())
    }

    fn close(&mut self, exit: &ObservedExit, at: DateTime<Utc>) -> Result<TradeOutcomeRecord> {
        let Some(pos) = self.positions.remove(&exit.ticket) else {
            bail!("no paper position with ticket {}", exit.ticket);
        };
        let v = pos.view;
        let pip_value = self.config.pip_value_for(&v.symbol, pos.pip_size);
        let pnl = exit.pips * v.volume * pip_value - self.config.commission_per_lot * 2.0;

        info!(
            ticket = v.ticket,
            symbol = %v.symbol,
            trigger = %exit.trigger,
            pips = exit.pips,
            pnl = format!("{:.2}", pnl),
            "paper close"
        );

        Ok(TradeOutcomeRecord {
            ticket: v.ticket,
            symbol: v.symbol,
            direction: v.direction,
            strategy_id: Some(pos.strategy_id),
            confidence: Some(pos.confidence),
            lots: v.volume,
            entry_price: v.entry_price,
            exit_price: exit.exit_price,
            pips: exit.pips,
            pnl: round_to(pnl, 2),
            closed_at: at,
        })
    }

    fn open_positions(&self) -> Vec<PositionView> {
        self.positions.values().map(|p| p.view.clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// What happened to one report at the sink.
#[derive(Debug, Default)]
pub struct DispatchSummary {
    pub modified: usize,
    pub closed: Vec<TradeOutcomeRecord>,
    pub opened: Vec<Ticket>,
    pub rejected: usize,
    /// Intents pulled back because this cycle's closes paused the guard.
    pub withdrawn: usize,
}

pub fn dispatch_cycle<S: OrderSink + ?Sized>(
    engine: &ScanEngine,
    report: &mut CycleReport,
    sink: &mut S,
    history: Option<&TradeHistoryStore>,
    now: DateTime<Utc>,
) -> DispatchSummary {
    let mut summary = DispatchSummary::default();

    for m in &report.modifications {
        match sink.modify(m) {
            Ok(()) => summary.modified += 1,
            Err(e) => warn!(ticket = m.ticket, error = %e, "stop modification failed"),
        }
    }

    for exit in &report.exits {
        match sink.close(exit, now) {
            Ok(outcome) => {
                engine.on_position_closed(&outcome);
                if let Some(store) = history {
                    if let Err(e) = store.append(&outcome) {
                        error!(ticket = outcome.ticket, error = %e, "failed to persist trade outcome");
                    }
                }
                summary.closed.push(outcome);
            }
            Err(e) => warn!(ticket = exit.ticket, error = %e, "close failed"),
        }
    }

    summary.withdrawn = engine.withdraw_if_paused(report, now);

    for intent in &report.intents {
        match sink.submit(intent) {
            Ok(ticket) => {
                summary.opened.push(ticket);
                if let Some(clear) = engine.on_position_opened(intent, ticket) {
                    if let Err(e) = sink.modify(&clear) {
                        warn!(ticket, error = %e, "target clear failed");
                    }
                }
            }
            Err(e) => {
                warn!(symbol = %intent.symbol, error = %e, "order rejected");
                engine.on_order_rejected(intent.id);
                summary.rejected += 1;
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, ExitTrigger, ModificationReason, PriceBar};
    use chrono::TimeZone;
    use uuid::Uuid;

    fn intent() -> TradeIntent {
        TradeIntent {
            id: Uuid::new_v4(),
            symbol: "EURUSD".into(),
            direction: Direction::Buy,
            entry_price: 1.1000,
            sl_price: 1.0980,
            tp_price: Some(1.1040),
            lots: 0.5,
            use_trailing_stop: false,
            trailing_distance_pips: 0.0,
            strategy_id: StrategyId::Fibonacci,
            confidence: 70.0,
            sl_pips: 20.0,
            tp_pips: 40.0,
            pip_size: 0.0001,
            expected_value: 50.0,
            created_at: Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn paper_lifecycle_produces_outcome() {
        let cfg = EngineConfig::default();
        let mut sink = PaperOrderSink::new(&cfg);
        let ticket = sink.submit(&intent()).unwrap();
        assert_eq!(sink.len(), 1);

        sink.modify(&StopModification {
            ticket,
            new_sl: 1.0995,
            take_profit: Some(1.1040),
            reason: ModificationReason::Breakeven,
        })
        .unwrap();
        assert!((sink.open_positions()[0].current_sl - 1.0995).abs() < 1e-12);

        let at = Utc.with_ymd_and_hms(2024, 3, 5, 11, 0, 0).unwrap();
        let rec = sink
            .close(
                &ObservedExit {
                    ticket,
                    symbol: "EURUSD".into(),
                    trigger: ExitTrigger::TakeProfit,
                    exit_price: 1.1040,
                    pips: 40.0,
                },
                at,
            )
            .unwrap();
        // 40 pips * 0.5 lots * $10 - 2 * $6
        assert!((rec.pnl - 188.0).abs() < 1e-9);
        assert_eq!(rec.strategy_id, Some(StrategyId::Fibonacci));
        assert!(sink.is_empty());
    }

    #[test]
    fn unknown_ticket_is_an_error() {
        let mut sink = PaperOrderSink::new(&EngineConfig::default());
        let err = sink
            .modify(&StopModification {
                ticket: 42,
                new_sl: 1.0,
                take_profit: None,
                reason: ModificationReason::Trailing,
            })
            .unwrap_err();
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn mark_to_market_uses_last_close() {
        let mut sink = PaperOrderSink::new(&EngineConfig::default());
        sink.submit(&intent()).unwrap();
        let t = Utc.with_ymd_and_hms(2024, 3, 5, 9, 15, 0).unwrap();
        sink.mark_to_market(&[SymbolMarket {
            symbol: "eurusd".into(),
            bars: vec![PriceBar {
                open_time: t,
                open: 1.1010,
                high: 1.1025,
                low: 1.1005,
                close: 1.1020,
                volume: 1.0,
            }],
            ..Default::default()
        }]);
        assert!((sink.open_positions()[0].current_price - 1.1020).abs() < 1e-12);
    }

    #[test]
    fn snapshot_feed_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(
            &path,
            r#"{
                "now": "2024-03-05T09:30:00Z",
                "account": {"equity": 10000.0, "balance": 10000.0},
                "signals": [{"symbol": "EURUSD", "direction": "buy",
                             "strategy_id": "breakout", "confidence": 72.0}]
            }"#,
        )
        .unwrap();
        let input = SnapshotFeed::new(&path).read().unwrap();
        assert_eq!(input.signals.len(), 1);
        assert!(input.markets.is_empty());
        assert!(input.positions.is_empty());
    }
}
