//! End-to-end cycles: scan engine + paper order sink + trade history.

use chrono::{DateTime, Duration, TimeZone, Utc};

use fx_exit_engine::decision_envelope::DecisionLayer;
use fx_exit_engine::engine::{ScanEngine, ScanInput, SymbolMarket};
use fx_exit_engine::feed::{dispatch_cycle, OrderSink, PaperOrderSink};
use fx_exit_engine::history::TradeHistoryStore;
use fx_exit_engine::runtime_config::EngineConfig;
use fx_exit_engine::types::{
    AccountState, CandidateSignal, Direction, ExitTrigger, ModificationReason, PriceBar,
    StrategyId, TradeOutcomeRecord,
};

const ATR: f64 = 0.0012;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 5, 9, 30, 0).unwrap()
}

fn market(at: DateTime<Utc>, last_close: Option<f64>) -> SymbolMarket {
    market_for("EURUSD", 1.1000, at, last_close)
}

/// 120 fifteen-minute bars ending at `at`, optionally forcing the last close.
fn market_for(symbol: &str, base: f64, at: DateTime<Utc>, last_close: Option<f64>) -> SymbolMarket {
    let n = 120;
    let mut bars: Vec<PriceBar> = (0..n)
        .map(|i| {
            let mid = base + (i as f64 * 0.5).sin() * ATR * 2.0;
            PriceBar {
                open_time: at - Duration::minutes(15 * (n - 1 - i) as i64),
                open: mid,
                high: mid + ATR * 0.4,
                low: mid - ATR * 0.4,
                close: mid,
                volume: 1.0,
            }
        })
        .collect();
    if let (Some(close), Some(last)) = (last_close, bars.last_mut()) {
        last.close = close;
        last.high = last.high.max(close);
        last.low = last.low.min(close);
    }
    SymbolMarket {
        symbol: symbol.into(),
        bars,
        atr_series: vec![ATR; 60],
        adx: Some(20.0),
        error: None,
    }
}

fn input(at: DateTime<Utc>, m: SymbolMarket, signals: Vec<CandidateSignal>) -> ScanInput {
    ScanInput {
        now: at,
        account: AccountState {
            equity: 10_000.0,
            balance: 10_000.0,
        },
        markets: vec![m],
        signals,
        positions: vec![],
    }
}

fn breakout_buy() -> CandidateSignal {
    CandidateSignal {
        symbol: "EURUSD".into(),
        direction: Direction::Buy,
        strategy_id: StrategyId::Breakout,
        confidence: 80.0,
        entry_price: None,
    }
}

#[test]
fn intent_fill_trail_and_stop_out() {
    let dir = tempfile::tempdir().unwrap();
    let history = TradeHistoryStore::new(dir.path().join("history.jsonl"));
    let config = EngineConfig::default();
    let engine = ScanEngine::new(config.clone(), 10_000.0).unwrap();
    let mut sink = PaperOrderSink::new(&config);

    // ── Cycle 1: intent emitted and filled ──
    let report = engine.run_cycle(&input(now(), market(now(), None), vec![breakout_buy()]));
    assert_eq!(report.intents.len(), 1, "{:?}", report.decisions);
    let intent = report.intents[0].clone();
    assert!(intent.use_trailing_stop);
    assert!((intent.trailing_distance_pips - 12.0).abs() < 1e-9);

    assert!(intent.tp_price.is_some());
    let ticket = sink.submit(&intent).unwrap();
    let clear = engine.on_position_opened(&intent, ticket).unwrap();
    assert_eq!(clear.reason, ModificationReason::TargetCleared);
    sink.modify(&clear).unwrap();
    assert_eq!(sink.open_positions()[0].current_tp, None);

    // ── Cycle 2: +100 pips, stop trails up ──
    let t2 = now() + Duration::minutes(15);
    let high = intent.entry_price + 0.0100;
    let m = market(t2, Some(high));
    sink.mark_to_market(std::slice::from_ref(&m));
    let mut cycle = input(t2, m, vec![]);
    cycle.positions = sink.open_positions();

    let report = engine.run_cycle(&cycle);
    assert_eq!(report.modifications.len(), 1);
    let m = &report.modifications[0];
    assert_eq!(m.reason, ModificationReason::Trailing);
    assert!((m.new_sl - (high - 0.0012)).abs() < 1e-9, "new sl {}", m.new_sl);
    sink.modify(m).unwrap();

    // ── Cycle 3: pullback through the trailed stop ──
    let t3 = t2 + Duration::minutes(15);
    let m = market(t3, Some(intent.entry_price + 0.0050));
    sink.mark_to_market(std::slice::from_ref(&m));
    let mut cycle = input(t3, m, vec![]);
    cycle.positions = sink.open_positions();

    let report = engine.run_cycle(&cycle);
    assert_eq!(report.exits.len(), 1);
    let exit = &report.exits[0];
    assert_eq!(exit.trigger, ExitTrigger::StopLoss);
    assert!((exit.pips - 88.0).abs() < 1e-6, "pips {}", exit.pips);

    let outcome = sink.close(exit, t3).unwrap();
    assert!(outcome.pnl > 0.0);
    engine.on_position_closed(&outcome);
    history.append(&outcome).unwrap();

    assert_eq!(engine.tracked_positions(), 0);
    assert!(sink.is_empty());
    assert!((engine.drawdown_state().daily_pnl - outcome.pnl).abs() < 1e-9);

    // ── Restart: history rebuilds the daily book ──
    let restarted = ScanEngine::new(config, 10_000.0).unwrap();
    restarted.replay_history(&history.load().unwrap());
    assert!((restarted.drawdown_state().daily_pnl - outcome.pnl).abs() < 1e-9);
    assert_eq!(restarted.drawdown_state().consecutive_losses, 0);
}

#[test]
fn replayed_losing_streak_keeps_admission_paused() {
    let dir = tempfile::tempdir().unwrap();
    let history = TradeHistoryStore::new(dir.path().join("history.jsonl"));
    for i in 0..5 {
        history
            .append(&TradeOutcomeRecord {
                ticket: 500 + i,
                symbol: "GBPUSD".into(),
                direction: Direction::Sell,
                strategy_id: Some(StrategyId::Momentum),
                confidence: Some(70.0),
                lots: 0.1,
                entry_price: 1.27,
                exit_price: 1.2710,
                pips: -10.0,
                pnl: -10.0,
                closed_at: now() - Duration::minutes(20 - i as i64),
            })
            .unwrap();
    }

    let engine = ScanEngine::new(EngineConfig::default(), 10_000.0).unwrap();
    engine.replay_history(&history.load().unwrap());
    assert!(!engine.admission(now()).is_allowed());

    let report = engine.run_cycle(&input(now(), market(now(), None), vec![breakout_buy()]));
    assert!(report.paused.is_some());
    assert!(report.intents.is_empty());
    assert_eq!(report.decisions.len(), 1);
    assert_eq!(report.decisions[0].layer, Some(DecisionLayer::Drawdown));

    // Pause is one hour from the last loss.
    let later = now() + Duration::minutes(61);
    assert!(engine.admission(later).is_allowed());
}

#[test]
fn rejected_order_releases_reserved_exposure() {
    let engine = ScanEngine::new(EngineConfig::default(), 10_000.0).unwrap();
    let report = engine.run_cycle(&input(now(), market(now(), None), vec![breakout_buy()]));
    let intent = &report.intents[0];

    let exposed = |e: &ScanEngine| {
        e.correlation_snapshot()
            .into_iter()
            .find(|g| g.group_id == "eur_gbp_usd")
            .map(|g| g.net_directional_exposure)
            .unwrap_or(0.0)
    };
    assert!(exposed(&engine) > 0.0);
    engine.on_order_rejected(intent.id);
    assert_eq!(exposed(&engine), 0.0);
}

#[test]
fn exit_that_pauses_guard_blocks_same_cycle_intents() {
    let dir = tempfile::tempdir().unwrap();
    let history = TradeHistoryStore::new(dir.path().join("history.jsonl"));
    let config = EngineConfig::default();
    let engine = ScanEngine::new(config.clone(), 10_000.0).unwrap();
    let mut sink = PaperOrderSink::new(&config);

    for i in 0..4 {
        engine.on_position_closed(&TradeOutcomeRecord {
            ticket: 100 + i,
            symbol: "USDCHF".into(),
            direction: Direction::Buy,
            strategy_id: Some(StrategyId::Momentum),
            confidence: Some(65.0),
            lots: 0.1,
            entry_price: 0.9,
            exit_price: 0.899,
            pips: -10.0,
            pnl: -10.0,
            closed_at: now() - Duration::minutes(40 - i as i64),
        });
    }

    // ── Cycle 1: EURUSD opened ──
    let mut report = engine.run_cycle(&input(now(), market(now(), None), vec![breakout_buy()]));
    let first = dispatch_cycle(&engine, &mut report, &mut sink, Some(&history), now());
    assert_eq!(first.opened.len(), 1);
    let entry = report.intents[0].entry_price;

    // ── Cycle 2: EURUSD stops out while an AUDUSD signal arrives ──
    let t2 = now() + Duration::minutes(15);
    let eur = market(t2, Some(entry - 0.0100));
    let aud = market_for("AUDUSD", 0.6600, t2, None);
    sink.mark_to_market(std::slice::from_ref(&eur));
    let mut cycle = input(
        t2,
        eur,
        vec![CandidateSignal {
            symbol: "AUDUSD".into(),
            ..breakout_buy()
        }],
    );
    cycle.markets.push(aud);
    cycle.positions = sink.open_positions();

    let mut report = engine.run_cycle(&cycle);
    assert_eq!(report.exits.len(), 1);
    assert_eq!(report.intents.len(), 1, "{:?}", report.decisions);

    let summary = dispatch_cycle(&engine, &mut report, &mut sink, Some(&history), t2);
    assert_eq!(summary.closed.len(), 1);
    assert!(summary.closed[0].pnl < 0.0);
    assert_eq!(summary.withdrawn, 1);
    assert!(summary.opened.is_empty());

    assert!(sink.is_empty());
    assert!(report.intents.is_empty());
    assert!(report.paused.is_some());
    assert_eq!(engine.drawdown_state().consecutive_losses, 5);
    assert!(engine
        .correlation_snapshot()
        .iter()
        .all(|g| g.net_directional_exposure == 0.0));
    assert_eq!(history.load().unwrap().len(), 1);
}
