// =============================================================================
// FX Exit Engine: Main Entry Point
// =============================================================================
//
// Runs the scan cycle on a fixed interval against a JSON market snapshot and
// fills intents on the paper order sink. Closed trades are appended to the
// history file, which is replayed on startup so drawdown pauses survive a
// restart and win-rate curves can be calibrated from realised outcomes.
// =============================================================================

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fx_exit_engine::engine::ScanEngine;
use fx_exit_engine::feed::{dispatch_cycle, OrderSink, PaperOrderSink, SnapshotFeed};
use fx_exit_engine::history::{
    apply_history_calibration, log_strategy_performance, strategy_performance, TradeHistoryStore,
};
use fx_exit_engine::types::TradeOutcomeRecord;
use fx_exit_engine::runtime_config::EngineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        FX Exit Engine: Starting Up                      ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("ENGINE_CONFIG").unwrap_or_else(|_| "engine_config.json".into());
    let mut config = EngineConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, path = %config_path, "Failed to load config, using defaults");
        EngineConfig::default()
    });

    // Override symbols from env if available.
    if let Ok(syms) = std::env::var("ENGINE_SYMBOLS") {
        config.symbols = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(path) = std::env::var("ENGINE_HISTORY") {
        config.history_path = path;
    }

    config.validate().context("engine configuration rejected")?;

    info!(symbols = ?config.symbols, "Configured symbols");
    info!(
        risk_per_trade = config.risk_per_trade,
        max_concurrent = config.max_concurrent_trades,
        scan_interval_secs = config.scan_interval_secs,
        "Risk limits"
    );

    // ── 2. History & engine ──────────────────────────────────────────────
    let history = TradeHistoryStore::new(&config.history_path);
    let mut records = history.load().unwrap_or_else(|e| {
        error!(error = %e, "Failed to load trade history, starting clean");
        Vec::new()
    });
    log_strategy_performance(&strategy_performance(&records));

    // Calibrated curves stay out of the saved config file.
    let mut engine_config = config.clone();
    apply_history_calibration(&mut engine_config, &records);

    let feed_path =
        std::env::var("ENGINE_FEED").unwrap_or_else(|_| "market_snapshot.json".into());
    let feed = SnapshotFeed::new(&feed_path);

    let starting_equity = match feed.read() {
        Ok(snapshot) => snapshot.account.equity,
        Err(e) => {
            warn!(error = %e, "No initial snapshot, loss limits armed on first equity reading");
            0.0
        }
    };

    let engine = ScanEngine::new(engine_config, starting_equity)
        .context("failed to build scan engine")?;
    engine.replay_history(&records);

    let mut sink = PaperOrderSink::new(&config);

    // ── 3. Scan loop ─────────────────────────────────────────────────────
    let mut interval =
        tokio::time::interval(tokio::time::Duration::from_secs(config.scan_interval_secs));

    info!(feed = %feed_path, "All subsystems running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_once(&engine, &feed, &mut sink, &history, &mut records);
            }
            res = tokio::signal::ctrl_c() => {
                res?;
                break;
            }
        }
    }

    // ── 4. Graceful shutdown ─────────────────────────────────────────────
    warn!("Shutdown signal received, stopping gracefully");

    if let Err(e) = config.save(&config_path) {
        error!(error = %e, "Failed to save engine config on shutdown");
    }

    log_strategy_performance(&strategy_performance(&records));
    info!(open_positions = sink.len(), "FX Exit Engine shut down complete.");
    Ok(())
}

fn run_once(
    engine: &ScanEngine,
    feed: &SnapshotFeed,
    sink: &mut PaperOrderSink,
    history: &TradeHistoryStore,
    records: &mut Vec<TradeOutcomeRecord>,
) {
    let mut input = match feed.read() {
        Ok(i) => i,
        Err(e) => {
            warn!(error = %e, "snapshot unavailable, cycle skipped");
            return;
        }
    };

    sink.mark_to_market(&input.markets);
    input.positions = sink.open_positions();

    let mut report = engine.run_cycle(&input);
    let summary = dispatch_cycle(engine, &mut report, sink, Some(history), input.now);

    if summary.withdrawn > 0 || summary.rejected > 0 {
        warn!(
            withdrawn = summary.withdrawn,
            rejected = summary.rejected,
            "intents not opened this cycle"
        );
    }
    records.extend(summary.closed);
}
