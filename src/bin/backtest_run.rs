//! Backtest runner CLI (spec §4.8-§4.9). Thin wiring: reads historical
//! prices/orderbook rows from `config.data_root`, aligns them to a
//! per-second grid, runs every row through Signal Core and the trade
//! simulator, and writes `trades.jsonl`, `pnl_daily.jsonl`,
//! `gate_reason_breakdown.json` and `metrics.json` under
//! `config.output_dir`. Per §1, CLI argument parsing and YAML loading are
//! out of scope: this binary takes a single optional TOML/JSON config path
//! and otherwise reads `Config::from_env_and_file`.
//!
//! # Usage
//!
//! ```bash
//! backtest_run [CONFIG_PATH]
//! ```
//!
//! # Exit codes
//!
//! - 0: run completed
//! - 2: configuration error
//! - 3: runtime error (I/O, database)

use alpha_core::aligner::Aligner;
use alpha_core::backtest::metrics::TradeSimStats;
use alpha_core::backtest::trade_simulator::{SignalTick, TradeSimulator};
use alpha_core::backtest::BacktestRun;
use alpha_core::config::Config;
use alpha_core::feeder::Feeder;
use alpha_core::reader::{RawRow, Reader, ReaderOptions};
use alpha_core::signal_core::SignalCore;
use alpha_core::types::{FeatureRow, Symbol, Trade};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Groups flat rows by symbol so the Aligner, which operates on one
/// symbol's streams at a time, can be fed one symbol at a time.
fn group_by_symbol(rows: Vec<RawRow>) -> HashMap<Symbol, Vec<RawRow>> {
    let mut by_symbol: HashMap<Symbol, Vec<RawRow>> = HashMap::new();
    for row in rows {
        by_symbol.entry(row.symbol.clone()).or_default().push(row);
    }
    by_symbol
}

fn write_trades_jsonl(path: &Path, trades: &[Trade]) -> alpha_core::error::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(path)?;
    for trade in trades {
        writeln!(file, "{}", serde_json::to_string(trade)?)?;
    }
    Ok(())
}

fn run(cfg: Config) -> alpha_core::error::Result<()> {
    let opts = ReaderOptions {
        date: cfg.date.clone(),
        symbols: cfg.symbols.clone(),
        start_ms: None,
        end_ms: None,
        minutes: None,
    };
    let mut reader = Reader::new(Path::new(&cfg.data_root), opts, &cfg.reader);
    let prices = reader.read_raw("prices")?;
    let orderbook = reader.read_raw("orderbook")?;
    tracing::info!(
        price_rows = prices.len(),
        orderbook_rows = orderbook.len(),
        dedup_pct = reader.stats().deduplication_rate_pct(),
        "reader finished"
    );

    let prices_by_symbol = group_by_symbol(prices);
    let orderbook_by_symbol = group_by_symbol(orderbook);

    let mut aligner = Aligner::new(&cfg.aligner);
    let mut feature_rows: Vec<FeatureRow> = Vec::new();
    for (symbol, price_rows) in &prices_by_symbol {
        let ob_rows = orderbook_by_symbol.get(symbol).cloned().unwrap_or_default();
        feature_rows.extend(aligner.align_to_seconds(price_rows, &ob_rows));
    }
    feature_rows.sort_by_key(|r| (r.symbol.clone(), r.ts_ms));
    tracing::info!(
        aligned_rows = feature_rows.len(),
        gap_rate = aligner.stats().gap_seconds_rate(),
        "aligner finished"
    );

    let mut feeder = Feeder::new();
    let mut signal_core = SignalCore::new(
        cfg.core.clone(),
        cfg.fusion.clone(),
        cfg.signal.clone(),
        cfg.strategy.clone(),
        cfg.run_id.clone(),
    );
    let mut simulator = TradeSimulator::new(cfg.backtest.clone(), false);

    let mut trades: Vec<Trade> = Vec::new();
    let mut last_mid: HashMap<Symbol, f64> = HashMap::new();
    let mut last_ts_ms = 0i64;

    for mut row in feature_rows {
        feeder.inject_activity(&mut row);
        last_mid.insert(row.symbol.clone(), row.mid);
        last_ts_ms = last_ts_ms.max(row.ts_ms);

        let signal = signal_core.process(&row);
        let tick = SignalTick {
            symbol: &signal.symbol,
            ts_ms: signal.ts_ms,
            confirm: signal.confirm,
            gating_blocked: signal.gating == 0,
            gate_reason: Some(signal.gate_reason.as_str()),
            side: signal.signal_type.side(),
            mid_price: row.mid,
            feature_data: &signal._feature_data,
        };
        if let Some(trade) = simulator.process_signal(&tick) {
            if trade.reason.is_exit() {
                signal_core.record_exit(&signal.symbol, signal.ts_ms);
            }
            trades.push(trade);
        }
    }

    trades.extend(simulator.close_all_positions(&last_mid, last_ts_ms));

    let pnl_daily: Vec<_> = simulator.pnl_daily().cloned().collect();
    let gate_reason_breakdown = simulator.gate_reason_breakdown().0.clone();
    let (turnover_maker, turnover_taker) = simulator.turnover();
    let cost_stats = simulator.cost_model_stats();
    let stats = TradeSimStats {
        notional_per_trade: cfg.backtest.notional_per_trade,
        invalid_scenario_count: cost_stats.invalid_scenario_count,
        invalid_fee_tier_count: cost_stats.invalid_fee_tier_count,
        total_signal_count: cost_stats.total_signal_count,
        turnover_maker,
        turnover_taker,
        fee_tier_distribution: simulator.fee_tier_distribution().clone(),
    };

    let run = BacktestRun { trades: trades.clone(), pnl_daily, gate_reason_breakdown };
    let metrics = run.compute_metrics(&stats, Some(cfg.backtest.initial_equity));

    let output_dir = Path::new(&cfg.output_dir);
    fs::create_dir_all(output_dir)?;
    write_trades_jsonl(&output_dir.join("trades.jsonl"), &trades)?;
    run.write_pnl_daily(&output_dir.join("pnl_daily.jsonl"))?;
    run.write_gate_reason_breakdown(&output_dir.join("gate_reason_breakdown.json"))?;
    run.write_metrics(&output_dir.join("metrics.json"), &metrics)?;

    eprintln!("{}", "=".repeat(60));
    eprintln!("BACKTEST SUMMARY");
    eprintln!("{}", "=".repeat(60));
    eprintln!("Trades:             {}", trades.len());
    eprintln!("Total PnL:          {:.2}", metrics.total_pnl);
    eprintln!("Win Rate:           {:.1}%", metrics.win_rate * 100.0);
    eprintln!("Sharpe:             {:.3}", metrics.sharpe_ratio);
    eprintln!("Max Drawdown:       {:.2}", metrics.max_drawdown);
    eprintln!("Config Hash:        {}", signal_core.config_hash());
    eprintln!("Output:             {}", output_dir.display());
    eprintln!("{}", "=".repeat(60));
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = env::args().nth(1);
    let cfg = match Config::from_env_and_file(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(cfg) {
        eprintln!("Error: {e}");
        std::process::exit(3);
    }
}
