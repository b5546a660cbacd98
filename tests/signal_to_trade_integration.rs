//! Integration test for the Signal Core -> Trade Simulator -> Metrics chain
//! that `bin/backtest_run` wires together. Builds aligned `FeatureRow`s
//! directly (bypassing the Reader/Aligner, which have their own unit
//! coverage) to exercise the cross-module contract: a `Signal`'s
//! `signal_type.side()`/`_feature_data` feed a `SignalTick`, a confirmed
//! entry followed by a take-profit exit produces a `Trade` pair, and
//! `BacktestRun::compute_metrics` summarizes the resulting ledger.

use alpha_core::backtest::metrics::TradeSimStats;
use alpha_core::backtest::trade_simulator::{SignalTick, TradeSimulator};
use alpha_core::backtest::BacktestRun;
use alpha_core::config::{BacktestConfig, CoreConfig, FusionConfig, SignalConfig, StrategyConfig};
use alpha_core::feeder::Feeder;
use alpha_core::signal_core::SignalCore;
use alpha_core::types::{FeatureRow, Scenario2x2, TradeReason};
use std::collections::HashMap;

fn row(ts_ms: i64, mid: f64, z_ofi: f64, z_cvd: f64) -> FeatureRow {
    FeatureRow {
        second_ts: ts_ms / 1000,
        ts_ms,
        symbol: "BTCUSDT".into(),
        mid,
        best_bid: mid - 0.1,
        best_ask: mid + 0.1,
        spread_bps: 2.0,
        return_1s: 0.0,
        vol_bps: 1.0,
        z_ofi,
        z_cvd,
        fusion_score: 0.0,
        consistency: 0.5,
        warmup: false,
        lag_ms_price: 0,
        lag_ms_orderbook: 0,
        lag_bad_price: false,
        lag_bad_orderbook: false,
        is_gap_second: false,
        scenario_2x2: Scenario2x2::ActiveHighVol,
        fee_tier: None,
        session: None,
        trade_rate: None,
        quote_rate: None,
    }
}

#[test]
fn confirmed_entry_then_take_profit_produces_a_trade_pair_and_metrics() {
    let mut feeder = Feeder::new();
    let mut signal_core = SignalCore::new(
        CoreConfig::default(),
        FusionConfig::default(),
        SignalConfig::default(),
        StrategyConfig::default(),
        "test-run".into(),
    );
    let mut simulator = TradeSimulator::new(
        BacktestConfig {
            take_profit_bps: Some(5.0),
            deadband_bps: 0.0,
            ..BacktestConfig::default()
        },
        false,
    );

    let mut trades = Vec::new();
    let mut rows = vec![row(0, 100.0, 3.0, 3.0), row(5_000, 100.2, 3.0, 3.0)];
    let mut last_mid = HashMap::new();
    let mut last_ts_ms = 0i64;

    for r in rows.iter_mut() {
        feeder.inject_activity(r);
        last_mid.insert(r.symbol.clone(), r.mid);
        last_ts_ms = last_ts_ms.max(r.ts_ms);

        let signal = signal_core.process(r);
        assert!(signal.confirm, "row at {} should confirm under default thresholds", r.ts_ms);

        let tick = SignalTick {
            symbol: &signal.symbol,
            ts_ms: signal.ts_ms,
            confirm: signal.confirm,
            gating_blocked: signal.gating == 0,
            gate_reason: Some(signal.gate_reason.as_str()),
            side: signal.signal_type.side(),
            mid_price: r.mid,
            feature_data: &signal._feature_data,
        };
        if let Some(trade) = simulator.process_signal(&tick) {
            if trade.reason.is_exit() {
                signal_core.record_exit(&signal.symbol, signal.ts_ms);
            }
            trades.push(trade);
        }
    }

    assert_eq!(trades.len(), 2, "expected one entry and one take-profit exit, got {trades:?}");
    assert_eq!(trades[0].reason, TradeReason::Entry);
    assert_eq!(trades[1].reason, TradeReason::TakeProfit);
    assert!(trades[1].net_pnl.unwrap() > 0.0, "take-profit exit should be net-positive");
    assert!(simulator.open_position("BTCUSDT").is_none());

    let closed = simulator.close_all_positions(&last_mid, last_ts_ms);
    assert!(closed.is_empty(), "position already closed, nothing left to rollover-close");

    let pnl_daily: Vec<_> = simulator.pnl_daily().cloned().collect();
    assert_eq!(pnl_daily.len(), 1);
    assert_eq!(pnl_daily[0].trades, 1, "pnl_daily counts exits, not entries");

    let run = BacktestRun {
        trades,
        pnl_daily,
        gate_reason_breakdown: simulator.gate_reason_breakdown().0.clone(),
    };
    let stats = TradeSimStats {
        notional_per_trade: 1000.0,
        ..TradeSimStats::default()
    };
    let metrics = run.compute_metrics(&stats, Some(100_000.0));
    assert!(metrics.total_pnl > 0.0);
    assert_eq!(metrics.win_rate, 1.0);
}

#[test]
fn unconfirmed_row_records_gate_reason_but_no_trade() {
    let mut core = SignalCore::new(
        CoreConfig::default(),
        FusionConfig::default(),
        SignalConfig::default(),
        StrategyConfig::default(),
        "test-run".into(),
    );
    let mut simulator = TradeSimulator::new(BacktestConfig::default(), false);

    let mut warming = row(0, 100.0, 3.0, 3.0);
    warming.warmup = true;
    let signal = core.process(&warming);
    assert!(!signal.confirm);

    let tick = SignalTick {
        symbol: &signal.symbol,
        ts_ms: signal.ts_ms,
        confirm: signal.confirm,
        gating_blocked: signal.gating == 0,
        gate_reason: Some(signal.gate_reason.as_str()),
        side: signal.signal_type.side(),
        mid_price: 100.0,
        feature_data: &signal._feature_data,
    };
    let trade = simulator.process_signal(&tick);
    assert!(trade.is_none());
    assert_eq!(simulator.gate_reason_breakdown().0.get("component_warmup"), Some(&1));
}
