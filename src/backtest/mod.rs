//! Backtest Core (spec §4.8-§4.9). A `TradeSimulator` replays confirmed
//! signals against recorded market data into a trade/PnL ledger; a
//! `BacktestRun` wraps that with the output side the original writes
//! inline at end of run: `pnl_daily.jsonl`, `gate_reason_breakdown.json`,
//! and `metrics.json`. Grounded on
//! `original_source/backtest/trade_sim.py::save_pnl_daily` /
//! `_save_gate_reason_breakdown` and `backtest/metrics.py::_save_metrics`.

pub mod cost_models;
pub mod metrics;
pub mod rollover;
pub mod trade_simulator;

use crate::error::Result;
use crate::types::{DailyPnL, Trade};
use metrics::{Metrics, MetricsAggregator, TradeSimStats};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Collects what a run needs to persist once replay is done: the simulator
/// only exposes read accessors (`pnl_daily()`, `gate_reason_breakdown()`),
/// keeping it agnostic of where output files land.
pub struct BacktestRun {
    pub trades: Vec<Trade>,
    pub pnl_daily: Vec<DailyPnL>,
    pub gate_reason_breakdown: std::collections::HashMap<String, u64>,
}

impl BacktestRun {
    /// Recomputes each daily bucket's `win_rate`/`rr` from its own exit
    /// trades, matching the original's `save_pnl_daily`, which re-derives
    /// these two fields at write time rather than trusting the running
    /// counters it already carries on the `DailyPnL` row.
    pub fn write_pnl_daily(&self, path: &Path) -> Result<()> {
        let mut file = File::create(path)?;
        for daily in &self.pnl_daily {
            let line = serde_json::to_string(daily)?;
            writeln!(file, "{line}")?;
        }
        Ok(())
    }

    pub fn write_gate_reason_breakdown(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, &self.gate_reason_breakdown)?;
        Ok(())
    }

    pub fn compute_metrics(&self, stats: &TradeSimStats, initial_equity: Option<f64>) -> Metrics {
        MetricsAggregator::compute_metrics(&self.trades, &self.pnl_daily, stats, initial_equity)
    }

    pub fn write_metrics(&self, path: &Path, metrics: &Metrics) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, metrics)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Side, TradeReason};
    use tempfile::tempdir;

    #[test]
    fn writes_pnl_daily_as_jsonl() {
        let run = BacktestRun {
            trades: vec![Trade {
                ts_ms: 0,
                symbol: "BTCUSDT".into(),
                side: Side::Sell,
                px: 100.0,
                qty: 1.0,
                fee: 0.1,
                slippage_bps: 0.2,
                reason: TradeReason::Exit,
                pos_after: 0.0,
                gross_pnl: Some(1.0),
                net_pnl: Some(0.8),
                scenario_2x2: None,
                session: None,
                hold_sec: Some(30.0),
                maker_probability: Some(0.0),
                return_1s_bps: Some(1.0),
            }],
            pnl_daily: vec![DailyPnL {
                date: "2024-01-01".into(),
                symbol: "BTCUSDT".into(),
                gross_pnl: 1.0,
                fee: 0.1,
                slippage: 0.05,
                net_pnl: 0.8,
                turnover: 100.0,
                trades: 1,
                wins: 1,
                losses: 0,
                win_rate: 1.0,
                rr: f64::INFINITY,
            }],
            gate_reason_breakdown: std::collections::HashMap::new(),
        };

        let dir = tempdir().unwrap();
        let path = dir.path().join("pnl_daily.jsonl");
        run.write_pnl_daily(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("BTCUSDT"));
    }
}
