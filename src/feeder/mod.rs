//! Replay feeder (spec §4.3). Fills `trade_rate`/`quote_rate` on feature
//! rows that arrive without them, and builds the `FeatureData` snapshot the
//! Signal Core attaches to an emitted `Signal` so TradeSimulator/
//! MetricsAggregator can attribute without re-reading features.
//!
//! Grounded on `original_source/backtest/feeder.py`. The Python's field-alias
//! normalisation (`ofi_z`/`cvd_z` -> `z_ofi`/`z_cvd`) has no counterpart here:
//! `FeatureRow` is already alias-free by the time the Aligner produces it, so
//! there is nothing left for the Feeder to normalise on that front.

use crate::types::{FeatureData, FeatureRow, Symbol};
use std::collections::{HashMap, VecDeque};

/// Sliding 60s window per symbol. Grounded on `ActivityInjector`: the
/// Python keeps a `deque(maxlen=3000)`/`deque(maxlen=6000)` as a belt-and-
/// braces cap and trims by elapsed time on every call; the cap is cosmetic
/// at a 1 row/symbol/sec replay rate; we reproduce the time-based trim,
/// which is the part that actually determines the emitted rate.
#[derive(Default)]
pub struct ActivityInjector {
    trade_windows: HashMap<Symbol, VecDeque<i64>>,
    quote_windows: HashMap<Symbol, VecDeque<i64>>,
}

pub struct ActivityRates {
    pub trade_rate: f64,
    pub quote_rate: f64,
}

impl ActivityInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// `trade_rate` is trades in the trailing 60s window (the Python's
    /// `(count/60.0)*60.0` simplifies to `count`); `quote_rate` is quote
    /// updates per second over the same window (`count/60.0`).
    pub fn inject(&mut self, symbol: &str, ts_ms: i64, has_orderbook: bool, has_trade: bool) -> ActivityRates {
        if has_orderbook {
            self.quote_windows
                .entry(symbol.to_string())
                .or_default()
                .push_back(ts_ms);
        }
        if has_trade {
            self.trade_windows
                .entry(symbol.to_string())
                .or_default()
                .push_back(ts_ms);
        }

        let trade_count = trim_and_count(self.trade_windows.entry(symbol.to_string()).or_default(), ts_ms);
        let quote_count = trim_and_count(self.quote_windows.entry(symbol.to_string()).or_default(), ts_ms);

        ActivityRates {
            trade_rate: trade_count as f64,
            quote_rate: quote_count as f64 / 60.0,
        }
    }
}

fn trim_and_count(window: &mut VecDeque<i64>, ts_ms: i64) -> usize {
    while let Some(&front) = window.front() {
        if ts_ms - front > 60_000 {
            window.pop_front();
        } else {
            break;
        }
    }
    window.len()
}

pub struct Feeder {
    activity: ActivityInjector,
}

impl Feeder {
    pub fn new() -> Self {
        Self {
            activity: ActivityInjector::new(),
        }
    }

    /// Fills `trade_rate`/`quote_rate` in place when the row arrived
    /// without them. A feature row is assumed to carry both an orderbook
    /// update (it has a spread) and a trade update (it has a mid/return)
    /// every second, matching the replay assumption in `feeder.py`.
    pub fn inject_activity(&mut self, row: &mut FeatureRow) {
        if row.trade_rate.is_some() && row.quote_rate.is_some() {
            return;
        }
        let rates = self.activity.inject(&row.symbol, row.ts_ms, true, true);
        row.trade_rate.get_or_insert(rates.trade_rate);
        row.quote_rate.get_or_insert(rates.quote_rate);
    }
}

impl Default for Feeder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the `FeatureData` attribution snapshot a `Signal` carries
/// alongside it (spec §4.4/§4.8).
pub fn feature_data_for(row: &FeatureRow) -> FeatureData {
    FeatureData {
        lag_bad_price: row.lag_bad_price,
        lag_bad_orderbook: row.lag_bad_orderbook,
        is_gap_second: row.is_gap_second,
        spread_bps: row.spread_bps,
        vol_bps: row.vol_bps,
        scenario_2x2: Some(row.scenario_2x2),
        fee_tier: row.fee_tier.clone(),
        session: row.session.clone(),
        return_1s: row.return_1s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_rate_is_count_over_60() {
        let mut inj = ActivityInjector::new();
        for ts in (0..60_000).step_by(1000) {
            inj.inject("BTCUSDT", ts, true, false);
        }
        let rates = inj.inject("BTCUSDT", 60_000, true, false);
        assert!((rates.quote_rate - 1.0).abs() < 0.05);
    }

    #[test]
    fn window_trims_entries_older_than_60s() {
        let mut inj = ActivityInjector::new();
        inj.inject("BTCUSDT", 0, false, true);
        let rates = inj.inject("BTCUSDT", 70_000, false, true);
        assert_eq!(rates.trade_rate, 1.0);
    }
}
