//! Per-second alignment (spec §4.2/§9). Merges a price stream and an
//! orderbook stream for one symbol onto a second grid, fills small gaps by
//! holding the last valid mid, and computes `return_1s`/`lag_*`/
//! `scenario_2x2`.
//!
//! Grounded on `original_source/backtest/aligner.py::DataAligner` line for
//! line, including the resolution of spec.md §9's Open Question: the price
//! row's `consistency`/`warmup` always wins over the orderbook row's because
//! `_compute_features` evaluates the price-row branch of the
//! `is not None` chain first and only falls back to the orderbook row when
//! the price row lacks the field entirely.

use crate::config::AlignerConfig;
use crate::reader::RawRow;
use crate::types::{FeatureRow, Scenario2x2, Symbol};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct AlignerStats {
    pub aligned_rows: u64,
    pub missing_data: u64,
    pub fallback_used: u64,
    pub gap_seconds_count: u64,
    pub lag_bad_price_count: u64,
    pub lag_bad_orderbook_count: u64,
}

impl AlignerStats {
    pub fn gap_seconds_rate(&self) -> f64 {
        rate(self.gap_seconds_count, self.aligned_rows)
    }

    pub fn lag_bad_price_rate(&self) -> f64 {
        rate(self.lag_bad_price_count, self.aligned_rows)
    }

    pub fn lag_bad_orderbook_rate(&self) -> f64 {
        rate(self.lag_bad_orderbook_count, self.aligned_rows)
    }
}

fn rate(n: u64, d: u64) -> f64 {
    if d == 0 {
        0.0
    } else {
        n as f64 / d as f64
    }
}

/// How far back (in seconds) a missing second's data may fall back to the
/// last observed price/orderbook row.
const MAX_LAG_SECONDS_CAP: i64 = 3600;

pub struct Aligner {
    max_lag_ms: i64,
    lag_threshold_ms: i64,
    spread_threshold: f64,
    volatility_threshold: f64,
    price_history: HashMap<Symbol, Vec<(i64, f64)>>,
    stats: AlignerStats,
}

impl Aligner {
    pub fn new(cfg: &AlignerConfig) -> Self {
        Self {
            max_lag_ms: cfg.lag_threshold_ms.max(1000),
            lag_threshold_ms: cfg.lag_threshold_ms,
            spread_threshold: cfg.spread_threshold,
            volatility_threshold: cfg.volatility_threshold,
            price_history: HashMap::new(),
            stats: AlignerStats::default(),
        }
    }

    pub fn stats(&self) -> &AlignerStats {
        &self.stats
    }

    /// Aligns one symbol's price/orderbook rows onto a per-second grid.
    /// `prices` and `orderbook` need not be pre-sorted or pre-deduplicated
    /// per second; the latest row observed for a given second wins.
    pub fn align_to_seconds(&mut self, prices: &[RawRow], orderbook: &[RawRow]) -> Vec<FeatureRow> {
        let max_lag_sec = (self.max_lag_ms / 1000).min(MAX_LAG_SECONDS_CAP);

        let mut price_buffer: HashMap<i64, &RawRow> = HashMap::new();
        for row in prices {
            if row.ts_ms <= 0 {
                continue;
            }
            price_buffer.insert(row.ts_ms / 1000, row);
        }

        let mut ob_buffer: HashMap<i64, &RawRow> = HashMap::new();
        for row in orderbook {
            if row.ts_ms <= 0 {
                continue;
            }
            ob_buffer.insert(row.ts_ms / 1000, row);
        }

        let mut all_seconds: Vec<i64> = price_buffer
            .keys()
            .chain(ob_buffer.keys())
            .copied()
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        all_seconds.sort_unstable();

        let mut out = Vec::with_capacity(all_seconds.len());
        for second_ts in all_seconds {
            let mut price = price_buffer.get(&second_ts).copied();
            let mut used_fallback = false;
            if price.is_none() {
                price = find_latest(&price_buffer, second_ts, max_lag_sec);
                used_fallback |= price.is_some();
            }
            let mut ob = ob_buffer.get(&second_ts).copied();
            if ob.is_none() {
                ob = find_latest(&ob_buffer, second_ts, max_lag_sec);
                used_fallback |= ob.is_some();
            }
            if used_fallback {
                self.stats.fallback_used += 1;
            }

            let (Some(price), Some(ob)) = (price, ob) else {
                self.stats.missing_data += 1;
                continue;
            };

            let symbol = row_str(price, "symbol").or_else(|| row_str(ob, "symbol"));
            let Some(symbol) = symbol else {
                continue;
            };
            let mid = row_f64(price, "mid").or_else(|| row_f64(price, "price"));
            let Some(mid) = mid.filter(|m| *m > 0.0) else {
                continue;
            };

            let is_gap_second = self.update_price_history(&symbol, second_ts, mid);
            let prev_mid = self
                .price_history
                .get(&symbol)
                .and_then(|h| h.iter().rev().nth(1))
                .map(|(_, m)| *m);

            if let Some(feature) =
                self.compute_features(price, ob, &symbol, mid, second_ts, prev_mid, is_gap_second)
            {
                self.stats.aligned_rows += 1;
                if is_gap_second {
                    self.stats.gap_seconds_count += 1;
                }
                if feature.lag_bad_price {
                    self.stats.lag_bad_price_count += 1;
                }
                if feature.lag_bad_orderbook {
                    self.stats.lag_bad_orderbook_count += 1;
                }
                out.push(feature);
            }
        }
        out
    }

    /// Appends `mid` to the symbol's price history, zipper-filling any gap
    /// wider than 1.5s with the previous valid mid so `return_1s` stays
    /// well-defined across holes. Returns whether this second was a gap.
    fn update_price_history(&mut self, symbol: &str, second_ts: i64, mid: f64) -> bool {
        let history = self.price_history.entry(symbol.to_string()).or_default();
        let current_ts = second_ts * 1000;
        let mut is_gap_second = false;

        if let Some(&(last_ts, last_mid)) = history.last() {
            let gap_seconds = (current_ts - last_ts) as f64 / 1000.0;
            if gap_seconds > 1.5 {
                is_gap_second = true;
                let mut fill_ts = last_ts + 1000;
                while fill_ts < current_ts {
                    history.push((fill_ts, last_mid));
                    fill_ts += 1000;
                }
            }
        }

        history.push((current_ts, mid));
        history.retain(|(ts, _)| *ts >= (second_ts - 1) * 1000);
        is_gap_second
    }

    #[allow(clippy::too_many_arguments)]
    fn compute_features(
        &self,
        price: &RawRow,
        ob: &RawRow,
        symbol: &str,
        mid: f64,
        second_ts: i64,
        prev_mid: Option<f64>,
        is_gap_second: bool,
    ) -> Option<FeatureRow> {
        let mut best_bid = row_f64(ob, "best_bid").or_else(|| row_f64(ob, "bid_price"));
        let mut best_ask = row_f64(ob, "best_ask").or_else(|| row_f64(ob, "ask_price"));
        if best_bid.map_or(true, |v| v <= 0.0) || best_ask.map_or(true, |v| v <= 0.0) {
            if let Some(b0) = first_level_price(ob, "bids") {
                if b0 > 0.0 {
                    best_bid = Some(b0);
                }
            }
            if let Some(a0) = first_level_price(ob, "asks") {
                if a0 > 0.0 {
                    best_ask = Some(a0);
                }
            }
        }
        let (best_bid, best_ask) = match (best_bid, best_ask) {
            (Some(b), Some(a)) if b > 0.0 && a > 0.0 => (b, a),
            _ => return None,
        };

        let spread_bps = row_f64(ob, "spread_bps")
            .filter(|v| *v != 0.0)
            .unwrap_or_else(|| if mid > 0.0 { (best_ask - best_bid) / mid * 10_000.0 } else { 0.0 });

        let return_1s = match prev_mid {
            Some(prev) if prev > 0.0 => (mid - prev) / prev * 10_000.0,
            _ => 0.0,
        };
        let vol_bps = return_1s.abs();

        let is_active = spread_bps > self.spread_threshold;
        let is_high_vol = return_1s.abs() >= self.volatility_threshold;
        let scenario = Scenario2x2::from_axes(is_active, is_high_vol);

        let current_ts_ms = second_ts * 1000;
        let price_ts_ms = row_i64(price, "ts_ms").unwrap_or(0);
        let ob_ts_ms = row_i64(ob, "ts_ms").unwrap_or(0);
        let lag_ms_price = if price_ts_ms > 0 { (current_ts_ms - price_ts_ms).max(0) } else { 0 };
        let lag_ms_orderbook = if ob_ts_ms > 0 { (current_ts_ms - ob_ts_ms).max(0) } else { 0 };
        let lag_bad_price = lag_ms_price > self.lag_threshold_ms;
        let lag_bad_orderbook = lag_ms_orderbook > self.lag_threshold_ms;

        let z_ofi = row_f64(price, "ofi_z").or_else(|| row_f64(price, "z_ofi")).unwrap_or(0.0);
        let z_cvd = row_f64(price, "cvd_z").or_else(|| row_f64(price, "z_cvd")).unwrap_or(0.0);
        let fusion_score = row_f64(price, "fusion_score").unwrap_or(0.0);

        // Price row wins for consistency/warmup; orderbook row is only
        // consulted when the price row omits the field entirely.
        let consistency = row_f64(price, "consistency")
            .or_else(|| row_f64(ob, "consistency"))
            .unwrap_or(0.0);
        let warmup = row_bool(price, "warmup").or_else(|| row_bool(ob, "warmup")).unwrap_or(false);

        Some(FeatureRow {
            second_ts,
            ts_ms: current_ts_ms,
            symbol: symbol.to_string(),
            mid,
            best_bid,
            best_ask,
            spread_bps,
            return_1s,
            vol_bps,
            z_ofi,
            z_cvd,
            fusion_score,
            consistency,
            warmup,
            lag_ms_price,
            lag_ms_orderbook,
            lag_bad_price,
            lag_bad_orderbook,
            is_gap_second,
            scenario_2x2: scenario,
            fee_tier: row_str(price, "fee_tier"),
            session: row_str(price, "session"),
            trade_rate: None,
            quote_rate: None,
        })
    }
}

fn find_latest<'a>(buffer: &HashMap<i64, &'a RawRow>, target_second: i64, max_lag_seconds: i64) -> Option<&'a RawRow> {
    for lag in 1..=max_lag_seconds {
        if let Some(row) = buffer.get(&(target_second - lag)) {
            return Some(row);
        }
    }
    None
}

fn row_str(row: &RawRow, key: &str) -> Option<String> {
    row.fields.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn row_f64(row: &RawRow, key: &str) -> Option<f64> {
    row.fields.get(key).and_then(|v| v.as_f64())
}

fn row_i64(row: &RawRow, key: &str) -> Option<i64> {
    row.fields.get(key).and_then(|v| v.as_i64())
}

fn row_bool(row: &RawRow, key: &str) -> Option<bool> {
    row.fields.get(key).and_then(|v| v.as_bool())
}

fn first_level_price(row: &RawRow, key: &str) -> Option<f64> {
    row.fields
        .get(key)
        .and_then(|v| v.as_array())
        .and_then(|levels| levels.first())
        .and_then(|level| level.as_array())
        .and_then(|pair| pair.first())
        .and_then(|p| p.as_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(symbol: &str, ts_ms: i64, fields: serde_json::Value) -> RawRow {
        let mut map = fields.as_object().unwrap().clone();
        map.insert("symbol".into(), json!(symbol));
        map.insert("ts_ms".into(), json!(ts_ms));
        RawRow { symbol: symbol.to_string(), ts_ms, fields: map }
    }

    #[test]
    fn aligns_matching_seconds_and_computes_return() {
        let mut aligner = Aligner::new(&AlignerConfig::default());
        let prices = vec![
            row("BTCUSDT", 1_000, json!({"mid": 100.0})),
            row("BTCUSDT", 2_000, json!({"mid": 101.0})),
        ];
        let obs = vec![
            row("BTCUSDT", 1_000, json!({"best_bid": 99.9, "best_ask": 100.1})),
            row("BTCUSDT", 2_000, json!({"best_bid": 100.9, "best_ask": 101.1})),
        ];
        let rows = aligner.align_to_seconds(&prices, &obs);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].return_1s, 0.0);
        assert!((rows[1].return_1s - 100.0).abs() < 1e-6);
    }

    #[test]
    fn marks_gap_second_after_a_hole() {
        let mut aligner = Aligner::new(&AlignerConfig::default());
        let prices = vec![
            row("BTCUSDT", 1_000, json!({"mid": 100.0})),
            row("BTCUSDT", 4_000, json!({"mid": 100.0})),
        ];
        let obs = vec![
            row("BTCUSDT", 1_000, json!({"best_bid": 99.9, "best_ask": 100.1})),
            row("BTCUSDT", 4_000, json!({"best_bid": 99.9, "best_ask": 100.1})),
        ];
        let rows = aligner.align_to_seconds(&prices, &obs);
        let gap_row = rows.iter().find(|r| r.second_ts == 4).unwrap();
        assert!(gap_row.is_gap_second);
    }

    #[test]
    fn price_row_consistency_wins_over_orderbook() {
        let mut aligner = Aligner::new(&AlignerConfig::default());
        let prices = vec![row("BTCUSDT", 1_000, json!({"mid": 100.0, "consistency": 0.9}))];
        let obs = vec![row(
            "BTCUSDT",
            1_000,
            json!({"best_bid": 99.9, "best_ask": 100.1, "consistency": 0.1}),
        )];
        let rows = aligner.align_to_seconds(&prices, &obs);
        assert_eq!(rows[0].consistency, 0.9);
    }
}
