//! MetricsAggregator (spec §4.9). Turns the trade/PnL ledger the
//! `TradeSimulator` accumulated into one performance snapshot: totals, two
//! win-rate flavours, cost-on-turnover, annualised Sharpe/Sortino (√252),
//! max-drawdown/MAR, long/short hold-time splits, a `(scenario_2x2,
//! session)` breakdown, and a `by_symbol` split for multi-symbol runs.
//! Grounded line for line on
//! `original_source/backtest/metrics.py::compute_metrics`.

use crate::types::{DailyPnL, Side, Trade, TradeReason};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Carries the handful of `TradeSimulator`-owned counters the original reads
/// out of its loose `trade_sim_stats` dict.
#[derive(Debug, Clone, Default)]
pub struct TradeSimStats {
    pub notional_per_trade: f64,
    pub invalid_scenario_count: u64,
    pub invalid_fee_tier_count: u64,
    pub total_signal_count: u64,
    pub turnover_maker: f64,
    pub turnover_taker: f64,
    pub fee_tier_distribution: HashMap<String, f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioStats {
    pub trades: u64,
    pub pnl: f64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: f64,
    pub avg_pnl: f64,
    pub avg_hold_sec: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BySymbolStats {
    pub pnl_gross: f64,
    pub pnl_net: f64,
    pub fee: f64,
    pub slippage: f64,
    pub turnover: f64,
    pub count: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: f64,
    pub cost_ratio: f64,
    pub max_drawdown: f64,
    #[serde(rename = "MAR")]
    pub mar: f64,
    pub sharpe_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    pub total_trades: u64,
    pub total_pnl: f64,
    pub total_fee: f64,
    pub total_slippage: f64,
    pub total_turnover: f64,
    pub win_rate: f64,
    pub win_rate_trades: f64,
    pub cost_bps_on_turnover: f64,
    pub risk_reward_ratio: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    #[serde(rename = "MAR")]
    pub mar: f64,
    pub avg_hold_sec: f64,
    pub avg_hold_long: f64,
    pub avg_hold_short: f64,
    pub scenario_breakdown: HashMap<String, ScenarioStats>,
    pub invalid_scenario_rate: f64,
    pub invalid_fee_tier_rate: f64,
    pub turnover_maker: f64,
    pub turnover_taker: f64,
    pub fee_tier_distribution: HashMap<String, f64>,
    pub avg_ret1s_bps: f64,
    pub by_symbol: HashMap<String, BySymbolStats>,
}

impl Metrics {
    /// The documented zero-valued shape returned when a run produced no
    /// trades, so a dashboard can still distinguish "ran with no fills"
    /// from "crashed before producing anything".
    pub fn empty() -> Self {
        Self {
            total_trades: 0,
            total_pnl: 0.0,
            total_fee: 0.0,
            total_slippage: 0.0,
            total_turnover: 0.0,
            win_rate: 0.0,
            win_rate_trades: 0.0,
            cost_bps_on_turnover: 0.0,
            risk_reward_ratio: 0.0,
            sharpe_ratio: 0.0,
            sortino_ratio: 0.0,
            max_drawdown: 0.0,
            mar: 0.0,
            avg_hold_sec: 0.0,
            avg_hold_long: 0.0,
            avg_hold_short: 0.0,
            scenario_breakdown: HashMap::new(),
            invalid_scenario_rate: 0.0,
            invalid_fee_tier_rate: 0.0,
            turnover_maker: 0.0,
            turnover_taker: 0.0,
            fee_tier_distribution: HashMap::new(),
            avg_ret1s_bps: 0.0,
            by_symbol: HashMap::new(),
        }
    }
}

const EXIT_REASONS: [TradeReason; 7] = [
    TradeReason::Exit,
    TradeReason::Reverse,
    TradeReason::ReverseSignal,
    TradeReason::StopLoss,
    TradeReason::TakeProfit,
    TradeReason::Timeout,
    TradeReason::RolloverClose,
];

fn is_exit(reason: TradeReason) -> bool {
    EXIT_REASONS.contains(&reason)
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn stdev(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    var.sqrt()
}

pub struct MetricsAggregator;

impl MetricsAggregator {
    /// `initial_equity` anchors Sharpe/Sortino's return normalization; when
    /// absent the original falls back to `notional_per_trade`, then 1000.0.
    pub fn compute_metrics(trades: &[Trade], pnl_daily: &[DailyPnL], stats: &TradeSimStats, initial_equity: Option<f64>) -> Metrics {
        if trades.is_empty() {
            return Metrics::empty();
        }

        let mut sorted_daily: Vec<&DailyPnL> = pnl_daily.iter().collect();
        sorted_daily.sort_by(|a, b| (a.date.as_str(), a.symbol.as_str()).cmp(&(b.date.as_str(), b.symbol.as_str())));

        let mut pnl_series = Vec::with_capacity(sorted_daily.len());
        let mut cumulative = 0.0;
        for daily in &sorted_daily {
            cumulative += daily.net_pnl;
            pnl_series.push(cumulative);
        }

        let total_trades = trades.iter().filter(|t| is_exit(t.reason)).count() as u64;
        let total_pnl: f64 = pnl_daily.iter().map(|d| d.net_pnl).sum();
        let total_fee: f64 = pnl_daily.iter().map(|d| d.fee).sum();
        let total_slippage: f64 = pnl_daily.iter().map(|d| d.slippage).sum();
        let total_turnover: f64 = pnl_daily.iter().map(|d| d.turnover).sum();

        let wins_days = pnl_daily.iter().filter(|d| d.net_pnl > 0.0).count();
        let losses_days = pnl_daily.iter().filter(|d| d.net_pnl < 0.0).count();
        let win_rate_days = if wins_days + losses_days > 0 {
            wins_days as f64 / (wins_days + losses_days) as f64
        } else {
            0.0
        };

        let exit_trades: Vec<&Trade> = trades.iter().filter(|t| is_exit(t.reason)).collect();
        let wins_trades = exit_trades.iter().filter(|t| t.net_pnl.unwrap_or(0.0) > 0.0).count();
        let losses_trades = exit_trades.iter().filter(|t| t.net_pnl.unwrap_or(0.0) < 0.0).count();
        let win_rate_trades = if wins_trades + losses_trades > 0 {
            wins_trades as f64 / (wins_trades + losses_trades) as f64
        } else {
            0.0
        };

        let avg_win = if wins_days > 0 {
            pnl_daily.iter().filter(|d| d.net_pnl > 0.0).map(|d| d.net_pnl).sum::<f64>() / wins_days as f64
        } else {
            0.0
        };
        let avg_loss = if losses_days > 0 {
            (pnl_daily.iter().filter(|d| d.net_pnl < 0.0).map(|d| d.net_pnl).sum::<f64>() / losses_days as f64).abs()
        } else {
            0.0
        };
        let rr = if avg_loss > 0.0 {
            avg_win / avg_loss
        } else if avg_win > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let equity_base = initial_equity.unwrap_or_else(|| if stats.notional_per_trade > 0.0 { stats.notional_per_trade } else { 1000.0 });
        let returns = daily_returns(&pnl_series, equity_base);

        let sharpe = annualized_sharpe(&returns);
        let sortino = annualized_sortino(&returns);

        let (dd_max, _) = max_drawdown(&pnl_series);
        let mar = if dd_max > 0.0 {
            let annual_return = (total_pnl / pnl_daily.len().max(1) as f64) * 252.0;
            annual_return / dd_max
        } else if total_pnl > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let mut hold_times_long = Vec::new();
        let mut hold_times_short = Vec::new();
        for trade in &exit_trades {
            let Some(hold_sec) = trade.hold_sec else { continue };
            // The exit trade's own side is the closing side, the opposite of
            // the side that was actually held.
            match trade.side.opposite() {
                Side::Buy => hold_times_long.push(hold_sec),
                Side::Sell => hold_times_short.push(hold_sec),
            }
        }
        let avg_hold_long = if hold_times_long.is_empty() { 0.0 } else { mean(&hold_times_long) };
        let avg_hold_short = if hold_times_short.is_empty() { 0.0 } else { mean(&hold_times_short) };
        let all_hold: Vec<f64> = hold_times_long.iter().chain(hold_times_short.iter()).copied().collect();
        let avg_hold_sec = if all_hold.is_empty() { 0.0 } else { mean(&all_hold) };

        let scenario_breakdown = scenario_breakdown(&exit_trades);

        let invalid_scenario_rate = if stats.total_signal_count > 0 {
            stats.invalid_scenario_count as f64 / stats.total_signal_count as f64
        } else {
            0.0
        };
        let invalid_fee_tier_rate = if stats.total_signal_count > 0 {
            stats.invalid_fee_tier_count as f64 / stats.total_signal_count as f64
        } else {
            0.0
        };

        let ret1s_values: Vec<f64> = trades.iter().filter_map(|t| t.return_1s_bps).map(f64::abs).collect();
        let avg_ret1s_bps = if ret1s_values.is_empty() { 0.0 } else { mean(&ret1s_values) };

        let by_symbol = by_symbol(pnl_daily, equity_base);

        let cost_bps_on_turnover = if total_turnover > 0.0 {
            (total_fee + total_slippage) / total_turnover * 10_000.0
        } else {
            0.0
        };

        Metrics {
            total_trades,
            total_pnl,
            total_fee,
            total_slippage,
            total_turnover,
            win_rate: win_rate_days,
            win_rate_trades,
            cost_bps_on_turnover,
            risk_reward_ratio: rr,
            sharpe_ratio: sharpe,
            sortino_ratio: sortino,
            max_drawdown: dd_max,
            mar,
            avg_hold_sec,
            avg_hold_long,
            avg_hold_short,
            scenario_breakdown,
            invalid_scenario_rate,
            invalid_fee_tier_rate,
            turnover_maker: stats.turnover_maker,
            turnover_taker: stats.turnover_taker,
            fee_tier_distribution: stats.fee_tier_distribution.clone(),
            avg_ret1s_bps,
            by_symbol,
        }
    }
}

fn daily_returns(pnl_series: &[f64], equity_base: f64) -> Vec<f64> {
    if pnl_series.len() < 2 {
        return Vec::new();
    }
    pnl_series
        .windows(2)
        .map(|w| if equity_base > 0.0 { (w[1] - w[0]) / equity_base } else { 0.0 })
        .collect()
}

fn annualized_sharpe(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let std = stdev(returns);
    if std > 0.0 {
        mean(returns) / std * 252.0_f64.sqrt()
    } else {
        0.0
    }
}

fn annualized_sortino(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    if downside.is_empty() {
        return if mean(returns) > 0.0 { f64::INFINITY } else { 0.0 };
    }
    let downside_std = stdev(&downside);
    if downside_std > 0.0 {
        mean(returns) / downside_std * 252.0_f64.sqrt()
    } else {
        0.0
    }
}

fn max_drawdown(pnl_series: &[f64]) -> (f64, f64) {
    let mut dd_max = 0.0;
    let mut peak = pnl_series.first().copied().unwrap_or(0.0);
    for &pnl in pnl_series {
        if pnl > peak {
            peak = pnl;
        }
        let drawdown = peak - pnl;
        if drawdown > dd_max {
            dd_max = drawdown;
        }
    }
    (dd_max, peak)
}

fn scenario_breakdown(exit_trades: &[&Trade]) -> HashMap<String, ScenarioStats> {
    let mut by_key: HashMap<String, (u64, f64, u64, u64, Vec<f64>)> = HashMap::new();
    for trade in exit_trades {
        let scenario = trade.scenario_2x2.map(|s| s.as_str().to_string()).unwrap_or_else(|| "unknown".to_string());
        let session = trade.session.clone().unwrap_or_else(|| "unknown".to_string());
        let key = format!("{scenario}_{session}");
        let entry = by_key.entry(key).or_insert((0, 0.0, 0, 0, Vec::new()));
        let net_pnl = trade.net_pnl.unwrap_or(0.0);
        entry.0 += 1;
        entry.1 += net_pnl;
        if net_pnl > 0.0 {
            entry.2 += 1;
        } else if net_pnl < 0.0 {
            entry.3 += 1;
        }
        if let Some(hold_sec) = trade.hold_sec {
            entry.4.push(hold_sec);
        }
    }

    by_key
        .into_iter()
        .map(|(key, (count, pnl, wins, losses, hold_times))| {
            let win_rate = if count > 0 { wins as f64 / count as f64 } else { 0.0 };
            let avg_pnl = if count > 0 { pnl / count as f64 } else { 0.0 };
            let avg_hold_sec = if hold_times.is_empty() { 0.0 } else { mean(&hold_times) };
            (
                key,
                ScenarioStats {
                    trades: count,
                    pnl,
                    wins,
                    losses,
                    win_rate,
                    avg_pnl,
                    avg_hold_sec,
                },
            )
        })
        .collect()
}

fn by_symbol(pnl_daily: &[DailyPnL], equity_base: f64) -> HashMap<String, BySymbolStats> {
    let mut grouped: HashMap<String, Vec<&DailyPnL>> = HashMap::new();
    for daily in pnl_daily {
        grouped.entry(daily.symbol.clone()).or_default().push(daily);
    }

    grouped
        .into_iter()
        .map(|(symbol, mut daily_list)| {
            daily_list.sort_by(|a, b| a.date.cmp(&b.date));

            let gross_pnl: f64 = daily_list.iter().map(|d| d.gross_pnl).sum();
            let net_pnl: f64 = daily_list.iter().map(|d| d.net_pnl).sum();
            let fee: f64 = daily_list.iter().map(|d| d.fee).sum();
            let slippage: f64 = daily_list.iter().map(|d| d.slippage).sum();
            let turnover: f64 = daily_list.iter().map(|d| d.turnover).sum();
            let count: u64 = daily_list.iter().map(|d| d.trades).sum();
            let wins: u64 = daily_list.iter().map(|d| d.wins).sum();
            let losses: u64 = daily_list.iter().map(|d| d.losses).sum();
            let win_rate = if wins + losses > 0 { wins as f64 / (wins + losses) as f64 } else { 0.0 };
            let cost_ratio = if gross_pnl != 0.0 { (fee + slippage) / gross_pnl.abs() } else { 0.0 };

            let mut cumulative = 0.0;
            let series: Vec<f64> = daily_list
                .iter()
                .map(|d| {
                    cumulative += d.net_pnl;
                    cumulative
                })
                .collect();
            let (dd_max, _) = max_drawdown(&series);
            let mar = if dd_max > 0.0 {
                let annual_return = (net_pnl / daily_list.len().max(1) as f64) * 252.0;
                annual_return / dd_max
            } else if net_pnl > 0.0 {
                f64::INFINITY
            } else {
                0.0
            };

            let returns = daily_returns(&series, equity_base);
            let sharpe = annualized_sharpe(&returns);

            (
                symbol,
                BySymbolStats {
                    pnl_gross: gross_pnl,
                    pnl_net: net_pnl,
                    fee,
                    slippage,
                    turnover,
                    count,
                    wins,
                    losses,
                    win_rate,
                    cost_ratio,
                    max_drawdown: dd_max,
                    mar,
                    sharpe_ratio: sharpe,
                },
            )
        })
        .collect()
}

/// Prometheus Pushgateway export contract (spec §4.9.1). The transport
/// itself lives outside this crate (spec §1 non-goals) — a caller wires in
/// the teacher's `metrics-exporter-prometheus` or equivalent behind this
/// trait.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushgatewayExport {
    pub run_id: String,
    pub symbol: String,
    pub session: String,
    pub instance: String,
    pub push_ts: i64,
    pub metrics: HashMap<String, f64>,
}

pub trait MetricsPushSink {
    fn push(&self, export: &PushgatewayExport) -> crate::error::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Scenario2x2;

    fn exit_trade(symbol: &str, side: Side, net_pnl: f64, hold_sec: f64, scenario: Scenario2x2) -> Trade {
        Trade {
            ts_ms: 0,
            symbol: symbol.to_string(),
            side,
            px: 100.0,
            qty: 1.0,
            fee: 0.1,
            slippage_bps: 0.5,
            reason: TradeReason::Exit,
            pos_after: 0.0,
            gross_pnl: Some(net_pnl),
            net_pnl: Some(net_pnl),
            scenario_2x2: Some(scenario),
            session: Some("asia".into()),
            hold_sec: Some(hold_sec),
            maker_probability: Some(0.0),
            return_1s_bps: Some(5.0),
        }
    }

    fn daily(date: &str, symbol: &str, net_pnl: f64) -> DailyPnL {
        DailyPnL {
            date: date.into(),
            symbol: symbol.into(),
            gross_pnl: net_pnl,
            fee: 0.1,
            slippage: 0.05,
            net_pnl,
            turnover: 1000.0,
            trades: 1,
            wins: if net_pnl > 0.0 { 1 } else { 0 },
            losses: if net_pnl < 0.0 { 1 } else { 0 },
            win_rate: 0.0,
            rr: 0.0,
        }
    }

    #[test]
    fn empty_trades_returns_documented_zero_shape() {
        let metrics = MetricsAggregator::compute_metrics(&[], &[], &TradeSimStats::default(), None);
        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.sharpe_ratio, 0.0);
        assert!(metrics.by_symbol.is_empty());
    }

    #[test]
    fn avg_hold_splits_long_and_short_by_closing_side() {
        let trades = vec![
            exit_trade("BTCUSDT", Side::Sell, 10.0, 60.0, Scenario2x2::ActiveHighVol), // closed a long
            exit_trade("BTCUSDT", Side::Buy, -5.0, 120.0, Scenario2x2::QuietLowVol),   // closed a short
        ];
        let daily_pnl = vec![daily("2024-01-01", "BTCUSDT", 5.0)];
        let metrics = MetricsAggregator::compute_metrics(&trades, &daily_pnl, &TradeSimStats::default(), Some(1000.0));
        assert_eq!(metrics.avg_hold_long, 60.0);
        assert_eq!(metrics.avg_hold_short, 120.0);
    }

    #[test]
    fn scenario_breakdown_keys_on_scenario_and_session() {
        let trades = vec![exit_trade("BTCUSDT", Side::Sell, 10.0, 60.0, Scenario2x2::ActiveHighVol)];
        let daily_pnl = vec![daily("2024-01-01", "BTCUSDT", 10.0)];
        let metrics = MetricsAggregator::compute_metrics(&trades, &daily_pnl, &TradeSimStats::default(), Some(1000.0));
        assert!(metrics.scenario_breakdown.contains_key("A_H_asia"));
    }

    #[test]
    fn zero_drawdown_with_positive_pnl_gives_infinite_mar() {
        let trades = vec![exit_trade("BTCUSDT", Side::Sell, 10.0, 60.0, Scenario2x2::ActiveHighVol)];
        let daily_pnl = vec![daily("2024-01-01", "BTCUSDT", 10.0)];
        let metrics = MetricsAggregator::compute_metrics(&trades, &daily_pnl, &TradeSimStats::default(), Some(1000.0));
        assert!(metrics.mar.is_infinite());
    }
}
