//! Backtest Core trade simulator (spec §4.8). Turns confirmed signals plus
//! a current mid price into entries/exits against a one-position-per-symbol
//! book, with the 7-step exit evaluation order below implemented as a
//! straight-line function (first-match-wins, matching
//! `original_source/backtest/trade_sim.py::_check_exit`):
//!
//!   0. `signal.confirm` required, else no exit is evaluated at all
//!   1. `max_hold_time_sec` elapsed -> unconditional `timeout` exit
//!   2. `stop_loss_bps` breached -> `stop_loss` exit (safety first, ignores
//!      the min-hold guard below)
//!   3. `min_hold_time_sec` not yet elapsed -> withhold TP/reverse entirely
//!   4. `deadband_bps` not yet cleared -> withhold TP/reverse entirely
//!   5. `take_profit_bps` reached -> `take_profit` exit
//!   6. opposite-direction confirmed signal -> `reverse_signal` exit
//!   7. `force_timeout_exit` once past `min_hold_time_sec` -> `timeout` exit

use crate::backtest::cost_models::CostModel;
use crate::backtest::rollover::BizDateCalc;
use crate::config::BacktestConfig;
use crate::types::{DailyPnL, FeatureData, Position, Side, Trade, TradeReason};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Narrow one-direction callback the simulator holds so it never needs a
/// shared mutable reference back into the Signal Core (spec §9).
pub trait ExitSink {
    fn record_exit(&mut self, trade: &Trade, position: &Position);
}

pub struct NullExitSink;
impl ExitSink for NullExitSink {
    fn record_exit(&mut self, _trade: &Trade, _position: &Position) {}
}

#[derive(Debug, Clone, Default)]
pub struct GateReasonBreakdown(pub HashMap<String, u64>);

impl GateReasonBreakdown {
    /// Splits a comma-separated `gate_reason` string and maps fusion-core
    /// reason codes onto the executor's gate-reason vocabulary, matching
    /// `_record_gate_reasons` exactly, including its `reason:<code>` and
    /// `spread_bps>`/`lag_sec>` threshold-annotation prefixes.
    pub fn record(&mut self, gate_reason: Option<&str>) {
        let Some(gate_reason) = gate_reason else {
            *self.0.entry("unknown".into()).or_insert(0) += 1;
            return;
        };
        let reasons: Vec<&str> = gate_reason.split(',').map(|r| r.trim()).filter(|r| !r.is_empty()).collect();
        if reasons.is_empty() {
            *self.0.entry("unknown".into()).or_insert(0) += 1;
            return;
        }

        for reason in reasons {
            let key = if let Some(code) = reason.strip_prefix("reason:") {
                match code.trim() {
                    "low_consistency_throttle" => "low_consistency".to_string(),
                    "lag_exceeded" => "lag_sec_exceeded".to_string(),
                    "warmup" => "component_warmup".to_string(),
                    "degraded_ofi_only" => "degraded_ofi_only".to_string(),
                    "degraded_cvd_only" => "degraded_cvd_only".to_string(),
                    other => format!("reason_{other}"),
                }
            } else if reason.starts_with("spread_bps>") {
                "spread_bps_exceeded".to_string()
            } else if reason.starts_with("lag_sec>") {
                "lag_sec_exceeded".to_string()
            } else if reason.starts_with("reverse_cooldown") {
                "reverse_cooldown".to_string()
            } else {
                reason.to_string()
            };
            *self.0.entry(key).or_insert(0) += 1;
        }
    }
}

/// One inbound decision the simulator consumes per `(symbol, ts_ms)`. Mirrors
/// the subset of `Signal` plus the mid price the original reads off its
/// loose `signal`/`mid_price` dict arguments.
pub struct SignalTick<'a> {
    pub symbol: &'a str,
    pub ts_ms: i64,
    pub confirm: bool,
    pub gating_blocked: bool,
    pub gate_reason: Option<&'a str>,
    pub side: Option<Side>,
    pub mid_price: f64,
    pub feature_data: &'a FeatureData,
}

pub struct TradeSimulator<S: ExitSink = NullExitSink> {
    cfg: BacktestConfig,
    cost_model: CostModel,
    biz_date: BizDateCalc,
    ignore_gating_in_backtest: bool,
    positions: HashMap<String, Position>,
    last_signal_feature_data: HashMap<String, FeatureData>,
    pnl_daily: HashMap<String, DailyPnL>,
    gate_reason_breakdown: GateReasonBreakdown,
    turnover_maker: f64,
    turnover_taker: f64,
    fee_tier_distribution: HashMap<String, f64>,
    sink: S,
}

impl TradeSimulator<NullExitSink> {
    pub fn new(cfg: BacktestConfig, ignore_gating_in_backtest: bool) -> Self {
        Self::with_sink(cfg, ignore_gating_in_backtest, NullExitSink)
    }
}

impl<S: ExitSink> TradeSimulator<S> {
    pub fn with_sink(cfg: BacktestConfig, ignore_gating_in_backtest: bool, sink: S) -> Self {
        let biz_date = BizDateCalc::new(&cfg.rollover_timezone, cfg.rollover_hour);
        let cost_model = CostModel::new(&cfg);
        Self {
            cfg,
            cost_model,
            biz_date,
            ignore_gating_in_backtest,
            positions: HashMap::new(),
            last_signal_feature_data: HashMap::new(),
            pnl_daily: HashMap::new(),
            gate_reason_breakdown: GateReasonBreakdown::default(),
            turnover_maker: 0.0,
            turnover_taker: 0.0,
            fee_tier_distribution: HashMap::new(),
            sink,
        }
    }

    pub fn open_position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn gate_reason_breakdown(&self) -> &GateReasonBreakdown {
        &self.gate_reason_breakdown
    }

    pub fn pnl_daily(&self) -> impl Iterator<Item = &DailyPnL> {
        self.pnl_daily.values()
    }

    pub fn turnover(&self) -> (f64, f64) {
        (self.turnover_maker, self.turnover_taker)
    }

    pub fn cost_model_stats(&self) -> &crate::backtest::cost_models::CostModelStats {
        self.cost_model.stats()
    }

    pub fn fee_tier_distribution(&self) -> &HashMap<String, f64> {
        &self.fee_tier_distribution
    }

    /// Processes one confirmed-or-not tick. Gate-reason stats are recorded
    /// even for blocked/unconfirmed signals (diagnostic, not enforcement);
    /// `confirm == false` or `gating_blocked == true` (unless
    /// `ignore_gating_in_backtest`) short-circuits before any entry/exit
    /// logic runs.
    pub fn process_signal(&mut self, tick: &SignalTick) -> Option<Trade> {
        if tick.gating_blocked {
            self.gate_reason_breakdown.record(tick.gate_reason);
        }

        if !tick.confirm {
            return None;
        }
        if !self.ignore_gating_in_backtest && tick.gating_blocked {
            debug!(symbol = tick.symbol, reason = tick.gate_reason, "signal blocked by gate");
            return None;
        }

        self.cost_model.note_signal();
        self.last_signal_feature_data.insert(tick.symbol.to_string(), tick.feature_data.clone());
        if tick.feature_data.lag_bad_price {
            *self.gate_reason_breakdown.0.entry("lag_bad_price".into()).or_insert(0) += 1;
        }
        if tick.feature_data.lag_bad_orderbook {
            *self.gate_reason_breakdown.0.entry("lag_bad_orderbook".into()).or_insert(0) += 1;
        }
        if tick.feature_data.is_gap_second {
            *self.gate_reason_breakdown.0.entry("is_gap_second".into()).or_insert(0) += 1;
        }

        let Some(side) = tick.side else { return None };

        if self.positions.contains_key(tick.symbol) {
            if let Some(exit_trade) = self.check_exit(tick, side) {
                return Some(exit_trade);
            }
            if self.cfg.reverse_on_signal {
                let current_side = self.positions.get(tick.symbol).unwrap().side();
                if side != current_side {
                    let position = self.positions.get(tick.symbol).unwrap().clone();
                    if let Some(_exit) = self.exit_position(tick.symbol, &position, tick, TradeReason::Reverse) {
                        return self.enter_position(tick, side);
                    }
                }
            }
            None
        } else {
            self.enter_position(tick, side)
        }
    }

    fn enter_position(&mut self, tick: &SignalTick, side: Side) -> Option<Trade> {
        let slippage_bps = self.cost_model.slippage_bps(tick.feature_data);
        let exec_px = tick.mid_price * (1.0 + side.sign() * (slippage_bps / 10_000.0));
        let qty = self.cfg.notional_per_trade / exec_px;
        let notional = exec_px * qty;
        let fee_result = self.cost_model.fee_bps(tick.feature_data, side);
        let fee = notional * (fee_result.fee_bps / 10_000.0);
        let is_maker = fee_result.maker_probability > 0.5;

        let position = Position {
            symbol: tick.symbol.to_string(),
            net_qty: if side == Side::Buy { qty } else { -qty },
            entry_price: exec_px,
            entry_fee: fee,
            entry_notional: notional,
            maker_probability: fee_result.maker_probability,
            fee_tier: tick.feature_data.fee_tier.clone(),
            entry_ts_ms: tick.ts_ms,
            scenario_2x2: tick.feature_data.scenario_2x2,
            session: tick.feature_data.session.clone(),
        };
        let _ = is_maker;

        let trade = Trade {
            ts_ms: tick.ts_ms,
            symbol: tick.symbol.to_string(),
            side,
            px: exec_px,
            qty,
            fee,
            slippage_bps: if side == Side::Buy { slippage_bps } else { -slippage_bps },
            reason: TradeReason::Entry,
            pos_after: if side == Side::Buy { 1.0 } else { -1.0 },
            gross_pnl: None,
            net_pnl: None,
            scenario_2x2: tick.feature_data.scenario_2x2,
            session: tick.feature_data.session.clone(),
            hold_sec: None,
            maker_probability: Some(fee_result.maker_probability),
            return_1s_bps: Some(tick.feature_data.return_1s),
        };

        self.positions.insert(tick.symbol.to_string(), position);
        Some(trade)
    }

    /// The 7-step straight-line exit evaluation described in the module
    /// doc comment.
    fn check_exit(&mut self, tick: &SignalTick, incoming_side: Side) -> Option<Trade> {
        let position = self.positions.get(tick.symbol)?.clone();
        let hold_time_sec = ((tick.ts_ms - position.entry_ts_ms) as f64 / 1000.0).max(0.0);

        if hold_time_sec >= self.cfg.max_hold_time_sec as f64 {
            warn!(symbol = tick.symbol, hold_time_sec, "max hold time exceeded, forcing timeout exit");
            return self.exit_position(tick.symbol, &position, tick, TradeReason::Timeout);
        }

        let side = position.side();
        let pnl_bps = match side {
            Side::Buy => (tick.mid_price - position.entry_price) / position.entry_price * 10_000.0,
            Side::Sell => (position.entry_price - tick.mid_price) / position.entry_price * 10_000.0,
        };

        if let Some(stop_loss_bps) = self.cfg.stop_loss_bps {
            if pnl_bps <= -stop_loss_bps {
                return self.exit_position(tick.symbol, &position, tick, TradeReason::StopLoss);
            }
        }

        if let Some(min_hold) = self.cfg.min_hold_time_sec {
            if hold_time_sec < min_hold as f64 {
                return None;
            }
        }

        if self.cfg.deadband_bps > 0.0 && pnl_bps.abs() < self.cfg.deadband_bps {
            return None;
        }

        if let Some(take_profit_bps) = self.cfg.take_profit_bps {
            if pnl_bps >= take_profit_bps {
                return self.exit_position(tick.symbol, &position, tick, TradeReason::TakeProfit);
            }
        }

        if incoming_side != side {
            return self.exit_position(tick.symbol, &position, tick, TradeReason::ReverseSignal);
        }

        if let Some(min_hold) = self.cfg.min_hold_time_sec {
            if hold_time_sec >= min_hold as f64 && self.cfg.force_timeout_exit {
                return self.exit_position(tick.symbol, &position, tick, TradeReason::Timeout);
            }
        }

        None
    }

    fn exit_position(&mut self, symbol: &str, position: &Position, tick: &SignalTick, reason: TradeReason) -> Option<Trade> {
        let exit_side = position.side().opposite();
        let slippage_bps = self.cost_model.slippage_bps(tick.feature_data);
        let exec_px = tick.mid_price * (1.0 + exit_side.sign() * (slippage_bps / 10_000.0));
        let qty = position.net_qty.abs();

        let gross_pnl = match position.side() {
            Side::Buy => (exec_px - position.entry_price) * qty,
            Side::Sell => (position.entry_price - exec_px) * qty,
        };

        let notional = exec_px * qty;
        let fee_result = self.cost_model.fee_bps(tick.feature_data, exit_side);
        let exit_fee = notional * (fee_result.fee_bps / 10_000.0);
        let slippage_cost = (tick.mid_price - exec_px).abs() * qty;
        let net_pnl = gross_pnl - position.entry_fee - exit_fee;

        let hold_sec = (tick.ts_ms - position.entry_ts_ms) as f64 / 1000.0;

        let trade = Trade {
            ts_ms: tick.ts_ms,
            symbol: symbol.to_string(),
            side: exit_side,
            px: exec_px,
            qty,
            fee: exit_fee,
            slippage_bps: if exit_side == Side::Buy { slippage_bps } else { -slippage_bps },
            reason,
            pos_after: 0.0,
            gross_pnl: Some(gross_pnl),
            net_pnl: Some(net_pnl),
            scenario_2x2: tick.feature_data.scenario_2x2,
            session: tick.feature_data.session.clone(),
            hold_sec: Some(hold_sec),
            maker_probability: Some(fee_result.maker_probability),
            return_1s_bps: Some(tick.feature_data.return_1s),
        };

        let date_str = self.biz_date.biz_date(tick.ts_ms);
        let key = format!("{date_str}_{symbol}");
        let daily = self.pnl_daily.entry(key).or_insert_with(|| DailyPnL {
            date: date_str.clone(),
            symbol: symbol.to_string(),
            gross_pnl: 0.0,
            fee: 0.0,
            slippage: 0.0,
            net_pnl: 0.0,
            turnover: 0.0,
            trades: 0,
            wins: 0,
            losses: 0,
            win_rate: 0.0,
            rr: 0.0,
        });
        daily.gross_pnl += gross_pnl;
        daily.fee += position.entry_fee + exit_fee;
        daily.slippage += slippage_cost;
        daily.net_pnl += net_pnl;
        daily.turnover += position.entry_notional + notional;
        daily.trades += 1;
        if net_pnl > 0.0 {
            daily.wins += 1;
        } else if net_pnl < 0.0 {
            daily.losses += 1;
        }

        self.turnover_maker += position.entry_notional * position.maker_probability;
        self.turnover_taker += position.entry_notional * (1.0 - position.maker_probability);
        self.turnover_maker += notional * fee_result.maker_probability;
        self.turnover_taker += notional * (1.0 - fee_result.maker_probability);

        let entry_tier = position.fee_tier.clone().unwrap_or_else(|| "TM".to_string());
        let exit_tier = tick.feature_data.fee_tier.clone().unwrap_or_else(|| "TM".to_string());
        *self.fee_tier_distribution.entry(entry_tier).or_insert(0.0) += position.entry_notional;
        *self.fee_tier_distribution.entry(exit_tier).or_insert(0.0) += notional;

        self.positions.remove(symbol);
        self.sink.record_exit(&trade, position);
        Some(trade)
    }

    /// Technical close at the end of a backtest run: closes every open
    /// position at `current_prices`, using `last_data_ts_ms` (the last
    /// market-data timestamp seen, never wall-clock) so end-of-run PnL
    /// rollover isn't skewed by how long the process happens to keep
    /// running after data ends.
    pub fn close_all_positions(&mut self, current_prices: &HashMap<String, f64>, last_data_ts_ms: i64) -> Vec<Trade> {
        let symbols: Vec<String> = self.positions.keys().cloned().collect();
        let mut closed = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let position = self.positions.get(&symbol).unwrap().clone();
            let mid_price = current_prices.get(&symbol).copied().unwrap_or(position.entry_price);
            let feature_data = self.last_signal_feature_data.get(&symbol).cloned().unwrap_or_default();

            let mut reason = TradeReason::RolloverClose;
            if self.cfg.force_timeout_exit {
                if let Some(min_hold) = self.cfg.min_hold_time_sec {
                    let hold_time_sec = (last_data_ts_ms - position.entry_ts_ms) as f64 / 1000.0;
                    if hold_time_sec >= min_hold as f64 {
                        reason = TradeReason::Timeout;
                    }
                }
            }

            let tick = SignalTick {
                symbol: &symbol,
                ts_ms: last_data_ts_ms,
                confirm: true,
                gating_blocked: false,
                gate_reason: None,
                side: None,
                mid_price,
                feature_data: &feature_data,
            };
            if let Some(trade) = self.exit_position(&symbol, &position, &tick, reason) {
                closed.push(trade);
            }
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Scenario2x2;

    fn fd() -> FeatureData {
        FeatureData {
            spread_bps: 1.0,
            vol_bps: 1.0,
            scenario_2x2: Some(Scenario2x2::ActiveLowVol),
            ..FeatureData::default()
        }
    }

    fn tick<'a>(symbol: &'a str, ts_ms: i64, side: Option<Side>, mid_price: f64, feature_data: &'a FeatureData) -> SignalTick<'a> {
        SignalTick {
            symbol,
            ts_ms,
            confirm: true,
            gating_blocked: false,
            gate_reason: None,
            side,
            mid_price,
            feature_data,
        }
    }

    #[test]
    fn enters_then_stop_loss_exits_regardless_of_min_hold() {
        let mut cfg = BacktestConfig::default();
        cfg.stop_loss_bps = Some(5.0);
        cfg.min_hold_time_sec = Some(3600);
        let mut sim = TradeSimulator::new(cfg, false);
        let fd = fd();

        let entry = sim.process_signal(&tick("BTCUSDT", 0, Some(Side::Buy), 100.0, &fd));
        assert!(entry.is_some());

        let exit = sim.process_signal(&tick("BTCUSDT", 1_000, Some(Side::Buy), 99.0, &fd));
        assert!(exit.is_some());
        assert_eq!(exit.unwrap().reason, TradeReason::StopLoss);
    }

    #[test]
    fn min_hold_withholds_take_profit() {
        let mut cfg = BacktestConfig::default();
        cfg.take_profit_bps = Some(5.0);
        cfg.min_hold_time_sec = Some(30);
        let mut sim = TradeSimulator::new(cfg, false);
        let fd = fd();

        sim.process_signal(&tick("BTCUSDT", 0, Some(Side::Buy), 100.0, &fd));
        let too_early = sim.process_signal(&tick("BTCUSDT", 5_000, Some(Side::Buy), 100.2, &fd));
        assert!(too_early.is_none());

        let after_min_hold = sim.process_signal(&tick("BTCUSDT", 31_000, Some(Side::Buy), 100.2, &fd));
        assert!(after_min_hold.is_some());
        assert_eq!(after_min_hold.unwrap().reason, TradeReason::TakeProfit);
    }

    #[test]
    fn max_hold_time_forces_timeout_unconditionally() {
        let mut cfg = BacktestConfig::default();
        cfg.max_hold_time_sec = 60;
        let mut sim = TradeSimulator::new(cfg, false);
        let fd = fd();

        sim.process_signal(&tick("BTCUSDT", 0, Some(Side::Buy), 100.0, &fd));
        let exit = sim.process_signal(&tick("BTCUSDT", 61_000, Some(Side::Buy), 100.0, &fd));
        assert_eq!(exit.unwrap().reason, TradeReason::Timeout);
    }

    #[test]
    fn close_all_positions_uses_last_data_ts_not_wall_clock() {
        let cfg = BacktestConfig::default();
        let mut sim = TradeSimulator::new(cfg, false);
        let fd = fd();
        sim.process_signal(&tick("BTCUSDT", 0, Some(Side::Buy), 100.0, &fd));

        let mut prices = HashMap::new();
        prices.insert("BTCUSDT".to_string(), 101.0);
        let closed = sim.close_all_positions(&prices, 90_000);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].reason, TradeReason::RolloverClose);
        assert!(sim.open_position("BTCUSDT").is_none());
    }

    #[test]
    fn gate_reason_breakdown_splits_and_maps_fusion_codes() {
        let cfg = BacktestConfig::default();
        let mut sim = TradeSimulator::new(cfg, false);
        let fd = fd();
        let blocked = SignalTick {
            gating_blocked: true,
            gate_reason: Some("weak_signal,reason:low_consistency_throttle,spread_bps>8.0"),
            confirm: false,
            ..tick("BTCUSDT", 0, None, 100.0, &fd)
        };
        sim.process_signal(&blocked);
        let breakdown = &sim.gate_reason_breakdown().0;
        assert_eq!(breakdown.get("weak_signal"), Some(&1));
        assert_eq!(breakdown.get("low_consistency"), Some(&1));
        assert_eq!(breakdown.get("spread_bps_exceeded"), Some(&1));
    }
}
