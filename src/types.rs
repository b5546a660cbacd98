//! Shared data model (spec §3). Feature rows are owned by their pipeline
//! stage and consumed exactly once downstream; signals are owned by the
//! Signal Core until handed to sinks/executor; orders and fills are owned
//! by the executor; execution records are owned by the executor's log sink.

use serde::{Deserialize, Serialize};
use std::fmt;

pub type Symbol = String;

/// Cross of activity (spread-based) x volatility (|return_1s|-based).
/// The two axes are kept independent to avoid boundary overlap (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scenario2x2 {
    #[serde(rename = "A_H")]
    ActiveHighVol,
    #[serde(rename = "A_L")]
    ActiveLowVol,
    #[serde(rename = "Q_H")]
    QuietHighVol,
    #[serde(rename = "Q_L")]
    QuietLowVol,
}

impl Scenario2x2 {
    pub fn from_axes(is_active: bool, is_high_vol: bool) -> Self {
        match (is_active, is_high_vol) {
            (true, true) => Scenario2x2::ActiveHighVol,
            (true, false) => Scenario2x2::ActiveLowVol,
            (false, true) => Scenario2x2::QuietHighVol,
            (false, false) => Scenario2x2::QuietLowVol,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario2x2::ActiveHighVol => "A_H",
            Scenario2x2::ActiveLowVol => "A_L",
            Scenario2x2::QuietHighVol => "Q_H",
            Scenario2x2::QuietLowVol => "Q_L",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "A_H" => Some(Scenario2x2::ActiveHighVol),
            "A_L" => Some(Scenario2x2::ActiveLowVol),
            "Q_H" => Some(Scenario2x2::QuietHighVol),
            "Q_L" => Some(Scenario2x2::QuietLowVol),
            _ => None,
        }
    }
}

impl fmt::Display for Scenario2x2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single second of market state for one symbol, after alignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRow {
    pub second_ts: i64,
    pub ts_ms: i64,
    pub symbol: Symbol,
    pub mid: f64,
    pub best_bid: f64,
    pub best_ask: f64,
    pub spread_bps: f64,
    pub return_1s: f64,
    pub vol_bps: f64,
    pub z_ofi: f64,
    pub z_cvd: f64,
    #[serde(default)]
    pub fusion_score: f64,
    pub consistency: f64,
    pub warmup: bool,
    pub lag_ms_price: i64,
    pub lag_ms_orderbook: i64,
    pub lag_bad_price: bool,
    pub lag_bad_orderbook: bool,
    pub is_gap_second: bool,
    pub scenario_2x2: Scenario2x2,
    #[serde(default)]
    pub fee_tier: Option<String>,
    #[serde(default)]
    pub session: Option<String>,
    /// trades/min over a trailing 60s window; filled by the Feeder if absent.
    #[serde(default)]
    pub trade_rate: Option<f64>,
    /// quote updates/sec over a trailing 60s window; filled by the Feeder if absent.
    #[serde(default)]
    pub quote_rate: Option<f64>,
}

impl FeatureRow {
    pub fn lag_sec(&self) -> f64 {
        self.lag_ms_price.max(self.lag_ms_orderbook).max(0) as f64 / 1000.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Buy,
    Sell,
    StrongBuy,
    StrongSell,
    Quiet,
    Neutral,
}

impl SignalType {
    /// The directional side a confirmed signal of this type would enter,
    /// or `None` for `Quiet`/`Neutral` (no position to take).
    pub fn side(&self) -> Option<Side> {
        match self {
            SignalType::Buy | SignalType::StrongBuy => Some(Side::Buy),
            SignalType::Sell | SignalType::StrongSell => Some(Side::Sell),
            SignalType::Quiet | SignalType::Neutral => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Active,
    Quiet,
}

/// First-failing-step classification from the Signal Core's evaluation
/// order (spec §4.4). `confirm == true` iff `decision_code == Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionCode {
    Ok,
    FailGating,
    FailThreshold,
    FailRegime,
    FailCooldown,
    FailDedup,
    FailWarmup,
    FailAntiflip,
}

impl DecisionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionCode::Ok => "OK",
            DecisionCode::FailGating => "FAIL_GATING",
            DecisionCode::FailThreshold => "FAIL_THRESHOLD",
            DecisionCode::FailRegime => "FAIL_REGIME",
            DecisionCode::FailCooldown => "FAIL_COOLDOWN",
            DecisionCode::FailDedup => "FAIL_DEDUP",
            DecisionCode::FailWarmup => "FAIL_WARMUP",
            DecisionCode::FailAntiflip => "FAIL_ANTIFLIP",
        }
    }
}

impl fmt::Display for DecisionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical gate-reason vocabulary (spec §7).
pub const GATE_REASON_WEAK_SIGNAL: &str = "weak_signal";
pub const GATE_REASON_LOW_CONSISTENCY: &str = "low_consistency";
pub const GATE_REASON_LAG_SEC_EXCEEDED: &str = "lag_sec_exceeded";
pub const GATE_REASON_SPREAD_BPS_EXCEEDED: &str = "spread_bps_exceeded";
pub const GATE_REASON_COMPONENT_WARMUP: &str = "component_warmup";
pub const GATE_REASON_DEGRADED_OFI_ONLY: &str = "degraded_ofi_only";
pub const GATE_REASON_DEGRADED_CVD_ONLY: &str = "degraded_cvd_only";
pub const GATE_REASON_REVERSE_COOLDOWN: &str = "reverse_cooldown";
pub const GATE_REASON_COOLDOWN_AFTER_EXIT: &str = "cooldown_after_exit";
pub const GATE_REASON_LAG_BAD_PRICE: &str = "lag_bad_price";
pub const GATE_REASON_LAG_BAD_ORDERBOOK: &str = "lag_bad_orderbook";
pub const GATE_REASON_IS_GAP_SECOND: &str = "is_gap_second";
pub const GATE_REASON_UNKNOWN: &str = "unknown";

/// Attribution payload carried alongside a signal so TradeSimulator and
/// MetricsAggregator can cost/attribute without re-reading features.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureData {
    pub lag_bad_price: bool,
    pub lag_bad_orderbook: bool,
    pub is_gap_second: bool,
    pub spread_bps: f64,
    pub vol_bps: f64,
    pub scenario_2x2: Option<Scenario2x2>,
    pub fee_tier: Option<String>,
    pub session: Option<String>,
    pub return_1s: f64,
}

/// The decision emitted by the Signal Core for at most one per (symbol, ts_ms).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub signal_id: String,
    pub symbol: Symbol,
    pub ts_ms: i64,
    pub score: f64,
    pub signal_type: SignalType,
    pub confirm: bool,
    /// 1 = passed, 0 = blocked.
    pub gating: u8,
    pub decision_code: DecisionCode,
    pub gate_reason: String,
    pub regime: Regime,
    pub scenario_2x2: Scenario2x2,
    pub config_hash: String,
    pub run_id: String,
    #[serde(default)]
    pub _feature_data: FeatureData,
}

impl Signal {
    pub fn invariant_confirm_matches_decision(&self) -> bool {
        self.confirm == (self.gating == 1 && matches!(self.decision_code, DecisionCode::Ok))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    GTC,
    IOC,
    FOK,
}

/// Minimal submission record. `client_order_id` is the idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub client_order_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub qty: f64,
    pub order_type: OrderType,
    pub price: Option<f64>,
    pub tif: TimeInForce,
    pub ts_ms: i64,
}

/// `Order` plus upstream fields from Signal, plus venue constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCtx {
    pub order: Order,
    pub signal_row_id: Option<String>,
    pub regime: Option<Regime>,
    pub scenario: Option<Scenario2x2>,
    pub warmup: bool,
    pub guard_reason: Option<String>,
    pub consistency: Option<f64>,
    pub weak_signal_throttle: bool,
    pub tick_size: f64,
    pub step_size: f64,
    pub min_notional: f64,
    pub costs_bps: f64,
    pub event_ts_ms: Option<i64>,
}

impl OrderCtx {
    /// `client_order_id = hash("signal_row_id|ts_ms|side|qty|price")[:32]`
    /// (spec §4.6). Equal inputs MUST produce equal ids.
    pub fn idempotency_seed(&self) -> String {
        crate::execution::idempotency::idempotency_seed(
            self.signal_row_id.as_deref(),
            self.event_ts_ms.unwrap_or(self.order.ts_ms),
            self.order.side,
            self.order.qty,
            self.order.price,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    New,
    Ack,
    Partial,
    Filled,
    Canceled,
    Rejected,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Filled | ExecutionState::Canceled | ExecutionState::Rejected
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::New => "new",
            ExecutionState::Ack => "ack",
            ExecutionState::Partial => "partial",
            ExecutionState::Filled => "filled",
            ExecutionState::Canceled => "canceled",
            ExecutionState::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liquidity {
    Maker,
    Taker,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub ts_ms: i64,
    pub symbol: Symbol,
    pub client_order_id: String,
    pub broker_order_id: Option<String>,
    pub price: f64,
    pub qty: f64,
    pub fee: f64,
    pub liquidity: Liquidity,
    pub side: Side,
}

/// Per-symbol net position. Created on entry, updated atomically on exit,
/// deleted on exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    /// Signed: positive = long, negative = short.
    pub net_qty: f64,
    pub entry_price: f64,
    pub entry_fee: f64,
    pub entry_notional: f64,
    pub maker_probability: f64,
    pub fee_tier: Option<String>,
    pub entry_ts_ms: i64,
    pub scenario_2x2: Option<Scenario2x2>,
    pub session: Option<String>,
}

impl Position {
    pub fn side(&self) -> Side {
        if self.net_qty >= 0.0 {
            Side::Buy
        } else {
            Side::Sell
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeReason {
    Entry,
    Exit,
    Reverse,
    ReverseSignal,
    StopLoss,
    TakeProfit,
    Timeout,
    RolloverClose,
}

impl TradeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeReason::Entry => "entry",
            TradeReason::Exit => "exit",
            TradeReason::Reverse => "reverse",
            TradeReason::ReverseSignal => "reverse_signal",
            TradeReason::StopLoss => "stop_loss",
            TradeReason::TakeProfit => "take_profit",
            TradeReason::Timeout => "timeout",
            TradeReason::RolloverClose => "rollover_close",
        }
    }

    pub fn is_exit(&self) -> bool {
        !matches!(self, TradeReason::Entry)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub ts_ms: i64,
    pub symbol: Symbol,
    pub side: Side,
    pub px: f64,
    pub qty: f64,
    pub fee: f64,
    pub slippage_bps: f64,
    pub reason: TradeReason,
    pub pos_after: f64,
    pub gross_pnl: Option<f64>,
    pub net_pnl: Option<f64>,
    pub scenario_2x2: Option<Scenario2x2>,
    pub session: Option<String>,
    pub hold_sec: Option<f64>,
    pub maker_probability: Option<f64>,
    /// `return_1s` (bps) sampled off the entry feature row, so
    /// `MetricsAggregator::avg_ret1s_bps` is computed from a real value
    /// instead of the always-empty attribute the original reads.
    pub return_1s_bps: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyPnL {
    pub date: String,
    pub symbol: Symbol,
    pub gross_pnl: f64,
    pub fee: f64,
    pub slippage: f64,
    pub net_pnl: f64,
    pub turnover: f64,
    pub trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: f64,
    pub rr: f64,
}

/// Live-worker resume watermark. Keyed (symbol, signal_id, order_id) UNIQUE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub symbol: Symbol,
    pub signal_id: String,
    pub order_id: String,
    pub status: ExecutionState,
    pub gating_snapshot: serde_json::Value,
    pub meta: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_round_trips_through_str() {
        for s in [
            Scenario2x2::ActiveHighVol,
            Scenario2x2::ActiveLowVol,
            Scenario2x2::QuietHighVol,
            Scenario2x2::QuietLowVol,
        ] {
            assert_eq!(Scenario2x2::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn decision_code_implies_confirm() {
        let base = Signal {
            signal_id: "x".into(),
            symbol: "BTCUSDT".into(),
            ts_ms: 0,
            score: 1.0,
            signal_type: SignalType::Buy,
            confirm: true,
            gating: 1,
            decision_code: DecisionCode::Ok,
            gate_reason: String::new(),
            regime: Regime::Active,
            scenario_2x2: Scenario2x2::ActiveHighVol,
            config_hash: "h".into(),
            run_id: "r".into(),
            _feature_data: FeatureData::default(),
        };
        assert!(base.invariant_confirm_matches_decision());

        let mut gated = base.clone();
        gated.confirm = false;
        gated.gating = 0;
        gated.decision_code = DecisionCode::FailGating;
        assert!(gated.invariant_confirm_matches_decision());

        let mut broken = base;
        broken.confirm = true;
        broken.decision_code = DecisionCode::FailGating;
        assert!(!broken.invariant_confirm_matches_decision());
    }
}
