//! Venue adapter abstraction (spec §4.5). An `Adapter` normalises an
//! `OrderCtx` to venue tick/step constraints and submits it, translating
//! venue-specific failures into `AlphaCoreError`. Retry/backoff policy is
//! grounded on `original_source/executors/idempotency.py::RetryPolicy`.

use crate::error::{AlphaCoreError, Result};
use crate::types::{ExecutionState, Fill, Order, OrderCtx};
use async_trait::async_trait;
use rand::Rng;
use rust_decimal::prelude::*;
use rust_decimal::{Decimal, RoundingStrategy};
use std::fmt;
use std::time::Duration;

#[async_trait]
pub trait Adapter: Send + Sync {
    async fn submit(&self, order: &Order) -> Result<Fill>;
    async fn cancel(&self, client_order_id: &str) -> Result<()>;

    /// Polls fills recorded at the venue since `since_ts_ms`, for recovery
    /// after a crash or a missed ack. Adapters with no durable fill history
    /// of their own (backtest, demo venues) default to none.
    async fn fetch_fills(&self, _symbol: &str, _since_ts_ms: i64) -> Result<Vec<Fill>> {
        Ok(Vec::new())
    }

    /// Identifies which executor variant this adapter backs, for logging
    /// and shadow-comparison labeling.
    fn kind(&self) -> &'static str;
}

/// The venue error taxonomy executors classify adapter failures against
/// (spec §4.5, §7). `E.PARAMS` and `E.REJECT.BIZ` are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterErrorCode {
    /// Malformed/out-of-range order (bad size, tick, symbol).
    Params,
    RateLimit,
    Net,
    Timeout,
    /// Venue-side business rejection (risk check, insufficient balance, ...).
    RejectBiz,
    Auth,
    Internal,
}

impl AdapterErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterErrorCode::Params => "E.PARAMS",
            AdapterErrorCode::RateLimit => "E.RATE.LIMIT",
            AdapterErrorCode::Net => "E.NET",
            AdapterErrorCode::Timeout => "E.TIMEOUT",
            AdapterErrorCode::RejectBiz => "E.REJECT.BIZ",
            AdapterErrorCode::Auth => "E.AUTH",
            AdapterErrorCode::Internal => "E.INTERNAL",
        }
    }

    /// `E.RATE.LIMIT`, `E.NET`, and `E.TIMEOUT` are transient and
    /// idempotent-safe to retry; everything else is terminal (spec §4.5).
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdapterErrorCode::RateLimit | AdapterErrorCode::Net | AdapterErrorCode::Timeout)
    }
}

impl fmt::Display for AdapterErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform adapter response shape (spec §4.5): `submit`/`cancel` map their
/// venue-specific result onto this before the executor interprets it.
#[derive(Debug, Clone)]
pub struct AdapterResp {
    pub ok: bool,
    pub code: Option<AdapterErrorCode>,
    pub msg: String,
    pub broker_order_id: Option<String>,
}

/// Maps an `AdapterResp` to the executor state it drives plus an optional
/// `reject_reason` (spec §4.5 "Mapping to executor state", §7). Transient
/// codes (`E.RATE.LIMIT`/`E.NET`/`E.TIMEOUT`) only become a terminal
/// `Rejected` once `retries_exhausted`; until then they stay `New` so the
/// caller keeps retrying instead of logging a premature rejection.
pub fn map_adapter_resp_to_state(resp: &AdapterResp, retries_exhausted: bool) -> (ExecutionState, Option<String>) {
    if resp.ok {
        return (ExecutionState::Ack, None);
    }
    match resp.code {
        Some(AdapterErrorCode::Params) => (ExecutionState::Rejected, Some("params".into())),
        Some(AdapterErrorCode::RejectBiz) => (ExecutionState::Rejected, Some(resp.msg.clone())),
        Some(AdapterErrorCode::Auth) => (ExecutionState::Rejected, Some("auth".into())),
        Some(AdapterErrorCode::RateLimit) if retries_exhausted => (ExecutionState::Rejected, Some("rate_limit".into())),
        Some(AdapterErrorCode::Net) if retries_exhausted => (ExecutionState::Rejected, Some("network".into())),
        Some(AdapterErrorCode::Timeout) if retries_exhausted => (ExecutionState::Rejected, Some("timeout".into())),
        Some(AdapterErrorCode::Internal) => (ExecutionState::Rejected, Some("internal".into())),
        _ => (ExecutionState::New, None),
    }
}

/// Rounds `qty` down and `price` half-up to the venue's step/tick size
/// using exact decimal arithmetic (binary floats would misround at
/// exchange-typical tick sizes like 0.00001). A qty that floors to zero
/// falls back to one step rather than vanishing (spec §4.5).
pub fn normalize_order_ctx(ctx: &OrderCtx) -> Result<Order> {
    let tick = Decimal::from_f64(ctx.tick_size).ok_or_else(|| AlphaCoreError::Config("invalid tick_size".into()))?;
    let step = Decimal::from_f64(ctx.step_size).ok_or_else(|| AlphaCoreError::Config("invalid step_size".into()))?;

    let mut order = ctx.order.clone();
    if step > Decimal::ZERO {
        let qty = Decimal::from_f64(order.qty).unwrap_or_default();
        let mut floored = (qty / step).floor().checked_mul(step).unwrap_or(qty);
        if floored.is_zero() && qty > Decimal::ZERO {
            floored = step;
        }
        order.qty = floored.to_f64().unwrap_or(order.qty);
    }
    if let Some(price) = order.price {
        if tick > Decimal::ZERO {
            let px = Decimal::from_f64(price).unwrap_or_default();
            let rounded = (px / tick).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
            order.price = Some(rounded.checked_mul(tick).unwrap_or(px).to_f64().unwrap_or(price));
        }
    }

    if order.qty < ctx.min_notional / order.price.unwrap_or(1.0).max(f64::EPSILON) && ctx.min_notional > 0.0 {
        return Err(AlphaCoreError::Adapter {
            code: AdapterErrorCode::Params,
            msg: format!("qty {} below min_notional {}", order.qty, ctx.min_notional),
        });
    }

    Ok(order)
}

/// Exponential backoff with +-20% jitter, capped at `max_delay`, never-retry
/// classification on local rejects. Grounded on `RetryPolicy`.
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Never retries once `attempt` reaches `max_retries`, nor on a code
    /// that isn't idempotent-safe to resend (spec §4.5: never `E.PARAMS` or
    /// `E.REJECT.BIZ`).
    pub fn should_retry(&self, attempt: u32, error: &AlphaCoreError) -> bool {
        attempt < self.max_retries && error.adapter_code().is_retryable()
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let jitter = exp * 0.2 * (rand::thread_rng().gen::<f64>() * 2.0 - 1.0);
        let delay = (exp + jitter).max(0.0);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_rejects_never_retry() {
        let policy = RetryPolicy::default();
        let err = AlphaCoreError::AdapterReject {
            code: "x".into(),
            reason: "order rejected by venue".into(),
        };
        assert!(!policy.should_retry(0, &err));
    }

    #[test]
    fn params_and_reject_biz_never_retry() {
        let policy = RetryPolicy::default();
        let params = AlphaCoreError::Adapter {
            code: AdapterErrorCode::Params,
            msg: "bad tick".into(),
        };
        let reject_biz = AlphaCoreError::Adapter {
            code: AdapterErrorCode::RejectBiz,
            msg: "insufficient balance".into(),
        };
        assert!(!policy.should_retry(0, &params));
        assert!(!policy.should_retry(0, &reject_biz));
    }

    #[test]
    fn transient_errors_retry_until_exhausted() {
        let policy = RetryPolicy::default();
        let err = AlphaCoreError::AdapterTransient("connection reset".into());
        assert!(policy.should_retry(0, &err));
        assert!(!policy.should_retry(policy.max_retries, &err));
    }

    #[test]
    fn rate_limit_net_and_timeout_retry() {
        let policy = RetryPolicy::default();
        for code in [AdapterErrorCode::RateLimit, AdapterErrorCode::Net, AdapterErrorCode::Timeout] {
            let err = AlphaCoreError::Adapter { code, msg: "transient".into() };
            assert!(policy.should_retry(0, &err));
        }
    }

    #[test]
    fn price_rounds_half_up_to_tick() {
        use crate::types::{OrderType, Side, TimeInForce};
        let ctx = OrderCtx {
            order: Order {
                client_order_id: "c1".into(),
                symbol: "BTCUSDT".into(),
                side: Side::Buy,
                qty: 1.0,
                order_type: OrderType::Market,
                price: Some(100.005),
                tif: TimeInForce::GTC,
                ts_ms: 0,
            },
            signal_row_id: None,
            regime: None,
            scenario: None,
            warmup: false,
            guard_reason: None,
            consistency: None,
            weak_signal_throttle: false,
            tick_size: 0.01,
            step_size: 0.001,
            min_notional: 0.0,
            costs_bps: 0.0,
            event_ts_ms: None,
        };
        let order = normalize_order_ctx(&ctx).unwrap();
        assert_eq!(order.price, Some(100.01));
    }

    #[test]
    fn qty_that_floors_to_zero_uses_one_step() {
        use crate::types::{OrderType, Side, TimeInForce};
        let ctx = OrderCtx {
            order: Order {
                client_order_id: "c1".into(),
                symbol: "BTCUSDT".into(),
                side: Side::Buy,
                qty: 0.0004,
                order_type: OrderType::Market,
                price: Some(100.0),
                tif: TimeInForce::GTC,
                ts_ms: 0,
            },
            signal_row_id: None,
            regime: None,
            scenario: None,
            warmup: false,
            guard_reason: None,
            consistency: None,
            weak_signal_throttle: false,
            tick_size: 0.01,
            step_size: 0.001,
            min_notional: 0.0,
            costs_bps: 0.0,
            event_ts_ms: None,
        };
        let order = normalize_order_ctx(&ctx).unwrap();
        assert_eq!(order.qty, 0.001);
    }
}
