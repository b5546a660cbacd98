//! Integration test for the Execution Core chain `bin/live_recorder` wires
//! together: an `OrderCtx` derived from a confirmed signal, submitted
//! through `Executor` against a stub `Adapter`, durably logged via the
//! JSONL outbox sink, with idempotent duplicate suppression exercised
//! end to end.

use alpha_core::config::{AdapterConfig, ExecutorConfig};
use alpha_core::error::{AlphaCoreError, Result};
use alpha_core::execution::adapter::Adapter;
use alpha_core::execution::outbox::JsonlExecLogSinkOutbox;
use alpha_core::execution::{Executor, TestnetExecutor};
use alpha_core::types::{Fill, Liquidity, Order, OrderCtx, OrderType, Regime, Scenario2x2, Side, TimeInForce};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

struct FillAtIntentAdapter;

#[async_trait]
impl Adapter for FillAtIntentAdapter {
    async fn submit(&self, order: &Order) -> Result<Fill> {
        Ok(Fill {
            ts_ms: order.ts_ms,
            symbol: order.symbol.clone(),
            client_order_id: order.client_order_id.clone(),
            broker_order_id: Some("venue-1".into()),
            price: order.price.unwrap_or(100.0),
            qty: order.qty,
            fee: 0.0,
            liquidity: Liquidity::Taker,
            side: order.side,
        })
    }

    async fn cancel(&self, _client_order_id: &str) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "testnet"
    }
}

fn ctx(client_order_id: &str, ts_ms: i64) -> OrderCtx {
    OrderCtx {
        order: Order {
            client_order_id: client_order_id.into(),
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            qty: 0.5,
            order_type: OrderType::Market,
            price: Some(100.0),
            tif: TimeInForce::IOC,
            ts_ms,
        },
        signal_row_id: Some("sig-1".into()),
        regime: Some(Regime::Active),
        scenario: Some(Scenario2x2::ActiveHighVol),
        warmup: false,
        guard_reason: None,
        consistency: Some(0.9),
        weak_signal_throttle: false,
        tick_size: 0.01,
        step_size: 0.001,
        min_notional: 0.0,
        costs_bps: 0.0,
        event_ts_ms: Some(ts_ms),
    }
}

#[tokio::test]
async fn duplicate_client_order_id_is_rejected_not_resubmitted() {
    let dir = tempdir().unwrap();
    let sink = Arc::new(Mutex::new(JsonlExecLogSinkOutbox::new(dir.path(), 1).unwrap()));
    let mut executor = TestnetExecutor::new(
        FillAtIntentAdapter,
        &ExecutorConfig::default(),
        &AdapterConfig::default(),
        "test-run".into(),
        Some(sink.clone()),
    );

    let fill = executor.submit_with_ctx(ctx("order-1", 1_000)).await.unwrap();
    assert_eq!(fill.price, 100.0);
    assert_eq!(fill.qty, 0.5);

    let err = executor.submit_with_ctx(ctx("order-1", 2_000)).await.unwrap_err();
    assert!(matches!(err, AlphaCoreError::DuplicateOrder(id) if id == "order-1"));

    sink.lock().flush().unwrap();
    let ready_dir = dir.path().join("ready").join("execlog").join("BTCUSDT");
    let entries: Vec<_> = fs::read_dir(&ready_dir).unwrap().collect();
    assert_eq!(entries.len(), 1, "only the first (non-duplicate) submission logs an event");
}

#[tokio::test]
async fn precheck_rejects_warmup_orders_before_reaching_the_adapter() {
    let mut executor = TestnetExecutor::new(
        FillAtIntentAdapter,
        &ExecutorConfig::default(),
        &AdapterConfig::default(),
        "test-run".into(),
        None,
    );
    let mut warming = ctx("order-2", 1_000);
    warming.warmup = true;

    let err = executor.submit_with_ctx(warming).await.unwrap_err();
    assert!(matches!(err, AlphaCoreError::AdapterReject { code, .. } if code == "warmup"));
}

#[tokio::test]
async fn idempotency_seed_is_stable_across_identical_inputs() {
    let a = ctx("will-be-overwritten", 1_000);
    let b = ctx("will-be-overwritten", 1_000);
    assert_eq!(a.idempotency_seed(), b.idempotency_seed());

    let different_qty = OrderCtx {
        order: Order { qty: 0.75, ..b.order.clone() },
        ..b
    };
    assert_ne!(a.idempotency_seed(), different_qty.idempotency_seed());
}
