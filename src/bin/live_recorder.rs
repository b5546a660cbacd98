//! Live recorder CLI (spec §4.5-§4.7). Thin wiring: reads a confirmed-signal
//! JSONL stream (as written by `signal_core::sinks::JsonlSignalSink`),
//! derives an idempotent `OrderCtx` per confirmed signal, and submits
//! through `Executor`, durably logging every state transition via the
//! outbox sink. Venue connectivity is out of scope (spec §1): this binary
//! submits through a `NullAdapter` that fills at the quoted price
//! immediately, exercising precheck/idempotency/outbox end to end without
//! a real venue.
//!
//! # Usage
//!
//! ```bash
//! live_recorder [CONFIG_PATH]
//! ```
//!
//! # Exit codes
//!
//! - 0: stream processed to completion
//! - 2: configuration error
//! - 3: runtime error (I/O, database)

use alpha_core::config::Config;
use alpha_core::error::{AlphaCoreError, Result};
use alpha_core::execution::adapter::Adapter;
use alpha_core::execution::outbox::JsonlExecLogSinkOutbox;
use alpha_core::execution::{Executor, LiveExecutor};
use alpha_core::types::{Fill, Liquidity, Order, OrderCtx, Signal};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::env;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use tracing::{info, warn};

/// Fills every order immediately at its intended price with zero fee, as a
/// stand-in for a venue connection (non-goal per spec §1). Good enough to
/// exercise precheck/idempotency/outbox wiring in isolation.
struct NullAdapter;

#[async_trait]
impl Adapter for NullAdapter {
    async fn submit(&self, order: &Order) -> Result<Fill> {
        Ok(Fill {
            ts_ms: order.ts_ms,
            symbol: order.symbol.clone(),
            client_order_id: order.client_order_id.clone(),
            broker_order_id: None,
            price: order.price.unwrap_or(0.0),
            qty: order.qty,
            fee: 0.0,
            liquidity: Liquidity::Unknown,
            side: order.side,
        })
    }

    async fn cancel(&self, _client_order_id: &str) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "live"
    }
}

/// Builds an `OrderCtx` from a confirmed `Signal`. Tick/step/min-notional
/// are venue metadata (non-goal); `1.0`/`0.0001`/`0.0` stand in for "no
/// venue rounding constraint" rather than guessing a real exchange's grid.
fn order_ctx_from_signal(signal: &Signal, qty: f64) -> Option<OrderCtx> {
    let side = signal.signal_type.side()?;
    let order = Order {
        client_order_id: String::new(),
        symbol: signal.symbol.clone(),
        side,
        qty,
        order_type: alpha_core::types::OrderType::Market,
        price: None,
        tif: alpha_core::types::TimeInForce::IOC,
        ts_ms: signal.ts_ms,
    };
    let mut ctx = OrderCtx {
        order,
        signal_row_id: Some(signal.signal_id.clone()),
        regime: Some(signal.regime),
        scenario: Some(signal.scenario_2x2),
        warmup: false,
        guard_reason: None,
        consistency: None,
        weak_signal_throttle: false,
        tick_size: 0.0001,
        step_size: 0.0001,
        min_notional: 0.0,
        costs_bps: 0.0,
        event_ts_ms: Some(signal.ts_ms),
    };
    ctx.order.client_order_id = ctx.idempotency_seed();
    Some(ctx)
}

fn load_config(arg: Option<String>) -> Result<Config> {
    Config::from_env_and_file(arg.as_deref())
}

#[tokio::main]
async fn main() {
    let arg = env::args().nth(1);

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = match load_config(arg) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };

    if !cfg.executor.use_outbox {
        eprintln!("Error: live_recorder requires executor.use_outbox=true (the live variant mandates the outbox log)");
        std::process::exit(2);
    }
    let sink = match JsonlExecLogSinkOutbox::new(&cfg.output_dir, 1) {
        Ok(s) => Arc::new(Mutex::new(s)),
        Err(e) => {
            eprintln!("Error opening outbox: {e}");
            std::process::exit(3);
        }
    };

    let mut executor = LiveExecutor::new(NullAdapter, &cfg.executor, &cfg.adapter, cfg.run_id.clone(), sink);

    let file = match File::open(&cfg.signals_input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening {}: {e}", cfg.signals_input);
            std::process::exit(3);
        }
    };
    let reader = BufReader::new(file);

    let (mut submitted, mut filled, mut rejected, mut skipped) = (0u64, 0u64, 0u64, 0u64);

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Error reading signal stream: {e}");
                std::process::exit(3);
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let signal: Signal = match serde_json::from_str(&line) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "skipping malformed signal line");
                skipped += 1;
                continue;
            }
        };
        if !signal.confirm {
            continue;
        }
        if !cfg.symbols.is_empty() && !cfg.symbols.contains(&signal.symbol) {
            continue;
        }

        // `Signal`/`FeatureData` carry no price field (non-goal: venue
        // quoting), so `notional_per_trade` stands in directly as qty
        // rather than a price-normalized size.
        let qty = cfg.backtest.notional_per_trade;
        let Some(ctx) = order_ctx_from_signal(&signal, qty) else {
            skipped += 1;
            continue;
        };

        submitted += 1;
        match executor.submit_with_ctx(ctx).await {
            Ok(fill) => {
                filled += 1;
                info!(symbol = %fill.symbol, price = fill.price, qty = fill.qty, "fill recorded");
            }
            Err(AlphaCoreError::DuplicateOrder(id)) => {
                warn!(client_order_id = %id, "duplicate order suppressed");
            }
            Err(e) => {
                rejected += 1;
                warn!(error = %e, "order rejected");
            }
        }
    }

    eprintln!("{}", "=".repeat(60));
    eprintln!("LIVE RECORDER SUMMARY");
    eprintln!("{}", "=".repeat(60));
    eprintln!("Signals submitted:  {submitted}");
    eprintln!("Fills:              {filled}");
    eprintln!("Rejected:           {rejected}");
    eprintln!("Skipped:            {skipped}");
    eprintln!("{}", "=".repeat(60));
}
