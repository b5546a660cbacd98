//! Intraday quantitative trading pipeline library (spec §1-§2). Three
//! cooperating pipelines share this crate: Signal Core (gating/scoring),
//! Execution Core (adapter/executor/outbox), and Backtest Core
//! (reader/aligner/feeder/trade-simulator/metrics). The two binaries
//! (`backtest_run`, `live_recorder`) wire these together; this library
//! exposes each stage standalone so it can be tested independently (spec
//! §2 "each stage is independently testable").

pub mod aligner;
pub mod backtest;
pub mod config;
pub mod error;
pub mod execution;
pub mod feeder;
pub mod reader;
pub mod signal_core;
pub mod types;

pub use config::Config;
pub use error::{AlphaCoreError, Result};
