//! Error taxonomy (spec §7). The Signal Core and TradeSimulator never raise
//! on bad input data — they record a `DecisionCode`/counter instead — so
//! most of these variants surface only at the Reader, Aligner, Adapter, and
//! outbox boundaries.

use crate::execution::adapter::AdapterErrorCode;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlphaCoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing or unreadable data root: {0}")]
    DataRoot(PathBuf),

    #[error("adapter rejected order: {code} ({reason})")]
    AdapterReject { code: String, reason: String },

    #[error("adapter call failed after retries exhausted: {0}")]
    AdapterTransient(String),

    #[error("{code}: {msg}")]
    Adapter { code: AdapterErrorCode, msg: String },

    #[error("executor misuse: {0}")]
    ExecutorMisuse(String),

    #[error("duplicate client_order_id: {0}")]
    DuplicateOrder(String),

    #[error("sink I/O error: {0}")]
    SinkIo(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AlphaCoreError>;

impl AlphaCoreError {
    /// Classifies this error against the adapter error taxonomy (spec
    /// §4.5) so `RetryPolicy` and the state mapping can reason about it
    /// uniformly, even for errors raised outside `adapter::submit` itself
    /// (e.g. local rate-limit exhaustion, sink I/O).
    pub fn adapter_code(&self) -> AdapterErrorCode {
        match self {
            AlphaCoreError::Adapter { code, .. } => *code,
            AlphaCoreError::AdapterReject { .. } => AdapterErrorCode::RejectBiz,
            AlphaCoreError::AdapterTransient(_) => AdapterErrorCode::Net,
            AlphaCoreError::SinkIo(_) => AdapterErrorCode::Net,
            _ => AdapterErrorCode::Internal,
        }
    }
}
