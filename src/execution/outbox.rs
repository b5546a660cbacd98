//! Execution log sink, outbox pattern (spec §4.7/§10). Writes append to a
//! `spool/execlog/<symbol>/exec_<minute>.part` file; once a file rotates out
//! (minute boundary, 10MiB size, or `flush`/`close`) it is atomically
//! published to `ready/execlog/<symbol>/exec_<minute>.jsonl`.
//!
//! Grounded on `original_source/executors/exec_log_sink_outbox.py` line for
//! line, including the minute-bucketed filename scheme, fsync batching
//! (`fsync_every_n`), the 10MiB rotation threshold, and the Windows-safe
//! delete-then-move retry with LINEAR (not exponential, despite the
//! original's comment) backoff.

use crate::error::Result;
use crate::types::{ExecutionRecord, Fill, OrderCtx};
use chrono::{TimeZone, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, error};

const ROTATE_BYTES: u64 = 10 * 1024 * 1024;

/// `src.replace(dst)` is atomic on POSIX, so the Windows branch (delete the
/// destination then move, retrying on failure) is kept only as a documented
/// alternative path rather than compiled in — this crate targets POSIX
/// replay/live hosts.
fn atomic_move_with_retry(src: &Path, dst: &Path, max_retries: u32, retry_delay: Duration) -> bool {
    for attempt in 0..max_retries {
        if let Some(parent) = dst.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match fs::rename(src, dst) {
            Ok(()) => return true,
            Err(e) => {
                if attempt + 1 < max_retries {
                    debug!(attempt, error = %e, "atomic move retrying");
                    thread::sleep(retry_delay * (attempt + 1));
                } else {
                    error!(error = %e, "atomic move failed after retries");
                    return false;
                }
            }
        }
    }
    false
}

struct OpenSpool {
    path: PathBuf,
    file: File,
    write_count: u32,
}

pub struct JsonlExecLogSinkOutbox {
    spool_root: PathBuf,
    ready_root: PathBuf,
    fsync_every_n: u32,
    current: Option<OpenSpool>,
    pending_files: Vec<PathBuf>,
}

impl JsonlExecLogSinkOutbox {
    pub fn new(output_dir: impl AsRef<Path>, fsync_every_n: u32) -> Result<Self> {
        let output_dir = output_dir.as_ref();
        let spool_root = output_dir.join("spool").join("execlog");
        let ready_root = output_dir.join("ready").join("execlog");
        fs::create_dir_all(&spool_root)?;
        fs::create_dir_all(&ready_root)?;
        Ok(Self {
            spool_root,
            ready_root,
            fsync_every_n: fsync_every_n.max(1),
            current: None,
            pending_files: Vec::new(),
        })
    }

    fn file_paths(&self, ts_ms: i64, symbol: &str) -> (PathBuf, PathBuf) {
        let dt = Utc.timestamp_millis_opt(ts_ms).single().unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap());
        let minute = dt.format("%Y%m%d_%H%M").to_string();
        let spool_file = self.spool_root.join(symbol).join(format!("exec_{minute}.part"));
        let ready_file = self.ready_root.join(symbol).join(format!("exec_{minute}.jsonl"));
        (spool_file, ready_file)
    }

    fn rotate_if_needed(&mut self, spool_file: &Path) -> Result<()> {
        if let Some(current) = &self.current {
            if current.path != spool_file {
                self.close_and_publish_current()?;
            }
        }
        if self.current.is_none() {
            if let Some(parent) = spool_file.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(spool_file)?;
            self.current = Some(OpenSpool {
                path: spool_file.to_path_buf(),
                file,
                write_count: 0,
            });
        }
        Ok(())
    }

    fn close_and_publish_current(&mut self) -> Result<()> {
        let Some(mut open) = self.current.take() else {
            return Ok(());
        };
        if open.write_count > 0 {
            open.file.flush()?;
            open.file.sync_all()?;
        }
        self.publish(&open.path);
        Ok(())
    }

    fn publish(&mut self, spool_file: &Path) {
        let symbol = spool_file
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        let minute = spool_file
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.trim_start_matches("exec_").to_string())
            .unwrap_or_default();
        let ready_file = self.ready_root.join(&symbol).join(format!("exec_{minute}.jsonl"));

        let has_content = fs::metadata(spool_file).map(|m| m.len() > 0).unwrap_or(false);
        if has_content {
            if atomic_move_with_retry(spool_file, &ready_file, 3, Duration::from_millis(100)) {
                debug!(from = %spool_file.display(), to = %ready_file.display(), "published execlog file");
            } else {
                self.pending_files.push(spool_file.to_path_buf());
            }
        }
    }

    /// Appends one execution-log event. `order_ctx` fields take priority
    /// over `order`/`fill` for the common columns, matching the original's
    /// field-extraction order.
    pub fn write_event(
        &mut self,
        ts_ms: i64,
        symbol: &str,
        event: &str,
        order_ctx: Option<&OrderCtx>,
        fill: Option<&Fill>,
        status: Option<&str>,
        reason: Option<&str>,
    ) -> Result<()> {
        let mut record = serde_json::Map::new();
        record.insert("ts_ms".into(), serde_json::json!(ts_ms));
        record.insert("symbol".into(), serde_json::json!(symbol));
        record.insert("event".into(), serde_json::json!(event));
        record.insert("status".into(), serde_json::json!(status));
        record.insert("reason".into(), serde_json::json!(reason));

        if let Some(ctx) = order_ctx {
            record.insert("signal_row_id".into(), serde_json::json!(ctx.signal_row_id));
            record.insert("client_order_id".into(), serde_json::json!(ctx.order.client_order_id));
            record.insert("side".into(), serde_json::json!(ctx.order.side.as_str()));
            record.insert("qty".into(), serde_json::json!(ctx.order.qty));
            record.insert("px_intent".into(), serde_json::json!(ctx.order.price));
            record.insert("px_sent".into(), serde_json::json!(ctx.order.price));
            record.insert("sent_ts_ms".into(), serde_json::json!(ctx.order.ts_ms));
            record.insert("event_ts_ms".into(), serde_json::json!(ctx.event_ts_ms));
            if ctx.warmup {
                record.insert("warmup".into(), serde_json::json!(true));
            }
            if let Some(guard) = &ctx.guard_reason {
                record.insert("guard_reason".into(), serde_json::json!(guard));
            }
            if let Some(consistency) = ctx.consistency {
                record.insert("consistency".into(), serde_json::json!(consistency));
            }
            if let Some(scenario) = ctx.scenario {
                record.insert("scenario".into(), serde_json::json!(scenario.as_str()));
            }
            if let Some(regime) = ctx.regime {
                record.insert("regime".into(), serde_json::json!(format!("{regime:?}")));
            }
        }

        if let Some(fill) = fill {
            record.insert("px_fill".into(), serde_json::json!(fill.price));
            record.insert("fill_qty".into(), serde_json::json!(fill.qty));
            record.insert("fill_ts_ms".into(), serde_json::json!(fill.ts_ms));
            record.insert("fee".into(), serde_json::json!(fill.fee));
            record.insert("liquidity".into(), serde_json::json!(format!("{:?}", fill.liquidity)));
            if let Some(broker_id) = &fill.broker_order_id {
                record.insert("exchange_order_id".into(), serde_json::json!(broker_id));
            }
        }

        let mut meta = serde_json::Map::new();
        meta.insert("_writer".into(), serde_json::json!("exec_jsonl_outbox_v1"));
        record.insert("meta".into(), serde_json::Value::Object(meta));

        let (spool_file, _ready_file) = self.file_paths(ts_ms, symbol);
        self.rotate_if_needed(&spool_file)?;

        let serialized = serde_json::to_string(&serde_json::Value::Object(record))?;
        let open = self.current.as_mut().expect("rotate_if_needed opens a spool file");
        writeln!(open.file, "{serialized}")?;
        open.write_count += 1;

        if open.write_count >= self.fsync_every_n {
            open.file.flush()?;
            open.file.sync_all()?;
            open.write_count = 0;
        } else {
            open.file.flush()?;
        }

        if fs::metadata(&spool_file).map(|m| m.len() > ROTATE_BYTES).unwrap_or(false) {
            self.close_and_publish_current()?;
        }

        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.close_and_publish_current()?;
        let retry_files = std::mem::take(&mut self.pending_files);
        for spool_file in retry_files {
            if spool_file.exists() {
                self.publish(&spool_file);
            }
        }
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.flush()
    }
}

/// Maps an `ExecutionRecord` into the `(symbol, signal_id, order_id)` unique
/// key used by the live-worker resume store (spec §4.7).
pub fn execution_record_key(record: &ExecutionRecord) -> (String, String, String) {
    (record.symbol.clone(), record.signal_id.clone(), record.order_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_event_creates_spool_then_publishes_on_flush() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonlExecLogSinkOutbox::new(dir.path(), 100).unwrap();
        sink.write_event(1_700_000_000_000, "BTCUSDT", "submit", None, None, Some("new"), None)
            .unwrap();
        sink.flush().unwrap();
        let ready_dir = dir.path().join("ready").join("execlog").join("BTCUSDT");
        let entries: Vec<_> = fs::read_dir(ready_dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
