//! Signal sinks (spec §4.4 "Sink contract"). Every emitted `Signal` goes to
//! a JSONL file keyed by symbol+minute and, in `dual` mode, also to a
//! SQLite `signals` table indexed `(symbol, ts_ms)` with a UNIQUE
//! `signal_id`. Mirrors the outbox sink's minute-bucketed file layout
//! (`execution::outbox`) but signals don't need the spool/ready publish
//! step — a signal row is never re-read mid-write the way an execution log
//! is.

use crate::config::SinkMode;
use crate::error::Result;
use crate::types::Signal;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

fn minute_bucket(ts_ms: i64) -> i64 {
    ts_ms / 60_000
}

pub struct JsonlSignalSink {
    root: PathBuf,
    open_files: HashMap<(String, i64), File>,
}

impl JsonlSignalSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            open_files: HashMap::new(),
        }
    }

    pub fn write(&mut self, signal: &Signal) -> Result<()> {
        let bucket = minute_bucket(signal.ts_ms);
        let key = (signal.symbol.clone(), bucket);
        if !self.open_files.contains_key(&key) {
            let dir = self.root.join(&signal.symbol);
            fs::create_dir_all(&dir)?;
            let path = dir.join(format!("signals_{bucket}.jsonl"));
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            self.open_files.insert(key.clone(), file);
        }
        let file = self.open_files.get_mut(&key).expect("just inserted");
        let line = serde_json::to_string(signal)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

pub struct SqliteSignalSink {
    conn: Connection,
}

impl SqliteSignalSink {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             CREATE TABLE IF NOT EXISTS signals (
                 signal_id TEXT NOT NULL UNIQUE,
                 symbol TEXT NOT NULL,
                 ts_ms INTEGER NOT NULL,
                 score REAL NOT NULL,
                 signal_type TEXT NOT NULL,
                 confirm INTEGER NOT NULL,
                 gating INTEGER NOT NULL,
                 decision_code TEXT NOT NULL,
                 gate_reason TEXT NOT NULL,
                 regime TEXT NOT NULL,
                 scenario_2x2 TEXT NOT NULL,
                 config_hash TEXT NOT NULL,
                 run_id TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_signals_symbol_ts ON signals(symbol, ts_ms);",
        )?;
        Ok(Self { conn })
    }

    pub fn write(&self, signal: &Signal) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO signals
                (signal_id, symbol, ts_ms, score, signal_type, confirm, gating,
                 decision_code, gate_reason, regime, scenario_2x2, config_hash, run_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                signal.signal_id,
                signal.symbol,
                signal.ts_ms,
                signal.score,
                format!("{:?}", signal.signal_type),
                signal.confirm as i64,
                signal.gating as i64,
                signal.decision_code.as_str(),
                signal.gate_reason,
                format!("{:?}", signal.regime),
                signal.scenario_2x2.as_str(),
                signal.config_hash,
                signal.run_id,
            ],
        )?;
        Ok(())
    }
}

/// Dispatches to the JSONL sink, the SQLite sink, or both, per
/// `executor.sink`/`SinkMode` (spec §4.4: "a `writer` meta tag identifies
/// the mode").
pub struct SignalSinks {
    jsonl: Option<JsonlSignalSink>,
    sqlite: Option<SqliteSignalSink>,
}

impl SignalSinks {
    pub fn new(mode: SinkMode, jsonl_root: impl Into<PathBuf>, sqlite_path: &Path) -> Result<Self> {
        let (want_jsonl, want_sqlite) = match mode {
            SinkMode::Jsonl => (true, false),
            SinkMode::Sqlite => (false, true),
            SinkMode::Dual => (true, true),
        };
        Ok(Self {
            jsonl: want_jsonl.then(|| JsonlSignalSink::new(jsonl_root)),
            sqlite: want_sqlite.then(|| SqliteSignalSink::open(sqlite_path)).transpose()?,
        })
    }

    pub fn write(&mut self, signal: &Signal) -> Result<()> {
        if let Some(jsonl) = &mut self.jsonl {
            jsonl.write(signal)?;
        }
        if let Some(sqlite) = &self.sqlite {
            sqlite.write(signal)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DecisionCode, FeatureData, Regime, Scenario2x2, SignalType};
    use tempfile::tempdir;

    fn sample_signal() -> Signal {
        Signal {
            signal_id: "sig-1".into(),
            symbol: "BTCUSDT".into(),
            ts_ms: 1_000,
            score: 2.0,
            signal_type: SignalType::Buy,
            confirm: true,
            gating: 1,
            decision_code: DecisionCode::Ok,
            gate_reason: String::new(),
            regime: Regime::Active,
            scenario_2x2: Scenario2x2::ActiveHighVol,
            config_hash: "hash".into(),
            run_id: "run".into(),
            _feature_data: FeatureData::default(),
        }
    }

    #[test]
    fn jsonl_sink_writes_one_line_per_signal() {
        let dir = tempdir().unwrap();
        let mut sink = JsonlSignalSink::new(dir.path());
        sink.write(&sample_signal()).unwrap();
        let path = dir.path().join("BTCUSDT").join("signals_0.jsonl");
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn sqlite_sink_dedupes_on_signal_id() {
        let dir = tempdir().unwrap();
        let sink = SqliteSignalSink::open(&dir.path().join("signals.db")).unwrap();
        sink.write(&sample_signal()).unwrap();
        sink.write(&sample_signal()).unwrap();
        let count: i64 = sink
            .conn
            .query_row("SELECT COUNT(*) FROM signals", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn dual_mode_writes_both() {
        let dir = tempdir().unwrap();
        let mut sinks = SignalSinks::new(SinkMode::Dual, dir.path().join("jsonl"), &dir.path().join("signals.db")).unwrap();
        sinks.write(&sample_signal()).unwrap();
        assert!(dir.path().join("jsonl").join("BTCUSDT").join("signals_0.jsonl").exists());
        assert!(dir.path().join("signals.db").exists());
    }
}
