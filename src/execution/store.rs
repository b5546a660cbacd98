//! Live-worker resume watermark store (spec §4.7). SQLite-backed, keyed
//! `(symbol, signal_id, order_id)` UNIQUE, so a restarted live executor can
//! resume without re-submitting an order it already placed.

use crate::error::Result;
use crate::types::{ExecutionRecord, ExecutionState};
use rusqlite::{params, Connection, OptionalExtension};

pub struct ExecutionStore {
    conn: Connection,
}

impl ExecutionStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             CREATE TABLE IF NOT EXISTS execution_records (
                 symbol TEXT NOT NULL,
                 signal_id TEXT NOT NULL,
                 order_id TEXT NOT NULL,
                 status TEXT NOT NULL,
                 gating_snapshot TEXT NOT NULL,
                 meta TEXT NOT NULL,
                 UNIQUE(symbol, signal_id, order_id)
             );",
        )?;
        Ok(Self { conn })
    }

    pub fn upsert(&self, record: &ExecutionRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO execution_records (symbol, signal_id, order_id, status, gating_snapshot, meta)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(symbol, signal_id, order_id) DO UPDATE SET
                 status = excluded.status,
                 gating_snapshot = excluded.gating_snapshot,
                 meta = excluded.meta",
            params![
                record.symbol,
                record.signal_id,
                record.order_id,
                format!("{:?}", record.status),
                record.gating_snapshot.to_string(),
                record.meta.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn find(&self, symbol: &str, signal_id: &str, order_id: &str) -> Result<Option<ExecutionState>> {
        let status: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM execution_records WHERE symbol = ?1 AND signal_id = ?2 AND order_id = ?3",
                params![symbol, signal_id, order_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.map(|s| parse_state(&s)))
    }
}

fn parse_state(s: &str) -> ExecutionState {
    match s {
        "New" => ExecutionState::New,
        "Ack" => ExecutionState::Ack,
        "Partial" => ExecutionState::Partial,
        "Filled" => ExecutionState::Filled,
        "Canceled" => ExecutionState::Canceled,
        _ => ExecutionState::Rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_then_find_round_trips() {
        let store = ExecutionStore::open(":memory:").unwrap();
        let record = ExecutionRecord {
            symbol: "BTCUSDT".into(),
            signal_id: "sig-1".into(),
            order_id: "ord-1".into(),
            status: ExecutionState::Filled,
            gating_snapshot: serde_json::json!({}),
            meta: serde_json::json!({}),
        };
        store.upsert(&record).unwrap();
        let found = store.find("BTCUSDT", "sig-1", "ord-1").unwrap();
        assert_eq!(found, Some(ExecutionState::Filled));
    }
}
