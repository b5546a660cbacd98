//! JSONL row source. Grounded on `reader.py::_read_jsonl`: malformed lines
//! are logged and skipped rather than aborting the whole file.

use super::{row_from_object, RawRow};
use crate::error::Result;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::warn;

pub fn read_jsonl(path: &Path) -> Result<Vec<RawRow>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut out = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(serde_json::Value::Object(obj)) => {
                if let Some(row) = row_from_object(obj) {
                    out.push(row);
                }
            }
            Ok(_) => {
                warn!(file = %path.display(), line = line_num + 1, "jsonl row was not an object");
            }
            Err(e) => {
                warn!(file = %path.display(), line = line_num + 1, error = %e, "invalid json, skipping line");
            }
        }
    }
    Ok(out)
}
