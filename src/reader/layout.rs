//! Directory-layout discovery (spec §4.1). Recognises three shapes, grounded
//! on `reader.py::_find_files`:
//!
//!   1. partition: `<root>[/raw]/date=YYYY-MM-DD/hour=H/symbol=S/kind=K/**`
//!   2. flat:      `<root>/ready/<kind>/<symbol>/**`
//!   3. preview:   either of the above rooted under `<root>/preview/`
//!
//! `ready` always wins over `preview`; preview is only scanned when the
//! caller opted in (`include_preview` or `"preview"` present in
//! `source_priority`).

use crate::types::Symbol;
use std::fs;
use std::path::{Path, PathBuf};

pub struct FoundFiles {
    pub files: Vec<PathBuf>,
    pub scanned_dirs: Vec<String>,
    pub partition_count: u64,
    pub structure_type: Option<&'static str>,
}

pub fn find_files(
    input_dir: &Path,
    kind: &str,
    date: Option<&str>,
    symbols: &[Symbol],
    include_preview: bool,
    source_priority: &[String],
) -> FoundFiles {
    let mut files = Vec::new();
    let mut scanned_dirs = Vec::new();
    let mut partition_count = 0u64;
    let mut structure_type = None;

    let wants_preview = include_preview || source_priority.iter().any(|s| s == "preview");
    if wants_preview && input_dir.join("preview").is_dir() {
        scanned_dirs.push("preview".to_string());
    }
    if input_dir.join("ready").is_dir() {
        scanned_dirs.push("ready".to_string());
    }

    if let Some(date) = date {
        for base in [input_dir.to_path_buf(), input_dir.join("raw")] {
            let date_partition = base.join(format!("date={date}"));
            if date_partition.is_dir() {
                structure_type.get_or_insert("partition");
                scan_partition_date(&date_partition, kind, symbols, &mut files, &mut partition_count);
            }
        }
    } else {
        let ready_dir = input_dir.join("ready").join(kind);
        if ready_dir.is_dir() {
            structure_type.get_or_insert("flat");
            scan_flat_kind(&ready_dir, symbols, &mut files, &mut partition_count);
        }
    }

    if wants_preview {
        let preview_ready = input_dir.join("preview").join("ready").join(kind);
        if preview_ready.is_dir() {
            structure_type.get_or_insert("preview_partition");
            scan_flat_kind(&preview_ready, symbols, &mut files, &mut partition_count);
        }
        if let Some(date) = date {
            let preview_date = input_dir.join("preview").join(format!("date={date}"));
            if preview_date.is_dir() {
                structure_type.get_or_insert("preview_partition");
                scan_partition_date(&preview_date, kind, symbols, &mut files, &mut partition_count);
            }
        }
    }

    files.sort();
    FoundFiles {
        files,
        scanned_dirs,
        partition_count,
        structure_type,
    }
}

fn scan_partition_date(
    date_partition: &Path,
    kind: &str,
    symbols: &[Symbol],
    files: &mut Vec<PathBuf>,
    partition_count: &mut u64,
) {
    let Ok(hour_dirs) = fs::read_dir(date_partition) else {
        return;
    };
    for hour_entry in hour_dirs.flatten() {
        let hour_dir = hour_entry.path();
        if !hour_dir.is_dir() || !file_name_starts_with(&hour_dir, "hour=") {
            continue;
        }
        let Ok(symbol_dirs) = fs::read_dir(&hour_dir) else {
            continue;
        };
        for symbol_entry in symbol_dirs.flatten() {
            let symbol_dir = symbol_entry.path();
            if !symbol_dir.is_dir() || !file_name_starts_with(&symbol_dir, "symbol=") {
                continue;
            }
            let symbol = symbol_dir
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.split_once('='))
                .map(|(_, s)| s.to_uppercase())
                .unwrap_or_default();
            if !symbols.is_empty() && !symbols.contains(&symbol) {
                continue;
            }
            let kind_dir = symbol_dir.join(format!("kind={kind}"));
            if kind_dir.is_dir() {
                let found = collect_data_files(&kind_dir);
                *partition_count += found.len() as u64;
                files.extend(found);
            }
        }
    }
}

fn scan_flat_kind(kind_dir: &Path, symbols: &[Symbol], files: &mut Vec<PathBuf>, partition_count: &mut u64) {
    let Ok(symbol_dirs) = fs::read_dir(kind_dir) else {
        return;
    };
    for entry in symbol_dirs.flatten() {
        let symbol_dir = entry.path();
        if !symbol_dir.is_dir() {
            continue;
        }
        let symbol = symbol_dir
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_uppercase())
            .unwrap_or_default();
        if !symbols.is_empty() && !symbols.contains(&symbol) {
            continue;
        }
        let found = collect_data_files(&symbol_dir);
        *partition_count += found.len() as u64;
        files.extend(found);
    }
}

fn file_name_starts_with(path: &Path, prefix: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(prefix))
        .unwrap_or(false)
}

/// Recursively collects `.parquet` and `.jsonl` files under `dir`.
fn collect_data_files(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return out;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            out.extend(collect_data_files(&path));
        } else if matches!(path.extension().and_then(|e| e.to_str()), Some("parquet") | Some("jsonl")) {
            out.push(path);
        }
    }
    out
}
