//! Integration test for `Config::from_env_and_file` (spec §6): the thin
//! binaries' only input surface. Covers the TOML file path, the JSON file
//! path, the no-file default, and env-var overrides layered on top of a
//! file.

use alpha_core::config::Config;
use std::io::Write;
use std::sync::Mutex;
use tempfile::NamedTempFile;

// `apply_env_overrides` mutates process-wide environment variables;
// serialize the env-touching tests so they don't race each other.
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for var in [
        "RUN_ID",
        "INSTANCE",
        "DATA_ROOT",
        "OUTPUT_DIR",
        "SIGNALS_INPUT",
        "SYMBOLS",
        "DATE",
        "ALIGNER_LAG_THRESHOLD_MS",
    ] {
        std::env::remove_var(var);
    }
}

#[test]
fn no_file_falls_back_to_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    let cfg = Config::from_env_and_file(None).unwrap();
    assert_eq!(cfg.data_root, "data");
    assert_eq!(cfg.output_dir, "results");
    assert!(cfg.symbols.is_empty());
}

#[test]
fn toml_file_overrides_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    let mut file = NamedTempFile::with_suffix(".toml").unwrap();
    writeln!(file, "data_root = \"/data/historical\"").unwrap();
    writeln!(file, "output_dir = \"/tmp/out\"").unwrap();
    writeln!(file, "run_id = \"run-42\"").unwrap();
    file.flush().unwrap();

    let cfg = Config::from_env_and_file(Some(file.path().to_str().unwrap())).unwrap();
    assert_eq!(cfg.data_root, "/data/historical");
    assert_eq!(cfg.output_dir, "/tmp/out");
    assert_eq!(cfg.run_id, "run-42");
}

#[test]
fn json_file_is_detected_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    let mut file = NamedTempFile::with_suffix(".json").unwrap();
    writeln!(file, r#"{{"data_root": "/data/json_case", "symbols": ["BTCUSDT", "ETHUSDT"]}}"#).unwrap();
    file.flush().unwrap();

    let cfg = Config::from_env_and_file(Some(file.path().to_str().unwrap())).unwrap();
    assert_eq!(cfg.data_root, "/data/json_case");
    assert_eq!(cfg.symbols, vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
}

#[test]
fn env_vars_override_the_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    let mut file = NamedTempFile::with_suffix(".toml").unwrap();
    writeln!(file, "data_root = \"/data/from_file\"").unwrap();
    file.flush().unwrap();

    std::env::set_var("DATA_ROOT", "/data/from_env");
    std::env::set_var("SYMBOLS", "BTCUSDT, ETHUSDT ,");
    std::env::set_var("DATE", "2024-01-25");

    let cfg = Config::from_env_and_file(Some(file.path().to_str().unwrap())).unwrap();
    assert_eq!(cfg.data_root, "/data/from_env");
    assert_eq!(cfg.symbols, vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
    assert_eq!(cfg.date.as_deref(), Some("2024-01-25"));

    clear_env();
}

#[test]
fn missing_file_path_is_a_runtime_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    let err = Config::from_env_and_file(Some("/nonexistent/path/to/config.toml"));
    assert!(err.is_err());
}
