//! Config surface (spec §6). `Config` mirrors the recognised options
//! exactly; an external loader (YAML, TOML, JSON — loading itself is out of
//! scope per spec §1) produces one via `serde::Deserialize`, then the
//! caller applies `apply_env_overrides`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;

fn env_override<T: std::str::FromStr>(var: &str, slot: &mut T) {
    if let Ok(v) = env::var(var) {
        if let Ok(parsed) = v.parse() {
            *slot = parsed;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignerConfig {
    pub lag_threshold_ms: i64,
    pub spread_threshold: f64,
    pub volatility_threshold: f64,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            lag_threshold_ms: 5000,
            spread_threshold: 2.0,
            volatility_threshold: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub dedup_keep_hours: i64,
    pub include_preview: bool,
    pub source_priority: Vec<String>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            dedup_keep_hours: 2,
            include_preview: false,
            source_priority: vec!["ready".into(), "preview".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatingConfig {
    pub ofi_z: f64,
    pub cvd_z: f64,
    pub enable_divergence_alt: bool,
    pub consistency_min: f64,
    pub spread_cap: f64,
    pub lag_cap_sec: f64,
}

impl Default for GatingConfig {
    fn default() -> Self {
        Self {
            ofi_z: 1.0,
            cvd_z: 1.0,
            enable_divergence_alt: false,
            consistency_min: 0.15,
            spread_cap: 20.0,
            lag_cap_sec: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryThresholds {
    pub trend: f64,
    pub revert: f64,
    pub quiet: f64,
}

impl Default for EntryThresholds {
    fn default() -> Self {
        Self {
            trend: 1.5,
            revert: 1.5,
            quiet: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub z_t: f64,
    pub z_r: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self { z_t: 1.0, z_r: 1.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub expiry_ms: i64,
    pub cooldown_ms: i64,
    pub allow_quiet: bool,
    pub gating: GatingConfig,
    pub threshold_entry: EntryThresholds,
    pub regime: RegimeConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            expiry_ms: 60_000,
            cooldown_ms: 3_000,
            allow_quiet: false,
            gating: GatingConfig::default(),
            threshold_entry: EntryThresholds::default(),
            regime: RegimeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub w_ofi: f64,
    pub w_cvd: f64,
    pub adaptive_cooldown_k: f64,
    pub flip_rearm_margin: f64,
    pub min_consecutive: u32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            w_ofi: 0.5,
            w_cvd: 0.5,
            adaptive_cooldown_k: 1.0,
            flip_rearm_margin: 0.0,
            min_consecutive: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioOverride {
    pub weak_signal_threshold_offset: f64,
    pub consistency_min_offset: f64,
    pub min_consecutive_offset: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub weak_signal_threshold: f64,
    pub consistency_min: f64,
    pub dedupe_ms: i64,
    pub min_consecutive_same_dir: u32,
    pub scenario_overrides: HashMap<String, ScenarioOverride>,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            weak_signal_threshold: 1.5,
            consistency_min: 0.15,
            dedupe_ms: 1000,
            min_consecutive_same_dir: 1,
            scenario_overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub cooldown_after_exit_sec: i64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            cooldown_after_exit_sec: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub rps: f64,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { rps: 10.0, burst: 20 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub r#impl: String,
    pub place_rate_limit: RateLimitConfig,
    pub cancel_rate_limit: RateLimitConfig,
    pub max_retries: u32,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            r#impl: "backtest".into(),
            place_rate_limit: RateLimitConfig::default(),
            cancel_rate_limit: RateLimitConfig { rps: 5.0, burst: 10 },
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecheckConfig {
    pub consistency_min: f64,
    pub consistency_throttle_threshold: f64,
}

impl Default for PrecheckConfig {
    fn default() -> Self {
        Self {
            consistency_min: 0.15,
            consistency_throttle_threshold: 0.20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottlerConfig {
    pub base_rate_limit: f64,
    pub min_rate_limit: f64,
    pub max_rate_limit: f64,
    pub window_seconds: i64,
}

impl Default for ThrottlerConfig {
    fn default() -> Self {
        Self {
            base_rate_limit: 10.0,
            min_rate_limit: 1.0,
            max_rate_limit: 100.0,
            window_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkMode {
    Jsonl,
    Sqlite,
    Dual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorMode {
    Backtest,
    Testnet,
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub mode: ExecutorMode,
    pub sink: SinkMode,
    pub use_outbox: bool,
    pub enable_precheck: bool,
    pub precheck: PrecheckConfig,
    pub throttler: ThrottlerConfig,
    pub max_parallel_orders: u32,
    pub cooldown_ms: i64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            mode: ExecutorMode::Backtest,
            sink: SinkMode::Jsonl,
            use_outbox: true,
            enable_precheck: true,
            precheck: PrecheckConfig::default(),
            throttler: ThrottlerConfig::default(),
            max_parallel_orders: 8,
            cooldown_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlippageModel {
    Static,
    Linear,
    Piecewise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeModel {
    TakerStatic,
    Tiered,
    MakerTaker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlippagePiecewiseConfig {
    pub spread_base_multiplier: f64,
    pub scenario_multiplier: HashMap<String, f64>,
}

impl Default for SlippagePiecewiseConfig {
    fn default() -> Self {
        let mut scenario_multiplier = HashMap::new();
        scenario_multiplier.insert("A_H".to_string(), 1.5);
        scenario_multiplier.insert("A_L".to_string(), 1.0);
        scenario_multiplier.insert("Q_H".to_string(), 1.2);
        scenario_multiplier.insert("Q_L".to_string(), 0.8);
        Self {
            spread_base_multiplier: 1.0,
            scenario_multiplier,
        }
    }
}

/// Tier mapping values are multipliers applied to `taker_fee_bps`, not flat
/// bps. `TM`/`TT`/`TK` (taker-maker/taker-taker/taker) settle at the full
/// taker rate; `MM`/`MT`/`MK` (maker-side) settle at half.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeTieredConfig {
    pub tier_mapping: HashMap<String, f64>,
}

impl Default for FeeTieredConfig {
    fn default() -> Self {
        let mut tier_mapping = HashMap::new();
        tier_mapping.insert("TM".to_string(), 1.0);
        tier_mapping.insert("TT".to_string(), 1.0);
        tier_mapping.insert("TK".to_string(), 1.0);
        tier_mapping.insert("MM".to_string(), 0.5);
        tier_mapping.insert("MT".to_string(), 0.5);
        tier_mapping.insert("MK".to_string(), 0.5);
        Self { tier_mapping }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SideBias {
    pub buy: f64,
    pub sell: f64,
}

impl SideBias {
    pub fn for_side(&self, side: &str) -> f64 {
        match side {
            "buy" => self.buy,
            "sell" => self.sell,
            _ => 1.0,
        }
    }
}

impl Default for SideBias {
    fn default() -> Self {
        Self { buy: 1.2, sell: 0.8 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeMakerTakerConfig {
    pub scenario_probs: HashMap<String, f64>,
    pub spread_slope: f64,
    pub spread_threshold_wide: f64,
    pub spread_threshold_narrow: f64,
    pub side_bias: SideBias,
    pub maker_fee_ratio: f64,
}

impl Default for FeeMakerTakerConfig {
    fn default() -> Self {
        let mut scenario_probs = HashMap::new();
        scenario_probs.insert("A_L".to_string(), 0.8);
        scenario_probs.insert("Q_H".to_string(), 0.2);
        scenario_probs.insert("A_H".to_string(), 0.4);
        scenario_probs.insert("Q_L".to_string(), 0.6);
        Self {
            scenario_probs,
            spread_slope: 0.7,
            spread_threshold_wide: 5.0,
            spread_threshold_narrow: 1.0,
            side_bias: SideBias::default(),
            maker_fee_ratio: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub taker_fee_bps: f64,
    pub slippage_bps: f64,
    pub notional_per_trade: f64,
    pub reverse_on_signal: bool,
    /// `None` disables the take-profit exit entirely, matching the
    /// original's falsy-config check rather than standing in for a
    /// numeric "no limit" sentinel.
    pub take_profit_bps: Option<f64>,
    /// `None` disables stop-loss. Unlike every other exit check this one
    /// still runs ahead of the `min_hold_time_sec` guard when present.
    pub stop_loss_bps: Option<f64>,
    /// `None` means no minimum hold — take-profit/reverse-signal exits
    /// are evaluated immediately rather than withheld.
    pub min_hold_time_sec: Option<i64>,
    pub max_hold_time_sec: i64,
    pub force_timeout_exit: bool,
    pub deadband_bps: f64,
    pub slippage_model: SlippageModel,
    pub fee_model: FeeModel,
    pub slippage_piecewise: SlippagePiecewiseConfig,
    pub fee_tiered: FeeTieredConfig,
    pub fee_maker_taker: FeeMakerTakerConfig,
    pub rollover_timezone: String,
    pub rollover_hour: i64,
    pub initial_equity: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            taker_fee_bps: 2.0,
            slippage_bps: 1.0,
            notional_per_trade: 1000.0,
            reverse_on_signal: false,
            take_profit_bps: None,
            stop_loss_bps: None,
            min_hold_time_sec: None,
            max_hold_time_sec: 3600,
            force_timeout_exit: false,
            deadband_bps: 0.5,
            slippage_model: SlippageModel::Static,
            fee_model: FeeModel::TakerStatic,
            slippage_piecewise: SlippagePiecewiseConfig::default(),
            fee_tiered: FeeTieredConfig::default(),
            fee_maker_taker: FeeMakerTakerConfig::default(),
            rollover_timezone: "UTC".into(),
            rollover_hour: 0,
            initial_equity: 100_000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub aligner: AlignerConfig,
    pub reader: ReaderConfig,
    pub core: CoreConfig,
    pub fusion: FusionConfig,
    pub signal: SignalConfig,
    pub strategy: StrategyConfig,
    pub execution_cooldown_ms: i64,
    pub adapter: AdapterConfig,
    pub executor: ExecutorConfig,
    pub backtest: BacktestConfig,
    pub run_id: String,
    pub instance: String,
    /// Historical data root for `bin/backtest_run` (partitioned or flat
    /// JSONL/Parquet, per `reader/layout.rs`).
    pub data_root: String,
    /// Output directory for `bin/backtest_run`'s trades/pnl/metrics, and
    /// for `bin/live_recorder`'s outbox spool.
    pub output_dir: String,
    /// Symbol filter applied by both binaries; empty means "all symbols
    /// the reader/signal source yields".
    pub symbols: Vec<String>,
    /// Restricts `bin/backtest_run` to a single partition date.
    pub date: Option<String>,
    /// JSONL signal stream consumed by `bin/live_recorder` (one `Signal`
    /// per line, as written by `signal_core::sinks::JsonlSignalSink`).
    pub signals_input: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            aligner: AlignerConfig::default(),
            reader: ReaderConfig::default(),
            core: CoreConfig::default(),
            fusion: FusionConfig::default(),
            signal: SignalConfig::default(),
            strategy: StrategyConfig::default(),
            execution_cooldown_ms: 0,
            adapter: AdapterConfig::default(),
            executor: ExecutorConfig::default(),
            backtest: BacktestConfig::default(),
            run_id: String::new(),
            instance: String::new(),
            data_root: "data".into(),
            output_dir: "results".into(),
            symbols: Vec::new(),
            date: None,
            signals_input: "signals.jsonl".into(),
        }
    }
}

impl Config {
    /// Builds a `Config` from an optional TOML/JSON file (by extension,
    /// defaulting to TOML) layered under env-var overrides. `path` is the
    /// only input a binary takes directly — everything else is config-file
    /// or environment, per §1's "CLI argument parsing is out of scope".
    pub fn from_env_and_file(path: Option<&str>) -> crate::error::Result<Self> {
        let mut cfg = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                if path.ends_with(".json") {
                    serde_json::from_str(&text)?
                } else {
                    toml::from_str(&text)
                        .map_err(|e| crate::error::AlphaCoreError::Config(format!("parsing {path}: {e}")))?
                }
            }
            None => Config::default(),
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Applies the environment-variable overrides named in spec §6.
    /// Read once at startup; every emitted record stamps `run_id`.
    pub fn apply_env_overrides(&mut self) {
        env_override("ROLLOVER_TZ", &mut self.backtest.rollover_timezone);
        env_override("ROLLOVER_HOUR", &mut self.backtest.rollover_hour);
        env_override("READER_DEDUP_KEEP_HOURS", &mut self.reader.dedup_keep_hours);
        env_override("ALIGNER_LAG_THRESHOLD_MS", &mut self.aligner.lag_threshold_ms);
        env_override("ALIGNER_SPREAD_THRESHOLD", &mut self.aligner.spread_threshold);
        env_override(
            "ALIGNER_VOLATILITY_THRESHOLD",
            &mut self.aligner.volatility_threshold,
        );
        if let Ok(v) = env::var("SLIPPAGE_MODEL") {
            if let Some(model) = parse_slippage_model(&v) {
                self.backtest.slippage_model = model;
            }
        }
        if let Ok(v) = env::var("FEE_MODEL") {
            if let Some(model) = parse_fee_model(&v) {
                self.backtest.fee_model = model;
            }
        }
        env_override("RUN_ID", &mut self.run_id);
        env_override("INSTANCE", &mut self.instance);
        env_override("DATA_ROOT", &mut self.data_root);
        env_override("OUTPUT_DIR", &mut self.output_dir);
        env_override("SIGNALS_INPUT", &mut self.signals_input);
        if let Ok(v) = env::var("SYMBOLS") {
            self.symbols = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Ok(v) = env::var("DATE") {
            self.date = Some(v);
        }
    }
}

fn parse_slippage_model(s: &str) -> Option<SlippageModel> {
    match s {
        "static" => Some(SlippageModel::Static),
        "linear" => Some(SlippageModel::Linear),
        "piecewise" => Some(SlippageModel::Piecewise),
        _ => None,
    }
}

fn parse_fee_model(s: &str) -> Option<FeeModel> {
    match s {
        "taker_static" => Some(FeeModel::TakerStatic),
        "tiered" => Some(FeeModel::Tiered),
        "maker_taker" => Some(FeeModel::MakerTaker),
        _ => None,
    }
}

impl Default for SinkMode {
    fn default() -> Self {
        SinkMode::Jsonl
    }
}

impl Default for ExecutorMode {
    fn default() -> Self {
        ExecutorMode::Backtest
    }
}

impl Default for SlippageModel {
    fn default() -> Self {
        SlippageModel::Static
    }
}

impl Default for FeeModel {
    fn default() -> Self {
        FeeModel::TakerStatic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_default_to_summing_one() {
        let cfg = FusionConfig::default();
        assert!((cfg.w_ofi + cfg.w_cvd - 1.0).abs() < 1e-9);
    }

    #[test]
    fn env_overrides_apply() {
        std::env::set_var("ALIGNER_SPREAD_THRESHOLD", "3.5");
        std::env::set_var("RUN_ID", "run-42");
        let mut cfg = Config::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.aligner.spread_threshold, 3.5);
        assert_eq!(cfg.run_id, "run-42");
        std::env::remove_var("ALIGNER_SPREAD_THRESHOLD");
        std::env::remove_var("RUN_ID");
    }
}
