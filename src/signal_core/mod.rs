//! Signal Core (spec §4.4). A per-symbol, per-second state machine that
//! turns a feature-row stream into confirmed buy/sell/quiet signals. The
//! eight-step evaluation order lives in `gating`; scenario-override
//! resolution in `scenario`; the dual JSONL+SQLite sink in `sinks`.

pub mod gating;
pub mod scenario;
pub mod sinks;

use crate::config::{CoreConfig, FusionConfig, SignalConfig, StrategyConfig};
use crate::feeder::feature_data_for;
use crate::types::{FeatureRow, Signal, Symbol};
use gating::SymbolState;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Computes the run's `config_hash` once at construction: a stable
/// fingerprint of the resolved core/fusion/signal/strategy parameters,
/// stamped onto every signal the run emits (spec §4.4 "Effective-parameters
/// snapshot").
fn compute_config_hash(core: &CoreConfig, fusion: &FusionConfig, signal: &SignalConfig, strategy: &StrategyConfig) -> String {
    let snapshot = serde_json::json!({
        "core": core,
        "fusion": fusion,
        "signal": signal,
        "strategy": strategy,
    });
    let digest = Sha256::digest(snapshot.to_string().as_bytes());
    hex::encode(digest)[..16].to_string()
}

pub struct SignalCore {
    core: CoreConfig,
    fusion: FusionConfig,
    signal: SignalConfig,
    strategy: StrategyConfig,
    config_hash: String,
    run_id: String,
    states: HashMap<Symbol, SymbolState>,
}

impl SignalCore {
    pub fn new(core: CoreConfig, fusion: FusionConfig, signal: SignalConfig, strategy: StrategyConfig, run_id: String) -> Self {
        let config_hash = compute_config_hash(&core, &fusion, &signal, &strategy);
        Self {
            core,
            fusion,
            signal,
            strategy,
            config_hash,
            run_id,
            states: HashMap::new(),
        }
    }

    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    /// Evaluates one aligned feature row and returns the `Signal` it
    /// produces — confirmed or not. A row always yields exactly one
    /// `Signal`, since downstream gate-reason accounting (TradeSimulator's
    /// `GateReasonBreakdown`) needs to see blocked rows too, not just
    /// confirmations.
    pub fn process(&mut self, row: &FeatureRow) -> Signal {
        let state = self.states.entry(row.symbol.clone()).or_default();
        let outcome = gating::evaluate(row, state, &self.core, &self.fusion, &self.signal, &self.strategy);

        Signal {
            signal_id: outcome.signal_id,
            symbol: row.symbol.clone(),
            ts_ms: row.ts_ms,
            score: outcome.score,
            signal_type: outcome.signal_type,
            confirm: outcome.confirm,
            gating: outcome.gating,
            decision_code: outcome.decision_code,
            gate_reason: outcome.gate_reason,
            regime: outcome.regime,
            scenario_2x2: row.scenario_2x2,
            config_hash: self.config_hash.clone(),
            run_id: self.run_id.clone(),
            _feature_data: feature_data_for(row),
        }
    }

    /// Arms the post-exit cooldown for `symbol` (spec §4.4 step 6,
    /// §9 "keep this as a one-direction callback interface" — the
    /// TradeSimulator calls this, the Signal Core never reaches back into
    /// the simulator).
    pub fn record_exit(&mut self, symbol: &str, ts_ms: i64) {
        self.states.entry(symbol.to_string()).or_default().record_exit(ts_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DecisionCode, Scenario2x2};

    fn row(symbol: &str, ts_ms: i64, z_ofi: f64, z_cvd: f64, scenario: Scenario2x2) -> FeatureRow {
        FeatureRow {
            second_ts: ts_ms / 1000,
            ts_ms,
            symbol: symbol.into(),
            mid: 100.0,
            best_bid: 99.9,
            best_ask: 100.1,
            spread_bps: 2.0,
            return_1s: 0.0,
            vol_bps: 0.0,
            z_ofi,
            z_cvd,
            fusion_score: 0.0,
            consistency: 0.5,
            warmup: false,
            lag_ms_price: 0,
            lag_ms_orderbook: 0,
            lag_bad_price: false,
            lag_bad_orderbook: false,
            is_gap_second: false,
            scenario_2x2: scenario,
            fee_tier: None,
            session: None,
            trade_rate: None,
            quote_rate: None,
        }
    }

    #[test]
    fn same_config_produces_same_hash() {
        let a = SignalCore::new(
            CoreConfig::default(),
            FusionConfig::default(),
            SignalConfig::default(),
            StrategyConfig::default(),
            "run-1".into(),
        );
        let b = SignalCore::new(
            CoreConfig::default(),
            FusionConfig::default(),
            SignalConfig::default(),
            StrategyConfig::default(),
            "run-2".into(),
        );
        assert_eq!(a.config_hash(), b.config_hash());
    }

    #[test]
    fn confirmed_signal_stamps_config_hash_and_run_id() {
        let mut core = SignalCore::new(
            CoreConfig::default(),
            FusionConfig::default(),
            SignalConfig::default(),
            StrategyConfig::default(),
            "run-42".into(),
        );
        let signal = core.process(&row("BTCUSDT", 1_000, 3.0, 3.0, Scenario2x2::ActiveHighVol));
        assert!(signal.confirm);
        assert_eq!(signal.decision_code, DecisionCode::Ok);
        assert_eq!(signal.run_id, "run-42");
        assert_eq!(signal.config_hash, core.config_hash());
    }

    #[test]
    fn one_signal_emitted_per_row_regardless_of_outcome() {
        let mut core = SignalCore::new(
            CoreConfig::default(),
            FusionConfig::default(),
            SignalConfig::default(),
            StrategyConfig::default(),
            "run-1".into(),
        );
        let mut blocked = row("BTCUSDT", 1_000, 3.0, 3.0, Scenario2x2::ActiveHighVol);
        blocked.warmup = true;
        let signal = core.process(&blocked);
        assert!(!signal.confirm);
        assert_eq!(signal.decision_code, DecisionCode::FailWarmup);
    }

    #[test]
    fn record_exit_arms_cooldown_for_next_row() {
        let mut core = SignalCore::new(
            CoreConfig::default(),
            FusionConfig::default(),
            SignalConfig::default(),
            StrategyConfig::default(),
            "run-1".into(),
        );
        let _ = core.process(&row("BTCUSDT", 1_000, 3.0, 3.0, Scenario2x2::ActiveHighVol));
        core.record_exit("BTCUSDT", 1_500);
        let signal = core.process(&row("BTCUSDT", 1_600, 3.0, 3.0, Scenario2x2::ActiveHighVol));
        assert_eq!(signal.decision_code, DecisionCode::FailCooldown);
    }
}
