//! The eight-step per-symbol evaluation order (spec §4.4). First failing
//! step wins, which is what makes `decision_code` unique per row. No
//! original-language source grounds this module directly — the upstream
//! fusion/gating logic lives outside the retrieved pack — so the step order
//! and field semantics are taken verbatim from spec.md and wired together
//! in the teacher's state-machine idiom (explicit enum outcome, no
//! exceptions for control flow).

use crate::config::{CoreConfig, FusionConfig, SignalConfig, StrategyConfig};
use crate::signal_core::scenario;
use crate::types::{DecisionCode, FeatureRow, Regime, Scenario2x2, SignalType};
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};

/// Scenario's activity axis IS the regime: an active spread regime trades
/// trend-continuation thresholds, a quiet spread regime trades
/// reversal-oriented ones (glossary: "Regime ... active (trend-oriented)
/// vs quiet (reversal-oriented)").
fn regime_for(scenario: Scenario2x2) -> Regime {
    match scenario {
        Scenario2x2::ActiveHighVol | Scenario2x2::ActiveLowVol => Regime::Active,
        Scenario2x2::QuietHighVol | Scenario2x2::QuietLowVol => Regime::Quiet,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    fn from_score(score: f64) -> Option<Self> {
        if score > 0.0 {
            Some(Direction::Up)
        } else if score < 0.0 {
            Some(Direction::Down)
        } else {
            None
        }
    }
}

/// Per-symbol state the gating steps read and mutate: dedup cache, cooldown
/// clocks, and the anti-flip consecutive-direction streak. Bounded and
/// reset on process start (spec §9 "Global state").
pub struct SymbolState {
    last_confirmed_ts: Option<i64>,
    last_confirmed_direction: Option<Direction>,
    last_exit_ts: Option<i64>,
    streak_direction: Option<Direction>,
    streak_count: u32,
    seen_signal_ids: HashSet<String>,
    seen_order: VecDeque<String>,
}

const DEDUP_CACHE_CAP: usize = 50_000;

impl Default for SymbolState {
    fn default() -> Self {
        Self {
            last_confirmed_ts: None,
            last_confirmed_direction: None,
            last_exit_ts: None,
            streak_direction: None,
            streak_count: 0,
            seen_signal_ids: HashSet::new(),
            seen_order: VecDeque::new(),
        }
    }
}

impl SymbolState {
    pub fn record_exit(&mut self, ts_ms: i64) {
        self.last_exit_ts = Some(ts_ms);
    }

    fn remember_signal_id(&mut self, signal_id: &str) {
        if self.seen_signal_ids.len() >= DEDUP_CACHE_CAP {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen_signal_ids.remove(&oldest);
            }
        }
        self.seen_signal_ids.insert(signal_id.to_string());
        self.seen_order.push_back(signal_id.to_string());
    }
}

pub struct Outcome {
    pub decision_code: DecisionCode,
    pub confirm: bool,
    pub gate_reason: String,
    pub gating: u8,
    pub score: f64,
    pub signal_type: SignalType,
    pub regime: Regime,
    pub signal_id: String,
}

#[allow(clippy::too_many_arguments)]
pub fn evaluate(
    row: &FeatureRow,
    state: &mut SymbolState,
    core: &CoreConfig,
    fusion: &FusionConfig,
    signal: &SignalConfig,
    strategy: &StrategyConfig,
) -> Outcome {
    let regime = regime_for(row.scenario_2x2);
    let score = fusion.w_ofi * row.z_ofi + fusion.w_cvd * row.z_cvd;
    let direction = Direction::from_score(score);

    let effective = scenario::resolve(
        row.scenario_2x2,
        signal.weak_signal_threshold,
        signal.consistency_min,
        signal.min_consecutive_same_dir,
        &signal.scenario_overrides,
    );

    // `div_type` only distinguishes the divergence-alt gating path, which is
    // either "disagreement blocked the row" (never reaches here) or inert;
    // every row that reaches step 7 carries "none".
    let div_type = "none";
    let quantised_score = (score * 100.0).round() as i64;
    let seed = format!("{}|{}|{}|{:?}|{}", row.symbol, row.ts_ms, quantised_score, regime, div_type);
    let signal_id = hex::encode(Sha256::digest(seed.as_bytes()))[..32].to_string();

    let fail = |decision_code: DecisionCode, gate_reason: &str, gating: u8| Outcome {
        decision_code,
        confirm: false,
        gate_reason: gate_reason.to_string(),
        gating,
        score,
        signal_type: classify_signal_type(direction, score, regime, &effective),
        regime,
        signal_id: signal_id.clone(),
    };

    // Step 1: warmup.
    if row.warmup {
        return fail(DecisionCode::FailWarmup, crate::types::GATE_REASON_COMPONENT_WARMUP, 0);
    }

    // Step 2: gating (data quality).
    if row.consistency < effective.consistency_min {
        return fail(DecisionCode::FailGating, crate::types::GATE_REASON_LOW_CONSISTENCY, 0);
    }
    if row.spread_bps > core.gating.spread_cap {
        return fail(DecisionCode::FailGating, crate::types::GATE_REASON_SPREAD_BPS_EXCEEDED, 0);
    }
    if row.lag_sec() > core.gating.lag_cap_sec {
        return fail(DecisionCode::FailGating, crate::types::GATE_REASON_LAG_SEC_EXCEEDED, 0);
    }
    if !core.gating.enable_divergence_alt && disagrees(row.z_ofi, row.z_cvd, core.gating.ofi_z, core.gating.cvd_z) {
        return fail(DecisionCode::FailGating, crate::types::GATE_REASON_LOW_CONSISTENCY, 0);
    }

    // Step 3: threshold. Active regime picks trend/revert by whether the
    // candidate continues or reverses the last confirmed direction; quiet
    // regime always uses the quiet threshold.
    let Some(dir) = direction else {
        return fail(DecisionCode::FailThreshold, crate::types::GATE_REASON_WEAK_SIGNAL, 1);
    };
    if score.abs() < effective.weak_signal_threshold {
        return fail(DecisionCode::FailThreshold, crate::types::GATE_REASON_WEAK_SIGNAL, 1);
    }
    let entry_threshold = match regime {
        Regime::Quiet => core.threshold_entry.quiet,
        Regime::Active if state.last_confirmed_direction == Some(dir) || state.last_confirmed_direction.is_none() => {
            core.threshold_entry.trend
        }
        Regime::Active => core.threshold_entry.revert,
    };
    if score.abs() < entry_threshold {
        return fail(DecisionCode::FailThreshold, crate::types::GATE_REASON_WEAK_SIGNAL, 1);
    }

    // Step 4: regime gate.
    let regime_z = match regime {
        Regime::Active => core.regime.z_t,
        Regime::Quiet => core.regime.z_r,
    };
    if score.abs() < regime_z {
        return fail(DecisionCode::FailRegime, "regime_threshold_not_met", 1);
    }
    if regime == Regime::Quiet && !core.allow_quiet {
        return fail(DecisionCode::FailRegime, "quiet_not_allowed", 1);
    }

    // Step 5: anti-flip / min-consecutive.
    if state.streak_direction == Some(dir) {
        state.streak_count += 1;
    } else {
        state.streak_direction = Some(dir);
        state.streak_count = 1;
    }
    let is_reversal = state.last_confirmed_direction.is_some() && state.last_confirmed_direction != Some(dir);
    if is_reversal && state.streak_count < effective.min_consecutive_same_dir {
        return fail(DecisionCode::FailAntiflip, "min_consecutive_not_met", 1);
    }

    // Step 6: cooldown.
    if let Some(last_ts) = state.last_confirmed_ts {
        if row.ts_ms - last_ts < core.cooldown_ms {
            return fail(DecisionCode::FailCooldown, crate::types::GATE_REASON_REVERSE_COOLDOWN, 1);
        }
    }
    if let Some(exit_ts) = state.last_exit_ts {
        if row.ts_ms - exit_ts < strategy.cooldown_after_exit_sec * 1000 {
            return fail(DecisionCode::FailCooldown, crate::types::GATE_REASON_COOLDOWN_AFTER_EXIT, 1);
        }
    }

    // Step 7: dedup.
    if state.seen_signal_ids.contains(&signal_id) {
        return fail(DecisionCode::FailDedup, "duplicate_signal", 1);
    }

    // Step 8: emit.
    state.remember_signal_id(&signal_id);
    state.last_confirmed_ts = Some(row.ts_ms);
    state.last_confirmed_direction = Some(dir);

    Outcome {
        decision_code: DecisionCode::Ok,
        confirm: true,
        gate_reason: String::new(),
        gating: 1,
        score,
        signal_type: classify_signal_type(direction, score, regime, &effective),
        regime,
        signal_id,
    }
}

fn classify_signal_type(
    direction: Option<Direction>,
    score: f64,
    regime: Regime,
    effective: &scenario::EffectiveThresholds,
) -> SignalType {
    let Some(dir) = direction else {
        return SignalType::Neutral;
    };
    if regime == Regime::Quiet {
        return SignalType::Quiet;
    }
    let strong = score.abs() >= 1.5 * effective.weak_signal_threshold;
    match (dir, strong) {
        (Direction::Up, true) => SignalType::StrongBuy,
        (Direction::Up, false) => SignalType::Buy,
        (Direction::Down, true) => SignalType::StrongSell,
        (Direction::Down, false) => SignalType::Sell,
    }
}

fn disagrees(z_ofi: f64, z_cvd: f64, ofi_threshold: f64, cvd_threshold: f64) -> bool {
    z_ofi.abs() >= ofi_threshold && z_cvd.abs() >= cvd_threshold && z_ofi.signum() != z_cvd.signum()
}
