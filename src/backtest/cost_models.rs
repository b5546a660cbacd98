//! Slippage and fee cost models (spec §4.9). `TradeSimulator` asks a
//! `CostModel` for a per-fill slippage/fee estimate keyed off the entry
//! feature row's market context; the three variants of each (slippage:
//! static/linear/piecewise, fee: taker_static/tiered/maker_taker) are
//! grounded line for line on
//! `original_source/backtest/trade_sim.py::_compute_slippage_bps` /
//! `_compute_fee_bps`.

use crate::config::{BacktestConfig, FeeMakerTakerConfig, FeeModel, FeeTieredConfig, SlippageModel, SlippagePiecewiseConfig};
use crate::types::{FeatureData, Scenario2x2, Side};

#[derive(Debug, Clone, Default)]
pub struct CostModelStats {
    pub invalid_scenario_count: u64,
    pub invalid_fee_tier_count: u64,
    pub total_signal_count: u64,
}

pub struct FeeResult {
    pub fee_bps: f64,
    pub maker_probability: f64,
}

pub struct CostModel {
    slippage_model: SlippageModel,
    fee_model: FeeModel,
    slippage_bps: f64,
    taker_fee_bps: f64,
    slippage_piecewise: SlippagePiecewiseConfig,
    fee_tiered: FeeTieredConfig,
    fee_maker_taker: FeeMakerTakerConfig,
    stats: CostModelStats,
}

impl CostModel {
    pub fn new(cfg: &BacktestConfig) -> Self {
        Self {
            slippage_model: cfg.slippage_model,
            fee_model: cfg.fee_model,
            slippage_bps: cfg.slippage_bps,
            taker_fee_bps: cfg.taker_fee_bps,
            slippage_piecewise: cfg.slippage_piecewise.clone(),
            fee_tiered: cfg.fee_tiered.clone(),
            fee_maker_taker: cfg.fee_maker_taker.clone(),
            stats: CostModelStats::default(),
        }
    }

    pub fn stats(&self) -> &CostModelStats {
        &self.stats
    }

    pub fn note_signal(&mut self) {
        self.stats.total_signal_count += 1;
    }

    /// `side` is accepted for symmetry with the fee side effects but, as in
    /// the original, doesn't change the slippage magnitude itself — the
    /// caller applies the sign when turning this into an execution price.
    pub fn slippage_bps(&mut self, fd: &FeatureData) -> f64 {
        match self.slippage_model {
            SlippageModel::Static => self.slippage_bps,
            SlippageModel::Linear => {
                let spread = fd.spread_bps;
                let vol_bps = if fd.vol_bps != 0.0 { fd.vol_bps } else { fd.return_1s.abs() };
                (0.5 * spread + 0.3 * vol_bps).max(self.slippage_bps)
            }
            SlippageModel::Piecewise => {
                let Some(scenario) = fd.scenario_2x2 else {
                    self.stats.invalid_scenario_count += 1;
                    tracing::warn!("unknown scenario, using default slippage");
                    return self.slippage_bps;
                };
                let base = fd.spread_bps * self.slippage_piecewise.spread_base_multiplier;
                let multiplier = self
                    .slippage_piecewise
                    .scenario_multiplier
                    .get(scenario.as_str())
                    .copied()
                    .unwrap_or(1.0);
                (base * multiplier).max(self.slippage_bps)
            }
        }
    }

    pub fn fee_bps(&mut self, fd: &FeatureData, side: Side) -> FeeResult {
        match self.fee_model {
            FeeModel::TakerStatic => FeeResult {
                fee_bps: self.taker_fee_bps,
                maker_probability: 0.0,
            },
            FeeModel::Tiered => {
                let tier = fd.fee_tier.as_deref().unwrap_or("TM").to_uppercase();
                const VALID_TIERS: [&str; 6] = ["TM", "MM", "TT", "MT", "TK", "MK"];
                if !VALID_TIERS.contains(&tier.as_str()) {
                    self.stats.invalid_fee_tier_count += 1;
                    tracing::warn!(tier, "unknown fee_tier, using default fee");
                    return FeeResult {
                        fee_bps: self.taker_fee_bps,
                        maker_probability: 0.0,
                    };
                }
                let fee_bps = self
                    .fee_tiered
                    .tier_mapping
                    .get(tier.as_str())
                    .map(|mult| self.taker_fee_bps * mult)
                    .unwrap_or(self.taker_fee_bps);
                let maker_probability = match tier.as_str() {
                    "MM" | "MK" => 1.0,
                    "MT" | "TK" => 0.5,
                    _ => 0.0,
                };
                FeeResult { fee_bps, maker_probability }
            }
            FeeModel::MakerTaker => {
                let spread_bps = fd.spread_bps;
                let scenario = fd.scenario_2x2.map(|s| s.as_str()).unwrap_or("default");
                let mut maker_probability = self
                    .fee_maker_taker
                    .scenario_probs
                    .get(scenario)
                    .copied()
                    .unwrap_or_else(|| self.fee_maker_taker.scenario_probs.get("default").copied().unwrap_or(0.5));

                if spread_bps > self.fee_maker_taker.spread_threshold_wide {
                    maker_probability *= self.fee_maker_taker.spread_slope;
                } else if spread_bps < self.fee_maker_taker.spread_threshold_narrow {
                    maker_probability = (maker_probability / self.fee_maker_taker.spread_slope).min(1.0);
                }

                maker_probability *= self.fee_maker_taker.side_bias.for_side(side.as_str());
                maker_probability = maker_probability.clamp(0.0, 1.0);

                let maker_fee = self.taker_fee_bps * self.fee_maker_taker.maker_fee_ratio;
                let taker_fee = self.taker_fee_bps;
                let fee_bps = maker_probability * maker_fee + (1.0 - maker_probability) * taker_fee;
                FeeResult { fee_bps, maker_probability }
            }
        }
    }
}

/// `A_H_unknown` -> `A_H`, matching the original's "take the first two
/// underscore-joined parts" normalization. Only needed for raw strings that
/// haven't already gone through `Scenario2x2::parse` (e.g. config lookups
/// driven by untyped upstream data).
pub fn normalize_scenario(s: &str) -> String {
    if s.is_empty() {
        return "unknown".to_string();
    }
    let parts: Vec<&str> = s.split('_').collect();
    if parts.len() >= 2 {
        format!("{}_{}", parts[0], parts[1])
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fd(spread_bps: f64, vol_bps: f64, scenario: Option<Scenario2x2>) -> FeatureData {
        FeatureData {
            spread_bps,
            vol_bps,
            scenario_2x2: scenario,
            return_1s: 0.0,
            ..FeatureData::default()
        }
    }

    #[test]
    fn static_model_ignores_market_context() {
        let cfg = BacktestConfig {
            slippage_model: SlippageModel::Static,
            slippage_bps: 1.5,
            ..BacktestConfig::default()
        };
        let mut model = CostModel::new(&cfg);
        assert_eq!(model.slippage_bps(&fd(50.0, 20.0, None)), 1.5);
    }

    #[test]
    fn linear_model_falls_back_to_abs_return_when_vol_missing() {
        let cfg = BacktestConfig {
            slippage_model: SlippageModel::Linear,
            slippage_bps: 0.1,
            ..BacktestConfig::default()
        };
        let mut model = CostModel::new(&cfg);
        let mut row = fd(4.0, 0.0, None);
        row.return_1s = -3.0;
        // 0.5*4 + 0.3*3 = 2.9
        assert!((model.slippage_bps(&row) - 2.9).abs() < 1e-9);
    }

    #[test]
    fn piecewise_model_unknown_scenario_counts_and_falls_back() {
        let cfg = BacktestConfig {
            slippage_model: SlippageModel::Piecewise,
            slippage_bps: 1.0,
            ..BacktestConfig::default()
        };
        let mut model = CostModel::new(&cfg);
        assert_eq!(model.slippage_bps(&fd(10.0, 0.0, None)), 1.0);
        assert_eq!(model.stats().invalid_scenario_count, 1);
    }

    #[test]
    fn tiered_fee_unknown_tier_falls_back_to_taker() {
        let cfg = BacktestConfig {
            fee_model: FeeModel::Tiered,
            taker_fee_bps: 2.0,
            ..BacktestConfig::default()
        };
        let mut model = CostModel::new(&cfg);
        let mut row = fd(1.0, 0.0, None);
        row.fee_tier = Some("ZZ".into());
        let result = model.fee_bps(&row, Side::Buy);
        assert_eq!(result.fee_bps, 2.0);
        assert_eq!(model.stats().invalid_fee_tier_count, 1);
    }

    #[test]
    fn tiered_fee_maker_side_settles_at_half() {
        let cfg = BacktestConfig {
            fee_model: FeeModel::Tiered,
            taker_fee_bps: 4.0,
            ..BacktestConfig::default()
        };
        let mut model = CostModel::new(&cfg);
        let mut row = fd(1.0, 0.0, None);
        row.fee_tier = Some("MM".into());
        let result = model.fee_bps(&row, Side::Buy);
        assert_eq!(result.fee_bps, 2.0);
        assert_eq!(result.maker_probability, 1.0);
    }

    #[test]
    fn maker_taker_wide_spread_reduces_maker_probability() {
        let cfg = BacktestConfig {
            fee_model: FeeModel::MakerTaker,
            taker_fee_bps: 2.0,
            ..BacktestConfig::default()
        };
        let mut model = CostModel::new(&cfg);
        let row = fd(50.0, 0.0, Some(Scenario2x2::ActiveLowVol));
        let result = model.fee_bps(&row, Side::Sell);
        assert!(result.maker_probability < 0.8);
    }

    #[test]
    fn normalize_scenario_takes_first_two_parts() {
        assert_eq!(normalize_scenario("A_H_unknown"), "A_H");
        assert_eq!(normalize_scenario(""), "unknown");
        assert_eq!(normalize_scenario("solo"), "solo");
    }
}
