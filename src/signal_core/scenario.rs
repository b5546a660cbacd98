//! Scenario-override resolution (spec §4.4). `scenario_overrides` may nudge
//! three baseline knobs before the step that reads them; a scenario absent
//! from the map leaves the global baseline untouched.

use crate::config::ScenarioOverride;
use crate::types::Scenario2x2;
use std::collections::HashMap;

pub struct EffectiveThresholds {
    pub weak_signal_threshold: f64,
    pub consistency_min: f64,
    pub min_consecutive_same_dir: u32,
}

pub fn resolve(
    scenario: Scenario2x2,
    base_weak_signal_threshold: f64,
    base_consistency_min: f64,
    base_min_consecutive: u32,
    overrides: &HashMap<String, ScenarioOverride>,
) -> EffectiveThresholds {
    let Some(o) = overrides.get(scenario.as_str()) else {
        return EffectiveThresholds {
            weak_signal_threshold: base_weak_signal_threshold,
            consistency_min: base_consistency_min,
            min_consecutive_same_dir: base_min_consecutive,
        };
    };

    EffectiveThresholds {
        weak_signal_threshold: base_weak_signal_threshold + o.weak_signal_threshold_offset,
        consistency_min: base_consistency_min + o.consistency_min_offset,
        min_consecutive_same_dir: (base_min_consecutive as i32 + o.min_consecutive_offset).max(1) as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_scenario_falls_back_to_baseline() {
        let effective = resolve(Scenario2x2::ActiveHighVol, 1.5, 0.15, 1, &HashMap::new());
        assert_eq!(effective.weak_signal_threshold, 1.5);
        assert_eq!(effective.consistency_min, 0.15);
    }

    #[test]
    fn matching_scenario_applies_offsets() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "A_H".to_string(),
            ScenarioOverride {
                weak_signal_threshold_offset: 0.5,
                consistency_min_offset: -0.05,
                min_consecutive_offset: 1,
            },
        );
        let effective = resolve(Scenario2x2::ActiveHighVol, 1.5, 0.15, 1, &overrides);
        assert_eq!(effective.weak_signal_threshold, 2.0);
        assert!((effective.consistency_min - 0.10).abs() < 1e-9);
        assert_eq!(effective.min_consecutive_same_dir, 2);
    }

    #[test]
    fn min_consecutive_never_drops_below_one() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "Q_L".to_string(),
            ScenarioOverride {
                weak_signal_threshold_offset: 0.0,
                consistency_min_offset: 0.0,
                min_consecutive_offset: -5,
            },
        );
        let effective = resolve(Scenario2x2::QuietLowVol, 1.5, 0.15, 1, &overrides);
        assert_eq!(effective.min_consecutive_same_dir, 1);
    }
}
