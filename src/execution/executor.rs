//! Executor trait and variants (spec §4.6). `ExecutorPrecheck` is a
//! data-quality gate, distinct from the Signal Core's gating logic: by the
//! time a confirmed signal reaches the executor it has already passed
//! gating/threshold/regime, so precheck only denies on warmup/guard/
//! consistency, grounded line-for-line on
//! `original_source/executors/executor_precheck.py`.

use crate::config::{PrecheckConfig, ThrottlerConfig};
use crate::types::OrderCtx;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrecheckVerdict {
    Accepted,
    Rejected { reason: &'static str },
}

const CRITICAL_GUARD_REASONS: [&str; 4] = ["warmup", "spread_too_wide", "lag_exceeds_cap", "market_inactive"];

pub struct ExecutorPrecheck {
    consistency_min: f64,
    consistency_throttle_threshold: f64,
    deny_stats: HashMap<&'static str, u64>,
    throttle_stats: HashMap<&'static str, u64>,
}

impl ExecutorPrecheck {
    pub fn new(cfg: &PrecheckConfig) -> Self {
        Self {
            consistency_min: cfg.consistency_min,
            consistency_throttle_threshold: cfg.consistency_throttle_threshold,
            deny_stats: HashMap::new(),
            throttle_stats: HashMap::new(),
        }
    }

    /// Straight-line "first denial wins" evaluation: warmup, then critical
    /// guard reasons, then the two consistency thresholds, then the weak-
    /// signal throttle flag.
    pub fn check(&mut self, ctx: &OrderCtx) -> PrecheckVerdict {
        if ctx.warmup {
            *self.deny_stats.entry("warmup").or_insert(0) += 1;
            return PrecheckVerdict::Rejected { reason: "warmup" };
        }

        if let Some(guard_reason) = &ctx.guard_reason {
            for reason in guard_reason.split(',').map(|r| r.trim()) {
                if let Some(&critical) = CRITICAL_GUARD_REASONS.iter().find(|c| **c == reason) {
                    *self.deny_stats.entry(critical).or_insert(0) += 1;
                    return PrecheckVerdict::Rejected { reason: critical };
                }
            }
        }

        if let Some(consistency) = ctx.consistency {
            if consistency < self.consistency_min {
                *self.deny_stats.entry("low_consistency").or_insert(0) += 1;
                return PrecheckVerdict::Rejected { reason: "low_consistency" };
            }
            if consistency < self.consistency_throttle_threshold {
                *self.throttle_stats.entry("low_consistency_throttle").or_insert(0) += 1;
                return PrecheckVerdict::Rejected {
                    reason: "low_consistency_throttle",
                };
            }
        }

        if ctx.weak_signal_throttle {
            *self.throttle_stats.entry("weak_signal_throttle").or_insert(0) += 1;
            return PrecheckVerdict::Rejected {
                reason: "weak_signal_throttle",
            };
        }

        PrecheckVerdict::Accepted
    }

    pub fn deny_stats(&self) -> &HashMap<&'static str, u64> {
        &self.deny_stats
    }
}

pub enum MarketActivity {
    Active,
    Quiet,
}

/// Adjusts a request-rate ceiling from the deny-rate in `gate_reason_stats`
/// and the prevailing `MarketActivity`, then allows/denies against a
/// trailing request-timestamp window. Grounded on `AdaptiveThrottler`.
pub struct AdaptiveThrottler {
    base_rate_limit: f64,
    min_rate_limit: f64,
    max_rate_limit: f64,
    window: Duration,
    current_rate_limit: f64,
    request_history: VecDeque<Instant>,
}

impl AdaptiveThrottler {
    pub fn new(cfg: &ThrottlerConfig) -> Self {
        Self {
            base_rate_limit: cfg.base_rate_limit,
            min_rate_limit: cfg.min_rate_limit,
            max_rate_limit: cfg.max_rate_limit,
            window: Duration::from_secs(cfg.window_seconds.max(0) as u64),
            current_rate_limit: cfg.base_rate_limit,
            request_history: VecDeque::new(),
        }
    }

    pub fn should_throttle(&mut self, gate_reason_stats: Option<&HashMap<String, u64>>, market_activity: Option<MarketActivity>) -> bool {
        let now = Instant::now();
        while let Some(&front) = self.request_history.front() {
            if now.duration_since(front) > self.window {
                self.request_history.pop_front();
            } else {
                break;
            }
        }
        let current_count = self.request_history.len();

        if let Some(stats) = gate_reason_stats {
            let total_denies: u64 = stats.values().sum();
            if total_denies > 0 {
                let denom = current_count as f64 + total_denies as f64;
                let deny_rate = if denom > 0.0 { total_denies as f64 / denom } else { 0.0 };
                if deny_rate > 0.5 {
                    self.current_rate_limit = (self.current_rate_limit * 0.8).max(self.min_rate_limit);
                } else if deny_rate < 0.1 {
                    self.current_rate_limit = (self.current_rate_limit * 1.1).min(self.max_rate_limit);
                }
            }
        }

        match market_activity {
            Some(MarketActivity::Quiet) => {
                self.current_rate_limit = (self.current_rate_limit * 0.5).max(self.min_rate_limit);
            }
            Some(MarketActivity::Active) => {
                self.current_rate_limit = (self.current_rate_limit * 1.2).min(self.max_rate_limit);
            }
            None => {}
        }

        if current_count as f64 >= self.current_rate_limit * self.window.as_secs_f64() {
            return true;
        }
        self.request_history.push_back(now);
        false
    }

    pub fn current_rate_limit(&self) -> f64 {
        self.current_rate_limit
    }
}

impl Default for AdaptiveThrottler {
    fn default() -> Self {
        Self::new(&ThrottlerConfig {
            base_rate_limit: 10.0,
            min_rate_limit: 1.0,
            max_rate_limit: 100.0,
            window_seconds: 60,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(warmup: bool, guard_reason: Option<&str>, consistency: Option<f64>, weak: bool) -> OrderCtx {
        use crate::types::{Order, OrderType, Side, TimeInForce};
        OrderCtx {
            order: Order {
                client_order_id: "c1".into(),
                symbol: "BTCUSDT".into(),
                side: Side::Buy,
                qty: 1.0,
                order_type: OrderType::Market,
                price: None,
                tif: TimeInForce::GTC,
                ts_ms: 0,
            },
            signal_row_id: None,
            regime: None,
            scenario: None,
            warmup,
            guard_reason: guard_reason.map(|s| s.to_string()),
            consistency,
            weak_signal_throttle: weak,
            tick_size: 0.01,
            step_size: 0.001,
            min_notional: 0.0,
            costs_bps: 0.0,
            event_ts_ms: None,
        }
    }

    #[test]
    fn warmup_denies_before_anything_else() {
        let mut precheck = ExecutorPrecheck::new(&PrecheckConfig::default());
        let verdict = precheck.check(&ctx(true, Some("spread_too_wide"), Some(0.9), false));
        assert_eq!(verdict, PrecheckVerdict::Rejected { reason: "warmup" });
    }

    #[test]
    fn low_consistency_below_min_denies_outright() {
        let mut precheck = ExecutorPrecheck::new(&PrecheckConfig::default());
        let verdict = precheck.check(&ctx(false, None, Some(0.05), false));
        assert_eq!(verdict, PrecheckVerdict::Rejected { reason: "low_consistency" });
    }

    #[test]
    fn passes_all_checks() {
        let mut precheck = ExecutorPrecheck::new(&PrecheckConfig::default());
        let verdict = precheck.check(&ctx(false, None, Some(0.9), false));
        assert_eq!(verdict, PrecheckVerdict::Accepted);
    }
}
