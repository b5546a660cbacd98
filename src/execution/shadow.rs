//! Shadow execution wrapper (spec §4.6/§11). Runs a primary and a shadow
//! `Executor` concurrently for the same order and scores how closely their
//! outcomes agree, rather than requiring exact terminal-state equality.
//!
//! Grounded on spec.md §4.6; shape modeled on the teacher's
//! `backtest_v2::shadow_maker` discrepancy-classification idiom.

use crate::error::{AlphaCoreError, Result};
use crate::types::{Fill, OrderCtx};
use crate::execution::Executor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParityOutcome {
    Agree,
    Disagree,
}

/// Per-submission parity between a primary and shadow outcome (spec §4.6,
/// GLOSSARY): weighted `0.5*status + 0.25*price + 0.25*reason`. Price
/// parity counts a difference within one tick as equal; reason parity only
/// applies when both sides rejected.
#[derive(Debug, Clone, Copy)]
pub struct ShadowComparison {
    pub status_match: bool,
    pub price_match: bool,
    pub reason_match: bool,
}

impl ShadowComparison {
    pub fn weighted_score(&self) -> f64 {
        0.5 * (self.status_match as u8 as f64) + 0.25 * (self.price_match as u8 as f64) + 0.25 * (self.reason_match as u8 as f64)
    }
}

/// Compares a primary/shadow submission pair. `tick_size` governs the
/// within-one-tick price-parity rule (seed scenario: 50000.00 vs 50000.01
/// at `tick_size=0.01` is full price parity).
pub fn compare(primary: &Result<Fill>, shadow: &Result<Fill>, tick_size: f64) -> ShadowComparison {
    let status_match = primary.is_ok() == shadow.is_ok();
    let price_match = match (primary, shadow) {
        (Ok(p), Ok(s)) => (p.price - s.price).abs() <= tick_size,
        (Err(_), Err(_)) => true,
        _ => false,
    };
    let reason_match = match (primary, shadow) {
        (Ok(_), Ok(_)) => true,
        (Err(p), Err(s)) => reject_reason(p) == reject_reason(s),
        _ => false,
    };
    ShadowComparison {
        status_match,
        price_match,
        reason_match,
    }
}

fn reject_reason(err: &AlphaCoreError) -> String {
    match err {
        AlphaCoreError::AdapterReject { code, .. } => code.clone(),
        AlphaCoreError::Adapter { code, .. } => code.as_str().to_string(),
        other => other.to_string(),
    }
}

/// Rolling weighted-parity tracker across many submissions.
pub struct ShadowParityTracker {
    score_sum: f64,
    count: u64,
    alert_threshold: f64,
}

impl ShadowParityTracker {
    pub fn new(alert_threshold: f64) -> Self {
        Self {
            score_sum: 0.0,
            count: 0,
            alert_threshold,
        }
    }

    pub fn record(&mut self, comparison: ShadowComparison) -> ParityOutcome {
        self.score_sum += comparison.weighted_score();
        self.count += 1;
        if comparison.weighted_score() >= 0.999 {
            ParityOutcome::Agree
        } else {
            ParityOutcome::Disagree
        }
    }

    pub fn parity_ratio(&self) -> f64 {
        if self.count == 0 {
            1.0
        } else {
            self.score_sum / self.count as f64
        }
    }

    /// `true` once the rolling parity ratio drops below the configured
    /// threshold, so a caller can page or halt shadow promotion.
    pub fn should_alert(&self) -> bool {
        self.parity_ratio() < self.alert_threshold
    }
}

/// Decides whether an `OrderCtx` destined for the shadow executor should be
/// suppressed from actually reaching a venue (it always should be — shadow
/// mode observes decisions, it never trades).
pub fn is_shadow_only(_ctx: &OrderCtx) -> bool {
    true
}

/// Runs a primary and shadow executor concurrently for every order and
/// feeds a rolling `ShadowParityTracker`, the default alert threshold being
/// the spec's 0.99 (spec §4.6/§11).
pub struct ShadowExecutorWrapper<P, S> {
    primary: P,
    shadow: S,
    tracker: ShadowParityTracker,
}

impl<P: Executor, S: Executor> ShadowExecutorWrapper<P, S> {
    pub fn new(primary: P, shadow: S) -> Self {
        Self {
            primary,
            shadow,
            tracker: ShadowParityTracker::new(0.99),
        }
    }

    /// Submits `ctx` to both executors concurrently. The shadow's outcome
    /// never reaches a caller beyond the parity score: only the primary's
    /// result is returned.
    pub async fn submit_with_ctx(&mut self, ctx: OrderCtx) -> (Result<Fill>, ShadowComparison) {
        let tick_size = ctx.tick_size;
        let (primary_result, shadow_result) = tokio::join!(self.primary.submit_with_ctx(ctx.clone()), self.shadow.submit_with_ctx(ctx));
        let comparison = compare(&primary_result, &shadow_result, tick_size);
        self.tracker.record(comparison);
        (primary_result, comparison)
    }

    pub fn parity_ratio(&self) -> f64 {
        self.tracker.parity_ratio()
    }

    pub fn should_alert(&self) -> bool {
        self.tracker.should_alert()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Liquidity, Side};

    fn fill_at(price: f64) -> Fill {
        Fill {
            ts_ms: 0,
            symbol: "BTCUSDT".into(),
            client_order_id: "c1".into(),
            broker_order_id: None,
            price,
            qty: 1.0,
            fee: 0.0,
            liquidity: Liquidity::Taker,
            side: Side::Buy,
        }
    }

    #[test]
    fn price_within_one_tick_counts_as_full_parity() {
        // seed scenario 6: 50000.00 vs 50000.01 at tick_size=0.01 -> price-parity=1.0
        let primary = Ok(fill_at(50000.00));
        let shadow = Ok(fill_at(50000.01));
        let cmp = compare(&primary, &shadow, 0.01);
        assert!(cmp.price_match);
        assert_eq!(cmp.weighted_score(), 1.0);
    }

    #[test]
    fn price_beyond_one_tick_breaks_parity() {
        let primary = Ok(fill_at(50000.00));
        let shadow = Ok(fill_at(50000.50));
        let cmp = compare(&primary, &shadow, 0.01);
        assert!(!cmp.price_match);
        assert_eq!(cmp.weighted_score(), 0.75);
    }

    #[test]
    fn disagreement_rate_above_threshold_alerts() {
        let mut tracker = ShadowParityTracker::new(0.9);
        for _ in 0..8 {
            tracker.record(ShadowComparison {
                status_match: true,
                price_match: true,
                reason_match: true,
            });
        }
        for _ in 0..2 {
            tracker.record(ShadowComparison {
                status_match: false,
                price_match: false,
                reason_match: false,
            });
        }
        assert!(tracker.should_alert());
    }
}
