//! `client_order_id` derivation and LRU idempotency tracking (spec §4.6/§9).
//!
//! Grounded on `original_source/executors/idempotency.py`:
//! `generate_idempotent_key` (exact field order and `%.8f` formatting) and
//! `IdempotencyTracker` (`set` + `deque(maxlen)` LRU eviction).

use crate::types::Side;
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};

/// `hash(signal_row_id|ts_ms|side|qty|price)[:32]`. Any field that is absent
/// is omitted from the joined string entirely, not padded — two calls with
/// and without a `signal_row_id` of `None` therefore hash different strings
/// only if some other field also differs, matching the Python's `if` guards.
pub fn idempotency_seed(signal_row_id: Option<&str>, ts_ms: i64, side: Side, qty: f64, price: Option<f64>) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(5);
    if let Some(id) = signal_row_id {
        if !id.is_empty() {
            parts.push(id.to_string());
        }
    }
    parts.push(ts_ms.to_string());
    parts.push(side.as_str().to_string());
    parts.push(format!("{qty:.8}"));
    if let Some(p) = price {
        parts.push(format!("{p:.8}"));
    }

    let joined = parts.join("|");
    let digest = Sha256::digest(joined.as_bytes());
    hex::encode(digest)[..32].to_string()
}

/// Bounded set of already-processed `client_order_id`s, evicted oldest-first
/// once `max_size` is reached. Grounded on `IdempotencyTracker`.
pub struct IdempotencyTracker {
    seen: HashSet<String>,
    order: VecDeque<String>,
    max_size: usize,
}

impl IdempotencyTracker {
    pub fn new(max_size: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            max_size,
        }
    }

    pub fn is_processed(&self, client_order_id: &str) -> bool {
        self.seen.contains(client_order_id)
    }

    pub fn mark_processed(&mut self, client_order_id: &str) {
        if self.seen.len() >= self.max_size {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(client_order_id.to_string());
        self.order.push_back(client_order_id.to_string());
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }
}

impl Default for IdempotencyTracker {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_produce_same_key() {
        let a = idempotency_seed(Some("sig-1"), 1_000, Side::Buy, 0.5, Some(100.25));
        let b = idempotency_seed(Some("sig-1"), 1_000, Side::Buy, 0.5, Some(100.25));
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn differing_side_changes_key() {
        let a = idempotency_seed(Some("sig-1"), 1_000, Side::Buy, 0.5, Some(100.25));
        let b = idempotency_seed(Some("sig-1"), 1_000, Side::Sell, 0.5, Some(100.25));
        assert_ne!(a, b);
    }

    #[test]
    fn tracker_evicts_oldest_past_capacity() {
        let mut tracker = IdempotencyTracker::new(2);
        tracker.mark_processed("a");
        tracker.mark_processed("b");
        tracker.mark_processed("c");
        assert!(!tracker.is_processed("a"));
        assert!(tracker.is_processed("b"));
        assert!(tracker.is_processed("c"));
    }
}
