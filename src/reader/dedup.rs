//! Minute-bucketed dedup set (spec §4.1; `reader.py`'s `_seen_keys_buckets`).
//! Keeping one `HashSet` per minute bucket, evicted as the read window
//! advances, bounds memory on long backtest runs instead of growing a single
//! set across the whole replay.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct DedupBuckets {
    buckets: HashMap<i64, HashSet<String>>,
}

impl DedupBuckets {
    /// Returns `true` if `key` was newly inserted into `minute_bucket`,
    /// `false` if it was already seen.
    pub fn insert(&mut self, minute_bucket: i64, key: String) -> bool {
        self.buckets.entry(minute_bucket).or_default().insert(key)
    }

    pub fn max_bucket(&self) -> Option<i64> {
        self.buckets.keys().copied().max()
    }

    /// Drops every bucket strictly older than `min_bucket`.
    pub fn evict_older_than(&mut self, min_bucket: i64) {
        if self.buckets.is_empty() {
            return;
        }
        self.buckets.retain(|bucket, _| *bucket >= min_bucket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_insert_of_same_key_is_rejected() {
        let mut d = DedupBuckets::default();
        assert!(d.insert(10, "BTCUSDT|100".into()));
        assert!(!d.insert(10, "BTCUSDT|100".into()));
    }

    #[test]
    fn eviction_drops_only_older_buckets() {
        let mut d = DedupBuckets::default();
        d.insert(5, "a".into());
        d.insert(10, "b".into());
        d.evict_older_than(8);
        assert!(!d.insert(10, "b".into()));
        assert!(d.insert(5, "a".into()));
    }
}
