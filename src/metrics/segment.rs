//! Per-segment counters and statistics snapshots.

use super::{ratio, CacheMetrics};
use std::collections::BTreeMap;

/// Operation counters of one segment.
///
/// Updated under the segment lock; read through [`SegmentStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SegmentMetrics {
    /// Lookups that found their key.
    pub hit_count: u64,
    /// Lookups that did not.
    pub miss_count: u64,
    /// Puts that linked a new key.
    pub put_add_count: u64,
    /// Puts that replaced an existing key.
    pub put_replace_count: u64,
    /// Puts that were rejected.
    pub put_fail_count: u64,
    /// Explicit removals.
    pub remove_count: u64,
    /// Completed table growths.
    pub rehash_count: u64,
    /// LRU array compactions.
    pub lru_compactions: u64,
    /// Entries evicted to make room for puts.
    pub evicted_entries: u64,
}

impl SegmentMetrics {
    #[inline]
    pub(crate) fn record_hit(&mut self) {
        self.hit_count += 1;
    }

    #[inline]
    pub(crate) fn record_miss(&mut self) {
        self.miss_count += 1;
    }

    #[inline]
    pub(crate) fn record_put(&mut self, replaced: bool) {
        if replaced {
            self.put_replace_count += 1;
        } else {
            self.put_add_count += 1;
        }
    }

    #[inline]
    pub(crate) fn record_put_fail(&mut self) {
        self.put_fail_count += 1;
    }

    #[inline]
    pub(crate) fn record_remove(&mut self) {
        self.remove_count += 1;
    }

    #[inline]
    pub(crate) fn record_rehash(&mut self) {
        self.rehash_count += 1;
    }

    #[inline]
    pub(crate) fn record_compaction(&mut self) {
        self.lru_compactions += 1;
    }

    #[inline]
    pub(crate) fn record_eviction(&mut self) {
        self.evicted_entries += 1;
    }

    /// Fraction of lookups that hit.
    pub fn hit_rate(&self) -> f64 {
        ratio(self.hit_count, self.hit_count + self.miss_count)
    }

    /// Adds another segment's counters to these.
    pub fn accumulate(&mut self, other: &SegmentMetrics) {
        self.hit_count += other.hit_count;
        self.miss_count += other.miss_count;
        self.put_add_count += other.put_add_count;
        self.put_replace_count += other.put_replace_count;
        self.put_fail_count += other.put_fail_count;
        self.remove_count += other.remove_count;
        self.rehash_count += other.rehash_count;
        self.lru_compactions += other.lru_compactions;
        self.evicted_entries += other.evicted_entries;
    }

    /// Converts the counters to a `BTreeMap` for reporting.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        metrics.insert("evicted_entries".to_string(), self.evicted_entries as f64);
        metrics.insert("hit_count".to_string(), self.hit_count as f64);
        metrics.insert("hit_rate".to_string(), self.hit_rate());
        metrics.insert("lru_compactions".to_string(), self.lru_compactions as f64);
        metrics.insert("miss_count".to_string(), self.miss_count as f64);
        metrics.insert("put_add_count".to_string(), self.put_add_count as f64);
        metrics.insert("put_fail_count".to_string(), self.put_fail_count as f64);
        metrics.insert(
            "put_replace_count".to_string(),
            self.put_replace_count as f64,
        );
        metrics.insert("rehash_count".to_string(), self.rehash_count as f64);
        metrics.insert("remove_count".to_string(), self.remove_count as f64);
        metrics
    }
}

/// Point-in-time statistics of one segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentStats {
    /// Number of linked entries.
    pub size: u64,
    /// Current bucket count.
    pub hash_table_size: usize,
    /// Growth threshold as a fraction of the bucket count.
    pub load_factor: f32,
    /// Operation counters since creation or the last reset.
    pub counters: SegmentMetrics,
}

impl SegmentStats {
    /// Converts the snapshot to a `BTreeMap` for reporting.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.counters.to_btreemap();
        metrics.insert("hash_table_size".to_string(), self.hash_table_size as f64);
        metrics.insert("load_factor".to_string(), f64::from(self.load_factor));
        metrics.insert("size".to_string(), self.size as f64);
        metrics
    }
}

impl CacheMetrics for SegmentStats {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.to_btreemap()
    }

    fn algorithm_name(&self) -> &'static str {
        "Segment"
    }
}
