//! Aggregate statistics across all segments of a cache.

use super::{CacheMetrics, SegmentMetrics};
use core::fmt;
use std::collections::BTreeMap;

/// Statistics summed over every segment of an
/// [`OffHeapCache`](crate::OffHeapCache).
///
/// Each segment is sampled under its own lock, one after another, so the
/// totals are not an atomic snapshot of the whole cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    /// Configured byte budget.
    pub capacity: u64,
    /// Free bytes according to the shared counter. May be transiently
    /// negative under concurrent puts.
    pub free: i64,
    /// Summed segment counters.
    pub counters: SegmentMetrics,
    /// Linked entries per segment.
    pub segment_sizes: Vec<u64>,
}

impl CacheStats {
    /// Total number of linked entries.
    pub fn size(&self) -> u64 {
        self.segment_sizes.iter().sum()
    }

    /// Bytes charged against the budget.
    pub fn used(&self) -> i64 {
        i64::try_from(self.capacity).unwrap_or(i64::MAX) - self.free
    }

    /// Smallest segment size; 0 for a cache without segments.
    pub fn min_segment_size(&self) -> u64 {
        self.segment_sizes.iter().copied().min().unwrap_or(0)
    }

    /// Largest segment size.
    pub fn max_segment_size(&self) -> u64 {
        self.segment_sizes.iter().copied().max().unwrap_or(0)
    }

    /// Mean segment size.
    pub fn avg_segment_size(&self) -> f64 {
        if self.segment_sizes.is_empty() {
            return 0.0;
        }
        self.size() as f64 / self.segment_sizes.len() as f64
    }

    /// Converts the statistics to a `BTreeMap` for reporting.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.counters.to_btreemap();
        metrics.insert("avg_segment_size".to_string(), self.avg_segment_size());
        metrics.insert("capacity".to_string(), self.capacity as f64);
        metrics.insert("free".to_string(), self.free as f64);
        metrics.insert("max_segment_size".to_string(), self.max_segment_size() as f64);
        metrics.insert("min_segment_size".to_string(), self.min_segment_size() as f64);
        metrics.insert("segments".to_string(), self.segment_sizes.len() as f64);
        metrics.insert("size".to_string(), self.size() as f64);
        metrics
    }
}

impl CacheMetrics for CacheStats {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.to_btreemap()
    }

    fn algorithm_name(&self) -> &'static str {
        "OffHeapCache"
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counters;
        write!(
            f,
            "CacheStats{{size={}, capacity={}, free={}, hit/miss={}/{}, \
             rehash={}, put(add/replace/fail)={}/{}/{}, remove={}, evicted={}, \
             lruCompactions={}, segmentSizes(#/min/max/avg)={}/{}/{}/{:.2}}}",
            self.size(),
            self.capacity,
            self.free,
            c.hit_count,
            c.miss_count,
            c.rehash_count,
            c.put_add_count,
            c.put_replace_count,
            c.put_fail_count,
            c.remove_count,
            c.evicted_entries,
            c.lru_compactions,
            self.segment_sizes.len(),
            self.min_segment_size(),
            self.max_segment_size(),
            self.avg_segment_size(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CacheStats {
        CacheStats {
            capacity: 1000,
            free: 400,
            counters: SegmentMetrics {
                hit_count: 5,
                miss_count: 1,
                put_add_count: 6,
                lru_compactions: 2,
                ..SegmentMetrics::default()
            },
            segment_sizes: vec![1, 3, 2, 0],
        }
    }

    #[test]
    fn test_segment_size_helpers() {
        let stats = sample();
        assert_eq!(stats.size(), 6);
        assert_eq!(stats.used(), 600);
        assert_eq!(stats.min_segment_size(), 0);
        assert_eq!(stats.max_segment_size(), 3);
        assert_eq!(stats.avg_segment_size(), 1.5);
    }

    #[test]
    fn test_empty_segments() {
        let stats = CacheStats {
            capacity: 0,
            free: 0,
            counters: SegmentMetrics::default(),
            segment_sizes: Vec::new(),
        };
        assert_eq!(stats.min_segment_size(), 0);
        assert_eq!(stats.avg_segment_size(), 0.0);
    }

    #[test]
    fn test_display() {
        let text = sample().to_string();
        assert!(text.starts_with("CacheStats{size=6, capacity=1000, free=400"));
        assert!(text.contains("put(add/replace/fail)=6/0/0"));
        assert!(text.contains("evicted=0, lruCompactions=2, segmentSizes"));
        assert!(text.contains("segmentSizes(#/min/max/avg)=4/0/3/1.50"));
    }

    #[test]
    fn test_metrics_map() {
        let metrics = sample().metrics();
        assert_eq!(metrics["size"], 6.0);
        assert_eq!(metrics["segments"], 4.0);
        assert_eq!(metrics["put_add_count"], 6.0);
        assert_eq!(sample().algorithm_name(), "OffHeapCache");
    }
}
