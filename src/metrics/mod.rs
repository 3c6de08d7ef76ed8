//! Cache Metrics System
//!
//! Segments keep plain counters under their lock and hand out copies as
//! [`SegmentStats`]; the router sums those into a [`CacheStats`]. Both can be
//! flattened into a `BTreeMap<String, f64>` through the [`CacheMetrics`]
//! trait, so the keys always come out in the same order for logs, tests and
//! benchmark comparisons.

use std::collections::BTreeMap;

pub mod cache;
pub mod segment;

pub use cache::CacheStats;
pub use segment::{SegmentMetrics, SegmentStats};

/// Uniform metrics reporting for segments and caches.
pub trait CacheMetrics {
    /// Returns all metrics as key-value pairs in deterministic order.
    fn metrics(&self) -> BTreeMap<String, f64>;

    /// Short name identifying the reporting component.
    fn algorithm_name(&self) -> &'static str;
}

/// Returns `numerator / denominator`, or 0.0 when nothing was counted.
#[inline]
pub(crate) fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator > 0 {
        numerator as f64 / denominator as f64
    } else {
        0.0
    }
}
