//! Cache Configuration Module
//!
//! Configuration structs have public fields for simple instantiation and a
//! `Default` impl carrying the stock sizing. Out-of-range values are either
//! normalized (table sizes) or rejected with
//! [`CacheError::InvalidConfig`](crate::CacheError::InvalidConfig) when the
//! segment or cache is built.
//!
//! | Config | Used by | Description |
//! |--------|---------|-------------|
//! | [`SegmentConfig`] | [`Segment`](crate::Segment) | Bucket table sizing and growth |
//! | [`OffHeapCacheConfig`] | [`OffHeapCache`](crate::OffHeapCache) | Byte budget and segment count |
//!
//! # Examples
//!
//! ```
//! use ohc_segment::config::{OffHeapCacheConfig, SegmentConfig};
//! use ohc_segment::OffHeapCache;
//!
//! let config = OffHeapCacheConfig {
//!     capacity: 16 * 1024 * 1024,
//!     segments: 8,
//!     segment: SegmentConfig {
//!         hash_table_size: 1024,
//!         ..SegmentConfig::default()
//!     },
//! };
//! let cache = OffHeapCache::init(config, None).unwrap();
//! assert_eq!(cache.segment_count(), 8);
//! ```

pub mod cache;
pub mod segment;

pub use cache::OffHeapCacheConfig;
pub use segment::SegmentConfig;

/// Rounds `n` up to a power of two, saturating at `max` (itself a power of
/// two).
pub(crate) fn round_up_to_power_of_2(n: usize, max: usize) -> usize {
    if n >= max {
        return max;
    }
    n.max(1).next_power_of_two()
}
