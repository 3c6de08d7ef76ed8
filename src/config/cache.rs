//! Configuration for the multi-segment [`OffHeapCache`](crate::OffHeapCache).

use super::SegmentConfig;
use crate::error::{CacheError, CacheResult};
use core::fmt;

/// Largest segment count accepted.
pub const MAX_SEGMENTS: usize = 1 << 16;

/// Default byte budget: 64 MiB.
pub const DEFAULT_CAPACITY: u64 = 64 * 1024 * 1024;

/// Returns the default number of segments: twice the available parallelism,
/// rounded up to a power of two.
fn default_segment_count() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get() * 2)
        .unwrap_or(16)
        .clamp(4, 256)
        .next_power_of_two()
}

/// Configuration for an [`OffHeapCache`](crate::OffHeapCache).
///
/// # Fields
///
/// - `capacity`: byte budget shared by all segments. Every entry is charged
///   its full allocation length (header, padded key and value).
/// - `segments`: number of independently locked segments. Rounded up to a
///   power of two; zero is rejected.
/// - `segment`: per-segment table sizing.
#[derive(Clone, Copy, PartialEq)]
pub struct OffHeapCacheConfig {
    /// Shared byte budget.
    pub capacity: u64,
    /// Number of segments.
    pub segments: usize,
    /// Per-segment configuration.
    pub segment: SegmentConfig,
}

impl OffHeapCacheConfig {
    /// Returns the normalized segment count, or an error if it is zero or
    /// too large.
    pub fn checked_segments(&self) -> CacheResult<usize> {
        match self.segments {
            0 => Err(CacheError::InvalidConfig("segment count must be positive")),
            n if n > MAX_SEGMENTS => Err(CacheError::InvalidConfig("too many segments")),
            n => Ok(n.next_power_of_two()),
        }
    }
}

impl Default for OffHeapCacheConfig {
    fn default() -> Self {
        OffHeapCacheConfig {
            capacity: DEFAULT_CAPACITY,
            segments: default_segment_count(),
            segment: SegmentConfig::default(),
        }
    }
}

impl fmt::Debug for OffHeapCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffHeapCacheConfig")
            .field("capacity", &self.capacity)
            .field("segments", &self.segments)
            .field("segment", &self.segment)
            .finish()
    }
}
