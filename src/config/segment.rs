//! Configuration for a single segment.
//!
//! # Sizing
//!
//! A segment starts with `hash_table_size` buckets of `bucket_length` slots
//! each and doubles its bucket count whenever the number of linked entries
//! reaches `buckets × load_factor`. The table memory is
//!
//! ```text
//! buckets × (bucket_length × 16 + 8) bytes
//! ```
//!
//! so the stock 8192 × 8 table takes about 1.1 MiB before any entry is
//! stored. Entries themselves are allocated separately.

use crate::error::{CacheError, CacheResult};
use crate::table::MAX_TABLE_SIZE;
use core::fmt;

use super::round_up_to_power_of_2;

/// Bucket count used when `hash_table_size` is zero.
pub const DEFAULT_HASH_TABLE_SIZE: usize = 8192;

/// Smallest bucket count a segment is created with.
pub const MIN_HASH_TABLE_SIZE: usize = 256;

/// Slots per bucket used when `bucket_length` is zero.
pub const DEFAULT_BUCKET_LENGTH: usize = 8;

/// Load factor used when `load_factor` is zero or negative.
pub const DEFAULT_LOAD_FACTOR: f32 = 0.75;

/// Configuration for a [`Segment`](crate::Segment).
///
/// # Fields
///
/// - `hash_table_size`: initial bucket count. Zero selects 8192; smaller
///   values are raised to 256; the result is rounded up to a power of two.
/// - `bucket_length`: slots per bucket. Zero selects 8; rounded up to a
///   power of two.
/// - `load_factor`: growth threshold as a fraction of the bucket count. Zero
///   or negative selects 0.75; values of 1 or more are rejected.
///
/// # Examples
///
/// ```
/// use ohc_segment::config::SegmentConfig;
///
/// let config = SegmentConfig {
///     hash_table_size: 300,
///     bucket_length: 3,
///     load_factor: 0.5,
/// };
/// assert_eq!(config.buckets(), 512);
/// assert_eq!(config.entries_per_bucket(), 4);
/// assert_eq!(config.checked_load_factor(), Ok(0.5));
/// ```
#[derive(Clone, Copy, PartialEq)]
pub struct SegmentConfig {
    /// Initial number of buckets.
    pub hash_table_size: usize,
    /// Number of slots per bucket.
    pub bucket_length: usize,
    /// Fraction of the bucket count that triggers growth.
    pub load_factor: f32,
}

impl SegmentConfig {
    /// Returns the normalized initial bucket count.
    pub fn buckets(&self) -> usize {
        let hts = match self.hash_table_size {
            0 => DEFAULT_HASH_TABLE_SIZE,
            n => n.max(MIN_HASH_TABLE_SIZE),
        };
        round_up_to_power_of_2(hts, MAX_TABLE_SIZE)
    }

    /// Returns the normalized number of slots per bucket.
    pub fn entries_per_bucket(&self) -> usize {
        let bl = match self.bucket_length {
            0 => DEFAULT_BUCKET_LENGTH,
            n => n,
        };
        round_up_to_power_of_2(bl, MAX_TABLE_SIZE)
    }

    /// Returns the effective load factor, or an error if it is out of range.
    pub fn checked_load_factor(&self) -> CacheResult<f32> {
        let lf = self.load_factor;
        if lf.is_nan() {
            return Err(CacheError::InvalidConfig("load factor must be a number"));
        }
        if lf <= 0.0 {
            return Ok(DEFAULT_LOAD_FACTOR);
        }
        if lf >= 1.0 {
            return Err(CacheError::InvalidConfig("load factor must be below 1"));
        }
        Ok(lf)
    }
}

impl Default for SegmentConfig {
    fn default() -> Self {
        SegmentConfig {
            hash_table_size: DEFAULT_HASH_TABLE_SIZE,
            bucket_length: DEFAULT_BUCKET_LENGTH,
            load_factor: DEFAULT_LOAD_FACTOR,
        }
    }
}

impl fmt::Debug for SegmentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentConfig")
            .field("hash_table_size", &self.hash_table_size)
            .field("bucket_length", &self.bucket_length)
            .field("load_factor", &self.load_factor)
            .finish()
    }
}
