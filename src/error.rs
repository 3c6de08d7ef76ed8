//! Error types for segment operations and entry codecs.

use thiserror::Error;

/// Errors produced by segment and cache operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Eviction ran out of entries before enough capacity was reclaimed.
    #[error("capacity exhausted")]
    CapacityExhausted,

    /// Every slot of the target bucket is occupied, even after growth.
    #[error("bucket full")]
    BucketFull,

    /// The key is already present (put-if-absent).
    #[error("key already exists")]
    KeyExists,

    /// The stored value differs from the expected one (conditional replace).
    #[error("value mismatch")]
    ValueMismatch,

    /// Raw memory could not be allocated.
    #[error("out of memory")]
    OutOfMemory,

    /// The key or value does not fit the entry header fields.
    #[error("entry too large")]
    EntryTooLarge,

    /// A configuration value is outside its accepted range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Errors produced while decoding or encoding an entry region.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The read or write would run past the end of the region.
    #[error("end of data")]
    EndOfData,

    /// The bytes are not valid modified UTF-8.
    #[error("malformed input around byte {position}: {reason}")]
    Malformed {
        /// Offset into the string payload where decoding stopped.
        position: usize,
        /// Short description of the defect.
        reason: &'static str,
    },

    /// The encoded string does not fit a 16-bit length prefix.
    #[error("encoded string too long: {0} bytes")]
    StringTooLong(usize),
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
