#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Code Reference
//!
//! ## Layers
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ OffHeapCache      routes keys to segments, aggregates stats  │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Segment           mutex, put/get/remove/evict/rehash         │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Table             bucket slots + LRU cells in one allocation │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Entry             header + key + value in one allocation     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Reference
//!
//! | Type | Role |
//! |------|------|
//! | [`OffHeapCache`] | Thread-safe cache over N segments |
//! | [`Segment`] | Single lock domain with its own table |
//! | [`EntryBuf`] | Entry being built, not yet linked |
//! | [`EntryRef`] | Counted handle to a linked (or recently unlinked) entry |
//! | [`KeyBuffer`] | Serialized key bytes plus hash, for lookups |
//! | [`FreeCapacity`] | Byte budget shared by segments |
//! | [`io::EntryReader`] / [`io::EntryWriter`] | Big-endian codecs over entry regions |
//!
//! ## Code Examples
//!
//! ### Byte keys and values
//!
//! ```rust
//! use ohc_segment::config::OffHeapCacheConfig;
//! use ohc_segment::OffHeapCache;
//!
//! let config = OffHeapCacheConfig {
//!     capacity: 1024 * 1024,
//!     segments: 4,
//!     ..OffHeapCacheConfig::default()
//! };
//! let cache = OffHeapCache::init(config, None).unwrap();
//!
//! cache.put(b"apple", b"red").unwrap();
//! assert_eq!(cache.get_value(b"apple"), Some(b"red".to_vec()));
//! assert!(cache.remove(b"apple"));
//! ```
//!
//! ### Serializing into the entry
//!
//! ```rust
//! use ohc_segment::config::OffHeapCacheConfig;
//! use ohc_segment::io::utf_len;
//! use ohc_segment::{OffHeapCache, PutMode};
//!
//! let cache = OffHeapCache::init(OffHeapCacheConfig::default(), None).unwrap();
//!
//! let name = "Zoë";
//! let mut entry = cache.new_entry(b"user:7", 4 + 2 + utf_len(name)).unwrap();
//! {
//!     let mut w = entry.value_writer();
//!     w.write_i32(31).unwrap();
//!     w.write_utf(name).unwrap();
//! }
//! cache.put_entry(entry, PutMode::Upsert).unwrap();
//!
//! let found = cache.get(b"user:7").unwrap();
//! let mut r = found.value_reader();
//! assert_eq!(r.read_i32().unwrap(), 31);
//! assert_eq!(r.read_utf().unwrap(), "Zoë");
//! ```

/// Off-heap entry allocation, layout and reference counting.
///
/// Provides [`EntryBuf`] for building entries, [`EntryRef`] for holding
/// them and [`KeyBuffer`] for looking them up.
pub mod entry;

/// Sequential big-endian readers and writers over entry regions.
pub mod io;

/// Shared free-capacity budget.
pub mod capacity;

/// Error types.
pub mod error;

/// Segment and cache configuration structures.
pub mod config;

/// Bucket table and array-based LRU over one raw allocation.
///
/// **Note**: This module is internal infrastructure. It hands out raw entry
/// addresses whose validity depends on the segment lock.
pub(crate) mod table;

/// Lock-guarded hash map over one table.
pub mod segment;

/// Counters, statistics snapshots and the reporting trait.
pub mod metrics;

/// Multi-segment cache.
pub mod cache;

pub use cache::OffHeapCache;
pub use capacity::FreeCapacity;
pub use entry::{entry_size, EntryBuf, EntryRef, KeyBuffer, ENTRY_HEADER_LEN};
pub use error::{CacheError, CacheResult, DecodeError};
pub use metrics::{CacheMetrics, CacheStats, SegmentMetrics, SegmentStats};
pub use segment::{PutMode, PutRejected, Segment};
pub use table::{BUCKET_ENTRY_LEN, MAX_TABLE_SIZE};
