//! Multi-Segment Off-Heap Cache
//!
//! [`OffHeapCache`] partitions keys across independently locked
//! [`Segment`]s that share one byte budget. It has no cache logic of its own:
//! every keyed operation hashes the key once and forwards to exactly one
//! segment.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           OffHeapCache                               │
//! │                                                                      │
//! │  hash(key) ─┬─ high bits ──▶ segment                                 │
//! │             └─ low bits  ──▶ bucket inside the segment               │
//! │                                                                      │
//! │  ┌──────────────┐ ┌──────────────┐     ┌──────────────┐              │
//! │  │  Segment 0   │ │  Segment 1   │ ... │  Segment N-1 │              │
//! │  │    Mutex     │ │    Mutex     │     │    Mutex     │              │
//! │  │    Table     │ │    Table     │     │    Table     │              │
//! │  └──────┬───────┘ └──────┬───────┘     └──────┬───────┘              │
//! │         └────────────────┴──── FreeCapacity ──┘                      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! LRU ordering is per segment. An entry may be evicted from one segment
//! while another segment holds entries that were touched less recently.
//!
//! # Example
//!
//! ```
//! use ohc_segment::config::OffHeapCacheConfig;
//! use ohc_segment::OffHeapCache;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let config = OffHeapCacheConfig {
//!     capacity: 4 * 1024 * 1024,
//!     segments: 4,
//!     ..OffHeapCacheConfig::default()
//! };
//! let cache = Arc::new(OffHeapCache::init(config, None).unwrap());
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|t| {
//!         let cache = Arc::clone(&cache);
//!         thread::spawn(move || {
//!             for i in 0..100u32 {
//!                 let key = format!("key-{t}-{i}");
//!                 cache.put(key.as_bytes(), &i.to_be_bytes()).unwrap();
//!             }
//!         })
//!     })
//!     .collect();
//! for h in handles {
//!     h.join().unwrap();
//! }
//!
//! assert_eq!(cache.len(), 400);
//! ```

use crate::capacity::FreeCapacity;
use crate::config::OffHeapCacheConfig;
use crate::entry::{EntryBuf, EntryRef, KeyBuffer};
use crate::error::{CacheError, CacheResult};
use crate::metrics::{CacheMetrics, CacheStats, SegmentMetrics};
use crate::segment::{PutMode, PutRejected, Segment};
use core::fmt;
use core::hash::BuildHasher;
use std::collections::BTreeMap;

#[cfg(feature = "hashbrown")]
use hashbrown::DefaultHashBuilder;

#[cfg(not(feature = "hashbrown"))]
use std::collections::hash_map::RandomState as DefaultHashBuilder;

/// A thread-safe off-heap cache with segmented storage.
///
/// Keys and values are byte strings. Callers that serialize their own types
/// can allocate an entry with [`new_entry`](Self::new_entry), fill it through
/// its writers and link it with [`put_entry`](Self::put_entry).
///
/// # Type Parameters
///
/// - `S`: Hash builder type. Defaults to `DefaultHashBuilder`.
pub struct OffHeapCache<S = DefaultHashBuilder> {
    segments: Box<[Segment]>,
    segment_shift: u32,
    capacity: u64,
    free_capacity: FreeCapacity,
    hash_builder: S,
}

impl OffHeapCache<DefaultHashBuilder> {
    /// Creates a cache from a configuration with an optional hasher.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfig`] for an invalid segment count or
    /// load factor, and [`CacheError::OutOfMemory`] if a segment table
    /// cannot be allocated.
    pub fn init(
        config: OffHeapCacheConfig,
        hasher: Option<DefaultHashBuilder>,
    ) -> CacheResult<Self> {
        Self::init_with_hasher(config, hasher.unwrap_or_default())
    }
}

impl<S: BuildHasher> OffHeapCache<S> {
    /// Creates a cache with a custom hash builder.
    pub fn init_with_hasher(config: OffHeapCacheConfig, hash_builder: S) -> CacheResult<Self> {
        let segment_count = config.checked_segments()?;
        let free_capacity = FreeCapacity::new(config.capacity);

        let segments = (0..segment_count)
            .map(|_| Segment::init(config.segment, free_capacity.clone()))
            .collect::<CacheResult<Vec<_>>>()?;

        Ok(OffHeapCache {
            segments: segments.into_boxed_slice(),
            segment_shift: 64 - segment_count.trailing_zeros(),
            capacity: config.capacity,
            free_capacity,
            hash_builder,
        })
    }

    /// Hashes serialized key bytes the way this cache does.
    #[inline]
    pub fn hash(&self, key: &[u8]) -> u64 {
        self.hash_builder.hash_one(key)
    }

    /// Builds a lookup key for serialized key bytes.
    #[inline]
    pub fn key_buffer<'a>(&self, key: &'a [u8]) -> KeyBuffer<'a> {
        KeyBuffer::new(key, self.hash(key))
    }

    #[inline]
    fn segment_for(&self, hash: u64) -> &Segment {
        // The high bits pick the segment; a segment uses the low bits for
        // its buckets.
        let index = hash.checked_shr(self.segment_shift).unwrap_or(0) as usize;
        &self.segments[index]
    }

    /// Allocates an entry for `key` with a zero-filled value region of
    /// `value_len` bytes, ready to be filled and passed to
    /// [`put_entry`](Self::put_entry).
    pub fn new_entry(&self, key: &[u8], value_len: usize) -> CacheResult<EntryBuf> {
        let mut entry = EntryBuf::allocate(self.hash(key), key.len(), value_len)?;
        entry.key_mut().copy_from_slice(key);
        Ok(entry)
    }

    /// Returns a counted handle to the entry for `key`.
    pub fn get(&self, key: &[u8]) -> Option<EntryRef> {
        let key = self.key_buffer(key);
        self.segment_for(key.hash()).get(&key)
    }

    /// Copies the value for `key` out of the cache.
    pub fn get_value(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.get(key).map(|entry| entry.value().to_vec())
    }

    /// Returns `true` if `key` is present. Counts as an access.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        let key = self.key_buffer(key);
        self.segment_for(key.hash()).contains_key(&key)
    }

    /// Links a prepared entry. The entry's hash must come from
    /// [`hash`](Self::hash) (as it does for [`new_entry`](Self::new_entry)).
    pub fn put_entry(&self, entry: EntryBuf, mode: PutMode<'_>) -> Result<(), PutRejected> {
        self.segment_for(entry.hash()).put_entry(entry, mode)
    }

    fn put_with_mode(&self, key: &[u8], value: &[u8], mode: PutMode<'_>) -> CacheResult<()> {
        let entry = EntryBuf::from_parts(self.hash(key), key, value)?;
        self.put_entry(entry, mode)?;
        Ok(())
    }

    /// Inserts or replaces the value for `key`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> CacheResult<()> {
        self.put_with_mode(key, value, PutMode::Upsert)
    }

    /// Inserts the value only if `key` is absent.
    pub fn put_if_absent(&self, key: &[u8], value: &[u8]) -> CacheResult<()> {
        self.put_with_mode(key, value, PutMode::IfAbsent)
    }

    /// Replaces the value for `key` only if it currently equals `old`.
    pub fn replace(&self, key: &[u8], old: &[u8], value: &[u8]) -> CacheResult<()> {
        self.put_with_mode(key, value, PutMode::ReplaceIf(old))
    }

    /// Removes `key`. Returns `true` if it was present.
    pub fn remove(&self, key: &[u8]) -> bool {
        let key = self.key_buffer(key);
        self.segment_for(key.hash()).remove(&key)
    }

    /// Removes exactly the entry behind `entry`, if it is still linked.
    pub fn remove_entry(&self, entry: &EntryRef) -> bool {
        self.segment_for(entry.hash()).remove_entry(entry)
    }

    /// Removes all entries from all segments, one segment at a time.
    pub fn clear(&self) {
        for segment in self.segments.iter() {
            segment.clear();
        }
    }

    /// Returns up to `n` recently used entries, taking an equal share from
    /// each segment. Ordering across segments is not meaningful.
    pub fn hot_n(&self, n: usize) -> Vec<EntryRef> {
        let per_segment = n.div_ceil(self.segments.len());
        let mut hot: Vec<EntryRef> = self
            .segments
            .iter()
            .flat_map(|segment| segment.hot_n(per_segment))
            .collect();
        hot.truncate(n);
        hot
    }

    /// Returns referenced handles to every entry, segment by segment.
    pub fn entries(&self) -> Vec<EntryRef> {
        self.segments
            .iter()
            .flat_map(|segment| segment.entries(0, usize::MAX))
            .collect()
    }

    /// Returns the total number of entries across all segments.
    ///
    /// Segments are locked one after another, so the value may be stale
    /// under concurrent modification.
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.size() as usize).sum()
    }

    /// Returns `true` if the cache contains no entries.
    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.size() == 0)
    }

    /// Returns the configured byte budget.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns the free bytes of the shared budget.
    pub fn free_capacity(&self) -> i64 {
        self.free_capacity.snapshot()
    }

    /// Returns the number of segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Returns the segments, for per-segment inspection.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns statistics summed over all segments.
    pub fn stats(&self) -> CacheStats {
        let mut counters = SegmentMetrics::default();
        let mut segment_sizes = Vec::with_capacity(self.segments.len());
        for segment in self.segments.iter() {
            let stats = segment.stats();
            counters.accumulate(&stats.counters);
            segment_sizes.push(stats.size);
        }
        CacheStats {
            capacity: self.capacity,
            free: self.free_capacity.snapshot(),
            counters,
            segment_sizes,
        }
    }

    /// Zeroes the operation counters of all segments.
    pub fn reset_statistics(&self) {
        for segment in self.segments.iter() {
            segment.reset_statistics();
        }
    }
}

impl<S: BuildHasher> CacheMetrics for OffHeapCache<S> {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.stats().to_btreemap()
    }

    fn algorithm_name(&self) -> &'static str {
        "OffHeapCache"
    }
}

impl<S: BuildHasher> fmt::Debug for OffHeapCache<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffHeapCache")
            .field("segment_count", &self.segments.len())
            .field("capacity", &self.capacity)
            .field("free_capacity", &self.free_capacity.snapshot())
            .field("total_len", &self.len())
            .finish()
    }
}

impl From<PutRejected> for CacheError {
    fn from(rejected: PutRejected) -> Self {
        rejected.reason()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmentConfig;
    use crate::entry::entry_size;
    use std::sync::Arc;
    use std::thread;

    fn make_config(capacity: u64, segments: usize) -> OffHeapCacheConfig {
        OffHeapCacheConfig {
            capacity,
            segments,
            segment: SegmentConfig {
                hash_table_size: 256,
                ..SegmentConfig::default()
            },
        }
    }

    #[test]
    fn test_basic_operations() {
        let cache = OffHeapCache::init(make_config(1 << 20, 16), None).unwrap();

        assert!(cache.is_empty());
        assert_eq!(cache.len(), 0);

        cache.put(b"a", b"1").unwrap();
        cache.put(b"b", b"2").unwrap();
        cache.put(b"c", b"3").unwrap();

        assert_eq!(cache.len(), 3);
        assert!(!cache.is_empty());

        assert_eq!(cache.get_value(b"a"), Some(b"1".to_vec()));
        assert_eq!(cache.get_value(b"b"), Some(b"2".to_vec()));
        assert_eq!(cache.get_value(b"c"), Some(b"3".to_vec()));
        assert_eq!(cache.get_value(b"d"), None);
    }

    #[test]
    fn test_remove() {
        let cache = OffHeapCache::init(make_config(1 << 20, 16), None).unwrap();
        cache.put(b"a", b"1").unwrap();
        cache.put(b"b", b"2").unwrap();

        assert!(cache.remove(b"a"));
        assert_eq!(cache.get_value(b"a"), None);
        assert_eq!(cache.len(), 1);
        assert!(!cache.remove(b"nonexistent"));
    }

    #[test]
    fn test_clear_returns_capacity() {
        let cache = OffHeapCache::init(make_config(1 << 20, 16), None).unwrap();
        cache.put(b"a", b"1").unwrap();
        cache.put(b"b", b"2").unwrap();
        cache.put(b"c", b"3").unwrap();
        assert_eq!(cache.free_capacity(), (1 << 20) - 3 * entry_size(1, 1) as i64);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.free_capacity(), 1 << 20);
    }

    #[test]
    fn test_conditional_puts() {
        let cache = OffHeapCache::init(make_config(1 << 20, 4), None).unwrap();
        cache.put_if_absent(b"k", b"v1").unwrap();
        assert_eq!(cache.put_if_absent(b"k", b"v2"), Err(CacheError::KeyExists));
        assert_eq!(cache.replace(b"k", b"nope", b"v3"), Err(CacheError::ValueMismatch));
        cache.replace(b"k", b"v1", b"v3").unwrap();
        assert_eq!(cache.get_value(b"k"), Some(b"v3".to_vec()));
    }

    #[test]
    fn test_new_entry_with_writer() {
        let cache = OffHeapCache::init(make_config(1 << 20, 4), None).unwrap();
        let mut entry = cache.new_entry(b"user:1", 12).unwrap();
        {
            let mut w = entry.value_writer();
            w.write_i32(7).unwrap();
            w.write_i64(-1).unwrap();
        }
        cache.put_entry(entry, PutMode::Upsert).unwrap();

        let found = cache.get(b"user:1").unwrap();
        let mut r = found.value_reader();
        assert_eq!(r.read_i32().unwrap(), 7);
        assert_eq!(r.read_i64().unwrap(), -1);
        assert_eq!(r.available(), 0);
    }

    #[test]
    fn test_contains_key() {
        let cache = OffHeapCache::init(make_config(1 << 20, 16), None).unwrap();
        cache.put(b"exists", b"1").unwrap();
        assert!(cache.contains_key(b"exists"));
        assert!(!cache.contains_key(b"missing"));
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(OffHeapCache::init(make_config(1 << 24, 16), None).unwrap());
        let num_threads = 8;
        let ops_per_thread: usize = 1000;

        let handles: Vec<_> = (0..num_threads)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..ops_per_thread {
                        let key = format!("thread_{t}_key_{i}");
                        cache.put(key.as_bytes(), &i.to_be_bytes()).unwrap();
                        assert!(cache.get(key.as_bytes()).is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), num_threads * ops_per_thread);
    }

    #[test]
    fn test_segment_count() {
        let cache = OffHeapCache::init(make_config(1 << 20, 8), None).unwrap();
        assert_eq!(cache.segment_count(), 8);

        let rounded = OffHeapCache::init(make_config(1 << 20, 5), None).unwrap();
        assert_eq!(rounded.segment_count(), 8);

        let single = OffHeapCache::init(make_config(1 << 20, 1), None).unwrap();
        single.put(b"k", b"v").unwrap();
        assert_eq!(single.get_value(b"k"), Some(b"v".to_vec()));
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            OffHeapCache::init(make_config(1 << 20, 0), None),
            Err(CacheError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_eviction_on_capacity() {
        let one = entry_size(8, 32) as u64;
        let cache = OffHeapCache::init(make_config(10 * one, 1), None).unwrap();
        for i in 0..20u64 {
            cache.put(&i.to_be_bytes(), &[0; 32]).unwrap();
        }
        assert_eq!(cache.len(), 10);
        assert_eq!(cache.stats().counters.evicted_entries, 10);
        assert!(cache.contains_key(&19u64.to_be_bytes()));
        assert!(!cache.contains_key(&0u64.to_be_bytes()));
    }

    #[test]
    fn test_update_existing_key() {
        let cache = OffHeapCache::init(make_config(1 << 20, 16), None).unwrap();
        cache.put(b"key", b"1").unwrap();
        cache.put(b"key", b"2").unwrap();
        assert_eq!(cache.get_value(b"key"), Some(b"2".to_vec()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_hot_n_and_entries() {
        let cache = OffHeapCache::init(make_config(1 << 20, 4), None).unwrap();
        for i in 0..20u32 {
            cache.put(&i.to_be_bytes(), b"v").unwrap();
        }
        assert_eq!(cache.entries().len(), 20);
        assert!(cache.hot_n(5).len() <= 5);
        assert_eq!(cache.hot_n(100).len(), 20);
        assert!(cache.hot_n(0).is_empty());
    }

    #[test]
    fn test_stats_and_metrics() {
        let cache = OffHeapCache::init(make_config(1 << 20, 4), None).unwrap();
        cache.put(b"a", b"1").unwrap();
        cache.put(b"a", b"2").unwrap();
        cache.get(b"a");
        cache.get(b"zzz");

        let stats = cache.stats();
        assert_eq!(stats.size(), 1);
        assert_eq!(stats.segment_sizes.len(), 4);
        assert_eq!(stats.counters.put_add_count, 1);
        assert_eq!(stats.counters.put_replace_count, 1);
        assert_eq!(stats.counters.hit_count, 1);
        assert_eq!(stats.counters.miss_count, 1);
        assert_eq!(stats.capacity, 1 << 20);

        let metrics = cache.metrics();
        assert_eq!(metrics["size"], 1.0);
        assert_eq!(cache.algorithm_name(), "OffHeapCache");

        cache.reset_statistics();
        assert_eq!(cache.stats().counters, SegmentMetrics::default());
    }

    #[test]
    fn test_init_with_hasher() {
        let hasher = DefaultHashBuilder::default();
        let cache = OffHeapCache::init_with_hasher(make_config(1 << 20, 4), hasher).unwrap();
        cache.put(b"test", b"42").unwrap();
        assert_eq!(cache.get_value(b"test"), Some(b"42".to_vec()));
        assert_eq!(cache.segment_count(), 4);
    }

    #[test]
    fn test_remove_entry_through_handle() {
        let cache = OffHeapCache::init(make_config(1 << 20, 4), None).unwrap();
        cache.put(b"k", b"v").unwrap();
        let handle = cache.get(b"k").unwrap();
        assert!(cache.remove_entry(&handle));
        assert!(!cache.contains_key(b"k"));
        assert_eq!(handle.value(), b"v");
    }
}
