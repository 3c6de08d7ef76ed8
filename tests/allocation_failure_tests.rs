//! Growth Under Allocation Failure
//!
//! A segment whose table cannot grow keeps serving from its current table.
//! Once every LRU cell holds a live entry, fresh inserts are rejected while
//! lookups and replacements keep working, and growth resumes as soon as the
//! allocator recovers.

use ohc_segment::config::SegmentConfig;
use ohc_segment::{CacheError, EntryBuf, FreeCapacity, KeyBuffer, PutMode, Segment};
use std::alloc::{GlobalAlloc, Layout, System};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

/// Allocations above this size fail while `FAIL_LARGE` is set. A 256-bucket
/// table is about 34 KiB; its doubled replacement is about 68 KiB.
const LARGE: usize = 50 * 1024;

static FAIL_LARGE: AtomicBool = AtomicBool::new(false);

struct LimitedAlloc;

fn refuse(size: usize) -> bool {
    FAIL_LARGE.load(Ordering::Relaxed) && size > LARGE
}

// SAFETY: every call is forwarded to `System` unless it is refused, and a
// refused call returns null, which callers must already handle.
unsafe impl GlobalAlloc for LimitedAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if refuse(layout.size()) {
            return ptr::null_mut();
        }
        // SAFETY: forwarded with the caller's layout.
        unsafe { System.alloc(layout) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if refuse(layout.size()) {
            return ptr::null_mut();
        }
        // SAFETY: forwarded with the caller's layout.
        unsafe { System.alloc_zeroed(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: `ptr` came from `System` with this layout.
        unsafe { System.dealloc(ptr, layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if refuse(new_size) {
            return ptr::null_mut();
        }
        // SAFETY: `ptr` came from `System` with this layout.
        unsafe { System.realloc(ptr, layout, new_size) }
    }
}

#[global_allocator]
static GLOBAL: LimitedAlloc = LimitedAlloc;

const BUCKETS: u64 = 256;

fn make_segment() -> Segment {
    let config = SegmentConfig {
        hash_table_size: BUCKETS as usize,
        bucket_length: 8,
        load_factor: 0.75,
    };
    Segment::init(config, FreeCapacity::new(1 << 30)).unwrap()
}

/// Keys hash to themselves, so keys `0..256` land one per bucket.
fn put(segment: &Segment, key: u64, value: &[u8]) -> Result<(), CacheError> {
    let entry = EntryBuf::from_parts(key, &key.to_be_bytes(), value).unwrap();
    segment
        .put_entry(entry, PutMode::Upsert)
        .map_err(|rejected| rejected.reason())
}

fn get_value(segment: &Segment, key: u64) -> Option<Vec<u8>> {
    let bytes = key.to_be_bytes();
    segment
        .get(&KeyBuffer::new(&bytes, key))
        .map(|entry| entry.value().to_vec())
}

#[test]
fn test_failed_growth_fills_lru_then_rejects_fresh_inserts() {
    let segment = make_segment();
    FAIL_LARGE.store(true, Ordering::Relaxed);

    // Growth is attempted past the load-factor threshold and fails every time.
    for key in 0..BUCKETS {
        put(&segment, key, &key.to_be_bytes()).unwrap();
    }
    let stats = segment.stats();
    assert_eq!(stats.size, BUCKETS);
    assert_eq!(stats.hash_table_size, BUCKETS as usize);
    assert_eq!(stats.counters.rehash_count, 0);

    // Every LRU cell is live: a fresh key is rejected even though its bucket
    // has free slots.
    assert_eq!(put(&segment, BUCKETS, b"fresh"), Err(CacheError::BucketFull));
    assert_eq!(segment.size(), BUCKETS);
    assert_eq!(segment.stats().counters.put_fail_count, 1);
    assert_eq!(get_value(&segment, BUCKETS), None);

    // Touching entries of a full LRU array compacts it and keeps everything.
    for round in 0..3 {
        for key in 0..BUCKETS {
            assert_eq!(
                get_value(&segment, key),
                Some(key.to_be_bytes().to_vec()),
                "key {key} lost in round {round}"
            );
        }
    }
    let stats = segment.stats();
    assert_eq!(stats.counters.hit_count, 3 * BUCKETS);
    assert!(stats.counters.lru_compactions > 0);
    assert_eq!(segment.hot_n(usize::MAX).len() as u64, BUCKETS);

    // Replacing an existing key frees its cell first, so it still succeeds.
    put(&segment, 7, b"replaced").unwrap();
    assert_eq!(get_value(&segment, 7), Some(b"replaced".to_vec()));
    assert_eq!(segment.size(), BUCKETS);
    assert_eq!(segment.stats().counters.rehash_count, 0);

    // With the allocator back, the next fresh insert grows the table.
    FAIL_LARGE.store(false, Ordering::Relaxed);
    put(&segment, BUCKETS, b"fresh").unwrap();
    let stats = segment.stats();
    assert_eq!(stats.size, BUCKETS + 1);
    assert_eq!(stats.hash_table_size, 2 * BUCKETS as usize);
    assert_eq!(stats.counters.rehash_count, 1);
    for key in 0..BUCKETS {
        assert!(get_value(&segment, key).is_some());
    }
    assert_eq!(get_value(&segment, BUCKETS), Some(b"fresh".to_vec()));
}
