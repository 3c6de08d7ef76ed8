//! Segment: A Lock-Guarded Off-Heap Hash Map
//!
//! A segment owns one [`Table`](crate::table) and serializes every mutation
//! through its own mutex. Entries displaced by an operation (replaced,
//! evicted, removed or dropped during growth) are collected while the lock
//! is held and released only after it has been dropped, so freeing memory
//! never extends the critical section.
//!
//! # Put Protocol
//!
//! ```text
//! lock
//! ├─ find key in bucket
//! │   ├─ IfAbsent and found        → KeyExists
//! │   ├─ ReplaceIf and value differs → ValueMismatch
//! │   └─ found                      → unlink old, credit its bytes
//! ├─ while credited < needed: unlink eldest   (none left → CapacityExhausted)
//! ├─ fresh key and size ≥ threshold: grow
//! ├─ claim a bucket slot                      (none free → BucketFull)
//! └─ append to LRU
//! unlock
//! publish net capacity delta, release unlinked entries
//! ```
//!
//! A replace that unlinks the old entry and then fails to reclaim enough
//! capacity does not restore it: the key is gone after the failed put.
//!
//! # Capacity Accounting
//!
//! The segment reads the shared [`FreeCapacity`] once per put and works
//! against that local snapshot. The net change is published with a single
//! atomic add after the lock is released, on success and failure alike.

use crate::capacity::FreeCapacity;
use crate::config::SegmentConfig;
use crate::entry::{dereference_all, EntryBuf, EntryRef, KeyBuffer, RawEntry};
use crate::error::{CacheError, CacheResult};
use crate::metrics::{CacheMetrics, SegmentMetrics, SegmentStats};
use crate::table::{Table, MAX_TABLE_SIZE};
use core::fmt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// How a put treats an existing entry for the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode<'a> {
    /// Insert, replacing any existing entry.
    Upsert,
    /// Insert only if the key is absent.
    IfAbsent,
    /// Replace only if the stored value equals the given bytes. A missing
    /// key is inserted.
    ReplaceIf(&'a [u8]),
}

/// A put that did not link its entry.
///
/// Carries the reason and hands the unlinked [`EntryBuf`] back to the
/// caller, who may retry with it or drop it.
#[derive(Debug, Error)]
#[error("put rejected: {reason}")]
pub struct PutRejected {
    reason: CacheError,
    entry: EntryBuf,
}

impl PutRejected {
    /// Returns why the put was rejected.
    #[inline]
    pub fn reason(&self) -> CacheError {
        self.reason
    }

    /// Returns the entry that was not linked.
    #[inline]
    pub fn into_entry(self) -> EntryBuf {
        self.entry
    }
}

struct SegmentInner {
    table: Table,
    size: u64,
    threshold: u64,
    load_factor: f32,
    metrics: SegmentMetrics,
}

impl SegmentInner {
    fn threshold_for(buckets: usize, load_factor: f32) -> u64 {
        (buckets as f64 * f64::from(load_factor)) as u64
    }

    /// Finds a live entry and, on a hit, moves it to the most recently used
    /// end.
    fn touch(&mut self, key: &KeyBuffer<'_>) -> Option<RawEntry> {
        match self.table.find(key.hash(), key.bytes()) {
            Some((_, entry)) => {
                self.table.remove_from_lru(entry);
                if self.table.add_to_lru(entry) {
                    self.record_compaction();
                }
                self.metrics.record_hit();
                Some(entry)
            }
            None => {
                self.metrics.record_miss();
                None
            }
        }
    }

    fn record_compaction(&mut self) {
        self.metrics.record_compaction();
        trace!(
            buckets = self.table.size(),
            size = self.size,
            "compacted LRU array"
        );
    }

    /// Links `entry` under `key`. `free` holds the local capacity snapshot;
    /// every entry unlinked along the way is pushed to `unlinked`.
    fn put(
        &mut self,
        entry: RawEntry,
        key: &[u8],
        mode: PutMode<'_>,
        free: &mut i64,
        unlinked: &mut Vec<RawEntry>,
    ) -> CacheResult<()> {
        let hash = entry.hash();
        let bytes = entry.alloc_len() as i64;

        let mut replaced = false;
        if let Some((off, old)) = self.table.find(hash, key) {
            match mode {
                PutMode::IfAbsent => return Err(CacheError::KeyExists),
                PutMode::ReplaceIf(expected) if !old.value_equals(expected) => {
                    return Err(CacheError::ValueMismatch)
                }
                _ => {}
            }
            self.table.remove_from_table_with_off(old, off);
            self.size -= 1;
            *free += old.alloc_len() as i64;
            unlinked.push(old);
            replaced = true;
        }

        while *free < bytes {
            let Some(eldest) = self.table.remove_eldest() else {
                return Err(CacheError::CapacityExhausted);
            };
            self.size -= 1;
            *free += eldest.alloc_len() as i64;
            self.metrics.record_eviction();
            unlinked.push(eldest);
        }

        if !replaced && self.size >= self.threshold {
            *free += self.rehash(unlinked);
        }

        // Every LRU cell may hold a live entry once growth is capped.
        if self.size as usize >= self.table.size() || !self.table.add_to_table(hash, entry) {
            return Err(CacheError::BucketFull);
        }
        if self.table.add_to_lru(entry) {
            self.record_compaction();
        }
        self.size += 1;
        *free -= bytes;
        self.metrics.record_put(replaced);
        Ok(())
    }

    fn remove_linked(&mut self, entry: RawEntry, off: usize) {
        self.table.remove_from_table_with_off(entry, off);
        self.size -= 1;
        self.metrics.record_remove();
    }

    /// Doubles the bucket count. Entries that do not fit the new table are
    /// pushed to `dropped`; returns their total bytes.
    fn rehash(&mut self, dropped: &mut Vec<RawEntry>) -> i64 {
        let buckets = self.table.size();
        if buckets >= MAX_TABLE_SIZE {
            return 0;
        }
        let new_buckets = buckets * 2;
        let Some(mut table) = Table::create(new_buckets, self.table.entries_per_bucket()) else {
            warn!(
                buckets,
                new_buckets, "unable to allocate table for rehash, keeping current table"
            );
            return 0;
        };

        let mut lost = Vec::new();
        for (hash, entry) in self.table.linked() {
            if !table.add_to_table(hash, entry) {
                lost.push(entry);
            }
        }
        table.copy_lru_from(&self.table);

        let mut freed = 0i64;
        for &entry in &lost {
            table.remove_from_lru(entry);
            self.size -= 1;
            freed += entry.alloc_len() as i64;
        }
        if !lost.is_empty() {
            warn!(
                dropped = lost.len(),
                bytes = freed,
                "entries did not fit the grown table and were dropped"
            );
        }
        dropped.extend(lost);

        self.table = table;
        self.threshold = Self::threshold_for(new_buckets, self.load_factor);
        self.metrics.record_rehash();
        debug!(
            from = buckets,
            to = new_buckets,
            size = self.size,
            "rehashed segment"
        );
        freed
    }

    fn stats(&self) -> SegmentStats {
        SegmentStats {
            size: self.size,
            hash_table_size: self.table.size(),
            load_factor: self.load_factor,
            counters: self.metrics,
        }
    }
}

/// A lock-guarded hash map over off-heap entries.
///
/// Keys are looked up by [`KeyBuffer`] (serialized bytes plus hash); entries
/// are inserted as [`EntryBuf`]s and handed out as counted [`EntryRef`]s.
/// The segment draws from a [`FreeCapacity`] budget that may be shared with
/// other segments.
///
/// # Examples
///
/// ```
/// use ohc_segment::config::SegmentConfig;
/// use ohc_segment::{EntryBuf, FreeCapacity, KeyBuffer, PutMode, Segment};
///
/// let segment = Segment::init(SegmentConfig::default(), FreeCapacity::new(1 << 20)).unwrap();
///
/// let entry = EntryBuf::from_parts(42, b"key", b"value").unwrap();
/// segment.put_entry(entry, PutMode::Upsert).unwrap();
///
/// let found = segment.get(&KeyBuffer::new(b"key", 42)).unwrap();
/// assert_eq!(found.value(), b"value");
/// assert_eq!(segment.size(), 1);
/// ```
pub struct Segment {
    inner: Mutex<SegmentInner>,
    free_capacity: FreeCapacity,
}

impl Segment {
    /// Creates a segment with the given table sizing, drawing from
    /// `free_capacity`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfig`] for an out-of-range load factor
    /// and [`CacheError::OutOfMemory`] if the table cannot be allocated.
    pub fn init(config: SegmentConfig, free_capacity: FreeCapacity) -> CacheResult<Self> {
        let load_factor = config.checked_load_factor()?;
        let buckets = config.buckets();
        let table =
            Table::create(buckets, config.entries_per_bucket()).ok_or(CacheError::OutOfMemory)?;

        Ok(Segment {
            inner: Mutex::new(SegmentInner {
                table,
                size: 0,
                threshold: SegmentInner::threshold_for(buckets, load_factor),
                load_factor,
                metrics: SegmentMetrics::default(),
            }),
            free_capacity,
        })
    }

    /// Looks up `key` and returns a counted handle to its entry.
    ///
    /// A hit moves the entry to the most recently used position.
    pub fn get(&self, key: &KeyBuffer<'_>) -> Option<EntryRef> {
        let mut inner = self.inner.lock();
        let entry = inner.touch(key)?;
        entry.reference();
        // SAFETY: the reference was taken for the caller under the lock.
        Some(unsafe { EntryRef::from_referenced(entry) })
    }

    /// Returns `true` if `key` is present. Counts as an access, like
    /// [`get`](Self::get), but takes no reference.
    pub fn contains_key(&self, key: &KeyBuffer<'_>) -> bool {
        self.inner.lock().touch(key).is_some()
    }

    /// Links `entry`, evicting least recently used entries as needed.
    ///
    /// On success the segment owns the entry. On failure the entry is handed
    /// back inside [`PutRejected`]; entries unlinked before the failure (an
    /// old value being replaced, evicted entries) stay unlinked.
    pub fn put_entry(&self, entry: EntryBuf, mode: PutMode<'_>) -> Result<(), PutRejected> {
        let mut unlinked = Vec::new();
        let (result, delta) = {
            let mut inner = self.inner.lock();
            let snapshot = self.free_capacity.snapshot();
            let mut free = snapshot;
            let result = inner.put(entry.raw(), entry.key(), mode, &mut free, &mut unlinked);
            let result = match result {
                Ok(()) => {
                    // The bucket slot now owns the buffer's reference.
                    let _linked = entry.into_raw();
                    Ok(())
                }
                Err(reason) => {
                    inner.metrics.record_put_fail();
                    debug!(%reason, hash = entry.hash(), size = inner.size, "put rejected");
                    Err(PutRejected { reason, entry })
                }
            };
            (result, free - snapshot)
        };

        self.free_capacity.add(delta);
        // SAFETY: every unlinked entry carries the reference its slot held.
        unsafe { dereference_all(unlinked) };
        result
    }

    /// Removes the entry for `key`. Returns `true` if one was linked.
    pub fn remove(&self, key: &KeyBuffer<'_>) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            let found = inner.table.find(key.hash(), key.bytes());
            if let Some((off, entry)) = found {
                inner.remove_linked(entry, off);
            }
            found.map(|(_, entry)| entry)
        };
        self.release_removed(removed)
    }

    /// Removes exactly the entry behind `entry`, if it is still linked here.
    ///
    /// A newer entry stored under the same key is left alone.
    pub fn remove_entry(&self, entry: &EntryRef) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            let raw = entry.raw();
            let off = inner.table.find_entry(raw);
            if let Some(off) = off {
                inner.remove_linked(raw, off);
            }
            off.map(|_| raw)
        };
        self.release_removed(removed)
    }

    fn release_removed(&self, removed: Option<RawEntry>) -> bool {
        match removed {
            Some(entry) => {
                self.free_capacity.add(entry.alloc_len() as i64);
                // SAFETY: the entry was unlinked and carries its slot's
                // reference.
                unsafe { entry.dereference() };
                true
            }
            None => false,
        }
    }

    /// Unlinks and releases every entry.
    pub fn clear(&self) {
        let entries: Vec<RawEntry> = {
            let mut inner = self.inner.lock();
            let entries = inner.table.linked().map(|(_, entry)| entry).collect();
            inner.size = 0;
            inner.table.clear();
            entries
        };

        let freed: i64 = entries.iter().map(|e| e.alloc_len() as i64).sum();
        self.free_capacity.add(freed);
        // SAFETY: all entries were unlinked by zeroing the table.
        unsafe { dereference_all(entries) };
    }

    /// Doubles the bucket count, unless it is already at its maximum or the
    /// new table cannot be allocated.
    pub fn rehash(&self) {
        let mut dropped = Vec::new();
        let freed = self.inner.lock().rehash(&mut dropped);
        self.free_capacity.add(freed);
        // SAFETY: dropped entries were unlinked during the rehash.
        unsafe { dereference_all(dropped) };
    }

    /// Returns up to `n` of the most recently used entries, most recent
    /// first, each with a reference taken for the caller.
    pub fn hot_n(&self, n: usize) -> Vec<EntryRef> {
        let inner = self.inner.lock();
        inner
            .table
            .fill_hot_n(n)
            .into_iter()
            .map(|entry| {
                entry.reference();
                // SAFETY: referenced for the caller under the lock.
                unsafe { EntryRef::from_referenced(entry) }
            })
            .collect()
    }

    /// Returns referenced handles to every entry in buckets
    /// `first_bucket..first_bucket + bucket_count`. The range is clipped to
    /// the current table.
    pub fn entries(&self, first_bucket: usize, bucket_count: usize) -> Vec<EntryRef> {
        let inner = self.inner.lock();
        let end = first_bucket
            .saturating_add(bucket_count)
            .min(inner.table.size());
        let mut out = Vec::new();
        for bucket in first_bucket..end {
            for slot in inner.table.bucket_at(bucket) {
                if let Some(entry) = slot.entry() {
                    entry.reference();
                    // SAFETY: referenced for the caller under the lock.
                    out.push(unsafe { EntryRef::from_referenced(entry) });
                }
            }
        }
        out
    }

    /// Per-bucket occupancy histogram: element `i` counts the buckets
    /// holding exactly `i` entries.
    pub fn bucket_lengths(&self) -> Vec<u64> {
        self.inner.lock().table.bucket_lengths()
    }

    /// Number of linked entries.
    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    /// Current bucket count.
    pub fn hash_table_size(&self) -> usize {
        self.inner.lock().table.size()
    }

    /// Slots per bucket.
    pub fn entries_per_bucket(&self) -> usize {
        self.inner.lock().table.entries_per_bucket()
    }

    /// Load factor that triggers growth.
    pub fn load_factor(&self) -> f32 {
        self.inner.lock().load_factor
    }

    /// The budget this segment draws from.
    pub fn free_capacity(&self) -> &FreeCapacity {
        &self.free_capacity
    }

    /// Returns a snapshot of size, table geometry and counters.
    pub fn stats(&self) -> SegmentStats {
        self.inner.lock().stats()
    }

    /// Zeroes all operation counters.
    pub fn reset_statistics(&self) {
        self.inner.lock().metrics = SegmentMetrics::default();
    }

    #[cfg(test)]
    pub(crate) fn lru_cursors(&self) -> (usize, usize) {
        self.inner.lock().table.lru_cursors()
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        let entries: Vec<RawEntry> = inner.table.linked().map(|(_, entry)| entry).collect();
        inner.table.clear();
        // SAFETY: the segment is going away; its slots held these references.
        unsafe { dereference_all(entries) };
    }
}

impl CacheMetrics for Segment {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.stats().to_btreemap()
    }

    fn algorithm_name(&self) -> &'static str {
        "Segment"
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Segment")
            .field("size", &inner.size)
            .field("threshold", &inner.threshold)
            .field("table", &inner.table)
            .finish()
    }
}
