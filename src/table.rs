//! Bucket Table and Array-Based LRU
//!
//! A table is a single zeroed allocation split in two regions:
//!
//! ```text
//! ┌──────────────────────────────────────────────┬─────────────────────────┐
//! │ bucket slots: buckets × entries_per_bucket    │ LRU cells: buckets      │
//! │ [entry ptr | hash] [entry ptr | hash] ...     │ [entry ptr] ...         │
//! └──────────────────────────────────────────────┴─────────────────────────┘
//! ```
//!
//! A bucket is a fixed group of sibling slots selected by `hash & mask`;
//! there is no chaining. The LRU region records linked entries in
//! approximate recency order between an *eldest cursor* and a *write
//! cursor*:
//!
//! ```text
//!            eldest                  write
//!              ▼                       ▼
//! [ 0 ][ 0 ][ A ][ 0 ][ B ][ C ][ 0 ][   ][   ]
//!               oldest ──────▶ newest
//! ```
//!
//! New and touched entries are appended at the write cursor. Removing an
//! entry only clears its cell, so holes accumulate; when the write cursor
//! reaches the end of the array, the live cells are slid to the front in
//! order (compaction) and appending resumes. This trades exact ordering for
//! a contiguous array and amortized O(1) maintenance.
//!
//! Slot and cell updates are atomic. Every mutation happens under the owning
//! segment's lock; the atomics keep individual transitions consistent for
//! anybody reading the memory without it.

use crate::entry::{EntryHeader, RawEntry};
use core::mem;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::alloc::{alloc_zeroed, dealloc, Layout};

/// Maximum number of buckets a table can grow to.
pub const MAX_TABLE_SIZE: usize = 1 << 30;

/// Size in bytes of one bucket slot.
pub const BUCKET_ENTRY_LEN: usize = mem::size_of::<BucketSlot>();

#[repr(C)]
pub(crate) struct BucketSlot {
    entry: AtomicPtr<EntryHeader>,
    hash: AtomicU64,
}

impl BucketSlot {
    #[inline]
    pub(crate) fn entry(&self) -> Option<RawEntry> {
        RawEntry::from_ptr(self.entry.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn hash(&self) -> u64 {
        self.hash.load(Ordering::Relaxed)
    }
}

pub(crate) struct Table {
    memory: NonNull<u8>,
    layout: Layout,
    lru_offset: usize,
    mask: usize,
    entries_per_bucket: usize,
    lru_write_target: usize,
    lru_eldest_index: usize,
}

// SAFETY: the table exclusively owns its allocation; shared access only
// touches atomics.
unsafe impl Send for Table {}
// SAFETY: see above.
unsafe impl Sync for Table {}

impl Table {
    /// Allocates a zeroed table. Returns `None` when the allocation fails or
    /// its size overflows.
    pub(crate) fn create(buckets: usize, entries_per_bucket: usize) -> Option<Table> {
        debug_assert!(buckets.is_power_of_two());
        let slots = Layout::array::<BucketSlot>(buckets.checked_mul(entries_per_bucket)?).ok()?;
        let cells = Layout::array::<AtomicPtr<EntryHeader>>(buckets).ok()?;
        let (layout, lru_offset) = slots.extend(cells).ok()?;
        let layout = layout.pad_to_align();

        // SAFETY: the layout is never zero-sized since `buckets >= 1`.
        let memory = NonNull::new(unsafe { alloc_zeroed(layout) })?;

        Some(Table {
            memory,
            layout,
            lru_offset,
            mask: buckets - 1,
            entries_per_bucket,
            lru_write_target: 0,
            lru_eldest_index: 0,
        })
    }

    /// Number of buckets, which is also the number of LRU cells.
    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.mask + 1
    }

    #[inline]
    pub(crate) fn entries_per_bucket(&self) -> usize {
        self.entries_per_bucket
    }

    #[inline]
    fn slots(&self) -> &[BucketSlot] {
        // SAFETY: the slot region starts at offset 0, holds
        // `size * entries_per_bucket` zero-initialized slots, and lives as
        // long as `self`.
        unsafe {
            core::slice::from_raw_parts(
                self.memory.as_ptr().cast::<BucketSlot>(),
                self.size() * self.entries_per_bucket,
            )
        }
    }

    #[inline]
    fn lru(&self) -> &[AtomicPtr<EntryHeader>] {
        // SAFETY: the LRU region starts at `lru_offset`, holds `size` cells,
        // and lives as long as `self`.
        unsafe {
            core::slice::from_raw_parts(
                self.memory
                    .as_ptr()
                    .add(self.lru_offset)
                    .cast::<AtomicPtr<EntryHeader>>(),
                self.size(),
            )
        }
    }

    /// Index of the first slot of the bucket selected by `hash`.
    #[inline]
    pub(crate) fn bucket_offset(&self, hash: u64) -> usize {
        self.bucket_index_offset((hash & self.mask as u64) as usize)
    }

    #[inline]
    fn bucket_index_offset(&self, bucket: usize) -> usize {
        bucket * self.entries_per_bucket
    }

    /// The sibling slots of the bucket selected by `hash`.
    #[inline]
    pub(crate) fn bucket(&self, hash: u64) -> &[BucketSlot] {
        let off = self.bucket_offset(hash);
        &self.slots()[off..off + self.entries_per_bucket]
    }

    /// The sibling slots of bucket number `bucket`.
    #[inline]
    pub(crate) fn bucket_at(&self, bucket: usize) -> &[BucketSlot] {
        let off = self.bucket_index_offset(bucket);
        &self.slots()[off..off + self.entries_per_bucket]
    }

    /// Looks up a live entry by hash and key bytes. Returns its slot index.
    pub(crate) fn find(&self, hash: u64, key: &[u8]) -> Option<(usize, RawEntry)> {
        let off = self.bucket_offset(hash);
        self.bucket(hash)
            .iter()
            .enumerate()
            .find_map(|(idx, slot)| match slot.entry() {
                Some(entry) if slot.hash() == hash && entry.key_equals(key) => {
                    Some((off + idx, entry))
                }
                _ => None,
            })
    }

    /// Looks up the slot holding exactly `entry`.
    pub(crate) fn find_entry(&self, entry: RawEntry) -> Option<usize> {
        let off = self.bucket_offset(entry.hash());
        self.bucket(entry.hash())
            .iter()
            .position(|slot| slot.entry() == Some(entry))
            .map(|idx| off + idx)
    }

    /// Claims the first empty sibling slot of `hash`'s bucket.
    pub(crate) fn add_to_table(&self, hash: u64, entry: RawEntry) -> bool {
        for slot in self.bucket(hash) {
            if slot
                .entry
                .compare_exchange(
                    ptr::null_mut(),
                    entry.as_ptr(),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                slot.hash.store(hash, Ordering::Release);
                return true;
            }
        }
        false
    }

    /// Unlinks `entry` from slot `off` and from its LRU cell.
    ///
    /// # Panics
    ///
    /// Panics if the slot does not hold `entry`.
    pub(crate) fn remove_from_table_with_off(&mut self, entry: RawEntry, off: usize) {
        if self.slots()[off]
            .entry
            .compare_exchange(
                entry.as_ptr(),
                ptr::null_mut(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_err()
        {
            panic!("entry {entry:?} not found in bucket slot {off}");
        }
        self.remove_from_lru(entry);
    }

    /// Unlinks the least recently used entry from both the LRU array and its
    /// bucket, advancing the eldest cursor past it.
    ///
    /// # Panics
    ///
    /// Panics if the entry found in the LRU array is not in its bucket.
    pub(crate) fn remove_eldest(&mut self) -> Option<RawEntry> {
        let mut i = self.lru_eldest_index;
        while i < self.lru_write_target {
            let taken = self.lru()[i].swap(ptr::null_mut(), Ordering::AcqRel);
            if let Some(entry) = RawEntry::from_ptr(taken) {
                self.lru_eldest_index = i + 1;
                let unlinked = self.bucket(entry.hash()).iter().any(|slot| {
                    slot.entry
                        .compare_exchange(
                            entry.as_ptr(),
                            ptr::null_mut(),
                            Ordering::AcqRel,
                            Ordering::Relaxed,
                        )
                        .is_ok()
                });
                if !unlinked {
                    panic!("eldest entry {entry:?} not found in its bucket");
                }
                return Some(entry);
            }
            i += 1;
        }
        self.lru_eldest_index = self.lru_write_target;
        None
    }

    /// Appends `entry` as most recently used. Returns `true` when the array
    /// had to be compacted first.
    ///
    /// # Panics
    ///
    /// Panics if every cell holds a live entry, which callers rule out by
    /// keeping the number of linked entries below the bucket count.
    pub(crate) fn add_to_lru(&mut self, entry: RawEntry) -> bool {
        let capacity = self.size();
        if self.lru_write_target < capacity {
            self.entry_to_lru(entry, self.lru_write_target);
            self.lru_write_target += 1;
            return false;
        }

        // Slide live cells to the front, keeping their order.
        let mut id = 0;
        for is in self.lru_eldest_index..capacity {
            if let Some(live) = RawEntry::from_ptr(self.lru()[is].load(Ordering::Acquire)) {
                if is != id {
                    self.entry_to_lru(live, id);
                }
                id += 1;
            }
        }
        if id == capacity {
            panic!("LRU array full: {capacity} live entries");
        }

        self.entry_to_lru(entry, id);
        id += 1;
        self.lru_write_target = id;
        self.lru_eldest_index = 0;

        for cell in &self.lru()[id..] {
            cell.store(ptr::null_mut(), Ordering::Release);
        }
        true
    }

    #[inline]
    fn entry_to_lru(&self, entry: RawEntry, index: usize) {
        self.lru()[index].store(entry.as_ptr(), Ordering::Release);
        entry.set_lru_index(index);
    }

    /// Clears `entry`'s LRU cell. Cursors move only when the cell sits on a
    /// boundary; this never compacts.
    ///
    /// # Panics
    ///
    /// Panics if the cell recorded in the entry does not hold it.
    pub(crate) fn remove_from_lru(&mut self, entry: RawEntry) {
        let index = entry.lru_index();
        if self.lru()[index]
            .compare_exchange(
                entry.as_ptr(),
                ptr::null_mut(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_err()
        {
            panic!("entry {entry:?} not found in LRU cell {index}");
        }
        if index == self.lru_eldest_index {
            self.lru_eldest_index += 1;
        }
        if index + 1 == self.lru_write_target {
            self.lru_write_target = index;
        }
        // Keep the next append at or after the eldest cursor.
        if self.lru_eldest_index > self.lru_write_target {
            self.lru_eldest_index = self.lru_write_target;
        }
    }

    /// Collects up to `n` entries, most recently used first.
    pub(crate) fn fill_hot_n(&self, n: usize) -> Vec<RawEntry> {
        let lru = self.lru();
        (self.lru_eldest_index..self.lru_write_target)
            .rev()
            .filter_map(|i| RawEntry::from_ptr(lru[i].load(Ordering::Acquire)))
            .take(n)
            .collect()
    }

    /// Copies the LRU cursors and cells of `src` verbatim. `self` must have
    /// at least as many cells as `src`.
    pub(crate) fn copy_lru_from(&mut self, src: &Table) {
        debug_assert!(self.size() >= src.size());
        self.lru_eldest_index = src.lru_eldest_index;
        self.lru_write_target = src.lru_write_target;
        let dst = self.lru();
        for (to, from) in dst.iter().zip(&src.lru()[..src.lru_write_target]) {
            to.store(from.load(Ordering::Acquire), Ordering::Release);
        }
    }

    /// Iterates over `(hash, entry)` for every linked slot.
    pub(crate) fn linked(&self) -> impl Iterator<Item = (u64, RawEntry)> + '_ {
        self.slots()
            .iter()
            .filter_map(|slot| slot.entry().map(|entry| (slot.hash(), entry)))
    }

    /// Per-bucket occupancy histogram: element `i` counts the buckets that
    /// hold exactly `i` entries.
    pub(crate) fn bucket_lengths(&self) -> Vec<u64> {
        let mut histogram = vec![0u64; self.entries_per_bucket + 1];
        for bucket in 0..self.size() {
            let len = self
                .bucket_at(bucket)
                .iter()
                .filter(|slot| slot.entry().is_some())
                .count();
            histogram[len] += 1;
        }
        histogram
    }

    /// Zeroes the whole region, bucket slots and LRU cells alike.
    pub(crate) fn clear(&mut self) {
        // SAFETY: `&mut self` guarantees nobody else reads the region; zero
        // is a valid bit pattern for every slot and cell.
        unsafe { ptr::write_bytes(self.memory.as_ptr(), 0, self.layout.size()) };
        self.lru_write_target = 0;
        self.lru_eldest_index = 0;
    }

    #[cfg(test)]
    pub(crate) fn lru_cursors(&self) -> (usize, usize) {
        (self.lru_eldest_index, self.lru_write_target)
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        // SAFETY: allocated in `create` with exactly this layout.
        unsafe { dealloc(self.memory.as_ptr(), self.layout) };
    }
}

impl core::fmt::Debug for Table {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Table")
            .field("buckets", &self.size())
            .field("entries_per_bucket", &self.entries_per_bucket)
            .field("lru_eldest_index", &self.lru_eldest_index)
            .field("lru_write_target", &self.lru_write_target)
            .finish()
    }
}
