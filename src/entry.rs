//! Off-Heap Hash Entries
//!
//! Every cached key/value pair lives in a single raw allocation obtained from
//! `std::alloc`, outside of any Rust-owned collection. The allocation starts
//! with a fixed header followed by the serialized key and value bytes.
//!
//! # Memory Layout
//!
//! ```text
//! +----------------+
//! |   alloc_len    |  8 bytes - total allocation length
//! +----------------+
//! |      hash      |  8 bytes - precomputed 64-bit key hash
//! +----------------+
//! |    key_len     |  8 bytes - serialized key length
//! +----------------+
//! |   value_len    |  8 bytes - serialized value length
//! +----------------+
//! |   ref_count    |  4 bytes - atomic reference count
//! +----------------+
//! |   lru_index    |  4 bytes - LRU cell index while linked
//! +----------------+
//! |      key       |  key_len bytes, padded to 8
//! +----------------+
//! |     value      |  value_len bytes
//! +----------------+
//! ```
//!
//! # Ownership
//!
//! The reference count is shared by everybody holding the entry:
//!
//! - the bucket slot holding it (one reference while linked),
//! - any [`EntryRef`] handed out by `get`, `hot_n` or a snapshot,
//! - an [`EntryBuf`] that has not been inserted yet.
//!
//! The allocation is freed when the count drops to zero, which can only
//! happen after the entry has been unlinked from its table.

use crate::error::{CacheError, CacheResult};
use crate::io::{EntryReader, EntryWriter};
use core::fmt;
use core::ptr::NonNull;
use core::slice;
use core::sync::atomic::{fence, AtomicU32, Ordering};
use std::alloc::{alloc_zeroed, dealloc, Layout};

/// Length of the fixed entry header in bytes.
pub const ENTRY_HEADER_LEN: usize = 40;

const ENTRY_ALIGN: usize = 8;

/// Rounds `n` up to the next multiple of 8.
#[inline]
pub const fn round_up_to_8(n: usize) -> usize {
    (n + 7) & !7
}

/// Returns the allocation length for an entry with the given key and value
/// lengths. This is the number of bytes a put charges against free capacity.
#[inline]
pub const fn entry_size(key_len: usize, value_len: usize) -> usize {
    ENTRY_HEADER_LEN + round_up_to_8(key_len) + value_len
}

#[repr(C)]
pub(crate) struct EntryHeader {
    alloc_len: u64,
    hash: u64,
    key_len: u64,
    value_len: u64,
    ref_count: AtomicU32,
    lru_index: AtomicU32,
}

const _: () = assert!(core::mem::size_of::<EntryHeader>() == ENTRY_HEADER_LEN);

/// Untracked address of a live entry.
///
/// This is the value stored in bucket slots and LRU cells. It carries no
/// ownership: whoever copies it must know, from the surrounding protocol,
/// that the entry is still referenced.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawEntry(NonNull<EntryHeader>);

// SAFETY: the header fields mutated after construction are atomics, and the
// key/value bytes are only written through an exclusively owned `EntryBuf`.
unsafe impl Send for RawEntry {}
// SAFETY: see above.
unsafe impl Sync for RawEntry {}

impl RawEntry {
    /// Allocates a zeroed entry with a reference count of one.
    fn allocate(hash: u64, key_len: usize, value_len: usize) -> CacheResult<Self> {
        let alloc_len = key_len
            .checked_add(7)
            .map(|n| n & !7)
            .and_then(|n| n.checked_add(ENTRY_HEADER_LEN))
            .and_then(|n| n.checked_add(value_len))
            .ok_or(CacheError::EntryTooLarge)?;
        let layout = Layout::from_size_align(alloc_len, ENTRY_ALIGN)
            .map_err(|_| CacheError::EntryTooLarge)?;

        // SAFETY: the layout has a non-zero size (the header alone is 40 bytes).
        let ptr = unsafe { alloc_zeroed(layout) }.cast::<EntryHeader>();
        let ptr = NonNull::new(ptr).ok_or(CacheError::OutOfMemory)?;

        // SAFETY: freshly allocated, properly aligned and large enough for
        // the header.
        unsafe {
            ptr.as_ptr().write(EntryHeader {
                alloc_len: alloc_len as u64,
                hash,
                key_len: key_len as u64,
                value_len: value_len as u64,
                ref_count: AtomicU32::new(1),
                lru_index: AtomicU32::new(0),
            });
        }
        Ok(RawEntry(ptr))
    }

    #[inline]
    pub(crate) fn from_ptr(ptr: *mut EntryHeader) -> Option<Self> {
        NonNull::new(ptr).map(RawEntry)
    }

    #[inline]
    pub(crate) fn as_ptr(self) -> *mut EntryHeader {
        self.0.as_ptr()
    }

    #[inline]
    fn header(&self) -> &EntryHeader {
        // SAFETY: a `RawEntry` is only constructed for live allocations and
        // only dereferenced while the caller holds (or the table holds) a
        // reference.
        unsafe { self.0.as_ref() }
    }

    #[inline]
    pub(crate) fn alloc_len(self) -> u64 {
        self.header().alloc_len
    }

    #[inline]
    pub(crate) fn hash(self) -> u64 {
        self.header().hash
    }

    #[inline]
    pub(crate) fn key_len(self) -> usize {
        self.header().key_len as usize
    }

    #[inline]
    pub(crate) fn value_len(self) -> usize {
        self.header().value_len as usize
    }

    #[inline]
    pub(crate) fn lru_index(self) -> usize {
        self.header().lru_index.load(Ordering::Relaxed) as usize
    }

    #[inline]
    pub(crate) fn set_lru_index(self, index: usize) {
        // The LRU array is sized to the bucket count, which is capped at 2^30.
        self.header()
            .lru_index
            .store(index as u32, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn ref_count(self) -> u32 {
        self.header().ref_count.load(Ordering::Acquire)
    }

    #[inline]
    fn data_ptr(self) -> *mut u8 {
        // SAFETY: the data region starts right after the header, inside the
        // same allocation.
        unsafe { self.0.as_ptr().cast::<u8>().add(ENTRY_HEADER_LEN) }
    }

    #[inline]
    fn value_offset(self) -> usize {
        round_up_to_8(self.key_len())
    }

    /// # Safety
    ///
    /// The entry must stay alive for `'a`.
    #[inline]
    pub(crate) unsafe fn key<'a>(self) -> &'a [u8] {
        // SAFETY: the key region lies within the allocation and was zeroed
        // at allocation time, so it is always initialized.
        unsafe { slice::from_raw_parts(self.data_ptr(), self.key_len()) }
    }

    /// # Safety
    ///
    /// The entry must stay alive for `'a`.
    #[inline]
    pub(crate) unsafe fn value<'a>(self) -> &'a [u8] {
        // SAFETY: as for `key`.
        unsafe {
            slice::from_raw_parts(self.data_ptr().add(self.value_offset()), self.value_len())
        }
    }

    /// Byte-exact key comparison against a lookup key.
    #[inline]
    pub(crate) fn key_equals(self, key: &[u8]) -> bool {
        // SAFETY: callers only compare entries that are linked (and thus
        // referenced by the table) while holding the segment lock.
        self.key_len() == key.len() && unsafe { self.key() } == key
    }

    /// Byte-exact value comparison against an expected value.
    #[inline]
    pub(crate) fn value_equals(self, value: &[u8]) -> bool {
        // SAFETY: as for `key_equals`.
        self.value_len() == value.len() && unsafe { self.value() } == value
    }

    /// Takes one more reference on the entry.
    #[inline]
    pub(crate) fn reference(self) {
        self.header().ref_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Releases one reference, freeing the allocation when it was the last.
    ///
    /// # Safety
    ///
    /// The caller must own the reference it releases and must not use this
    /// `RawEntry` afterwards unless it still owns another reference.
    pub(crate) unsafe fn dereference(self) {
        let previous = self.header().ref_count.fetch_sub(1, Ordering::Release);
        if previous == 1 {
            fence(Ordering::Acquire);
            let alloc_len = self.alloc_len() as usize;
            // SAFETY: the layout matches the one used in `allocate`, and the
            // count reached zero so nobody else can observe the entry.
            unsafe {
                dealloc(
                    self.0.as_ptr().cast::<u8>(),
                    Layout::from_size_align_unchecked(alloc_len, ENTRY_ALIGN),
                );
            }
        } else if previous == 0 {
            panic!("entry {:p} dereferenced with a zero reference count", self.0);
        }
    }
}

impl fmt::Debug for RawEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RawEntry").field(&self.0).finish()
    }
}

/// A freshly allocated entry that has not been inserted yet.
///
/// The buffer owns the entry's only reference. Serializers fill the key and
/// value regions through [`key_mut`](Self::key_mut)/[`value_mut`](Self::value_mut)
/// or the sequential [`EntryWriter`]s, then hand the buffer to a segment.
/// A rejected put returns the buffer to the caller; dropping it frees the
/// memory.
///
/// # Examples
///
/// ```
/// use ohc_segment::EntryBuf;
///
/// let mut buf = EntryBuf::allocate(0xfeed, 3, 5).unwrap();
/// buf.key_mut().copy_from_slice(b"abc");
/// buf.value_writer().write_bytes(b"hello").unwrap();
/// assert_eq!(buf.key(), b"abc");
/// assert_eq!(buf.value(), b"hello");
/// assert_eq!(buf.alloc_len(), 40 + 8 + 5);
/// ```
pub struct EntryBuf {
    raw: RawEntry,
}

impl EntryBuf {
    /// Allocates an entry for a key and value of the given lengths.
    ///
    /// The key and value regions are zero-filled.
    pub fn allocate(hash: u64, key_len: usize, value_len: usize) -> CacheResult<Self> {
        RawEntry::allocate(hash, key_len, value_len).map(|raw| EntryBuf { raw })
    }

    /// Allocates an entry and copies `key` and `value` into it.
    pub fn from_parts(hash: u64, key: &[u8], value: &[u8]) -> CacheResult<Self> {
        let mut buf = Self::allocate(hash, key.len(), value.len())?;
        buf.key_mut().copy_from_slice(key);
        buf.value_mut().copy_from_slice(value);
        Ok(buf)
    }

    /// Returns the precomputed key hash.
    #[inline]
    pub fn hash(&self) -> u64 {
        self.raw.hash()
    }

    /// Returns the total allocation length charged against free capacity.
    #[inline]
    pub fn alloc_len(&self) -> u64 {
        self.raw.alloc_len()
    }

    /// Returns the key bytes.
    #[inline]
    pub fn key(&self) -> &[u8] {
        // SAFETY: the buffer owns a reference for as long as `self` lives.
        unsafe { self.raw.key() }
    }

    /// Returns the value bytes.
    #[inline]
    pub fn value(&self) -> &[u8] {
        // SAFETY: as for `key`.
        unsafe { self.raw.value() }
    }

    /// Returns the key region for writing.
    #[inline]
    pub fn key_mut(&mut self) -> &mut [u8] {
        // SAFETY: an `EntryBuf` is never shared before it is consumed by a
        // put, so this is the only access to the key region.
        unsafe { slice::from_raw_parts_mut(self.raw.data_ptr(), self.raw.key_len()) }
    }

    /// Returns the value region for writing.
    #[inline]
    pub fn value_mut(&mut self) -> &mut [u8] {
        let offset = self.raw.value_offset();
        // SAFETY: as for `key_mut`; the value region does not overlap the key.
        unsafe {
            slice::from_raw_parts_mut(self.raw.data_ptr().add(offset), self.raw.value_len())
        }
    }

    /// Returns a sequential writer over the key region.
    pub fn key_writer(&mut self) -> EntryWriter<'_> {
        EntryWriter::new(self.key_mut())
    }

    /// Returns a sequential writer over the value region.
    pub fn value_writer(&mut self) -> EntryWriter<'_> {
        EntryWriter::new(self.value_mut())
    }

    #[inline]
    pub(crate) fn raw(&self) -> RawEntry {
        self.raw
    }

    /// Gives up ownership of the reference without releasing it.
    #[inline]
    pub(crate) fn into_raw(self) -> RawEntry {
        let raw = self.raw;
        core::mem::forget(self);
        raw
    }
}

impl Drop for EntryBuf {
    fn drop(&mut self) {
        // SAFETY: the buffer owns exactly one reference.
        unsafe { self.raw.dereference() }
    }
}

impl fmt::Debug for EntryBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryBuf")
            .field("hash", &self.hash())
            .field("alloc_len", &self.alloc_len())
            .field("key_len", &self.raw.key_len())
            .field("value_len", &self.raw.value_len())
            .finish()
    }
}

/// A counted handle to a cached entry.
///
/// Handles are returned by lookups and snapshots with a reference already
/// taken. The entry stays readable for as long as the handle lives, even if
/// it is evicted, replaced or removed in the meantime. Dropping the handle
/// releases the reference.
pub struct EntryRef {
    raw: RawEntry,
}

impl EntryRef {
    /// Wraps an entry whose reference has already been taken for the caller.
    ///
    /// # Safety
    ///
    /// The caller must transfer ownership of exactly one reference.
    #[inline]
    pub(crate) unsafe fn from_referenced(raw: RawEntry) -> Self {
        EntryRef { raw }
    }

    /// Returns the precomputed key hash.
    #[inline]
    pub fn hash(&self) -> u64 {
        self.raw.hash()
    }

    /// Returns the total allocation length of the entry.
    #[inline]
    pub fn alloc_len(&self) -> u64 {
        self.raw.alloc_len()
    }

    /// Returns the key bytes.
    #[inline]
    pub fn key(&self) -> &[u8] {
        // SAFETY: the handle owns a reference for as long as `self` lives.
        unsafe { self.raw.key() }
    }

    /// Returns the value bytes.
    #[inline]
    pub fn value(&self) -> &[u8] {
        // SAFETY: as for `key`.
        unsafe { self.raw.value() }
    }

    /// Returns a deserialization reader over the key region.
    pub fn key_reader(&self) -> EntryReader<'_> {
        EntryReader::new(self.key())
    }

    /// Returns a deserialization reader over the value region.
    pub fn value_reader(&self) -> EntryReader<'_> {
        EntryReader::new(self.value())
    }

    /// Returns the current reference count, including this handle's.
    ///
    /// Intended for diagnostics; the value may be stale as soon as it is read.
    #[inline]
    pub fn ref_count(&self) -> u32 {
        self.raw.ref_count()
    }

    /// Returns `true` if both handles point to the same allocation.
    #[inline]
    pub fn ptr_eq(&self, other: &EntryRef) -> bool {
        self.raw == other.raw
    }

    #[inline]
    pub(crate) fn raw(&self) -> RawEntry {
        self.raw
    }
}

impl Clone for EntryRef {
    fn clone(&self) -> Self {
        self.raw.reference();
        EntryRef { raw: self.raw }
    }
}

impl Drop for EntryRef {
    fn drop(&mut self) {
        // SAFETY: every handle owns exactly one reference.
        unsafe { self.raw.dereference() }
    }
}

impl fmt::Debug for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryRef")
            .field("hash", &self.hash())
            .field("alloc_len", &self.alloc_len())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

/// A lookup key: serialized key bytes plus their precomputed hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBuffer<'a> {
    bytes: &'a [u8],
    hash: u64,
}

impl<'a> KeyBuffer<'a> {
    /// Creates a lookup key from serialized bytes and their hash.
    ///
    /// The hash must be computed the same way as the hash stored in the
    /// entries being looked up.
    #[inline]
    pub fn new(bytes: &'a [u8], hash: u64) -> Self {
        KeyBuffer { bytes, hash }
    }

    /// Returns the key bytes.
    #[inline]
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Returns the key hash.
    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }
}

/// Releases a batch of unlinked entries.
///
/// # Safety
///
/// Every entry must be unlinked and carry the reference being released.
pub(crate) unsafe fn dereference_all(entries: impl IntoIterator<Item = RawEntry>) {
    for entry in entries {
        // SAFETY: forwarded from the caller.
        unsafe { entry.dereference() }
    }
}

/// Copies the whole allocation, header included.
#[cfg(test)]
pub(crate) fn raw_bytes(entry: RawEntry) -> Vec<u8> {
    let len = entry.alloc_len() as usize;
    let mut out = vec![0u8; len];
    // SAFETY: the test holds a reference and `len` is the allocation length.
    unsafe { core::ptr::copy_nonoverlapping(entry.as_ptr().cast::<u8>(), out.as_mut_ptr(), len) };
    out
}
