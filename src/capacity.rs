//! Shared Free-Capacity Budget
//!
//! All segments of a cache draw from one byte budget. Each segment reads a
//! snapshot of the counter when it starts a put, decides locally how much to
//! evict, and publishes its net change with a single atomic add once it is
//! done. There is no global lock, so two segments racing near the limit may
//! jointly overshoot the budget by up to one entry each; the counter catches
//! up as soon as both adds land.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Handle to a shared, eventually consistent byte budget.
///
/// Cloning the handle shares the same counter.
///
/// # Examples
///
/// ```
/// use ohc_segment::FreeCapacity;
///
/// let budget = FreeCapacity::new(1024);
/// let shared = budget.clone();
/// shared.add(-100);
/// assert_eq!(budget.snapshot(), 924);
/// ```
#[derive(Debug, Clone)]
pub struct FreeCapacity {
    free: Arc<AtomicI64>,
}

impl FreeCapacity {
    /// Creates a budget with `capacity` free bytes.
    pub fn new(capacity: u64) -> Self {
        let capacity = i64::try_from(capacity).unwrap_or(i64::MAX);
        FreeCapacity {
            free: Arc::new(AtomicI64::new(capacity)),
        }
    }

    /// Returns the current number of free bytes. May be negative while a
    /// concurrent overshoot is being settled.
    #[inline]
    pub fn snapshot(&self) -> i64 {
        self.free.load(Ordering::Relaxed)
    }

    /// Applies a signed delta: positive when bytes are released, negative
    /// when they are consumed.
    #[inline]
    pub fn add(&self, delta: i64) {
        if delta != 0 {
            self.free.fetch_add(delta, Ordering::Relaxed);
        }
    }

    /// Returns `true` if both handles share the same counter.
    #[inline]
    pub fn ptr_eq(&self, other: &FreeCapacity) -> bool {
        Arc::ptr_eq(&self.free, &other.free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_shared_counter() {
        let a = FreeCapacity::new(100);
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        b.add(-30);
        a.add(10);
        assert_eq!(a.snapshot(), 80);
        assert_eq!(b.snapshot(), 80);
        assert!(!a.ptr_eq(&FreeCapacity::new(100)));
    }

    #[test]
    fn test_capacity_clamped_to_i64() {
        assert_eq!(FreeCapacity::new(u64::MAX).snapshot(), i64::MAX);
    }

    #[test]
    fn test_concurrent_adds_settle() {
        let budget = FreeCapacity::new(0);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let budget = budget.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        budget.add(-3);
                        budget.add(3);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(budget.snapshot(), 0);
    }
}
