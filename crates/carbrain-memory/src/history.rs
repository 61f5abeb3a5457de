//! [`HistoryStore`] – bounded FIFO log shared across decision cycles.
//!
//! # Algorithm
//!
//! Entries live in a [`VecDeque`] behind a store-wide [`Mutex`].  An append
//! pushes to the tail and, while the length exceeds the capacity, pops from
//! the head.  Append and eviction happen inside the same critical section, so
//! concurrent appenders never observe a store above capacity, and entries
//! appear in the order their appends acquired the lock.
//!
//! # Example
//!
//! ```rust
//! use carbrain_memory::HistoryStore;
//!
//! let store = HistoryStore::new(3);
//! for i in 0..5 {
//!     store.append(i);
//! }
//! assert_eq!(store.all(), vec![2, 3, 4]);
//! assert_eq!(store.recent(2), vec![3, 4]);
//! assert_eq!(store.clear(), 3);
//! assert!(store.is_empty());
//! ```

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

// ─────────────────────────────────────────────────────────────────────────────
// HistoryStore
// ─────────────────────────────────────────────────────────────────────────────

/// Capacity-bounded, append-only log with oldest-first eviction.
///
/// All methods take `&self`; wrap the store (or its owner) in an `Arc` to
/// share it between tasks.
#[derive(Debug)]
pub struct HistoryStore<T> {
    capacity: usize,
    entries: Mutex<VecDeque<T>>,
}

impl<T: Clone> HistoryStore<T> {
    /// Create an empty store holding at most `capacity` entries.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Append `entry` at the tail, evicting from the head until the store is
    /// back at capacity.  Returns the number of evicted entries.
    pub fn append(&self, entry: T) -> usize {
        self.append_with(entry, |_| {})
    }

    /// Like [`append`][Self::append], but calls `on_evict` with each entry
    /// *before* it is removed.
    ///
    /// The callback runs while the store lock is held; it must not touch this
    /// store.
    pub fn append_with<F>(&self, entry: T, mut on_evict: F) -> usize
    where
        F: FnMut(&T),
    {
        let mut entries = self.lock();
        entries.push_back(entry);
        let mut evicted = 0;
        while entries.len() > self.capacity {
            if let Some(oldest) = entries.front() {
                on_evict(oldest);
            }
            entries.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// The last `n` entries in insertion order (`n` clamped to the length).
    pub fn recent(&self, n: usize) -> Vec<T> {
        let entries = self.lock();
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    /// Every entry, oldest first.
    pub fn all(&self) -> Vec<T> {
        self.lock().iter().cloned().collect()
    }

    /// The newest entry, if any.
    pub fn latest(&self) -> Option<T> {
        self.lock().back().cloned()
    }

    /// Run `f` over the entries without cloning them.
    pub fn inspect<R>(&self, f: impl FnOnce(&VecDeque<T>) -> R) -> R {
        f(&self.lock())
    }

    /// Empty the store and return how many entries were removed.
    pub fn clear(&self) -> usize {
        self.clear_with(|_| {})
    }

    /// Like [`clear`][Self::clear], but calls `on_remove` with every entry,
    /// oldest first, before the store is emptied.
    pub fn clear_with<F>(&self, mut on_remove: F) -> usize
    where
        F: FnMut(&T),
    {
        let mut entries = self.lock();
        entries.iter().for_each(&mut on_remove);
        let removed = entries.len();
        entries.clear();
        removed
    }

    /// A panicking appender must not take the whole log down with it, so a
    /// poisoned lock is recovered rather than propagated.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
