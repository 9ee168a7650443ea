//! Thread-safe mutable slot with compare-and-set.
//!
//! `AtomicCell<T>` is the lowest layer of the runtime: connection stacks,
//! [`MVar`](crate::concurrent::MVar) and [`Promise`](crate::concurrent::Promise)
//! states all live in one. Every value stored is wrapped in an `Arc`, and
//! [`compare_and_set`](AtomicCell::compare_and_set) compares by pointer
//! identity, so states do not need `PartialEq` (they usually hold callbacks).
//!
//! The canonical usage is a retry loop:
//!
//! ```rust
//! use undertow::cell::AtomicCell;
//!
//! let cell = AtomicCell::new(1);
//! loop {
//!     let current = cell.get();
//!     if cell.compare_and_set(&current, *current + 1) {
//!         break;
//!     }
//! }
//! assert_eq!(*cell.get(), 2);
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// A shared slot supporting get, set and compare-and-set.
///
/// The lock is held only to read or swap the `Arc` pointer, never while
/// user code runs, so update closures may be retried under contention.
pub struct AtomicCell<T> {
    slot: Mutex<Arc<T>>,
}

impl<T> AtomicCell<T> {
    /// Create a cell holding `value`.
    pub fn new(value: T) -> Self {
        AtomicCell {
            slot: Mutex::new(Arc::new(value)),
        }
    }

    /// Current snapshot.
    ///
    /// The returned `Arc` doubles as the "expected" argument of
    /// [`compare_and_set`](Self::compare_and_set).
    pub fn get(&self) -> Arc<T> {
        Arc::clone(&self.slot.lock())
    }

    /// Replace the value unconditionally.
    pub fn set(&self, value: T) {
        *self.slot.lock() = Arc::new(value);
    }

    /// Replace the value, returning the previous snapshot.
    pub fn get_and_set(&self, value: T) -> Arc<T> {
        std::mem::replace(&mut *self.slot.lock(), Arc::new(value))
    }

    /// Install `new` only if the cell still holds `expected`.
    ///
    /// `expected` must be a snapshot obtained from [`get`](Self::get); the
    /// comparison is pointer identity, so a structurally equal but distinct
    /// value never matches.
    pub fn compare_and_set(&self, expected: &Arc<T>, new: T) -> bool {
        let mut slot = self.slot.lock();
        if Arc::ptr_eq(&slot, expected) {
            *slot = Arc::new(new);
            true
        } else {
            false
        }
    }

    /// Atomically transform the value, retrying on contention.
    pub fn update<F>(&self, f: F)
    where
        F: Fn(&T) -> T,
    {
        self.modify(|current| (f(current), ()))
    }

    /// Atomically transform the value and return the new snapshot.
    pub fn update_and_get<F>(&self, f: F) -> Arc<T>
    where
        F: Fn(&T) -> T,
    {
        loop {
            let current = self.get();
            let next = Arc::new(f(&current));
            let mut slot = self.slot.lock();
            if Arc::ptr_eq(&slot, &current) {
                *slot = Arc::clone(&next);
                return next;
            }
        }
    }

    /// Atomically transform the value and return the previous snapshot.
    pub fn get_and_update<F>(&self, f: F) -> Arc<T>
    where
        F: Fn(&T) -> T,
    {
        loop {
            let current = self.get();
            if self.compare_and_set(&current, f(&current)) {
                return current;
            }
        }
    }

    /// Atomically transform the value while computing a result.
    ///
    /// `f` may run more than once when other threads win the race; only the
    /// result of the successful attempt is returned.
    pub fn modify<R, F>(&self, f: F) -> R
    where
        F: Fn(&T) -> (T, R),
    {
        loop {
            let current = self.get();
            let (next, result) = f(&current);
            if self.compare_and_set(&current, next) {
                return result;
            }
        }
    }
}

impl<T: Default> Default for AtomicCell<T> {
    fn default() -> Self {
        AtomicCell::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for AtomicCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicCell")
            .field("value", &*self.get())
            .finish()
    }
}
