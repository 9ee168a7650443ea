//! Synchronization primitives built on [`IO`](crate::IO).
//!
//! - [`MVar`] - a slot that is either empty or full; `take` blocks on empty,
//!   `put` blocks on full, waiters are served first come first served.
//! - [`Promise`] - a write-once cell; `get` blocks until it is completed.
//!
//! Both keep their whole state in an [`AtomicCell`](crate::cell::AtomicCell)
//! and move between states with compare-and-set loops. Each comes in two
//! flavours: the default one lets a canceled waiter leave the queue, the
//! `uncancelable` one keeps waiters parked until they are served.

mod mvar;
mod promise;

pub use mvar::MVar;
pub use promise::{Promise, PromiseError};

use std::fmt;
use std::sync::Arc;

use crate::io::Callback;

/// A parked waiter, identified so a canceled one can be removed.
pub(crate) struct Listener<T> {
    id: u64,
    notify: Arc<dyn Fn(T) + Send + Sync>,
}

impl<T> Clone for Listener<T> {
    fn clone(&self) -> Self {
        Listener {
            id: self.id,
            notify: Arc::clone(&self.notify),
        }
    }
}

impl<T: 'static> Listener<T> {
    pub(crate) fn new<F>(id: u64, notify: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Listener {
            id,
            notify: Arc::new(notify),
        }
    }

    /// Resume `cb` with the delivered value.
    pub(crate) fn resuming<E>(id: u64, cb: Callback<E, T>) -> Self
    where
        E: Send + 'static,
        T: Send,
    {
        Listener::new(id, move |value| cb.success(value))
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn notify(&self, value: T) {
        (self.notify)(value)
    }
}

impl<T> fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener").field("id", &self.id).finish()
    }
}
