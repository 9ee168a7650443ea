//! The resume handle passed to async registrations.

use std::fmt;
use std::panic;
use std::sync::Arc;
use std::thread;

use crate::io::interpreter::{Cause, Exit};
use crate::signal::Latch;

type Delivery<E, A> = thread::Result<Exit<E, A>>;

/// Completes a suspended [`IO::async_`](crate::IO::async_) computation.
///
/// A callback may be cloned and handed to several producers; the first
/// delivery wins and the rest are ignored. Delivering from any thread is
/// fine: the suspended run resumes on its own context.
pub struct Callback<E, A> {
    latch: Arc<Latch<Delivery<E, A>>>,
}

impl<E, A> Clone for Callback<E, A> {
    fn clone(&self) -> Self {
        Callback {
            latch: Arc::clone(&self.latch),
        }
    }
}

impl<E, A> Callback<E, A> {
    pub(crate) fn new() -> Self {
        Callback {
            latch: Arc::new(Latch::new()),
        }
    }

    /// Resume with a result.
    pub fn call(&self, result: Result<A, E>) {
        self.complete(result.map_err(Cause::Error));
    }

    /// Resume with a value.
    pub fn success(&self, value: A) {
        self.complete(Ok(value));
    }

    /// Resume with a typed error.
    pub fn failure(&self, error: E) {
        self.complete(Err(Cause::Error(error)));
    }

    pub(crate) fn complete(&self, exit: Exit<E, A>) {
        self.latch.set(Ok(exit));
    }

    /// Wake the waiter as canceled, unless a result already arrived.
    pub(crate) fn interrupt(&self) {
        self.complete(Err(Cause::Canceled));
    }

    /// Forward an exit that may carry a panic from another thread.
    pub(crate) fn settle(&self, delivery: Delivery<E, A>) {
        self.latch.set(delivery);
    }

    /// Block until delivered. Panics from the producer resume here.
    pub(crate) fn wait(&self) -> Exit<E, A> {
        match self.latch.wait() {
            Ok(exit) => exit,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

impl<E, A> fmt::Debug for Callback<E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback").finish_non_exhaustive()
    }
}
