//! Write-once cells.
//!
//! A [`Promise`] starts pending and is resolved exactly once, with a value
//! or with an error. Every `get` issued before resolution is woken in the
//! order it registered; later `get`s return immediately.
//!
//! # Example
//!
//! ```rust
//! use undertow::concurrent::{Promise, PromiseError};
//! use undertow::IO;
//!
//! let promise = Promise::<String, u32>::new::<String>()
//!     .unsafe_run_sync()
//!     .unwrap();
//!
//! assert_eq!(promise.complete(7).unsafe_run_sync(), Ok(()));
//! assert_eq!(
//!     promise.complete(8).unsafe_run_sync(),
//!     Err(PromiseError::AlreadyFulfilled)
//! );
//! assert_eq!(promise.get().unsafe_run_sync(), Ok(7));
//! ```

use std::error::Error as StdError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::cell::AtomicCell;
use crate::concurrent::Listener;
use crate::io::{Callback, IO};

/// Error returned when resolving an already resolved promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseError {
    /// The promise already holds a value or an error.
    AlreadyFulfilled,
}

impl fmt::Display for PromiseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromiseError::AlreadyFulfilled => write!(f, "promise already fulfilled"),
        }
    }
}

impl StdError for PromiseError {}

enum State<E, A> {
    Pending(Vec<Listener<Result<A, E>>>),
    Complete(A),
    Errored(E),
}

struct Inner<E, A> {
    state: AtomicCell<State<E, A>>,
    next_id: AtomicU64,
    cancelable: bool,
}

/// A cell resolved at most once, shared by cloning.
pub struct Promise<E, A> {
    inner: Arc<Inner<E, A>>,
}

impl<E, A> Clone for Promise<E, A> {
    fn clone(&self) -> Self {
        Promise {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E, A> fmt::Debug for Promise<E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.inner.state.get() {
            State::Pending(joiners) => format!("pending (joiners: {})", joiners.len()),
            State::Complete(_) => "complete".to_string(),
            State::Errored(_) => "errored".to_string(),
        };
        f.debug_struct("Promise").field("state", &state).finish()
    }
}

impl<E, A> Promise<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    fn build(cancelable: bool) -> Self {
        Promise {
            inner: Arc::new(Inner {
                state: AtomicCell::new(State::Pending(Vec::new())),
                next_id: AtomicU64::new(0),
                cancelable,
            }),
        }
    }

    /// A pending promise whose `get` can be canceled.
    pub fn new<E2>() -> IO<E2, Promise<E, A>>
    where
        E2: Send + 'static,
    {
        IO::delay(|| Promise::build(true))
    }

    /// A pending promise whose `get` ignores cancellation.
    pub fn uncancelable<E2>() -> IO<E2, Promise<E, A>>
    where
        E2: Send + 'static,
    {
        IO::delay(|| Promise::build(false))
    }

    /// Resolve with a value.
    ///
    /// Fails with [`PromiseError::AlreadyFulfilled`] if already resolved.
    pub fn complete(&self, value: A) -> IO<PromiseError, ()> {
        let inner = Arc::clone(&self.inner);
        IO::invoke(move || inner.resolve(Ok(value)))
    }

    /// Resolve with an error.
    ///
    /// Fails with [`PromiseError::AlreadyFulfilled`] if already resolved.
    pub fn error(&self, error: E) -> IO<PromiseError, ()> {
        let inner = Arc::clone(&self.inner);
        IO::invoke(move || inner.resolve(Err(error)))
    }

    /// Resolve with a value if still pending. Returns whether it was.
    pub fn try_complete<E2>(&self, value: A) -> IO<E2, bool>
    where
        E2: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        IO::delay(move || inner.resolve(Ok(value)).is_ok())
    }

    /// Resolve with an error if still pending. Returns whether it was.
    pub fn try_error<E2>(&self, error: E) -> IO<E2, bool>
    where
        E2: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        IO::delay(move || inner.resolve(Err(error)).is_ok())
    }

    /// Wait for resolution; a stored error is raised.
    pub fn get(&self) -> IO<E, A> {
        let inner = Arc::clone(&self.inner);
        IO::from_registration(move |cb| inner.register(cb))
    }

    /// The resolution, if there is one yet.
    pub fn try_get<E2>(&self) -> IO<E2, Option<Result<A, E>>>
    where
        E2: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        IO::delay(move || match &*inner.state.get() {
            State::Pending(_) => None,
            State::Complete(value) => Some(Ok(value.clone())),
            State::Errored(error) => Some(Err(error.clone())),
        })
    }
}

impl<E, A> Inner<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    fn resolve(&self, result: Result<A, E>) -> Result<(), PromiseError> {
        loop {
            let current = self.state.get();
            let State::Pending(joiners) = &*current else {
                return Err(PromiseError::AlreadyFulfilled);
            };
            let next = match &result {
                Ok(value) => State::Complete(value.clone()),
                Err(error) => State::Errored(error.clone()),
            };
            if self.state.compare_and_set(&current, next) {
                tracing::trace!(joiners = joiners.len(), "promise resolved");
                for joiner in joiners {
                    joiner.notify(result.clone());
                }
                return Ok(());
            }
        }
    }

    fn register(self: &Arc<Self>, cb: Callback<E, A>) -> Option<CancelToken> {
        loop {
            let current = self.state.get();
            let joiners = match &*current {
                State::Complete(value) => {
                    cb.success(value.clone());
                    return None;
                }
                State::Errored(error) => {
                    cb.failure(error.clone());
                    return None;
                }
                State::Pending(joiners) => joiners,
            };

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let resume = cb.clone();
            let mut joiners = joiners.clone();
            joiners.push(Listener::new(id, move |result| resume.call(result)));
            if self.state.compare_and_set(&current, State::Pending(joiners)) {
                if !self.cancelable {
                    return None;
                }
                let inner = Arc::clone(self);
                return Some(CancelToken::new(move || {
                    if inner.remove(id) {
                        cb.interrupt();
                    }
                }));
            }
        }
    }

    fn remove(&self, id: u64) -> bool {
        loop {
            let current = self.state.get();
            let State::Pending(joiners) = &*current else {
                return false;
            };
            if !joiners.iter().any(|j| j.id() == id) {
                return false;
            }
            let remaining = joiners.iter().filter(|j| j.id() != id).cloned().collect();
            if self.state.compare_and_set(&current, State::Pending(remaining)) {
                return true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::io::Outcome;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn pending() -> Promise<String, i32> {
        Promise::new::<()>().unsafe_run_sync().unwrap()
    }

    #[test]
    fn test_error_is_raised_to_getters() {
        let promise = pending();
        promise.error("lost".to_string()).unsafe_run_sync().unwrap();
        assert_eq!(promise.get().unsafe_run_sync(), Err("lost".to_string()));
        assert_eq!(
            promise.complete(1).unsafe_run_sync(),
            Err(PromiseError::AlreadyFulfilled)
        );
    }

    #[test]
    fn test_try_variants_report_instead_of_failing() {
        let promise = pending();
        assert_eq!(promise.try_get::<()>().unsafe_run_sync(), Ok(None));
        assert_eq!(promise.try_complete::<()>(1).unsafe_run_sync(), Ok(true));
        assert_eq!(promise.try_complete::<()>(2).unsafe_run_sync(), Ok(false));
        assert_eq!(
            promise.try_error::<()>("late".to_string()).unsafe_run_sync(),
            Ok(false)
        );
        assert_eq!(promise.try_get::<()>().unsafe_run_sync(), Ok(Some(Ok(1))));
    }

    #[test]
    fn test_resolve_notifies_in_registration_order() {
        let promise = pending();
        let order = Arc::new(Mutex::new(Vec::new()));
        let joiners = (0..3)
            .map(|id| {
                let order = Arc::clone(&order);
                Listener::new(id, move |result: Result<i32, String>| {
                    order.lock().push((id, result))
                })
            })
            .collect();
        promise.inner.state.set(State::Pending(joiners));

        promise.complete(4).unsafe_run_sync().unwrap();
        assert_eq!(*order.lock(), vec![(0, Ok(4)), (1, Ok(4)), (2, Ok(4))]);
    }

    #[test]
    fn test_all_blocked_getters_receive_value() {
        let ctx = ExecutionContext::concurrent("promise-joiners");
        let promise = pending();
        let fibers: Vec<_> = (0..3)
            .map(|_| promise.get().start_on::<()>(&ctx).unsafe_run_sync().unwrap())
            .collect();

        std::thread::sleep(Duration::from_millis(20));
        promise.complete(11).unsafe_run_sync().unwrap();
        for fiber in fibers {
            assert_eq!(fiber.join().unsafe_run_sync(), Ok(11));
        }
    }

    #[test]
    fn test_canceled_joiner_is_deregistered() {
        let ctx = ExecutionContext::concurrent("promise-cancel");
        let promise = pending();
        let fiber = promise.get().start_on::<()>(&ctx).unsafe_run_sync().unwrap();

        std::thread::sleep(Duration::from_millis(20));
        fiber.cancel::<()>().unsafe_run_sync().unwrap();
        assert_eq!(fiber.join().unsafe_run_outcome(), Outcome::Canceled);

        let state = format!("{:?}", promise);
        assert!(state.contains("joiners: 0"), "unexpected state {}", state);
    }

    #[test]
    fn test_uncancelable_getter_waits_for_the_value() {
        let ctx = ExecutionContext::concurrent("promise-uncancelable");
        let promise = Promise::<String, i32>::uncancelable::<()>().unsafe_run_sync().unwrap();
        let getter = promise.get().start_on::<()>(&ctx).unsafe_run_sync().unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let canceler = getter.cancel::<()>().start_on::<()>(&ctx).unsafe_run_sync().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(!canceler.is_finished());

        promise.complete(5).unsafe_run_sync().unwrap();
        assert_eq!(canceler.join().unsafe_run_sync(), Ok(()));
        assert_eq!(getter.join().unsafe_run_sync(), Ok(5));

        let state = format!("{:?}", promise);
        assert!(state.contains("complete"), "unexpected state {}", state);
    }
}
