//! A mutable slot that blocks on empty reads and full writes.
//!
//! # Example
//!
//! ```rust
//! use undertow::concurrent::MVar;
//! use undertow::context::ExecutionContext;
//! use undertow::IO;
//!
//! let ctx = ExecutionContext::concurrent("mvar-doc");
//! let program = MVar::<u32>::empty::<String>().flat_map(move |mvar| {
//!     let producer = mvar.clone();
//!     producer
//!         .put::<String>(1)
//!         .followed_by(producer.put(2))
//!         .start_on(&ctx)
//!         .flat_map(move |_fiber| mvar.take().zip(mvar.take()))
//! });
//!
//! assert_eq!(program.unsafe_run_sync(), Ok((1, 2)));
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::cell::AtomicCell;
use crate::concurrent::Listener;
use crate::io::{Callback, IO};

enum State<A> {
    /// Empty: readers and takers wait for a value.
    WaitForPut {
        reads: Vec<Listener<A>>,
        takes: Vec<Listener<A>>,
    },
    /// Full: putters wait for room, each holding the value it wants to put.
    WaitForTake {
        value: A,
        puts: Vec<(A, Listener<()>)>,
    },
}

impl<A> State<A> {
    fn empty() -> Self {
        State::WaitForPut {
            reads: Vec::new(),
            takes: Vec::new(),
        }
    }

    fn full(value: A) -> Self {
        State::WaitForTake {
            value,
            puts: Vec::new(),
        }
    }
}

struct Inner<A> {
    state: AtomicCell<State<A>>,
    next_id: AtomicU64,
    cancelable: bool,
}

/// A synchronized slot holding at most one value.
///
/// Cloning shares the slot. Waiters of each kind are served in the order
/// they arrived.
pub struct MVar<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for MVar<A> {
    fn clone(&self) -> Self {
        MVar {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> fmt::Debug for MVar<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.inner.state.get() {
            State::WaitForPut { reads, takes } => {
                format!("empty (readers: {}, takers: {})", reads.len(), takes.len())
            }
            State::WaitForTake { puts, .. } => format!("full (putters: {})", puts.len()),
        };
        f.debug_struct("MVar")
            .field("state", &state)
            .field("cancelable", &self.inner.cancelable)
            .finish()
    }
}

impl<A> MVar<A>
where
    A: Clone + Send + Sync + 'static,
{
    fn build(state: State<A>, cancelable: bool) -> Self {
        MVar {
            inner: Arc::new(Inner {
                state: AtomicCell::new(state),
                next_id: AtomicU64::new(0),
                cancelable,
            }),
        }
    }

    /// Create an empty `MVar` whose waiters can be canceled.
    pub fn empty<E>() -> IO<E, MVar<A>>
    where
        E: Send + 'static,
    {
        IO::delay(|| MVar::build(State::empty(), true))
    }

    /// Create a full `MVar` whose waiters can be canceled.
    pub fn of<E>(value: A) -> IO<E, MVar<A>>
    where
        E: Send + 'static,
    {
        IO::delay(move || MVar::build(State::full(value), true))
    }

    /// Create an empty `MVar` whose waiters ignore cancellation.
    pub fn uncancelable_empty<E>() -> IO<E, MVar<A>>
    where
        E: Send + 'static,
    {
        IO::delay(|| MVar::build(State::empty(), false))
    }

    /// Create a full `MVar` whose waiters ignore cancellation.
    pub fn uncancelable_of<E>(value: A) -> IO<E, MVar<A>>
    where
        E: Send + 'static,
    {
        IO::delay(move || MVar::build(State::full(value), false))
    }

    /// Fill the slot, waiting while it is full.
    ///
    /// Putting into an empty slot hands the value to every pending reader
    /// and to the oldest pending taker; with no taker the slot becomes full.
    pub fn put<E>(&self, value: A) -> IO<E, ()>
    where
        E: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        IO::from_registration(move |cb| inner.register_put(value, cb))
    }

    /// Empty the slot, waiting while it is empty.
    pub fn take<E>(&self) -> IO<E, A>
    where
        E: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        IO::from_registration(move |cb| inner.register_take(cb))
    }

    /// Observe the value without removing it, waiting while the slot is
    /// empty.
    pub fn read<E>(&self) -> IO<E, A>
    where
        E: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        IO::from_registration(move |cb| inner.register_read(cb))
    }

    /// Fill the slot if it is empty. Returns whether the value went in.
    pub fn try_put<E>(&self, value: A) -> IO<E, bool>
    where
        E: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        IO::delay(move || inner.offer(&value))
    }

    /// Empty the slot if it is full.
    pub fn try_take<E>(&self) -> IO<E, Option<A>>
    where
        E: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        IO::delay(move || inner.poll())
    }

    /// The current value, if full.
    pub fn try_read<E>(&self) -> IO<E, Option<A>>
    where
        E: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        IO::delay(move || match &*inner.state.get() {
            State::WaitForTake { value, .. } => Some(value.clone()),
            State::WaitForPut { .. } => None,
        })
    }

    /// Whether the slot is empty right now.
    pub fn is_empty<E>(&self) -> IO<E, bool>
    where
        E: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        IO::delay(move || matches!(&*inner.state.get(), State::WaitForPut { .. }))
    }
}

impl<A> Inner<A>
where
    A: Clone + Send + Sync + 'static,
{
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Try to deliver `value` to an empty slot.
    fn offer(&self, value: &A) -> bool {
        loop {
            let current = self.state.get();
            let State::WaitForPut { reads, takes } = &*current else {
                return false;
            };
            let (next, taker) = match takes.split_first() {
                Some((head, rest)) => (
                    State::WaitForPut {
                        reads: Vec::new(),
                        takes: rest.to_vec(),
                    },
                    Some(head.clone()),
                ),
                None => (State::full(value.clone()), None),
            };
            if self.state.compare_and_set(&current, next) {
                for reader in reads {
                    reader.notify(value.clone());
                }
                if let Some(taker) = taker {
                    taker.notify(value.clone());
                }
                return true;
            }
        }
    }

    /// Try to take the value from a full slot, refilling from the oldest
    /// pending putter.
    fn poll(&self) -> Option<A> {
        loop {
            let current = self.state.get();
            let State::WaitForTake { value, puts } = &*current else {
                return None;
            };
            let (next, putter) = match puts.split_first() {
                Some(((queued, putter), rest)) => (
                    State::WaitForTake {
                        value: queued.clone(),
                        puts: rest.to_vec(),
                    },
                    Some(putter.clone()),
                ),
                None => (State::empty(), None),
            };
            if self.state.compare_and_set(&current, next) {
                if let Some(putter) = putter {
                    putter.notify(());
                }
                return Some(value.clone());
            }
        }
    }

    fn register_put<E>(self: &Arc<Self>, value: A, cb: Callback<E, ()>) -> Option<CancelToken>
    where
        E: Send + 'static,
    {
        loop {
            if self.offer(&value) {
                cb.success(());
                return None;
            }
            let current = self.state.get();
            let State::WaitForTake { value: held, puts } = &*current else {
                continue;
            };
            let id = self.next_id();
            let mut puts = puts.clone();
            puts.push((value.clone(), Listener::resuming(id, cb.clone())));
            let next = State::WaitForTake {
                value: held.clone(),
                puts,
            };
            if self.state.compare_and_set(&current, next) {
                return self.waiter_token(id, cb);
            }
        }
    }

    fn register_take<E>(self: &Arc<Self>, cb: Callback<E, A>) -> Option<CancelToken>
    where
        E: Send + 'static,
    {
        loop {
            if let Some(value) = self.poll() {
                cb.success(value);
                return None;
            }
            let current = self.state.get();
            let State::WaitForPut { reads, takes } = &*current else {
                continue;
            };
            let id = self.next_id();
            let mut takes = takes.clone();
            takes.push(Listener::resuming(id, cb.clone()));
            let next = State::WaitForPut {
                reads: reads.clone(),
                takes,
            };
            if self.state.compare_and_set(&current, next) {
                return self.waiter_token(id, cb);
            }
        }
    }

    fn register_read<E>(self: &Arc<Self>, cb: Callback<E, A>) -> Option<CancelToken>
    where
        E: Send + 'static,
    {
        loop {
            let current = self.state.get();
            match &*current {
                State::WaitForTake { value, .. } => {
                    cb.success(value.clone());
                    return None;
                }
                State::WaitForPut { reads, takes } => {
                    let id = self.next_id();
                    let mut reads = reads.clone();
                    reads.push(Listener::resuming(id, cb.clone()));
                    let next = State::WaitForPut {
                        reads,
                        takes: takes.clone(),
                    };
                    if self.state.compare_and_set(&current, next) {
                        return self.waiter_token(id, cb);
                    }
                }
            }
        }
    }

    /// For cancel-aware slots, a token that removes waiter `id` and wakes
    /// it as canceled. A waiter already served keeps its value.
    fn waiter_token<E, T>(self: &Arc<Self>, id: u64, cb: Callback<E, T>) -> Option<CancelToken>
    where
        E: Send + 'static,
        T: Send + 'static,
    {
        if !self.cancelable {
            return None;
        }
        let inner = Arc::clone(self);
        Some(CancelToken::new(move || {
            if inner.remove(id) {
                cb.interrupt();
            }
        }))
    }

    fn remove(&self, id: u64) -> bool {
        loop {
            let current = self.state.get();
            let next = match &*current {
                State::WaitForPut { reads, takes } => {
                    if !reads.iter().chain(takes).any(|l| l.id() == id) {
                        return false;
                    }
                    State::WaitForPut {
                        reads: reads.iter().filter(|l| l.id() != id).cloned().collect(),
                        takes: takes.iter().filter(|l| l.id() != id).cloned().collect(),
                    }
                }
                State::WaitForTake { value, puts } => {
                    if !puts.iter().any(|(_, l)| l.id() == id) {
                        return false;
                    }
                    State::WaitForTake {
                        value: value.clone(),
                        puts: puts.iter().filter(|(_, l)| l.id() != id).cloned().collect(),
                    }
                }
            };
            if self.state.compare_and_set(&current, next) {
                tracing::trace!(waiter = id, "removed canceled mvar waiter");
                return true;
            }
        }
    }
}
