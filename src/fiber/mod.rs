//! Fibers: computations forked onto an execution context.
//!
//! [`IO::start_on`] dispatches a computation and returns a [`Fiber`] handle
//! right away. The fiber has its own cancellation connection; it is not
//! canceled when the computation that started it is.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use undertow::context::ExecutionContext;
//! use undertow::IO;
//!
//! let pool = ExecutionContext::concurrent("workers");
//! let program = IO::<String, _>::sleep(Duration::from_millis(10))
//!     .map(|()| "done")
//!     .start_on::<String>(&pool)
//!     .flat_map(|fiber| fiber.join());
//!
//! assert_eq!(program.unsafe_run_sync(), Ok("done"));
//! ```

mod race;

pub use race::{race, race3, race_pair, race_triple, OneOf3, RaceTriple};

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use crate::cancel::{CancelToken, Connection};
use crate::context::ExecutionContext;
use crate::io::interpreter::{eval, Exit, Run};
use crate::io::{Callback, IO};
use crate::signal::Gate;

static NEXT_FIBER: AtomicU64 = AtomicU64::new(1);

/// Dispatch `io` onto `ctx` under `conn` and report its exit, or the panic
/// that ended it, to `on_done` on the thread that ran it.
pub(crate) fn spawn<E, A, F>(io: IO<E, A>, ctx: ExecutionContext, conn: Arc<Connection>, on_done: F)
where
    E: Send + 'static,
    A: Send + 'static,
    F: FnOnce(thread::Result<Exit<E, A>>) + Send + 'static,
{
    let target = ctx.clone();
    ctx.execute(move || {
        let mut run = Run::new(target, conn);
        let exit = panic::catch_unwind(AssertUnwindSafe(|| eval(io, &mut run)));
        on_done(exit);
    });
}

type Delivery<E, A> = thread::Result<Exit<E, A>>;

enum Slot<E, A> {
    Running(Option<Callback<E, A>>),
    Finished(Option<Delivery<E, A>>),
}

pub(crate) struct FiberInner<E, A> {
    id: u64,
    pub(crate) conn: Arc<Connection>,
    slot: Mutex<Slot<E, A>>,
    finished: Gate,
}

impl<E, A> FiberInner<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(FiberInner {
            id: NEXT_FIBER.fetch_add(1, Ordering::Relaxed),
            conn: Connection::new(),
            slot: Mutex::new(Slot::Running(None)),
            finished: Gate::new(),
        })
    }

    /// Record the exit and hand it to a waiting joiner, if any.
    pub(crate) fn complete(&self, delivery: Delivery<E, A>) {
        let mut slot = self.slot.lock();
        let joiner = match &mut *slot {
            Slot::Running(joiner) => joiner.take(),
            Slot::Finished(_) => None,
        };
        match joiner {
            Some(joiner) => {
                *slot = Slot::Finished(None);
                drop(slot);
                joiner.settle(delivery);
            }
            None => *slot = Slot::Finished(Some(delivery)),
        }
        tracing::trace!(fiber = self.id, "fiber finished");
        self.finished.open();
    }

    fn listen(self: &Arc<Self>, joiner: Callback<E, A>) -> Option<CancelToken> {
        let mut slot = self.slot.lock();
        match &mut *slot {
            Slot::Finished(delivery) => {
                let delivery = delivery.take();
                drop(slot);
                match delivery {
                    Some(delivery) => joiner.settle(delivery),
                    None => joiner.interrupt(),
                }
                None
            }
            Slot::Running(waiting) => {
                *waiting = Some(joiner.clone());
                drop(slot);
                let inner = Arc::clone(self);
                Some(CancelToken::new(move || {
                    if inner.detach() {
                        joiner.interrupt();
                    }
                }))
            }
        }
    }

    /// Drop the registered joiner. `false` if the exit already went to it.
    fn detach(&self) -> bool {
        match &mut *self.slot.lock() {
            Slot::Running(joiner) => joiner.take().is_some(),
            Slot::Finished(_) => false,
        }
    }
}

/// Handle to a forked computation.
pub struct Fiber<E, A> {
    inner: Arc<FiberInner<E, A>>,
}

impl<E, A> Fiber<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    pub(crate) fn from_inner(inner: Arc<FiberInner<E, A>>) -> Self {
        Fiber { inner }
    }

    pub(crate) fn spawn(io: IO<E, A>, ctx: ExecutionContext) -> Self {
        let inner = FiberInner::new();
        tracing::debug!(fiber = inner.id, context = %ctx.name(), "starting fiber");
        let done = Arc::clone(&inner);
        spawn(io, ctx, Arc::clone(&inner.conn), move |delivery| {
            done.complete(delivery)
        });
        Fiber { inner }
    }

    /// Process-unique id, as used in log events.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether the computation has stopped.
    pub fn is_finished(&self) -> bool {
        self.inner.finished.is_open()
    }

    /// Wait for the fiber's result.
    ///
    /// The wait is cancelable. If the fiber itself was canceled the joiner
    /// ends canceled too, and a panic inside the fiber resumes in the joiner.
    pub fn join(self) -> IO<E, A> {
        let inner = self.inner;
        IO::from_registration(move |cb| inner.listen(cb))
    }

    /// Cancel the fiber and wait until it has stopped, finalizers included.
    ///
    /// The wait is not itself interruptible; a fiber stuck in an
    /// uncancelable region holds the caller until it leaves it.
    pub fn cancel<E2>(&self) -> IO<E2, ()>
    where
        E2: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        IO::delay(move || {
            tracing::debug!(fiber = inner.id, "canceling fiber");
            inner.conn.cancel();
            inner.finished.wait();
        })
    }
}

impl<E, A> fmt::Debug for Fiber<E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.inner.id)
            .field("finished", &self.inner.finished.is_open())
            .finish()
    }
}

impl<E, A> IO<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    /// Fork `self` onto `ctx`.
    ///
    /// On the inline context the fork runs to completion before the fiber
    /// is returned.
    pub fn start_on<E2>(self, ctx: &ExecutionContext) -> IO<E2, Fiber<E, A>>
    where
        E2: Send + 'static,
    {
        let ctx = ctx.clone();
        IO::delay(move || Fiber::spawn(self, ctx))
    }

    /// Fork `self` onto [`ExecutionContext::global`].
    pub fn start<E2>(self) -> IO<E2, Fiber<E, A>>
    where
        E2: Send + 'static,
    {
        self.start_on(&ExecutionContext::global())
    }
}
