//! The run loop.
//!
//! `eval` drives a [`Machine`] on the calling thread, one step at a time.
//! The state in focus is a computation plus the [`Continuation`] waiting
//! for its exit. Sequencing nodes (`map`, `flat_map`, `handle_error_with`)
//! are [`Bind`]s: they split into the computation to run first and a
//! continuation that is pushed in front of the current one, so pending
//! work lives on the heap and chains nested either way run in constant
//! stack.
//!
//! Composite nodes with their own control flow (brackets, parallel
//! branches, spans) are boxed [`Frame`]s that evaluate their children with
//! a nested `eval` and hand back either a final exit or the next tree to
//! continue with.
//!
//! Before every step the loop checks that the thread belongs to the run's
//! current context and hops there with [`ExecutionContext::run_sync`] when
//! it does not. `continue_on` only changes which context the next step
//! expects.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::cancel::{CancelToken, Connection};
use crate::context::ExecutionContext;
use crate::io::callback::Callback;
use crate::io::{Node, Registration, IO};

/// Why a run stopped without a value.
#[derive(Debug)]
pub(crate) enum Cause<E> {
    Error(E),
    Canceled,
}

pub(crate) type Exit<E, A> = Result<A, Cause<E>>;

/// Mutable state of one interpreter run.
pub(crate) struct Run {
    pub(crate) ctx: ExecutionContext,
    pub(crate) conn: Arc<Connection>,
}

impl Run {
    pub(crate) fn new(ctx: ExecutionContext, conn: Arc<Connection>) -> Self {
        Run { ctx, conn }
    }

    /// Evaluate with `conn` swapped in, restoring the previous connection
    /// afterwards.
    pub(crate) fn with_connection<T>(
        &mut self,
        conn: Arc<Connection>,
        f: impl FnOnce(&mut Run) -> T,
    ) -> T {
        let saved = std::mem::replace(&mut self.conn, conn);
        let result = f(self);
        self.conn = saved;
        result
    }
}

// ============================================================================
// Machine states
// ============================================================================

/// One state of the run loop.
pub(crate) trait Machine: Send {
    /// Advance by one step. `None` once the outermost continuation holds
    /// the exit.
    fn step(self: Box<Self>, run: &mut Run) -> Option<Box<dyn Machine>>;
}

/// What remains to be done with the exit of the computation in focus.
pub(crate) trait Continuation<E, A>: Send {
    fn resume(self: Box<Self>, exit: Exit<E, A>, run: &mut Run) -> Option<Box<dyn Machine>>;
}

/// A sequencing node, split into the computation to run first and the
/// continuation that consumes its exit.
pub(crate) trait Bind<E, A>: Send {
    fn split(self: Box<Self>, next: Box<dyn Continuation<E, A>>) -> Box<dyn Machine>;
}

/// A composite node, consumed when evaluated.
pub(crate) trait Frame<E, A>: Send {
    fn resume(self: Box<Self>, run: &mut Run) -> Step<E, A>;
}

pub(crate) enum Step<E, A> {
    Done(Exit<E, A>),
    Next(IO<E, A>),
}

struct Focus<E, A> {
    io: IO<E, A>,
    next: Box<dyn Continuation<E, A>>,
}

/// Evaluate `io`, then hand its exit to `next`.
pub(crate) fn focus<E, A>(io: IO<E, A>, next: Box<dyn Continuation<E, A>>) -> Box<dyn Machine>
where
    E: Send + 'static,
    A: Send + 'static,
{
    Box::new(Focus { io, next })
}

struct Unwind<E, A> {
    exit: Exit<E, A>,
    next: Box<dyn Continuation<E, A>>,
}

/// Hand `exit` to `next` on the following step.
///
/// Continuations that pass an exit through return this instead of calling
/// `next` themselves, so a long run of them never nests calls.
pub(crate) fn unwind<E, A>(exit: Exit<E, A>, next: Box<dyn Continuation<E, A>>) -> Box<dyn Machine>
where
    E: Send + 'static,
    A: Send + 'static,
{
    Box::new(Unwind { exit, next })
}

impl<E, A> Machine for Unwind<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    fn step(self: Box<Self>, run: &mut Run) -> Option<Box<dyn Machine>> {
        let Unwind { exit, next } = *self;
        next.resume(exit, run)
    }
}

impl<E, A> Machine for Focus<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    fn step(self: Box<Self>, run: &mut Run) -> Option<Box<dyn Machine>> {
        let Focus { io, next } = *self;
        match io.node {
            Node::Pure(value) => next.resume(Ok(value), run),
            Node::RaiseError(error) => next.resume(Err(Cause::Error(error)), run),
            Node::Suspend(thunk) => Some(focus(thunk(), next)),
            Node::Async(register) => {
                let exit = suspend(register, run);
                next.resume(exit, run)
            }
            Node::ContinueOn(inner, target) => {
                Some(focus(*inner, Box::new(SwitchContext { target, next })))
            }
            Node::Uncancelable(inner) => {
                let saved = std::mem::replace(&mut run.conn, Connection::uncancelable());
                Some(focus(*inner, Box::new(RestoreConnection { saved, next })))
            }
            Node::Map(bind) | Node::FlatMap(bind) | Node::HandleErrorWith(bind) => {
                Some(bind.split(next))
            }
            Node::Bracket(frame)
            | Node::ParMap2(frame)
            | Node::ParMap3(frame)
            | Node::ParSequence(frame)
            | Node::Instrument(frame) => match frame.resume(run) {
                Step::Done(exit) => next.resume(exit, run),
                Step::Next(io) => Some(focus(io, next)),
            },
        }
    }
}

// ============================================================================
// Built-in continuations
// ============================================================================

/// Stores the exit of a whole `eval` call.
struct Finish<E, A> {
    slot: Arc<Mutex<Option<Exit<E, A>>>>,
}

impl<E, A> Continuation<E, A> for Finish<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    fn resume(self: Box<Self>, exit: Exit<E, A>, _run: &mut Run) -> Option<Box<dyn Machine>> {
        *self.slot.lock() = Some(exit);
        None
    }
}

/// Moves the rest of the run to `target` once the inner computation ends.
struct SwitchContext<E, A> {
    target: ExecutionContext,
    next: Box<dyn Continuation<E, A>>,
}

impl<E, A> Continuation<E, A> for SwitchContext<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    fn resume(self: Box<Self>, exit: Exit<E, A>, run: &mut Run) -> Option<Box<dyn Machine>> {
        let SwitchContext { target, next } = *self;
        tracing::trace!(context = %target.name(), "continuing on context");
        run.ctx = target;
        Some(unwind(exit, next))
    }
}

/// Puts back the connection an uncancelable region replaced.
struct RestoreConnection<E, A> {
    saved: Arc<Connection>,
    next: Box<dyn Continuation<E, A>>,
}

impl<E, A> Continuation<E, A> for RestoreConnection<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    fn resume(self: Box<Self>, exit: Exit<E, A>, run: &mut Run) -> Option<Box<dyn Machine>> {
        let RestoreConnection { saved, next } = *self;
        run.conn = saved;
        Some(unwind(exit, next))
    }
}

// ============================================================================
// Driving
// ============================================================================

pub(crate) fn eval<E, A>(io: IO<E, A>, run: &mut Run) -> Exit<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    let slot = Arc::new(Mutex::new(None));
    let finish = Box::new(Finish {
        slot: Arc::clone(&slot),
    });
    drive(focus(io, finish), run);

    let exit = slot.lock().take();
    match exit {
        Some(exit) => exit,
        None => unreachable!("the run loop stopped before the computation ended"),
    }
}

fn drive(mut machine: Box<dyn Machine>, run: &mut Run) {
    loop {
        if !run.ctx.is_current() {
            return hop(machine, run);
        }
        match machine.step(run) {
            Some(next) => machine = next,
            None => return,
        }
    }
}

/// Finish `machine` on the run's context, blocking this thread until it is
/// done.
fn hop(machine: Box<dyn Machine>, run: &mut Run) {
    let target = run.ctx.clone();
    let conn = Arc::clone(&run.conn);
    let (ended_on, conn) = run.ctx.run_sync(move || {
        let mut remote = Run::new(target, conn);
        drive(machine, &mut remote);
        (remote.ctx, remote.conn)
    });
    run.ctx = ended_on;
    run.conn = conn;
}

/// Continue with the tree produced by `f`, calling it on the run's
/// current context.
///
/// When the thread already belongs to that context `f` is called now;
/// otherwise it is deferred so the next step hops first.
pub(crate) fn continue_with<E, A, F>(run: &Run, f: F) -> Step<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
    F: FnOnce() -> IO<E, A> + Send + 'static,
{
    if run.ctx.is_current() {
        Step::Next(f())
    } else {
        Step::Next(IO::defer(f))
    }
}

/// Like [`continue_with`], handing the result to `next`.
pub(crate) fn continue_into<E, A, F>(
    run: &Run,
    f: F,
    next: Box<dyn Continuation<E, A>>,
) -> Box<dyn Machine>
where
    E: Send + 'static,
    A: Send + 'static,
    F: FnOnce() -> IO<E, A> + Send + 'static,
{
    match continue_with(run, f) {
        Step::Next(io) => focus(io, next),
        Step::Done(exit) => unwind(exit, next),
    }
}

/// Register with the outside world and block until the callback fires.
///
/// A registration that returns a token is cancelable: the token sits on the
/// connection while the run waits and must itself wake the waiter, usually
/// through [`Callback::interrupt`].
fn suspend<E, A>(register: Registration<E, A>, run: &mut Run) -> Exit<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    if run.conn.is_canceled() {
        return Err(Cause::Canceled);
    }

    let callback = Callback::new();
    let guarded = match register(callback.clone()) {
        Some(token) => {
            run.conn.push(token);
            true
        }
        None => false,
    };

    let exit = callback.wait();
    if guarded {
        run.conn.pop();
    }
    exit
}

/// A token that runs `token` and then wakes `callback` as canceled.
pub(crate) fn interrupting<E, A>(token: CancelToken, callback: Callback<E, A>) -> CancelToken
where
    E: Send + 'static,
    A: Send + 'static,
{
    CancelToken::new(move || {
        token.run();
        callback.interrupt();
    })
}
