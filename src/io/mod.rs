//! Deferred effects.
//!
//! An [`IO<E, A>`] is a description of a computation that may produce an `A`,
//! fail with a typed `E`, or be canceled. Building one never runs anything;
//! the tree is consumed by one of the `unsafe_run_*` entry points, which
//! drive the interpreter on the calling thread and hop between
//! [`ExecutionContext`]s as the program asks.
//!
//! ```rust
//! use undertow::IO;
//!
//! let program = IO::<String, _>::delay(|| 20)
//!     .map(|n| n + 1)
//!     .flat_map(|n| IO::pure(n * 2));
//!
//! assert_eq!(program.unsafe_run_sync(), Ok(42));
//! ```
//!
//! Failures of type `E` are ordinary values: [`attempt`](IO::attempt) and
//! [`handle_error_with`](IO::handle_error_with) observe them. Cancellation is
//! not an error and only finalizers ([`bracket_case`](IO::bracket_case),
//! [`guarantee_case`](IO::guarantee_case)) see it. Panics are defects and
//! unwind through everything, across threads if need be.

mod bracket;
mod callback;
mod frames;
pub(crate) mod interpreter;
mod parallel;

#[cfg(test)]
mod tests;

pub use bracket::ExitCase;
pub use callback::Callback;
pub use parallel::{par_sequence, par_traverse};

use std::fmt;
use std::future::Future;
use std::panic;
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::{CancelToken, Connection};
use crate::context::{timer, ExecutionContext};
use crate::error::ContextError;
use frames::{FlatMapFrame, HandleErrorFrame, InstrumentFrame, MapFrame};
use interpreter::{eval, interrupting, Bind, Cause, Exit, Frame, Run};

pub(crate) type Registration<E, A> = Box<dyn FnOnce(Callback<E, A>) -> Option<CancelToken> + Send>;

pub(crate) enum Node<E, A> {
    Pure(A),
    RaiseError(E),
    Suspend(Box<dyn FnOnce() -> IO<E, A> + Send>),
    Async(Registration<E, A>),
    Map(Box<dyn Bind<E, A>>),
    FlatMap(Box<dyn Bind<E, A>>),
    HandleErrorWith(Box<dyn Bind<E, A>>),
    ContinueOn(Box<IO<E, A>>, ExecutionContext),
    Bracket(Box<dyn Frame<E, A>>),
    ParMap2(Box<dyn Frame<E, A>>),
    ParMap3(Box<dyn Frame<E, A>>),
    ParSequence(Box<dyn Frame<E, A>>),
    Uncancelable(Box<IO<E, A>>),
    Instrument(Box<dyn Frame<E, A>>),
}

/// A suspended computation producing `A` or failing with `E`.
///
/// `IO` is consumed by running it, so it is not `Clone`; APIs that need to
/// run an action repeatedly take a factory `Fn() -> IO<E, A>` instead.
#[must_use = "an IO does nothing until it is run"]
pub struct IO<E, A> {
    pub(crate) node: Node<E, A>,
}

/// How a top-level run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<E, A> {
    /// Produced a value.
    Completed(A),
    /// Failed with a typed error.
    Errored(E),
    /// Stopped by cancellation.
    Canceled,
}

impl<E, A> Outcome<E, A> {
    /// Returns `true` for [`Outcome::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    /// Returns `true` for [`Outcome::Errored`].
    pub fn is_errored(&self) -> bool {
        matches!(self, Outcome::Errored(_))
    }

    /// Returns `true` for [`Outcome::Canceled`].
    pub fn is_canceled(&self) -> bool {
        matches!(self, Outcome::Canceled)
    }

    /// The result of a run that was not canceled.
    pub fn into_result(self) -> Option<Result<A, E>> {
        match self {
            Outcome::Completed(a) => Some(Ok(a)),
            Outcome::Errored(e) => Some(Err(e)),
            Outcome::Canceled => None,
        }
    }
}

impl<E, A> From<Exit<E, A>> for Outcome<E, A> {
    fn from(exit: Exit<E, A>) -> Self {
        match exit {
            Ok(a) => Outcome::Completed(a),
            Err(Cause::Error(e)) => Outcome::Errored(e),
            Err(Cause::Canceled) => Outcome::Canceled,
        }
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl<E, A> IO<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    pub(crate) fn from_node(node: Node<E, A>) -> Self {
        IO { node }
    }

    /// Suspend on a registration that may return a token. The token is
    /// responsible for waking the callback when it runs.
    pub(crate) fn from_registration<F>(register: F) -> Self
    where
        F: FnOnce(Callback<E, A>) -> Option<CancelToken> + Send + 'static,
    {
        IO::from_node(Node::Async(Box::new(register)))
    }

    /// An already computed value.
    pub fn pure(value: A) -> Self {
        IO::from_node(Node::Pure(value))
    }

    /// An already known failure.
    pub fn raise_error(error: E) -> Self {
        IO::from_node(Node::RaiseError(error))
    }

    /// Lift a `Result`.
    pub fn from_result(result: Result<A, E>) -> Self {
        match result {
            Ok(value) => IO::pure(value),
            Err(error) => IO::raise_error(error),
        }
    }

    /// Build the computation lazily, when the run reaches it.
    pub fn defer<F>(thunk: F) -> Self
    where
        F: FnOnce() -> IO<E, A> + Send + 'static,
    {
        IO::from_node(Node::Suspend(Box::new(thunk)))
    }

    /// Compute a value lazily.
    pub fn delay<F>(f: F) -> Self
    where
        F: FnOnce() -> A + Send + 'static,
    {
        IO::defer(move || IO::pure(f()))
    }

    /// Compute a fallible value lazily.
    ///
    /// # Example
    ///
    /// ```rust
    /// use undertow::IO;
    ///
    /// let parsed = IO::invoke(|| "17".parse::<u8>());
    /// assert_eq!(parsed.unsafe_run_sync(), Ok(17));
    ///
    /// let broken = IO::invoke(|| "seventeen".parse::<u8>());
    /// assert!(broken.unsafe_run_sync().is_err());
    /// ```
    pub fn invoke<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<A, E> + Send + 'static,
    {
        IO::defer(move || IO::from_result(f()))
    }

    /// Suspend until `register`'s callback is called.
    ///
    /// The run blocks its thread until then and cannot be interrupted while
    /// waiting; use [`cancelable`](Self::cancelable) when the operation can
    /// be aborted.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::thread;
    /// use undertow::IO;
    ///
    /// let answer = IO::<String, i32>::async_(|cb| {
    ///     thread::spawn(move || cb.success(42));
    /// });
    /// assert_eq!(answer.unsafe_run_sync(), Ok(42));
    /// ```
    pub fn async_<F>(register: F) -> Self
    where
        F: FnOnce(Callback<E, A>) + Send + 'static,
    {
        IO::from_registration(move |cb| {
            register(cb);
            None
        })
    }

    /// Suspend until `register`'s callback is called, or until the run is
    /// canceled. On cancellation the returned token runs and the run ends
    /// canceled.
    pub fn cancelable<F>(register: F) -> Self
    where
        F: FnOnce(Callback<E, A>) -> CancelToken + Send + 'static,
    {
        IO::from_registration(move |cb| {
            let token = register(cb.clone());
            Some(interrupting(token, cb))
        })
    }

    /// Suspend forever. Only cancellation ends it.
    pub fn never() -> Self {
        IO::from_registration(|cb| Some(CancelToken::new(move || cb.interrupt())))
    }

    /// Run a future to completion on the interpreting thread.
    pub fn from_future<Fut>(future: Fut) -> Self
    where
        Fut: Future<Output = Result<A, E>> + Send + 'static,
    {
        IO::defer(move || IO::from_result(futures::executor::block_on(future)))
    }
}

impl<E> IO<E, ()>
where
    E: Send + 'static,
{
    /// The unit value.
    pub fn unit() -> Self {
        IO::pure(())
    }

    /// Wait for `duration` on the process timer. Cancelable.
    pub fn sleep(duration: Duration) -> Self {
        IO::from_registration(move |cb: Callback<E, ()>| {
            let done = cb.clone();
            let handle = timer::schedule(duration, move || done.success(()));
            Some(interrupting(CancelToken::new(move || handle.cancel()), cb))
        })
    }

    /// A point where the run ends if it has been canceled.
    pub fn cancel_boundary() -> Self {
        IO::from_registration(|cb| {
            cb.success(());
            None
        })
    }
}

// ============================================================================
// Combinators
// ============================================================================

impl<E, A> IO<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    /// Transform the value.
    pub fn map<B, F>(self, f: F) -> IO<E, B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> B + Send + 'static,
    {
        IO::from_node(Node::Map(Box::new(MapFrame { inner: self, f })))
    }

    /// Continue with a computation built from the value.
    pub fn flat_map<B, F>(self, f: F) -> IO<E, B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> IO<E, B> + Send + 'static,
    {
        IO::from_node(Node::FlatMap(Box::new(FlatMapFrame { inner: self, f })))
    }

    /// Run `next` after `self`, keeping `next`'s value.
    pub fn followed_by<B>(self, next: IO<E, B>) -> IO<E, B>
    where
        B: Send + 'static,
    {
        self.flat_map(move |_| next)
    }

    /// Run both in sequence and pair the values.
    pub fn zip<B>(self, other: IO<E, B>) -> IO<E, (A, B)>
    where
        B: Send + 'static,
    {
        self.flat_map(move |a| other.map(move |b| (a, b)))
    }

    /// Discard the value.
    pub fn void(self) -> IO<E, ()> {
        self.map(|_| ())
    }

    /// Recover from a typed error by switching to another computation.
    ///
    /// The handler may change the error type. Cancellation is not seen.
    pub fn handle_error_with<E2, F>(self, f: F) -> IO<E2, A>
    where
        E2: Send + 'static,
        F: FnOnce(E) -> IO<E2, A> + Send + 'static,
    {
        IO::from_node(Node::HandleErrorWith(Box::new(HandleErrorFrame {
            inner: self,
            f,
        })))
    }

    /// Recover from a typed error with a value.
    pub fn handle_error<E2, F>(self, f: F) -> IO<E2, A>
    where
        E2: Send + 'static,
        F: FnOnce(E) -> A + Send + 'static,
    {
        self.handle_error_with(move |e| IO::pure(f(e)))
    }

    /// Transform the error.
    pub fn map_err<E2, F>(self, f: F) -> IO<E2, A>
    where
        E2: Send + 'static,
        F: FnOnce(E) -> E2 + Send + 'static,
    {
        self.handle_error_with(move |e| IO::raise_error(f(e)))
    }

    /// Expose the typed error as a value.
    ///
    /// # Example
    ///
    /// ```rust
    /// use undertow::IO;
    ///
    /// let io = IO::<&str, i32>::raise_error("nope").attempt::<()>();
    /// assert_eq!(io.unsafe_run_sync(), Ok(Err("nope")));
    /// ```
    pub fn attempt<E2>(self) -> IO<E2, Result<A, E>>
    where
        E2: Send + 'static,
    {
        self.map(Ok).handle_error_with(|e| IO::pure(Err(e)))
    }

    /// Run every step after `self` on `ctx`.
    pub fn continue_on(self, ctx: &ExecutionContext) -> IO<E, A> {
        IO::from_node(Node::ContinueOn(Box::new(self), ctx.clone()))
    }

    /// Shield `self` from cancellation. Cancellation requested meanwhile is
    /// observed at the first cancellation point after it finishes.
    pub fn uncancelable(self) -> IO<E, A> {
        IO::from_node(Node::Uncancelable(Box::new(self)))
    }

    /// Wrap the error with a context message.
    pub fn context(self, msg: impl Into<String>) -> IO<ContextError<E>, A> {
        let msg = msg.into();
        self.map_err(move |e| ContextError::new(e).context(msg))
    }

    /// Enter `span` while `self` runs.
    ///
    /// # Example
    ///
    /// ```rust
    /// use undertow::IO;
    ///
    /// let io = IO::<String, _>::delay(|| {
    ///     tracing::info!("fetching");
    ///     7
    /// })
    /// .instrument(tracing::info_span!("fetch_user", user_id = 7));
    /// assert_eq!(io.unsafe_run_sync(), Ok(7));
    /// ```
    pub fn instrument(self, span: tracing::Span) -> IO<E, A> {
        IO::from_node(Node::Instrument(Box::new(InstrumentFrame { inner: self, span })))
    }
}

impl<E, A> IO<E, IO<E, A>>
where
    E: Send + 'static,
    A: Send + 'static,
{
    /// Run the produced computation.
    pub fn flatten(self) -> IO<E, A> {
        self.flat_map(|inner| inner)
    }
}

impl<E, A> IO<ContextError<E>, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    /// Add another message to an existing context trail.
    pub fn and_context(self, msg: impl Into<String>) -> IO<ContextError<E>, A> {
        let msg = msg.into();
        self.map_err(move |e| e.context(msg))
    }
}

// ============================================================================
// Running
// ============================================================================

impl<E, A> IO<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    /// Run on the inline context, blocking until the result is known.
    ///
    /// # Panics
    ///
    /// Panics if the run ends canceled, and resumes any panic raised by the
    /// computation. Use [`unsafe_run_outcome`](Self::unsafe_run_outcome) to
    /// observe cancellation.
    pub fn unsafe_run_sync(self) -> Result<A, E> {
        self.unsafe_run_sync_on(&ExecutionContext::inline())
    }

    /// Run starting on `ctx`, blocking the caller until the result is known.
    ///
    /// # Panics
    ///
    /// As [`unsafe_run_sync`](Self::unsafe_run_sync).
    pub fn unsafe_run_sync_on(self, ctx: &ExecutionContext) -> Result<A, E> {
        match self.unsafe_run_outcome_on(ctx) {
            Outcome::Completed(value) => Ok(value),
            Outcome::Errored(error) => Err(error),
            Outcome::Canceled => panic!("unsafe_run_sync: the computation was canceled"),
        }
    }

    /// Run on the inline context and report how it ended.
    pub fn unsafe_run_outcome(self) -> Outcome<E, A> {
        self.unsafe_run_outcome_on(&ExecutionContext::inline())
    }

    /// Run starting on `ctx` and report how it ended.
    pub fn unsafe_run_outcome_on(self, ctx: &ExecutionContext) -> Outcome<E, A> {
        let mut run = Run::new(ctx.clone(), Connection::new());
        Outcome::from(eval(self, &mut run))
    }

    /// Start the run on `ctx` without waiting and hand its outcome to
    /// `callback`.
    ///
    /// The returned token cancels the run. A panic inside the computation is
    /// resumed on the thread that finished it.
    pub fn unsafe_run_async<F>(self, ctx: &ExecutionContext, callback: F) -> CancelToken
    where
        F: FnOnce(Outcome<E, A>) + Send + 'static,
    {
        let conn = Connection::new();
        let handle = Arc::clone(&conn);
        crate::fiber::spawn(self, ctx.clone(), conn, move |exit| match exit {
            Ok(exit) => callback(Outcome::from(exit)),
            Err(payload) => panic::resume_unwind(payload),
        });
        CancelToken::new(move || handle.cancel())
    }

    /// Run on `ctx` from async code, using a tokio blocking thread to drive
    /// the interpreter.
    ///
    /// Must be awaited inside a tokio runtime.
    #[cfg(feature = "async")]
    pub async fn into_future(self, ctx: ExecutionContext) -> Outcome<E, A> {
        match tokio::task::spawn_blocking(move || self.unsafe_run_outcome_on(&ctx)).await {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => panic::resume_unwind(err.into_panic()),
            Err(_) => Outcome::Canceled,
        }
    }
}

impl<E, A> fmt::Debug for IO<E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.node {
            Node::Pure(_) => "Pure",
            Node::RaiseError(_) => "RaiseError",
            Node::Suspend(_) => "Suspend",
            Node::Async(_) => "Async",
            Node::Map(_) => "Map",
            Node::FlatMap(_) => "FlatMap",
            Node::HandleErrorWith(_) => "HandleErrorWith",
            Node::ContinueOn(_, _) => "ContinueOn",
            Node::Bracket(_) => "Bracket",
            Node::ParMap2(_) => "ParMap2",
            Node::ParMap3(_) => "ParMap3",
            Node::ParSequence(_) => "ParSequence",
            Node::Uncancelable(_) => "Uncancelable",
            Node::Instrument(_) => "Instrument",
        };
        f.debug_tuple("IO").field(&kind).finish()
    }
}
