//! Acquire / use / release with guaranteed cleanup.
//!
//! A bracket runs in three phases, each a frame of its own:
//!
//! 1. **Acquire** runs uncancelable. If the run is already canceled it never
//!    starts, and nothing is released.
//! 2. **Use** runs on the caller's connection. Its outcome is summarised as
//!    an [`ExitCase`].
//! 3. **Release** runs uncancelable with the resource and the exit case,
//!    then the use outcome propagates unchanged. A release that fails is
//!    logged at `warn` and otherwise ignored.
//!
//! Panics are defects: a panic in `use` unwinds past the release phase.
//!
//! # Example
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use undertow::{ExitCase, IO};
//!
//! let log = Arc::new(Mutex::new(Vec::new()));
//! let released = Arc::clone(&log);
//!
//! let result = IO::<String, _>::pure("db-connection")
//!     .bracket_case(
//!         move |conn, case| {
//!             IO::delay(move || released.lock().unwrap().push(format!("{conn}: {case:?}")))
//!         },
//!         |_conn| IO::<String, i32>::raise_error("query failed".to_string()),
//!     )
//!     .unsafe_run_sync();
//!
//! assert_eq!(result, Err("query failed".to_string()));
//! assert_eq!(
//!     *log.lock().unwrap(),
//!     vec![r#"db-connection: Error("query failed")"#.to_string()]
//! );
//! ```

use std::fmt;

use crate::cancel::Connection;
use crate::io::interpreter::{eval, Cause, Exit, Frame, Run, Step};
use crate::io::{Node, IO};

/// How the use phase of a bracket ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitCase<E> {
    /// Use produced a value.
    Completed,
    /// The run was canceled before or during use.
    Canceled,
    /// Use raised a typed error.
    Error(E),
}

impl<E> ExitCase<E> {
    /// Returns `true` for [`ExitCase::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, ExitCase::Completed)
    }

    /// Returns `true` for [`ExitCase::Canceled`].
    pub fn is_canceled(&self) -> bool {
        matches!(self, ExitCase::Canceled)
    }

    /// The error, if use failed.
    pub fn error(&self) -> Option<&E> {
        match self {
            ExitCase::Error(e) => Some(e),
            _ => None,
        }
    }
}

impl<E: Clone, A> From<&Exit<E, A>> for ExitCase<E> {
    fn from(exit: &Exit<E, A>) -> Self {
        match exit {
            Ok(_) => ExitCase::Completed,
            Err(Cause::Error(e)) => ExitCase::Error(e.clone()),
            Err(Cause::Canceled) => ExitCase::Canceled,
        }
    }
}

// ============================================================================
// Frames
// ============================================================================

pub(crate) struct Acquire<E, R, U, Rel> {
    pub(crate) acquire: IO<E, R>,
    pub(crate) use_fn: U,
    pub(crate) release: Rel,
}

impl<E, R, B, U, Rel> Frame<E, B> for Acquire<E, R, U, Rel>
where
    E: Clone + fmt::Debug + Send + 'static,
    R: Send + 'static,
    B: Send + 'static,
    U: FnOnce(&R) -> IO<E, B> + Send + 'static,
    Rel: FnOnce(R, ExitCase<E>) -> IO<E, ()> + Send + 'static,
{
    fn resume(self: Box<Self>, run: &mut Run) -> Step<E, B> {
        let Acquire {
            acquire,
            use_fn,
            release,
        } = *self;
        if run.conn.is_canceled() {
            return Step::Done(Err(Cause::Canceled));
        }

        match run.with_connection(Connection::uncancelable(), |run| eval(acquire, run)) {
            Ok(resource) => Step::Next(IO::from_node(Node::Bracket(Box::new(Use {
                resource,
                use_fn,
                release,
            })))),
            Err(cause) => Step::Done(Err(cause)),
        }
    }
}

struct Use<R, U, Rel> {
    resource: R,
    use_fn: U,
    release: Rel,
}

impl<E, R, B, U, Rel> Frame<E, B> for Use<R, U, Rel>
where
    E: Clone + fmt::Debug + Send + 'static,
    R: Send + 'static,
    B: Send + 'static,
    U: FnOnce(&R) -> IO<E, B> + Send + 'static,
    Rel: FnOnce(R, ExitCase<E>) -> IO<E, ()> + Send + 'static,
{
    fn resume(self: Box<Self>, run: &mut Run) -> Step<E, B> {
        let Use {
            resource,
            use_fn,
            release,
        } = *self;

        let exit = if run.conn.is_canceled() {
            Err(Cause::Canceled)
        } else {
            let body = use_fn(&resource);
            eval(body, run)
        };

        let case = ExitCase::from(&exit);
        Step::Next(IO::from_node(Node::Bracket(Box::new(Release {
            finalizer: IO::defer(move || release(resource, case)),
            exit,
        }))))
    }
}

struct Release<E, B> {
    finalizer: IO<E, ()>,
    exit: Exit<E, B>,
}

impl<E, B> Frame<E, B> for Release<E, B>
where
    E: fmt::Debug + Send + 'static,
    B: Send + 'static,
{
    fn resume(self: Box<Self>, run: &mut Run) -> Step<E, B> {
        let Release { finalizer, exit } = *self;
        let released = run.with_connection(Connection::uncancelable(), |run| eval(finalizer, run));
        if let Err(Cause::Error(error)) = released {
            tracing::warn!(?error, "bracket release failed, keeping use outcome");
        }
        Step::Done(exit)
    }
}

// ============================================================================
// Combinators
// ============================================================================

impl<E, A> IO<E, A>
where
    E: Clone + fmt::Debug + Send + 'static,
    A: Send + 'static,
{
    /// Use the value produced by `self` as a resource that `release` always
    /// receives, together with how `use_fn` ended.
    ///
    /// `self` is the acquire step and runs uncancelable.
    pub fn bracket_case<B, U, Rel>(self, release: Rel, use_fn: U) -> IO<E, B>
    where
        B: Send + 'static,
        U: FnOnce(&A) -> IO<E, B> + Send + 'static,
        Rel: FnOnce(A, ExitCase<E>) -> IO<E, ()> + Send + 'static,
    {
        IO::from_node(Node::Bracket(Box::new(Acquire {
            acquire: self,
            use_fn,
            release,
        })))
    }

    /// [`bracket_case`](Self::bracket_case) for releases that do not care
    /// how use ended.
    ///
    /// # Example
    ///
    /// ```rust
    /// use undertow::IO;
    ///
    /// let total = IO::<String, _>::pure(vec![1, 2, 3])
    ///     .bracket(|_buffer| IO::unit(), |buffer| IO::pure(buffer.iter().sum::<i32>()))
    ///     .unsafe_run_sync();
    /// assert_eq!(total, Ok(6));
    /// ```
    pub fn bracket<B, U, Rel>(self, release: Rel, use_fn: U) -> IO<E, B>
    where
        B: Send + 'static,
        U: FnOnce(&A) -> IO<E, B> + Send + 'static,
        Rel: FnOnce(A) -> IO<E, ()> + Send + 'static,
    {
        self.bracket_case(move |resource, _| release(resource), use_fn)
    }

    /// Run `finalizer` after `self` however it ends.
    pub fn guarantee(self, finalizer: IO<E, ()>) -> IO<E, A> {
        self.guarantee_case(move |_| finalizer)
    }

    /// Run a finalizer chosen from how `self` ended.
    pub fn guarantee_case<F>(self, finalizer: F) -> IO<E, A>
    where
        F: FnOnce(ExitCase<E>) -> IO<E, ()> + Send + 'static,
    {
        IO::unit().bracket_case(move |(), case| finalizer(case), move |_| self)
    }

    /// Run `finalizer` only if `self` is canceled.
    pub fn on_cancel(self, finalizer: IO<E, ()>) -> IO<E, A> {
        self.guarantee_case(move |case| match case {
            ExitCase::Canceled => finalizer,
            ExitCase::Completed | ExitCase::Error(_) => IO::unit(),
        })
    }
}
