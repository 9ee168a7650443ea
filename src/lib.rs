//! # Undertow
//!
//! > *What moves beneath the still surface.*
//!
//! Deferred, cancelable effects that run on plain OS threads.
//!
//! An [`IO<E, A>`] describes a computation: nothing happens until one of its
//! `unsafe_run_*` methods is called. Around that core the crate provides
//!
//! - [`ExecutionContext`]s to choose which threads run which steps,
//! - cooperative cancellation through [`cancel::Connection`]s,
//! - [`Fiber`]s, racing and timeouts in [`fiber`],
//! - [`MVar`] and [`Promise`] for coordination between fibers,
//! - retry and repeat policies with [`Schedule`].
//!
//! ## Quick Example
//!
//! ```rust
//! use std::time::Duration;
//! use undertow::prelude::*;
//!
//! let ctx = ExecutionContext::concurrent("app");
//!
//! // Resources are released however the program ends.
//! let program = IO::<String, _>::delay(|| vec![3, 4])
//!     .bracket(
//!         |_buffer| IO::unit(),
//!         |buffer| IO::pure(buffer.iter().sum::<i32>()),
//!     )
//!     .timeout(&ctx, Duration::from_secs(1));
//!
//! assert_eq!(program.unsafe_run_sync(), Ok(7));
//! ```
//!
//! ## Threads, not tasks
//!
//! Suspending operations ([`IO::sleep`], [`MVar::take`], [`Fiber::join`], ...)
//! block the OS thread that runs them. Concurrency comes from forking onto
//! contexts that own threads. The optional `async` feature bridges a run into
//! tokio with `IO::into_future`.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cancel;
pub mod cell;
pub mod concurrent;
pub mod context;
pub mod either;
pub mod error;
pub mod fiber;
pub mod io;
pub mod schedule;
mod signal;
pub mod testing;

// Re-exports
pub use cancel::{CancelToken, Connection};
pub use concurrent::{MVar, Promise, PromiseError};
pub use context::ExecutionContext;
pub use either::Either;
pub use error::{ContextError, TimeoutError};
pub use fiber::Fiber;
pub use io::{par_sequence, par_traverse, Callback, ExitCase, Outcome, IO};
pub use schedule::{Decision, RetryExhausted, Schedule};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::concurrent::{MVar, Promise};
    pub use crate::context::ExecutionContext;
    pub use crate::either::Either;
    pub use crate::error::{ContextError, TimeoutError};
    pub use crate::fiber::{race, Fiber};
    pub use crate::io::{par_sequence, ExitCase, Outcome, IO};
    pub use crate::schedule::{Decision, RetryExhausted, Schedule};
}
