//! Retry and repeat policies.
//!
//! A [`Schedule<E, I, S, O>`] consumes inputs of type `I` (errors when
//! retrying, values when repeating), threads a state `S` through effectful
//! updates, and exposes an output `O`. Each update returns a [`Decision`]:
//! continue with a new state after a delay, or stop.
//!
//! Schedules are values: they describe policy and never run anything
//! themselves. The drivers [`repeat`], [`retry`] and [`retry_or_else`] run
//! an action under a schedule, sleeping with [`IO::sleep`] between attempts
//! so a canceled run stops waiting immediately.
//!
//! # Example
//!
//! ```rust
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use undertow::schedule::{self, Schedule};
//! use undertow::IO;
//!
//! let calls = Arc::new(AtomicU32::new(0));
//! let counter = Arc::clone(&calls);
//!
//! let policy = Schedule::exponential(Duration::from_millis(1), 2.0)
//!     .and(Schedule::recurs(5));
//!
//! let result = schedule::retry(
//!     move || {
//!         let counter = Arc::clone(&counter);
//!         IO::invoke(move || {
//!             if counter.fetch_add(1, Ordering::SeqCst) < 2 {
//!                 Err("flaky")
//!             } else {
//!                 Ok("connected")
//!             }
//!         })
//!     },
//!     policy,
//! )
//! .unsafe_run_sync();
//!
//! assert_eq!(result, Ok("connected"));
//! assert_eq!(calls.load(Ordering::SeqCst), 3);
//! ```

mod combinators;
mod driver;
mod error;


pub use driver::{repeat, retry, retry_or_else};
pub use error::RetryExhausted;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::io::IO;

/// What a schedule wants after seeing an input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision<S> {
    /// Go again after `delay`, carrying `state`.
    Continue {
        /// State for the next update.
        state: S,
        /// How long to wait before the next attempt.
        delay: Duration,
    },
    /// Stop.
    Done,
}

impl<S> Decision<S> {
    /// Continue immediately.
    pub fn now(state: S) -> Self {
        Decision::Continue {
            state,
            delay: Duration::ZERO,
        }
    }

    /// Continue after `delay`.
    pub fn after(state: S, delay: Duration) -> Self {
        Decision::Continue { state, delay }
    }

    /// Returns `true` for [`Decision::Continue`].
    pub fn is_continue(&self) -> bool {
        matches!(self, Decision::Continue { .. })
    }

    /// The delay, if continuing.
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Decision::Continue { delay, .. } => Some(*delay),
            Decision::Done => None,
        }
    }

    /// Transform the carried state, keeping the delay.
    pub fn map_state<S2>(self, f: impl FnOnce(S) -> S2) -> Decision<S2> {
        match self {
            Decision::Continue { state, delay } => Decision::Continue {
                state: f(state),
                delay,
            },
            Decision::Done => Decision::Done,
        }
    }
}

pub(crate) type InitialFn<E, S> = Arc<dyn Fn() -> IO<E, S> + Send + Sync>;
pub(crate) type ExtractFn<I, S, O> = Arc<dyn Fn(&I, &S) -> O + Send + Sync>;
pub(crate) type UpdateFn<E, I, S> = Arc<dyn Fn(&I, &S) -> IO<E, Decision<S>> + Send + Sync>;

/// A recurrence policy over inputs `I` with state `S` and output `O`.
///
/// Cloning is cheap; the three functions are shared.
pub struct Schedule<E, I, S, O> {
    initial: InitialFn<E, S>,
    extract: ExtractFn<I, S, O>,
    update: UpdateFn<E, I, S>,
}

impl<E, I, S, O> Clone for Schedule<E, I, S, O> {
    fn clone(&self) -> Self {
        Schedule {
            initial: Arc::clone(&self.initial),
            extract: Arc::clone(&self.extract),
            update: Arc::clone(&self.update),
        }
    }
}

impl<E, I, S, O> fmt::Debug for Schedule<E, I, S, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schedule")
            .field("state", &std::any::type_name::<S>())
            .field("output", &std::any::type_name::<O>())
            .finish()
    }
}

impl<E, I, S, O> Schedule<E, I, S, O>
where
    E: Send + 'static,
    I: 'static,
    S: Send + 'static,
    O: 'static,
{
    /// Build a schedule from its three functions.
    pub fn new<Init, Ext, Upd>(initial: Init, extract: Ext, update: Upd) -> Self
    where
        Init: Fn() -> IO<E, S> + Send + Sync + 'static,
        Ext: Fn(&I, &S) -> O + Send + Sync + 'static,
        Upd: Fn(&I, &S) -> IO<E, Decision<S>> + Send + Sync + 'static,
    {
        Schedule {
            initial: Arc::new(initial),
            extract: Arc::new(extract),
            update: Arc::new(update),
        }
    }

    /// Build a schedule whose state starts at `initial` and whose update
    /// cannot fail.
    pub fn pure<Ext, Upd>(initial: S, extract: Ext, update: Upd) -> Self
    where
        S: Clone + Sync,
        Ext: Fn(&I, &S) -> O + Send + Sync + 'static,
        Upd: Fn(&I, &S) -> Decision<S> + Send + Sync + 'static,
    {
        Schedule::new(
            move || IO::pure(initial.clone()),
            extract,
            move |input, state| IO::pure(update(input, state)),
        )
    }

    /// The starting state.
    pub fn initial(&self) -> IO<E, S> {
        (self.initial)()
    }

    /// Decide what to do after `input`, given the current state.
    pub fn update(&self, input: &I, state: &S) -> IO<E, Decision<S>> {
        (self.update)(input, state)
    }

    /// The output for `input` and `state`.
    pub fn extract(&self, input: &I, state: &S) -> O {
        (self.extract)(input, state)
    }
}

// ============================================================================
// Constructors
// ============================================================================

/// `base * factor^exponent`, saturating instead of panicking.
fn scale(base: Duration, factor: f64, exponent: u32) -> Duration {
    let secs = base.as_secs_f64() * factor.powi(exponent.min(i32::MAX as u32) as i32);
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

impl<E, I> Schedule<E, I, u32, u32>
where
    E: Send + 'static,
    I: 'static,
{
    /// Continue forever without delay, outputting the number of
    /// repetitions so far.
    pub fn forever() -> Self {
        Schedule::pure(0, |_, n| *n, |_, n| Decision::now(n.saturating_add(1)))
    }

    /// Continue exactly `n` times, then stop. Outputs the repetition count.
    ///
    /// ```rust
    /// use undertow::schedule::{Decision, Schedule};
    ///
    /// let three: Schedule<(), (), u32, u32> = Schedule::recurs(3);
    /// let decide = |n: u32| three.update(&(), &n).unsafe_run_sync().unwrap();
    ///
    /// assert!(decide(0).is_continue());
    /// assert!(decide(2).is_continue());
    /// assert_eq!(decide(3), Decision::Done);
    /// ```
    pub fn recurs(n: u32) -> Self {
        Schedule::pure(
            0,
            |_, count| *count,
            move |_, count| {
                if *count < n {
                    Decision::now(count + 1)
                } else {
                    Decision::Done
                }
            },
        )
    }

    /// Continue forever, waiting `interval` each time.
    pub fn spaced(interval: Duration) -> Self {
        Schedule::pure(
            0,
            |_, n| *n,
            move |_, n| Decision::after(n.saturating_add(1), interval),
        )
    }
}

impl<E, I> Schedule<E, I, u32, ()>
where
    E: Send + 'static,
    I: 'static,
{
    /// Continue once.
    pub fn once() -> Self {
        Schedule::recurs(1).map(|_| ())
    }
}

impl<E, I> Schedule<E, I, (), I>
where
    E: Send + 'static,
    I: Clone + 'static,
{
    /// Continue forever, outputting the latest input.
    pub fn identity() -> Self {
        Schedule::pure((), |input: &I, _| input.clone(), |_, _| Decision::now(()))
    }
}

impl<E, I> Schedule<E, I, u32, Duration>
where
    E: Send + 'static,
    I: 'static,
{
    /// Continue forever; the n-th repetition (from zero) waits
    /// `base * factor^(n+1)`. Outputs the most recent delay.
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use undertow::schedule::Schedule;
    ///
    /// let backoff: Schedule<(), (), u32, Duration> =
    ///     Schedule::exponential(Duration::from_secs(1), 2.0);
    /// let delay = |n: u32| backoff.update(&(), &n).unsafe_run_sync().unwrap().delay();
    ///
    /// assert_eq!(delay(0), Some(Duration::from_secs(2)));
    /// assert_eq!(delay(1), Some(Duration::from_secs(4)));
    /// assert_eq!(delay(2), Some(Duration::from_secs(8)));
    /// ```
    pub fn exponential(base: Duration, factor: f64) -> Self {
        Schedule::pure(
            0,
            move |_, n| {
                if *n == 0 {
                    Duration::ZERO
                } else {
                    scale(base, factor, *n)
                }
            },
            move |_, n| Decision::after(n.saturating_add(1), scale(base, factor, n.saturating_add(1))),
        )
    }

    /// Continue forever; the n-th repetition waits `base * (n+1)`.
    pub fn linear(base: Duration) -> Self {
        Schedule::pure(
            0,
            move |_, n| base.saturating_mul(*n),
            move |_, n| {
                let next = n.saturating_add(1);
                Decision::after(next, base.saturating_mul(next))
            },
        )
    }
}

impl<E, I> Schedule<E, I, (Duration, Duration), Duration>
where
    E: Send + 'static,
    I: 'static,
{
    /// Continue forever with Fibonacci delays: `base`, `base`, `2 * base`,
    /// `3 * base`, `5 * base`, ... Outputs the most recent delay.
    pub fn fibonacci(base: Duration) -> Self {
        Schedule::pure(
            (base, base),
            |_, (a, b)| b.saturating_sub(*a),
            |_, (a, b)| Decision::after((*b, a.saturating_add(*b)), *a),
        )
    }
}
