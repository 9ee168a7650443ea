//! Running actions under a schedule.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::io::IO;
use crate::schedule::{Decision, RetryExhausted, Schedule};

/// Wait between attempts. A zero delay still checks for cancellation.
fn pause<E: Send + 'static>(delay: Duration) -> IO<E, ()> {
    if delay.is_zero() {
        IO::cancel_boundary()
    } else {
        IO::sleep(delay)
    }
}

/// Run `make()` once, then again each time the schedule continues.
///
/// Each value is fed to the schedule. When it stops, the output for the
/// last value is returned. Errors from the action or the schedule end the
/// loop immediately.
///
/// ```rust
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
/// use undertow::schedule::{self, Schedule};
/// use undertow::IO;
///
/// let runs = Arc::new(AtomicU32::new(0));
/// let counter = Arc::clone(&runs);
/// let repeated = schedule::repeat(
///     move || {
///         let counter = Arc::clone(&counter);
///         IO::<(), _>::delay(move || counter.fetch_add(1, Ordering::SeqCst))
///     },
///     Schedule::recurs(3),
/// );
///
/// assert_eq!(repeated.unsafe_run_sync(), Ok(3));
/// assert_eq!(runs.load(Ordering::SeqCst), 4);
/// ```
pub fn repeat<E, A, S, O, F>(make: F, schedule: Schedule<E, A, S, O>) -> IO<E, O>
where
    E: Send + 'static,
    A: Send + 'static,
    S: Send + 'static,
    O: Send + 'static,
    F: Fn() -> IO<E, A> + Send + Sync + 'static,
{
    let make = Arc::new(make);
    schedule
        .initial()
        .flat_map(move |state| repeat_from(make, schedule, state, 1))
}

fn repeat_from<E, A, S, O, F>(
    make: Arc<F>,
    schedule: Schedule<E, A, S, O>,
    state: S,
    iteration: u32,
) -> IO<E, O>
where
    E: Send + 'static,
    A: Send + 'static,
    S: Send + 'static,
    O: Send + 'static,
    F: Fn() -> IO<E, A> + Send + Sync + 'static,
{
    make().flat_map(move |value| {
        schedule
            .update(&value, &state)
            .flat_map(move |decision| match decision {
                Decision::Continue { state: next, delay } => {
                    tracing::debug!(iteration, ?delay, "repeating");
                    pause(delay).flat_map(move |_| {
                        repeat_from(make, schedule, next, iteration.saturating_add(1))
                    })
                }
                Decision::Done => {
                    tracing::debug!(iteration, "repeat finished");
                    IO::pure(schedule.extract(&value, &state))
                }
            })
    })
}

/// Why the retry loop gave up.
struct Exhausted<E, O> {
    error: E,
    /// `None` when the schedule itself failed.
    output: Option<O>,
    attempts: u32,
    elapsed: Duration,
}

/// Retry loop that reports exhaustion as a value so callers pick the
/// error type.
fn run_retries<E, E2, A, S, O, F>(
    make: F,
    schedule: Schedule<E, E, S, O>,
) -> IO<E2, Result<A, Exhausted<E, O>>>
where
    E: Send + 'static,
    E2: Send + 'static,
    A: Send + 'static,
    S: Send + 'static,
    O: Send + 'static,
    F: Fn() -> IO<E, A> + Send + Sync + 'static,
{
    let make = Arc::new(make);
    IO::defer(move || {
        let started = Instant::now();
        schedule
            .initial()
            .attempt::<E2>()
            .flat_map(move |initial| match initial {
                Ok(state) => attempt_from(make, schedule, state, 1, started),
                Err(error) => IO::pure(Err(Exhausted {
                    error,
                    output: None,
                    attempts: 0,
                    elapsed: started.elapsed(),
                })),
            })
    })
}

fn attempt_from<E, E2, A, S, O, F>(
    make: Arc<F>,
    schedule: Schedule<E, E, S, O>,
    state: S,
    attempt: u32,
    started: Instant,
) -> IO<E2, Result<A, Exhausted<E, O>>>
where
    E: Send + 'static,
    E2: Send + 'static,
    A: Send + 'static,
    S: Send + 'static,
    O: Send + 'static,
    F: Fn() -> IO<E, A> + Send + Sync + 'static,
{
    make().attempt::<E2>().flat_map(move |result| {
        let error = match result {
            Ok(value) => return IO::pure(Ok(value)),
            Err(error) => error,
        };
        schedule
            .update(&error, &state)
            .attempt::<E2>()
            .flat_map(move |decision| match decision {
                Ok(Decision::Continue { state: next, delay }) => {
                    tracing::debug!(attempt, ?delay, "attempt failed, retrying");
                    pause(delay).flat_map(move |_| {
                        attempt_from(make, schedule, next, attempt.saturating_add(1), started)
                    })
                }
                Ok(Decision::Done) => {
                    let output = schedule.extract(&error, &state);
                    tracing::debug!(attempts = attempt, "retries exhausted");
                    IO::pure(Err(Exhausted {
                        error,
                        output: Some(output),
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    }))
                }
                Err(schedule_error) => {
                    tracing::debug!(attempts = attempt, "schedule failed, giving up");
                    IO::pure(Err(Exhausted {
                        error: schedule_error,
                        output: None,
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    }))
                }
            })
    })
}

/// Run `make()` until it succeeds or the schedule stops.
///
/// Each error is fed to the schedule. Giving up raises [`RetryExhausted`]
/// with the last error, the number of attempts and the time spent.
pub fn retry<E, A, S, O, F>(make: F, schedule: Schedule<E, E, S, O>) -> IO<RetryExhausted<E>, A>
where
    E: Send + 'static,
    A: Send + 'static,
    S: Send + 'static,
    O: Send + 'static,
    F: Fn() -> IO<E, A> + Send + Sync + 'static,
{
    run_retries(make, schedule).flat_map(|result| {
        IO::from_result(result.map_err(|exhausted| {
            RetryExhausted::new(exhausted.error, exhausted.attempts, exhausted.elapsed)
        }))
    })
}

/// Like [`retry`], but hand the last error and the schedule's output to
/// `fallback` instead of failing.
///
/// The output is `None` when the schedule itself failed.
pub fn retry_or_else<E, A, S, O, F, G>(
    make: F,
    schedule: Schedule<E, E, S, O>,
    fallback: G,
) -> IO<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
    S: Send + 'static,
    O: Send + 'static,
    F: Fn() -> IO<E, A> + Send + Sync + 'static,
    G: FnOnce(E, Option<O>) -> IO<E, A> + Send + 'static,
{
    run_retries(make, schedule).flat_map(move |result| match result {
        Ok(value) => IO::pure(value),
        Err(exhausted) => fallback(exhausted.error, exhausted.output),
    })
}
