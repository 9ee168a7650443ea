//! Integration tests for retrying and repeating with schedules.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use undertow::schedule::{self, Schedule};
use undertow::{ExecutionContext, TimeoutError, IO};

#[derive(Debug, Clone, PartialEq)]
enum FetchError {
    Unavailable(u32),
    Rejected,
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Unavailable(call) => write!(f, "service unavailable (call {})", call),
            FetchError::Rejected => write!(f, "request rejected"),
        }
    }
}

/// Print schedule decisions when a test fails.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// A service that is unavailable for the first `outages` calls.
fn service(outages: u32, calls: &Arc<AtomicU32>) -> impl Fn() -> IO<FetchError, &'static str> + Send + Sync + 'static {
    let calls = Arc::clone(calls);
    move || {
        let calls = Arc::clone(&calls);
        IO::invoke(move || {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= outages {
                Err(FetchError::Unavailable(call))
            } else {
                Ok("payload")
            }
        })
    }
}

#[test]
fn exponential_backoff_bounded_by_recurs() {
    init_tracing();
    let calls = Arc::new(AtomicU32::new(0));
    let policy = Schedule::exponential(Duration::from_millis(2), 2.0).and(Schedule::recurs(5));

    let started = Instant::now();
    let result = schedule::retry(service(3, &calls), policy).unsafe_run_sync();

    assert_eq!(result, Ok("payload"));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    // 4ms + 8ms + 16ms of backoff
    assert!(started.elapsed() >= Duration::from_millis(28));
}

#[test]
fn retry_gives_up_with_the_last_error() {
    init_tracing();
    let calls = Arc::new(AtomicU32::new(0));
    let policy = Schedule::spaced(Duration::from_millis(1)).and(Schedule::recurs(2));

    let exhausted = schedule::retry(service(10, &calls), policy)
        .unsafe_run_sync()
        .unwrap_err();

    assert_eq!(exhausted.attempts, 3);
    assert_eq!(exhausted.final_error, FetchError::Unavailable(3));
    assert_eq!(exhausted.retries(), 2);
    assert!(exhausted.to_string().starts_with("schedule stopped after 3 attempts"));
}

#[test]
fn retry_stops_on_errors_that_are_not_transient() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let policy = Schedule::<FetchError, FetchError, _, _>::forever()
        .while_input(|e| matches!(e, FetchError::Unavailable(_)));

    let result = schedule::retry(
        move || {
            let counter = Arc::clone(&counter);
            IO::invoke(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(FetchError::Rejected)
            })
        },
        policy,
    )
    .unsafe_run_sync();

    assert_eq!(result.unwrap_err().final_error, FetchError::Rejected);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn repeat_polls_until_ready() {
    let polls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&polls);
    let poll = move || {
        let counter = Arc::clone(&counter);
        IO::<String, _>::delay(move || counter.fetch_add(1, Ordering::SeqCst) + 1)
    };
    let until_ready = Schedule::identity()
        .until_output(|progress: &u32| *progress >= 5)
        .add_delay(|_| Duration::from_millis(1));

    assert_eq!(schedule::repeat(poll, until_ready).unsafe_run_sync(), Ok(5));
    assert_eq!(polls.load(Ordering::SeqCst), 5);
}

#[test]
fn retry_inside_a_timeout_is_canceled_mid_backoff() {
    let ctx = ExecutionContext::concurrent("retry-timeout");
    let calls = Arc::new(AtomicU32::new(0));
    let limit = Duration::from_millis(50);

    let started = Instant::now();
    let result = schedule::retry(service(u32::MAX, &calls), Schedule::spaced(Duration::from_secs(10)))
        .timeout(&ctx, limit)
        .unsafe_run_sync();

    assert_eq!(result.unwrap_err(), TimeoutError::Timeout { duration: limit });
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn retry_or_else_falls_back_to_a_cached_value() {
    let calls = Arc::new(AtomicU32::new(0));
    let result = schedule::retry_or_else(
        service(10, &calls),
        Schedule::recurs(1),
        |error, attempts| {
            assert_eq!(error, FetchError::Unavailable(2));
            assert_eq!(attempts, Some(1));
            IO::pure("cached")
        },
    )
    .unsafe_run_sync();

    assert_eq!(result, Ok("cached"));
}
