use super::*;
use crate::context::ExecutionContext;
use crate::error::TimeoutError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;
use tracing_test::traced_test;

#[derive(Debug, Clone, PartialEq, Eq)]
enum AppError {
    NotFound,
    Invalid(String),
}

fn thread_name() -> String {
    thread::current().name().unwrap_or("<unnamed>").to_string()
}

fn count_down(n: u64) -> IO<String, u64> {
    if n == 0 {
        IO::pure(0)
    } else {
        IO::unit().flat_map(move |()| count_down(n - 1)).map(|m| m + 1)
    }
}

fn loop_to(n: u64, acc: u64) -> IO<String, u64> {
    IO::defer(move || {
        if n == 0 {
            IO::pure(acc)
        } else {
            IO::pure(acc + 1).flat_map(move |acc| loop_to(n - 1, acc))
        }
    })
}

// ============================================================================
// Construction and sequencing
// ============================================================================

#[test]
fn test_pure_map_attempt_yields_success() {
    let io = IO::<AppError, _>::pure(5).map(|x| x * 2).attempt::<()>();
    assert_eq!(io.unsafe_run_sync(), Ok(Ok(10)));
}

#[test]
fn test_raise_error_attempt_yields_failure_without_raising() {
    let io = IO::<_, i32>::raise_error(AppError::NotFound).attempt::<()>();
    assert_eq!(io.unsafe_run_sync(), Ok(Err(AppError::NotFound)));
}

#[test]
fn test_nothing_runs_until_the_program_is_run() {
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    let io = IO::<(), _>::delay(move || counter.fetch_add(1, Ordering::SeqCst));

    assert_eq!(ran.load(Ordering::SeqCst), 0);
    io.unsafe_run_sync().unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn test_errors_short_circuit_the_chain() {
    let reached = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reached);
    let io = IO::<AppError, i32>::raise_error(AppError::Invalid("age".into()))
        .map(|n| n + 1)
        .flat_map(move |n| {
            counter.fetch_add(1, Ordering::SeqCst);
            IO::pure(n)
        });

    assert_eq!(io.unsafe_run_sync(), Err(AppError::Invalid("age".into())));
    assert_eq!(reached.load(Ordering::SeqCst), 0);
}

#[test]
fn test_handle_error_recovers_and_may_change_error_type() {
    let recovered = IO::<AppError, i32>::raise_error(AppError::NotFound)
        .handle_error_with(|e| match e {
            AppError::NotFound => IO::<String, _>::pure(0),
            AppError::Invalid(why) => IO::raise_error(why),
        });
    assert_eq!(recovered.unsafe_run_sync(), Ok(0));

    let relabeled = IO::<AppError, i32>::raise_error(AppError::Invalid("name".into()))
        .map_err(|e| format!("{:?}", e));
    assert_eq!(relabeled.unsafe_run_sync(), Err("Invalid(\"name\")".to_string()));

    let defaulted = IO::<AppError, i32>::raise_error(AppError::NotFound).handle_error::<(), _>(|_| -1);
    assert_eq!(defaulted.unsafe_run_sync(), Ok(-1));
}

#[test]
fn test_zip_followed_by_void_and_flatten() {
    let pair = IO::<(), _>::pure(1).zip(IO::pure("one"));
    assert_eq!(pair.unsafe_run_sync(), Ok((1, "one")));

    let second = IO::<(), _>::pure(1).followed_by(IO::pure(2));
    assert_eq!(second.unsafe_run_sync(), Ok(2));

    assert_eq!(IO::<(), _>::pure(3).void().unsafe_run_sync(), Ok(()));

    let nested = IO::<(), _>::pure(IO::pure(4));
    assert_eq!(nested.flatten().unsafe_run_sync(), Ok(4));
}

#[test]
fn test_context_accumulates_a_trail() {
    let io = IO::<_, ()>::raise_error("disk full")
        .context("writing snapshot")
        .and_context("saving session");
    let err = io.unsafe_run_sync().unwrap_err();

    assert_eq!(err.inner(), &"disk full");
    assert_eq!(err.context_trail(), &["writing snapshot", "saving session"]);
}

#[test]
fn test_recursive_flat_map_is_stack_safe() {
    assert_eq!(loop_to(200_000, 0).unsafe_run_sync(), Ok(200_000));
}

#[test]
fn test_map_after_recursive_flat_map() {
    assert_eq!(count_down(200).unsafe_run_sync(), Ok(200));
}

#[test]
fn test_left_nested_map_fold_is_stack_safe() {
    let io = (0..100_000u64).fold(IO::<String, u64>::pure(0), |io, _| io.map(|n| n + 1));
    assert_eq!(io.unsafe_run_sync(), Ok(100_000));
}

#[test]
fn test_left_nested_flat_map_fold_is_stack_safe() {
    let io = (0..100_000u64).fold(IO::<String, u64>::pure(0), |io, i| {
        io.flat_map(move |n| IO::pure(n + i))
    });
    assert_eq!(io.unsafe_run_sync(), Ok((0..100_000).sum::<u64>()));
}

#[test]
fn test_error_passes_through_a_deep_map_chain() {
    let io = (0..100_000u64).fold(IO::<String, u64>::raise_error("boom".to_string()), |io, _| {
        io.map(|n| n + 1)
    });
    assert_eq!(io.unsafe_run_sync(), Err("boom".to_string()));
}

#[test]
fn test_left_nested_error_handlers_are_stack_safe() {
    let io = (0..100_000u32).fold(IO::<u32, ()>::raise_error(0), |io, _| {
        io.handle_error_with(|n| IO::raise_error(n + 1))
    });
    assert_eq!(io.unsafe_run_sync(), Err(100_000));

    let io = (0..100_000u32).fold(IO::<u32, u32>::pure(7), |io, _| io.map_err(|n| n + 1));
    assert_eq!(io.unsafe_run_sync(), Ok(7));
}

#[test]
fn test_deep_attempt_chain_alternates_success_and_failure() {
    let io = (0..50_000u32).fold(IO::<u32, u32>::pure(0), |io, _| {
        io.attempt::<u32>().flat_map(|result| match result {
            Ok(n) => IO::raise_error(n + 1),
            Err(n) => IO::pure(n + 1),
        })
    });
    assert_eq!(io.unsafe_run_sync(), Ok(50_000));
}

#[test]
fn test_cancel_unwinds_a_deep_chain() {
    let ctx = ExecutionContext::concurrent("deep-cancel");
    let (tx, rx) = std::sync::mpsc::channel();
    let io = (0..100_000u64).fold(
        IO::<(), ()>::sleep(Duration::from_secs(30)).map(|()| 0u64),
        |io, _| io.map(|n| n + 1),
    );

    let token = io.unsafe_run_async(&ctx, move |outcome| {
        let _ = tx.send(outcome);
    });
    thread::sleep(Duration::from_millis(20));
    token.run();

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Outcome::Canceled);
}

#[test]
#[should_panic(expected = "corrupted index")]
fn test_panics_are_defects_not_errors() {
    let io = IO::<AppError, i32>::delay(|| panic!("corrupted index"))
        .handle_error_with(|_| IO::<AppError, i32>::pure(0));
    let _ = io.unsafe_run_sync();
}

// ============================================================================
// Async boundaries
// ============================================================================

#[test]
fn test_async_resumes_from_another_thread() {
    let io = IO::<AppError, String>::async_(|cb| {
        thread::spawn(move || cb.call(Ok("from worker".to_string())));
    });
    assert_eq!(io.unsafe_run_sync(), Ok("from worker".to_string()));
}

#[test]
fn test_callback_first_delivery_wins() {
    let io = IO::<AppError, i32>::async_(|cb| {
        cb.success(1);
        cb.failure(AppError::NotFound);
        cb.success(2);
    });
    assert_eq!(io.unsafe_run_sync(), Ok(1));
}

#[test]
fn test_from_future_runs_to_completion() {
    let io = IO::from_future(async { Ok::<_, AppError>(21 * 2) });
    assert_eq!(io.unsafe_run_sync(), Ok(42));
}

#[test]
fn test_sleep_waits() {
    let started = Instant::now();
    IO::<(), ()>::sleep(Duration::from_millis(20))
        .unsafe_run_sync()
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(20));
}

#[test]
fn test_unbounded_sleep_only_ends_by_timeout() {
    let ctx = ExecutionContext::concurrent("sleep-forever");
    let limit = Duration::from_millis(20);
    let result = IO::<(), ()>::sleep(Duration::MAX)
        .timeout(&ctx, limit)
        .unsafe_run_sync();
    assert_eq!(result, Err(TimeoutError::Timeout { duration: limit }));
}

#[test]
fn test_unbounded_timeout_lets_the_computation_finish() {
    let ctx = ExecutionContext::concurrent("timeout-forever");
    let result = IO::<(), _>::sleep(Duration::from_millis(20))
        .map(|()| 1)
        .timeout(&ctx, Duration::MAX)
        .unsafe_run_sync();
    assert_eq!(result, Ok(1));
}

#[test]
fn test_cancel_runs_the_cancelable_token() {
    let ctx = ExecutionContext::concurrent("token-cancel");
    let aborted = Arc::new(AtomicUsize::new(0));
    let token_hits = Arc::clone(&aborted);
    let (tx, rx) = std::sync::mpsc::channel();

    let io = IO::<(), ()>::cancelable(move |_cb| {
        CancelToken::new(move || {
            token_hits.fetch_add(1, Ordering::SeqCst);
        })
    });

    let token = io.unsafe_run_async(&ctx, move |outcome| {
        let _ = tx.send(outcome);
    });
    thread::sleep(Duration::from_millis(20));
    token.run();

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Outcome::Canceled);
    assert_eq!(aborted.load(Ordering::SeqCst), 1);
}

#[test]
fn test_cancel_interrupts_sleep() {
    let ctx = ExecutionContext::concurrent("sleep-cancel");
    let (tx, rx) = std::sync::mpsc::channel();
    let token = IO::<(), ()>::sleep(Duration::from_secs(30)).unsafe_run_async(&ctx, move |outcome| {
        let _ = tx.send(outcome);
    });

    thread::sleep(Duration::from_millis(20));
    let started = Instant::now();
    token.run();

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Outcome::Canceled);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_canceled_run_stops_at_the_next_boundary() {
    let ctx = ExecutionContext::concurrent("boundary");
    let after = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&after);
    let (tx, rx) = std::sync::mpsc::channel();

    let io = IO::<(), ()>::delay(|| thread::sleep(Duration::from_millis(50)))
        .followed_by(IO::cancel_boundary())
        .followed_by(IO::delay(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

    let token = io.unsafe_run_async(&ctx, move |outcome| {
        let _ = tx.send(outcome);
    });
    token.run();

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Outcome::Canceled);
    assert_eq!(after.load(Ordering::SeqCst), 0);
}

#[test]
fn test_uncancelable_region_finishes_before_cancel_is_seen() {
    let ctx = ExecutionContext::concurrent("shielded");
    let steps = Arc::new(Mutex::new(Vec::new()));
    let (first, second) = (Arc::clone(&steps), Arc::clone(&steps));
    let (tx, rx) = std::sync::mpsc::channel();

    let io = IO::<(), ()>::sleep(Duration::from_millis(50))
        .followed_by(IO::delay(move || first.lock().push("shielded")))
        .uncancelable()
        .followed_by(IO::cancel_boundary())
        .followed_by(IO::delay(move || second.lock().push("after")));

    let token = io.unsafe_run_async(&ctx, move |outcome| {
        let _ = tx.send(outcome);
    });
    thread::sleep(Duration::from_millis(10));
    token.run();

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Outcome::Canceled);
    assert_eq!(*steps.lock(), vec!["shielded"]);
}

#[test]
fn test_cancelation_resumes_after_an_uncancelable_hop() {
    let ctx = ExecutionContext::concurrent("shield-hop");
    let workers = ExecutionContext::serial("shield-worker");
    let (tx, rx) = std::sync::mpsc::channel();

    let io = IO::<(), _>::delay(thread_name)
        .continue_on(&workers)
        .uncancelable()
        .followed_by(IO::sleep(Duration::from_secs(30)));

    let token = io.unsafe_run_async(&ctx, move |outcome| {
        let _ = tx.send(outcome);
    });
    thread::sleep(Duration::from_millis(30));
    let started = Instant::now();
    token.run();

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Outcome::Canceled);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_never_only_ends_by_cancellation() {
    let ctx = ExecutionContext::concurrent("never");
    let (tx, rx) = std::sync::mpsc::channel();
    let token = IO::<(), ()>::never().unsafe_run_async(&ctx, move |outcome| {
        let _ = tx.send(outcome);
    });

    assert!(rx.recv_timeout(Duration::from_millis(30)).is_err());
    token.run();
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Outcome::Canceled);
}

// ============================================================================
// Contexts
// ============================================================================

#[test]
fn test_continue_on_moves_the_rest_of_the_program() {
    let workers = ExecutionContext::serial("io-worker");
    let io = IO::<(), _>::delay(thread_name)
        .continue_on(&workers)
        .flat_map(|before| IO::delay(move || (before, thread_name())));

    let (before, after) = io.unsafe_run_sync().unwrap();
    assert_ne!(before, "io-worker");
    assert_eq!(after, "io-worker");
}

#[test]
fn test_run_on_context_executes_there() {
    let ctx = ExecutionContext::serial("pinned");
    let name = IO::<(), _>::delay(thread_name).unsafe_run_sync_on(&ctx);
    assert_eq!(name, Ok("pinned".to_string()));
}

// ============================================================================
// Parallel composition
// ============================================================================

#[test]
fn test_par_map2_combines_values() {
    let sum = IO::par_map2(IO::<AppError, _>::pure(1), IO::pure(2), |a, b| a + b);
    assert_eq!(sum.unsafe_run_sync(), Ok(3));
}

#[test]
fn test_par_map2_raises_the_error_instead_of_combining() {
    let sum = IO::par_map2(
        IO::<AppError, i32>::pure(1),
        IO::<AppError, i32>::raise_error(AppError::Invalid("y".into())),
        |a, b| a + b,
    );
    assert_eq!(sum.unsafe_run_sync(), Err(AppError::Invalid("y".into())));
}

#[test]
fn test_par_map2_runs_branches_concurrently() {
    let started = Instant::now();
    let both = IO::par_map2(
        IO::<(), _>::sleep(Duration::from_millis(100)).map(|()| 1),
        IO::sleep(Duration::from_millis(100)).map(|()| 2),
        |a, b| a + b,
    );
    assert_eq!(both.unsafe_run_sync(), Ok(3));
    assert!(started.elapsed() < Duration::from_millis(190));
}

#[test]
fn test_par_map2_failure_cancels_the_sibling() {
    let released = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&released);
    let slow = IO::<AppError, ()>::unit().bracket_case(
        move |(), case| IO::delay(move || log.lock().push(case)),
        |_| IO::sleep(Duration::from_secs(30)).map(|()| 1),
    );
    let failing = IO::sleep(Duration::from_millis(10))
        .followed_by(IO::<AppError, i32>::raise_error(AppError::NotFound));

    let started = Instant::now();
    let result = IO::par_map2(slow, failing, |a, b| a + b).unsafe_run_sync();

    assert_eq!(result, Err(AppError::NotFound));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(*released.lock(), vec![ExitCase::Canceled]);
}

#[test]
fn test_par_map3_and_par_zip() {
    let three = IO::par_map3(
        IO::<(), _>::pure(1),
        IO::pure(2),
        IO::pure(3),
        |a, b, c| a + b + c,
    );
    assert_eq!(three.unsafe_run_sync(), Ok(6));

    let zipped = IO::<(), _>::pure("left").par_zip(IO::pure("right"));
    assert_eq!(zipped.unsafe_run_sync(), Ok(("left", "right")));
}

#[test]
fn test_par_sequence_keeps_input_order() {
    let branches = (0..5u64)
        .map(|i| IO::<(), _>::sleep(Duration::from_millis(25 - 5 * i)).map(move |()| i))
        .collect();
    assert_eq!(par_sequence(branches).unsafe_run_sync(), Ok(vec![0, 1, 2, 3, 4]));

    let empty: Vec<IO<(), i32>> = Vec::new();
    assert_eq!(par_sequence(empty).unsafe_run_sync(), Ok(vec![]));
}

#[test]
fn test_par_traverse_reports_first_failure() {
    let result = par_traverse(vec![1, 2, 3], |n| {
        if n == 2 {
            IO::raise_error(AppError::Invalid(n.to_string()))
        } else {
            IO::pure(n * 10)
        }
    });
    assert_eq!(result.unsafe_run_sync(), Err(AppError::Invalid("2".into())));
}

#[test]
#[should_panic(expected = "branch exploded")]
fn test_panic_in_branch_reaches_the_caller() {
    let io = IO::par_map2(
        IO::<(), i32>::delay(|| panic!("branch exploded")),
        IO::pure(1),
        |a, b| a + b,
    );
    let _ = io.unsafe_run_sync();
}

// ============================================================================
// Bracket
// ============================================================================

fn tracked_bracket<B>(
    released: &Arc<Mutex<Vec<ExitCase<AppError>>>>,
    use_fn: impl FnOnce(&u32) -> IO<AppError, B> + Send + 'static,
) -> IO<AppError, B>
where
    B: Send + 'static,
{
    let log = Arc::clone(released);
    IO::pure(7u32).bracket_case(move |_, case| IO::delay(move || log.lock().push(case)), use_fn)
}

#[test]
fn test_bracket_releases_once_on_success() {
    let released = Arc::new(Mutex::new(Vec::new()));
    let result = tracked_bracket(&released, |r| IO::pure(*r * 2)).unsafe_run_sync();

    assert_eq!(result, Ok(14));
    assert_eq!(*released.lock(), vec![ExitCase::Completed]);
}

#[test]
fn test_bracket_releases_once_on_error() {
    let released = Arc::new(Mutex::new(Vec::new()));
    let result = tracked_bracket(&released, |_| IO::<AppError, ()>::raise_error(AppError::NotFound))
        .unsafe_run_sync();

    assert_eq!(result, Err(AppError::NotFound));
    assert_eq!(*released.lock(), vec![ExitCase::Error(AppError::NotFound)]);
}

#[test]
fn test_bracket_releases_once_on_cancel() {
    let ctx = ExecutionContext::concurrent("bracket-cancel");
    let released = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = std::sync::mpsc::channel();

    let token = tracked_bracket(&released, |_| IO::<AppError, ()>::never())
        .unsafe_run_async(&ctx, move |outcome| {
            let _ = tx.send(outcome);
        });
    thread::sleep(Duration::from_millis(20));
    token.run();

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Outcome::Canceled);
    assert_eq!(*released.lock(), vec![ExitCase::Canceled]);
}

#[test]
fn test_failed_release_does_not_hide_use_outcome() {
    let result = IO::<String, _>::pure(1)
        .bracket(|_| IO::raise_error("release failed".to_string()), |n| IO::pure(*n + 1))
        .unsafe_run_sync();
    assert_eq!(result, Ok(2));
}

#[test]
fn test_guarantee_and_on_cancel() {
    let hits = Arc::new(AtomicUsize::new(0));
    let (a, b) = (Arc::clone(&hits), Arc::clone(&hits));

    let guarded = IO::<(), _>::pure(1).guarantee(IO::delay(move || {
        a.fetch_add(1, Ordering::SeqCst);
    }));
    assert_eq!(guarded.unsafe_run_sync(), Ok(1));

    let only_on_cancel = IO::<(), _>::pure(2).on_cancel(IO::delay(move || {
        b.fetch_add(100, Ordering::SeqCst);
    }));
    assert_eq!(only_on_cancel.unsafe_run_sync(), Ok(2));

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_guarantee_case_sees_error() {
    let seen = Arc::new(Mutex::new(None));
    let log = Arc::clone(&seen);
    let result = IO::<AppError, ()>::raise_error(AppError::NotFound)
        .guarantee_case(move |case| IO::delay(move || *log.lock() = Some(case)))
        .unsafe_run_sync();

    assert_eq!(result, Err(AppError::NotFound));
    assert_eq!(*seen.lock(), Some(ExitCase::Error(AppError::NotFound)));
}

// ============================================================================
// Observability
// ============================================================================

#[test]
#[traced_test]
fn test_instrument_enters_the_span() {
    let io = IO::<(), _>::delay(|| {
        tracing::info!("inside the span");
        5
    })
    .instrument(tracing::info_span!("load_profile", user_id = 42));

    assert_eq!(io.unsafe_run_sync(), Ok(5));
    assert!(logs_contain("load_profile"));
    assert!(logs_contain("inside the span"));
}

#[test]
#[traced_test]
fn test_failed_release_is_logged() {
    let _ = IO::<String, _>::pure(())
        .bracket(|()| IO::raise_error("socket already closed".to_string()), |()| IO::unit())
        .unsafe_run_sync();
    assert!(logs_contain("socket already closed"));
}

#[test]
fn test_debug_names_the_node() {
    assert_eq!(format!("{:?}", IO::<(), _>::pure(1)), "IO(\"Pure\")");
}
