//! Racing computations against each other.
//!
//! Every racer is forked onto the given context as a fiber. The first one to
//! stop claims the race; the others keep running and are either handed back
//! as live [`Fiber`]s ([`race_pair`], [`race_triple`]) or canceled before the
//! result is returned ([`race`], [`race3`], [`IO::timeout`]). While the race
//! is pending, canceling the caller cancels every racer.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::cell::AtomicCell;
use crate::context::ExecutionContext;
use crate::either::Either;
use crate::error::TimeoutError;
use crate::fiber::{spawn, Fiber, FiberInner};
use crate::io::interpreter::{Cause, Exit};
use crate::io::{Callback, IO};

/// Result of [`race_triple`]: the winner's value and the two live losers.
#[derive(Debug)]
pub enum RaceTriple<E, A, B, C> {
    /// The first racer won.
    First(A, Fiber<E, B>, Fiber<E, C>),
    /// The second racer won.
    Second(Fiber<E, A>, B, Fiber<E, C>),
    /// The third racer won.
    Third(Fiber<E, A>, Fiber<E, B>, C),
}

/// The winner of [`race3`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OneOf3<A, B, C> {
    /// Value of the first racer.
    First(A),
    /// Value of the second racer.
    Second(B),
    /// Value of the third racer.
    Third(C),
}

/// Index of the racer that stopped first.
type Claim = Arc<AtomicCell<Option<usize>>>;

fn claim(race: &Claim, index: usize) -> bool {
    let current = race.get();
    current.is_none() && race.compare_and_set(&current, Some(index))
}

/// Fork one racer. The winner delivers `wrap(result)` to `cb`; a loser
/// records its exit on its own fiber.
fn fork_racer<E, X, W, F>(
    io: IO<E, X>,
    ctx: &ExecutionContext,
    index: usize,
    race: &Claim,
    fiber: &Arc<FiberInner<E, X>>,
    cb: Callback<E, W>,
    wrap: F,
) where
    E: Send + 'static,
    X: Send + 'static,
    W: Send + 'static,
    F: FnOnce(Result<X, E>) -> W + Send + 'static,
{
    let race = Arc::clone(race);
    let loser = Arc::clone(fiber);
    spawn(
        io,
        ctx.clone(),
        Arc::clone(&fiber.conn),
        move |delivery: thread::Result<Exit<E, X>>| {
            if !claim(&race, index) {
                loser.complete(delivery);
                return;
            }
            tracing::debug!(racer = index, "race won");
            match delivery {
                Ok(Ok(value)) => cb.success(wrap(Ok(value))),
                Ok(Err(Cause::Error(error))) => cb.success(wrap(Err(error))),
                Ok(Err(Cause::Canceled)) => cb.interrupt(),
                Err(payload) => cb.settle(Err(payload)),
            }
        },
    );
}

type PairResult<E, A, B> = Either<(Result<A, E>, Fiber<E, B>), (Fiber<E, A>, Result<B, E>)>;

/// Race two computations, capturing the winner's typed error as a value.
fn race_pair_settled<E, A, B>(ctx: &ExecutionContext, fa: IO<E, A>, fb: IO<E, B>) -> IO<E, PairResult<E, A, B>>
where
    E: Send + 'static,
    A: Send + 'static,
    B: Send + 'static,
{
    let ctx = ctx.clone();
    IO::from_registration(move |cb| {
        let race: Claim = Arc::new(AtomicCell::new(None));
        let a = FiberInner::new();
        let b = FiberInner::new();

        let b_loses = Arc::clone(&b);
        fork_racer(fa, &ctx, 0, &race, &a, cb.clone(), move |r| {
            Either::Left((r, Fiber::from_inner(b_loses)))
        });
        let a_loses = Arc::clone(&a);
        fork_racer(fb, &ctx, 1, &race, &b, cb.clone(), move |r| {
            Either::Right((Fiber::from_inner(a_loses), r))
        });

        Some(CancelToken::new(move || {
            a.conn.cancel();
            b.conn.cancel();
            cb.interrupt();
        }))
    })
}

/// A three-way race with the winner's typed error still captured.
enum Settled3<E, A, B, C> {
    First(Result<A, E>, Fiber<E, B>, Fiber<E, C>),
    Second(Fiber<E, A>, Result<B, E>, Fiber<E, C>),
    Third(Fiber<E, A>, Fiber<E, B>, Result<C, E>),
}

fn race_triple_settled<E, A, B, C>(
    ctx: &ExecutionContext,
    fa: IO<E, A>,
    fb: IO<E, B>,
    fc: IO<E, C>,
) -> IO<E, Settled3<E, A, B, C>>
where
    E: Send + 'static,
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
{
    let ctx = ctx.clone();
    IO::from_registration(move |cb| {
        let race: Claim = Arc::new(AtomicCell::new(None));
        let a = FiberInner::new();
        let b = FiberInner::new();
        let c = FiberInner::new();

        let (b1, c1) = (Arc::clone(&b), Arc::clone(&c));
        fork_racer(fa, &ctx, 0, &race, &a, cb.clone(), move |r| {
            Settled3::First(r, Fiber::from_inner(b1), Fiber::from_inner(c1))
        });
        let (a2, c2) = (Arc::clone(&a), Arc::clone(&c));
        fork_racer(fb, &ctx, 1, &race, &b, cb.clone(), move |r| {
            Settled3::Second(Fiber::from_inner(a2), r, Fiber::from_inner(c2))
        });
        let (a3, b3) = (Arc::clone(&a), Arc::clone(&b));
        fork_racer(fc, &ctx, 2, &race, &c, cb.clone(), move |r| {
            Settled3::Third(Fiber::from_inner(a3), Fiber::from_inner(b3), r)
        });

        Some(CancelToken::new(move || {
            a.conn.cancel();
            b.conn.cancel();
            c.conn.cancel();
            cb.interrupt();
        }))
    })
}

/// Race `fa` against `fb` on `ctx`, returning the winner's value and the
/// loser as a live fiber.
///
/// If the winner fails its error is raised and the loser is left running.
pub fn race_pair<E, A, B>(
    ctx: &ExecutionContext,
    fa: IO<E, A>,
    fb: IO<E, B>,
) -> IO<E, Either<(A, Fiber<E, B>), (Fiber<E, A>, B)>>
where
    E: Send + 'static,
    A: Send + 'static,
    B: Send + 'static,
{
    race_pair_settled(ctx, fa, fb).flat_map(|settled| match settled {
        Either::Left((Ok(a), loser)) => IO::pure(Either::Left((a, loser))),
        Either::Right((loser, Ok(b))) => IO::pure(Either::Right((loser, b))),
        Either::Left((Err(e), _)) | Either::Right((_, Err(e))) => IO::raise_error(e),
    })
}

/// Race `fa` against `fb` on `ctx`; the loser is canceled before the
/// winner's value or error is returned.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use undertow::context::ExecutionContext;
/// use undertow::either::Either;
/// use undertow::{fiber, IO};
///
/// let ctx = ExecutionContext::concurrent("race");
/// let fast = IO::<String, _>::sleep(Duration::from_millis(5)).map(|()| "fast");
/// let slow = IO::sleep(Duration::from_secs(10)).map(|()| 10);
///
/// let winner = fiber::race(&ctx, fast, slow).unsafe_run_sync();
/// assert_eq!(winner, Ok(Either::Left("fast")));
/// ```
pub fn race<E, A, B>(ctx: &ExecutionContext, fa: IO<E, A>, fb: IO<E, B>) -> IO<E, Either<A, B>>
where
    E: Send + 'static,
    A: Send + 'static,
    B: Send + 'static,
{
    race_pair_settled(ctx, fa, fb).flat_map(|settled| match settled {
        Either::Left((result, loser)) => loser
            .cancel()
            .followed_by(IO::from_result(result.map(Either::Left))),
        Either::Right((loser, result)) => loser
            .cancel()
            .followed_by(IO::from_result(result.map(Either::Right))),
    })
}

/// Three-way [`race_pair`].
pub fn race_triple<E, A, B, C>(
    ctx: &ExecutionContext,
    fa: IO<E, A>,
    fb: IO<E, B>,
    fc: IO<E, C>,
) -> IO<E, RaceTriple<E, A, B, C>>
where
    E: Send + 'static,
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
{
    race_triple_settled(ctx, fa, fb, fc).flat_map(|settled| match settled {
        Settled3::First(Ok(a), b, c) => IO::pure(RaceTriple::First(a, b, c)),
        Settled3::Second(a, Ok(b), c) => IO::pure(RaceTriple::Second(a, b, c)),
        Settled3::Third(a, b, Ok(c)) => IO::pure(RaceTriple::Third(a, b, c)),
        Settled3::First(Err(e), _, _)
        | Settled3::Second(_, Err(e), _)
        | Settled3::Third(_, _, Err(e)) => IO::raise_error(e),
    })
}

/// Three-way [`race`]: both losers are canceled first.
pub fn race3<E, A, B, C>(
    ctx: &ExecutionContext,
    fa: IO<E, A>,
    fb: IO<E, B>,
    fc: IO<E, C>,
) -> IO<E, OneOf3<A, B, C>>
where
    E: Send + 'static,
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
{
    race_triple_settled(ctx, fa, fb, fc).flat_map(|settled| match settled {
        Settled3::First(result, b, c) => b
            .cancel()
            .followed_by(c.cancel())
            .followed_by(IO::from_result(result.map(OneOf3::First))),
        Settled3::Second(a, result, c) => a
            .cancel()
            .followed_by(c.cancel())
            .followed_by(IO::from_result(result.map(OneOf3::Second))),
        Settled3::Third(a, b, result) => a
            .cancel()
            .followed_by(b.cancel())
            .followed_by(IO::from_result(result.map(OneOf3::Third))),
    })
}

impl<E, A> IO<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    /// Fail with [`TimeoutError::Timeout`] if `self` has not finished within
    /// `duration`. `self` runs on `ctx` and is canceled on timeout.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use undertow::context::ExecutionContext;
    /// use undertow::{TimeoutError, IO};
    ///
    /// let ctx = ExecutionContext::concurrent("deadline");
    /// let stuck = IO::<String, i32>::never().timeout(&ctx, Duration::from_millis(20));
    ///
    /// assert!(matches!(
    ///     stuck.unsafe_run_sync(),
    ///     Err(TimeoutError::Timeout { .. })
    /// ));
    /// ```
    pub fn timeout(self, ctx: &ExecutionContext, duration: Duration) -> IO<TimeoutError<E>, A> {
        race(ctx, self.map_err(TimeoutError::Inner), IO::sleep(duration)).flat_map(
            move |winner| match winner {
                Either::Left(value) => IO::pure(value),
                Either::Right(()) => {
                    tracing::debug!(?duration, "timed out");
                    IO::raise_error(TimeoutError::Timeout { duration })
                }
            },
        )
    }
}
