//! Parallel composition.
//!
//! Each branch runs on its own derived context with a child connection.
//! The first branch to fail cancels its siblings, the combinator waits for
//! every branch to stop, and then that first error is raised. Canceling the
//! parent cancels all branches.

use std::sync::Arc;
use std::thread;

use crate::cancel::{CancelToken, Connection};
use crate::cell::AtomicCell;
use crate::io::callback::Callback;
use crate::io::interpreter::{continue_with, Cause, Exit, Frame, Run, Step};
use crate::io::{Node, IO};

/// Shared bookkeeping for one parallel group.
struct Group {
    conns: Vec<Arc<Connection>>,
    first_failure: AtomicCell<Option<usize>>,
}

impl Group {
    fn new(branches: usize) -> Arc<Group> {
        Arc::new(Group {
            conns: (0..branches).map(|_| Connection::new()).collect(),
            first_failure: AtomicCell::new(None),
        })
    }

    /// Record that `index` failed; the first recorder cancels the others.
    fn fail(&self, index: usize) {
        let current = self.first_failure.get();
        if current.is_some() || !self.first_failure.compare_and_set(&current, Some(index)) {
            return;
        }
        tracing::debug!(branch = index, "parallel branch failed, canceling siblings");
        for (i, conn) in self.conns.iter().enumerate() {
            if i != index {
                conn.cancel();
            }
        }
    }

    fn cancel_all(&self) {
        for conn in &self.conns {
            conn.cancel();
        }
    }

    /// Pick the cause to report: the first failure, or any if none recorded.
    fn pick<E>(&self, mut causes: Vec<Option<Cause<E>>>) -> Cause<E> {
        if let Some(index) = *self.first_failure.get() {
            if let Some(cause) = causes.get_mut(index).and_then(Option::take) {
                return cause;
            }
        }
        causes.into_iter().flatten().next().unwrap_or(Cause::Canceled)
    }
}

fn fork<E, A>(io: IO<E, A>, index: usize, run: &Run, group: &Arc<Group>) -> Callback<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    let result = Callback::new();
    let done = result.clone();
    let watcher = Arc::clone(group);
    let ctx = run.ctx.derive(&format!("par-{}", index));
    crate::fiber::spawn(
        io,
        ctx,
        Arc::clone(&group.conns[index]),
        move |exit: thread::Result<Exit<E, A>>| {
            if !matches!(exit, Ok(Ok(_))) {
                watcher.fail(index);
            }
            done.settle(exit);
        },
    );
    result
}

/// Link the group to the parent connection for the duration of `wait`.
fn supervise<T>(run: &Run, group: &Arc<Group>, wait: impl FnOnce() -> T) -> T {
    let linked = Arc::clone(group);
    run.conn.push(CancelToken::new(move || linked.cancel_all()));
    let result = wait();
    run.conn.pop();
    result
}

pub(crate) struct ParMap2<E, A, B, F> {
    pub(crate) fa: IO<E, A>,
    pub(crate) fb: IO<E, B>,
    pub(crate) f: F,
}

impl<E, A, B, C, F> Frame<E, C> for ParMap2<E, A, B, F>
where
    E: Send + 'static,
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
    F: FnOnce(A, B) -> C + Send + 'static,
{
    fn resume(self: Box<Self>, run: &mut Run) -> Step<E, C> {
        let ParMap2 { fa, fb, f } = *self;
        let group = Group::new(2);
        let (a, b) = supervise(run, &group, || {
            let ra = fork(fa, 0, run, &group);
            let rb = fork(fb, 1, run, &group);
            (ra.wait(), rb.wait())
        });

        match (a, b) {
            (Ok(a), Ok(b)) => continue_with(run, move || IO::pure(f(a, b))),
            (a, b) => Step::Done(Err(group.pick(vec![a.err(), b.err()]))),
        }
    }
}

pub(crate) struct ParMap3<E, A, B, C, F> {
    pub(crate) fa: IO<E, A>,
    pub(crate) fb: IO<E, B>,
    pub(crate) fc: IO<E, C>,
    pub(crate) f: F,
}

impl<E, A, B, C, D, F> Frame<E, D> for ParMap3<E, A, B, C, F>
where
    E: Send + 'static,
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
    D: Send + 'static,
    F: FnOnce(A, B, C) -> D + Send + 'static,
{
    fn resume(self: Box<Self>, run: &mut Run) -> Step<E, D> {
        let ParMap3 { fa, fb, fc, f } = *self;
        let group = Group::new(3);
        let (a, b, c) = supervise(run, &group, || {
            let ra = fork(fa, 0, run, &group);
            let rb = fork(fb, 1, run, &group);
            let rc = fork(fc, 2, run, &group);
            (ra.wait(), rb.wait(), rc.wait())
        });

        match (a, b, c) {
            (Ok(a), Ok(b), Ok(c)) => continue_with(run, move || IO::pure(f(a, b, c))),
            (a, b, c) => Step::Done(Err(group.pick(vec![a.err(), b.err(), c.err()]))),
        }
    }
}

pub(crate) struct ParSequence<E, A> {
    pub(crate) branches: Vec<IO<E, A>>,
}

impl<E, A> Frame<E, Vec<A>> for ParSequence<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    fn resume(self: Box<Self>, run: &mut Run) -> Step<E, Vec<A>> {
        let ParSequence { branches } = *self;
        let group = Group::new(branches.len());
        let exits: Vec<Exit<E, A>> = supervise(run, &group, || {
            let pending: Vec<_> = branches
                .into_iter()
                .enumerate()
                .map(|(index, io)| fork(io, index, run, &group))
                .collect();
            pending.iter().map(Callback::wait).collect()
        });

        if exits.iter().all(Result::is_ok) {
            let values = exits.into_iter().flatten().collect();
            return Step::Done(Ok(values));
        }
        Step::Done(Err(group.pick(exits.into_iter().map(Result::err).collect())))
    }
}

impl<E, C> IO<E, C>
where
    E: Send + 'static,
    C: Send + 'static,
{
    /// Run `fa` and `fb` in parallel and combine their values.
    ///
    /// # Example
    ///
    /// ```rust
    /// use undertow::IO;
    ///
    /// let sum = IO::par_map2(
    ///     IO::<String, _>::delay(|| 20),
    ///     IO::delay(|| 22),
    ///     |a, b| a + b,
    /// );
    /// assert_eq!(sum.unsafe_run_sync(), Ok(42));
    /// ```
    pub fn par_map2<A, B, F>(fa: IO<E, A>, fb: IO<E, B>, f: F) -> IO<E, C>
    where
        A: Send + 'static,
        B: Send + 'static,
        F: FnOnce(A, B) -> C + Send + 'static,
    {
        IO::from_node(Node::ParMap2(Box::new(ParMap2 { fa, fb, f })))
    }

    /// Three-way [`par_map2`](Self::par_map2).
    pub fn par_map3<A, B, D, F>(fa: IO<E, A>, fb: IO<E, B>, fc: IO<E, D>, f: F) -> IO<E, C>
    where
        A: Send + 'static,
        B: Send + 'static,
        D: Send + 'static,
        F: FnOnce(A, B, D) -> C + Send + 'static,
    {
        IO::from_node(Node::ParMap3(Box::new(ParMap3 {
            fa,
            fb,
            fc,
            f,
        })))
    }

    /// Run `self` and `other` in parallel, pairing their values.
    pub fn par_zip<B>(self, other: IO<E, B>) -> IO<E, (C, B)>
    where
        B: Send + 'static,
    {
        IO::par_map2(self, other, |a, b| (a, b))
    }
}

/// Run every computation in parallel, collecting values in input order.
///
/// An empty input completes immediately with an empty vector.
pub fn par_sequence<E, A>(branches: Vec<IO<E, A>>) -> IO<E, Vec<A>>
where
    E: Send + 'static,
    A: Send + 'static,
{
    if branches.is_empty() {
        return IO::pure(Vec::new());
    }
    IO::from_node(Node::ParSequence(Box::new(ParSequence { branches })))
}

/// Apply `f` to each item and run the results in parallel.
pub fn par_traverse<E, T, A, F>(items: impl IntoIterator<Item = T>, f: F) -> IO<E, Vec<A>>
where
    E: Send + 'static,
    A: Send + 'static,
    F: FnMut(T) -> IO<E, A>,
{
    par_sequence(items.into_iter().map(f).collect())
}
