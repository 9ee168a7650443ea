//! Ways to combine and adjust schedules.
//!
//! Every combinator returns a new schedule; the originals are shared, not
//! copied. Combinators that need to look at an input after the inner
//! update has finished require `I: Clone`.

use std::sync::Arc;
use std::time::Duration;

use crate::either::Either;
use crate::io::IO;
use crate::schedule::{Decision, Schedule};

impl<E, I, S, O> Schedule<E, I, S, O>
where
    E: Send + 'static,
    I: 'static,
    S: Send + 'static,
    O: 'static,
{
    /// Continue only while both schedules continue, waiting the longer of
    /// the two delays.
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use undertow::schedule::Schedule;
    ///
    /// // Back off exponentially, at most four times.
    /// let policy: Schedule<(), (), _, _> =
    ///     Schedule::exponential(Duration::from_secs(1), 2.0).and(Schedule::recurs(4));
    ///
    /// let first = policy.update(&(), &(0, 0)).unsafe_run_sync().unwrap();
    /// assert_eq!(first.delay(), Some(Duration::from_secs(2)));
    /// let last = policy.update(&(), &(4, 4)).unsafe_run_sync().unwrap();
    /// assert!(!last.is_continue());
    /// ```
    pub fn and<S2, O2>(self, other: Schedule<E, I, S2, O2>) -> Schedule<E, I, (S, S2), (O, O2)>
    where
        S2: Send + 'static,
        O2: 'static,
    {
        let (a, b) = (self.clone(), other.clone());
        let initial = move || a.initial().zip(b.initial());

        let (a, b) = (self.clone(), other.clone());
        let extract = move |input: &I, (s1, s2): &(S, S2)| (a.extract(input, s1), b.extract(input, s2));

        let (a, b) = (self, other);
        let update = move |input: &I, (s1, s2): &(S, S2)| {
            a.update(input, s1)
                .zip(b.update(input, s2))
                .map(|decisions| match decisions {
                    (
                        Decision::Continue { state: s1, delay: d1 },
                        Decision::Continue { state: s2, delay: d2 },
                    ) => Decision::after((s1, s2), d1.max(d2)),
                    _ => Decision::Done,
                })
        };

        Schedule::new(initial, extract, update)
    }

    /// Alias for [`and`](Self::and).
    pub fn zip<S2, O2>(self, other: Schedule<E, I, S2, O2>) -> Schedule<E, I, (S, S2), (O, O2)>
    where
        S2: Send + 'static,
        O2: 'static,
    {
        self.and(other)
    }

    /// Continue while either schedule continues, waiting the shorter delay
    /// of those still going.
    ///
    /// Both updates run in parallel. A schedule that has stopped keeps its
    /// last state.
    pub fn or<S2, O2>(self, other: Schedule<E, I, S2, O2>) -> Schedule<E, I, (S, S2), (O, O2)>
    where
        S: Clone,
        S2: Clone + Send + 'static,
        O2: 'static,
    {
        let (a, b) = (self.clone(), other.clone());
        let initial = move || a.initial().zip(b.initial());

        let (a, b) = (self.clone(), other.clone());
        let extract = move |input: &I, (s1, s2): &(S, S2)| (a.extract(input, s1), b.extract(input, s2));

        let (a, b) = (self, other);
        let update = move |input: &I, (s1, s2): &(S, S2)| {
            let (kept1, kept2) = (s1.clone(), s2.clone());
            IO::par_map2(a.update(input, s1), b.update(input, s2), move |d1, d2| {
                match (d1, d2) {
                    (Decision::Done, Decision::Done) => Decision::Done,
                    (
                        Decision::Continue { state: s1, delay: d1 },
                        Decision::Continue { state: s2, delay: d2 },
                    ) => Decision::after((s1, s2), d1.min(d2)),
                    (Decision::Continue { state, delay }, Decision::Done) => {
                        Decision::after((state, kept2), delay)
                    }
                    (Decision::Done, Decision::Continue { state, delay }) => {
                        Decision::after((kept1, state), delay)
                    }
                }
            })
        };

        Schedule::new(initial, extract, update)
    }

    /// Alias for [`or`](Self::or).
    pub fn either<S2, O2>(self, other: Schedule<E, I, S2, O2>) -> Schedule<E, I, (S, S2), (O, O2)>
    where
        S: Clone,
        S2: Clone + Send + 'static,
        O2: 'static,
    {
        self.or(other)
    }

    /// Run `self` until it stops, then hand over to `other`.
    ///
    /// `other` starts from its initial state and is immediately updated
    /// with the input that stopped `self`.
    pub fn and_then<S2>(self, other: Schedule<E, I, S2, O>) -> Schedule<E, I, Either<S, S2>, O>
    where
        I: Clone + Send + Sync,
        S2: Send + 'static,
    {
        let a = self.clone();
        let initial = move || a.initial().map(Either::Left);

        let (a, b) = (self.clone(), other.clone());
        let extract = move |input: &I, state: &Either<S, S2>| match state {
            Either::Left(s) => a.extract(input, s),
            Either::Right(s) => b.extract(input, s),
        };

        let (a, b) = (self, other);
        let update = move |input: &I, state: &Either<S, S2>| match state {
            Either::Left(s) => {
                let second = b.clone();
                let input = input.clone();
                a.update(&input, s).flat_map(move |decision| match decision {
                    Decision::Continue { state, delay } => {
                        IO::pure(Decision::after(Either::Left(state), delay))
                    }
                    Decision::Done => {
                        tracing::trace!("first schedule done, switching");
                        second.initial().flat_map(move |fresh| {
                            second
                                .update(&input, &fresh)
                                .map(|d| d.map_state(Either::Right))
                        })
                    }
                })
            }
            Either::Right(s) => b.update(input, s).map(|d| d.map_state(Either::Right)),
        };

        Schedule::new(initial, extract, update)
    }

    /// [`and_then`](Self::and_then) for schedules with different outputs.
    pub fn and_then_either<S2, O2>(
        self,
        other: Schedule<E, I, S2, O2>,
    ) -> Schedule<E, I, Either<S, S2>, Either<O, O2>>
    where
        I: Clone + Send + Sync,
        S2: Send + 'static,
        O2: 'static,
    {
        self.map(Either::Left).and_then(other.map(Either::Right))
    }

    /// Feed this schedule's output into `other` as its input.
    ///
    /// Continues while both continue; the delays add up.
    pub fn pipe<S2, O2>(self, other: Schedule<E, O, S2, O2>) -> Schedule<E, I, (S, S2), O2>
    where
        I: Clone + Send + Sync,
        S2: Clone + Send + Sync + 'static,
        O2: 'static,
    {
        let (a, b) = (self.clone(), other.clone());
        let initial = move || a.initial().zip(b.initial());

        let (a, b) = (self.clone(), other.clone());
        let extract = move |input: &I, (s1, s2): &(S, S2)| b.extract(&a.extract(input, s1), s2);

        let (a, b) = (self, other);
        let update = move |input: &I, (s1, s2): &(S, S2)| {
            let (first, second) = (a.clone(), b.clone());
            let (input, s2) = (input.clone(), s2.clone());
            a.update(&input, s1).flat_map(move |decision| match decision {
                Decision::Done => IO::pure(Decision::Done),
                Decision::Continue { state: n1, delay: d1 } => {
                    let fed = first.extract(&input, &n1);
                    second.update(&fed, &s2).map(move |decision| match decision {
                        Decision::Continue { state: n2, delay: d2 } => {
                            Decision::after((n1, n2), d1.saturating_add(d2))
                        }
                        Decision::Done => Decision::Done,
                    })
                }
            })
        };

        Schedule::new(initial, extract, update)
    }

    /// Add `f(output)` to every delay, using the output after the update.
    pub fn add_delay<F>(self, f: F) -> Schedule<E, I, S, O>
    where
        I: Clone + Send + Sync,
        F: Fn(&O) -> Duration + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.reshape(move |schedule, input, decision| match decision {
            Decision::Continue { state, delay } => {
                let extra = f(&schedule.extract(input, &state));
                Decision::after(state, delay.saturating_add(extra))
            }
            Decision::Done => Decision::Done,
        })
    }

    /// Stop as soon as the output satisfies `p`.
    pub fn until_output<P>(self, p: P) -> Schedule<E, I, S, O>
    where
        I: Clone + Send + Sync,
        P: Fn(&O) -> bool + Send + Sync + 'static,
    {
        let p = Arc::new(p);
        self.reshape(move |schedule, input, decision| match decision {
            Decision::Continue { state, .. } if p(&schedule.extract(input, &state)) => {
                Decision::Done
            }
            other => other,
        })
    }

    /// Continue only while the output satisfies `p`.
    pub fn while_output<P>(self, p: P) -> Schedule<E, I, S, O>
    where
        I: Clone + Send + Sync,
        P: Fn(&O) -> bool + Send + Sync + 'static,
    {
        self.until_output(move |out| !p(out))
    }

    /// Stop as soon as an input satisfies `p`.
    pub fn until_input<P>(self, p: P) -> Schedule<E, I, S, O>
    where
        P: Fn(&I) -> bool + Send + Sync + 'static,
    {
        let a = self.clone();
        let initial = move || a.initial();
        let a = self.clone();
        let extract = move |input: &I, state: &S| a.extract(input, state);
        let a = self;
        let update = move |input: &I, state: &S| {
            if p(input) {
                IO::pure(Decision::Done)
            } else {
                a.update(input, state)
            }
        };
        Schedule::new(initial, extract, update)
    }

    /// Continue only while inputs satisfy `p`.
    pub fn while_input<P>(self, p: P) -> Schedule<E, I, S, O>
    where
        P: Fn(&I) -> bool + Send + Sync + 'static,
    {
        self.until_input(move |input| !p(input))
    }

    /// Accumulate outputs with `f`, starting from `zero`.
    pub fn fold<Z, F>(self, zero: Z, f: F) -> Schedule<E, I, (S, Z), Z>
    where
        I: Clone + Send + Sync,
        Z: Clone + Send + Sync + 'static,
        F: Fn(Z, &O) -> Z + Send + Sync + 'static,
    {
        let a = self.clone();
        let initial = move || {
            let zero = zero.clone();
            a.initial().map(move |s| (s, zero))
        };

        let extract = |_: &I, (_, z): &(S, Z)| z.clone();

        let a = self;
        let f = Arc::new(f);
        let update = move |input: &I, (s, z): &(S, Z)| {
            let (schedule, f) = (a.clone(), Arc::clone(&f));
            let (input, z) = (input.clone(), z.clone());
            a.update(&input, s).map(move |decision| match decision {
                Decision::Continue { state, delay } => {
                    let next = f(z, &schedule.extract(&input, &state));
                    Decision::after((state, next), delay)
                }
                Decision::Done => Decision::Done,
            })
        };

        Schedule::new(initial, extract, update)
    }

    /// Collect every output produced after an update.
    pub fn collect_all(self) -> Schedule<E, I, (S, Vec<O>), Vec<O>>
    where
        I: Clone + Send + Sync,
        O: Clone + Send + Sync,
    {
        self.fold(Vec::new(), |mut outputs, out: &O| {
            outputs.push(out.clone());
            outputs
        })
    }

    /// Transform the output.
    pub fn map<O2, F>(self, f: F) -> Schedule<E, I, S, O2>
    where
        O2: 'static,
        F: Fn(O) -> O2 + Send + Sync + 'static,
    {
        let a = self.clone();
        let initial = move || a.initial();
        let a = self.clone();
        let extract = move |input: &I, state: &S| f(a.extract(input, state));
        let a = self;
        let update = move |input: &I, state: &S| a.update(input, state);
        Schedule::new(initial, extract, update)
    }

    /// Adapt the schedule to a different input type.
    pub fn contramap<I2, F>(self, f: F) -> Schedule<E, I2, S, O>
    where
        I2: 'static,
        F: Fn(&I2) -> I + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let a = self.clone();
        let initial = move || a.initial();
        let (a, g) = (self.clone(), Arc::clone(&f));
        let extract = move |input: &I2, state: &S| a.extract(&g(input), state);
        let a = self;
        let update = move |input: &I2, state: &S| a.update(&f(input), state);
        Schedule::new(initial, extract, update)
    }

    /// Cap every delay at `max`.
    pub fn with_max_delay(self, max: Duration) -> Schedule<E, I, S, O> {
        self.map_decision(move |decision| match decision {
            Decision::Continue { state, delay } => Decision::after(state, delay.min(max)),
            Decision::Done => Decision::Done,
        })
    }

    /// Scale every delay by a random factor in `[0, 1]`.
    #[cfg(feature = "jitter")]
    pub fn jittered(self) -> Schedule<E, I, S, O> {
        self.jittered_between(0.0, 1.0)
    }

    /// Scale every delay by a random factor between `min` and `max`.
    #[cfg(feature = "jitter")]
    pub fn jittered_between(self, min: f64, max: f64) -> Schedule<E, I, S, O> {
        use rand::Rng;

        let (low, high) = if min <= max { (min, max) } else { (max, min) };
        let low = low.max(0.0);
        let high = high.max(low);
        self.map_decision(move |decision| match decision {
            Decision::Continue { state, delay } => {
                let factor = rand::rng().random_range(low..=high);
                let jittered = Duration::try_from_secs_f64(delay.as_secs_f64() * factor)
                    .unwrap_or(delay);
                Decision::after(state, jittered)
            }
            Decision::Done => Decision::Done,
        })
    }

    /// Post-process every decision.
    fn map_decision<F>(self, f: F) -> Schedule<E, I, S, O>
    where
        F: Fn(Decision<S>) -> Decision<S> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let a = self.clone();
        let initial = move || a.initial();
        let a = self.clone();
        let extract = move |input: &I, state: &S| a.extract(input, state);
        let a = self;
        let update = move |input: &I, state: &S| {
            let f = Arc::clone(&f);
            a.update(input, state).map(move |decision| f(decision))
        };
        Schedule::new(initial, extract, update)
    }

    /// Post-process every decision with access to the schedule and input.
    fn reshape<F>(self, f: F) -> Schedule<E, I, S, O>
    where
        I: Clone + Send + Sync,
        F: Fn(&Schedule<E, I, S, O>, &I, Decision<S>) -> Decision<S> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let a = self.clone();
        let initial = move || a.initial();
        let a = self.clone();
        let extract = move |input: &I, state: &S| a.extract(input, state);
        let a = self;
        let update = move |input: &I, state: &S| {
            let (schedule, f) = (a.clone(), Arc::clone(&f));
            let input = input.clone();
            a.update(&input, state)
                .map(move |decision| f(&schedule, &input, decision))
        };
        Schedule::new(initial, extract, update)
    }
}
