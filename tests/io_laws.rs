//! Property-based tests for the monad and error-handling laws of `IO`.
//!
//! Two computations are considered equal when running them gives the same
//! `Outcome`.

use proptest::prelude::*;
use undertow::testing::from_outcome;
use undertow::{Outcome, IO};

/// A generated continuation `i64 -> IO<String, i64>`.
#[derive(Clone, Debug)]
enum Step {
    Add(i64),
    Fail(String),
    Cancel,
}

impl Step {
    fn apply(&self, value: i64) -> IO<String, i64> {
        match self {
            Step::Add(n) => IO::pure(value.wrapping_add(*n)),
            Step::Fail(why) => IO::raise_error(format!("{}:{}", why, value)),
            Step::Cancel => from_outcome(Outcome::Canceled),
        }
    }
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => any::<i64>().prop_map(Step::Add),
        2 => "[a-z]{1,8}".prop_map(Step::Fail),
        1 => Just(Step::Cancel),
    ]
}

fn outcome() -> impl Strategy<Value = Outcome<String, i64>> {
    prop_oneof![
        4 => any::<i64>().prop_map(Outcome::Completed),
        2 => "[a-z]{1,8}".prop_map(Outcome::Errored),
        1 => Just(Outcome::Canceled),
    ]
}

fn run(io: IO<String, i64>) -> Outcome<String, i64> {
    io.unsafe_run_outcome()
}

proptest! {
    #[test]
    fn prop_left_identity(a in any::<i64>(), f in step()) {
        let f2 = f.clone();
        let lhs = IO::pure(a).flat_map(move |x| f.apply(x));
        prop_assert_eq!(run(lhs), run(f2.apply(a)));
    }

    #[test]
    fn prop_right_identity(m in outcome()) {
        let lhs = from_outcome(m.clone()).flat_map(IO::pure);
        prop_assert_eq!(run(lhs), m);
    }

    #[test]
    fn prop_associativity(m in outcome(), f in step(), g in step()) {
        let (f2, g2) = (f.clone(), g.clone());
        let lhs = from_outcome(m.clone())
            .flat_map(move |x| f.apply(x))
            .flat_map(move |y| g.apply(y));
        let rhs = from_outcome(m).flat_map(move |x| f2.apply(x).flat_map(move |y| g2.apply(y)));
        prop_assert_eq!(run(lhs), run(rhs));
    }

    #[test]
    fn prop_map_is_flat_map_pure(m in outcome(), n in any::<i64>()) {
        let lhs = from_outcome(m.clone()).map(move |x| x.wrapping_mul(n));
        let rhs = from_outcome(m).flat_map(move |x| IO::pure(x.wrapping_mul(n)));
        prop_assert_eq!(run(lhs), run(rhs));
    }

    #[test]
    fn prop_map_identity(m in outcome()) {
        prop_assert_eq!(run(from_outcome(m.clone()).map(|x| x)), m);
    }

    #[test]
    fn prop_raise_error_short_circuits(e in "[a-z]{1,8}", f in step()) {
        let io = IO::<String, i64>::raise_error(e.clone()).flat_map(move |x| f.apply(x));
        prop_assert_eq!(run(io), Outcome::Errored(e));
    }

    #[test]
    fn prop_handle_error_with_pure_recovers(e in "[a-z]{1,8}", fallback in any::<i64>()) {
        let io = IO::<String, i64>::raise_error(e).handle_error_with(move |_| IO::<String, i64>::pure(fallback));
        prop_assert_eq!(run(io), Outcome::Completed(fallback));
    }

    #[test]
    fn prop_attempt_exposes_errors_but_not_cancellation(m in outcome()) {
        let attempted = from_outcome(m.clone()).attempt::<String>().unsafe_run_outcome();
        let expected = match m {
            Outcome::Completed(a) => Outcome::Completed(Ok(a)),
            Outcome::Errored(e) => Outcome::Completed(Err(e)),
            Outcome::Canceled => Outcome::Canceled,
        };
        prop_assert_eq!(attempted, expected);
    }

    #[test]
    fn prop_par_map2_agrees_with_zip_on_values(a in any::<i64>(), b in any::<i64>()) {
        let parallel = IO::par_map2(IO::<String, _>::pure(a), IO::pure(b), |x, y| x.wrapping_add(y));
        let sequential = IO::<String, _>::pure(a).zip(IO::pure(b)).map(|(x, y)| x.wrapping_add(y));
        prop_assert_eq!(run(parallel), run(sequential));
    }
}
