//! Testing utilities for code built on [`IO`].
//!
//! Assertion macros over [`Outcome`] keep tests readable when a run may end
//! in any of its three ways, and [`from_outcome`] turns a chosen outcome back
//! into a computation. With the `proptest` feature,
//! [`ExitCase`](crate::io::ExitCase) and
//! [`Outcome`] implement `Arbitrary`.
//!
//! # Example
//!
//! ```rust
//! use undertow::{assert_canceled, assert_completes, assert_errored, IO};
//!
//! let value = assert_completes!(IO::<String, _>::pure(2).map(|n| n * 21).unsafe_run_outcome());
//! assert_eq!(value, 42);
//!
//! assert_errored!(IO::<_, i32>::raise_error("boom").unsafe_run_outcome(), "boom");
//!
//! let canceled = undertow::testing::from_outcome::<String, ()>(undertow::Outcome::Canceled);
//! assert_canceled!(canceled.unsafe_run_outcome());
//! ```

use crate::io::{Outcome, IO};

#[cfg(feature = "proptest")]
use crate::io::ExitCase;

/// A computation that ends exactly as `outcome` says.
///
/// `Outcome::Canceled` becomes a computation that ends canceled as soon as
/// it is run.
pub fn from_outcome<E, A>(outcome: Outcome<E, A>) -> IO<E, A>
where
    E: Send + 'static,
    A: Send + 'static,
{
    match outcome {
        Outcome::Completed(value) => IO::pure(value),
        Outcome::Errored(error) => IO::raise_error(error),
        Outcome::Canceled => IO::from_registration(|cb| {
            cb.interrupt();
            None
        }),
    }
}

/// Assert that an [`Outcome`] is `Completed`, evaluating to the value.
///
/// With a second argument the value is also compared to it.
///
/// # Example
///
/// ```rust
/// use undertow::{assert_completes, IO};
///
/// assert_completes!(IO::<(), _>::pure("ok").unsafe_run_outcome(), "ok");
/// ```
#[macro_export]
macro_rules! assert_completes {
    ($outcome:expr) => {
        match $outcome {
            $crate::Outcome::Completed(value) => value,
            other => panic!("Expected Completed, got {:?}", other),
        }
    };
    ($outcome:expr, $expected:expr) => {
        match $outcome {
            $crate::Outcome::Completed(value) => assert_eq!(value, $expected),
            other => panic!("Expected Completed({:?}), got {:?}", $expected, other),
        }
    };
}

/// Assert that an [`Outcome`] is `Errored`, evaluating to the error.
///
/// With a second argument the error is also compared to it.
#[macro_export]
macro_rules! assert_errored {
    ($outcome:expr) => {
        match $outcome {
            $crate::Outcome::Errored(error) => error,
            other => panic!("Expected Errored, got {:?}", other),
        }
    };
    ($outcome:expr, $expected:expr) => {
        match $outcome {
            $crate::Outcome::Errored(error) => assert_eq!(error, $expected),
            other => panic!("Expected Errored({:?}), got {:?}", $expected, other),
        }
    };
}

/// Assert that an [`Outcome`] is `Canceled`.
#[macro_export]
macro_rules! assert_canceled {
    ($outcome:expr) => {
        match $outcome {
            $crate::Outcome::Canceled => {}
            other => panic!("Expected Canceled, got {:?}", other),
        }
    };
}

#[cfg(feature = "proptest")]
use proptest::prelude::*;

#[cfg(feature = "proptest")]
impl<E> Arbitrary for ExitCase<E>
where
    E: Arbitrary + Clone + 'static,
{
    type Parameters = E::Parameters;
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(args: Self::Parameters) -> Self::Strategy {
        prop_oneof![
            Just(ExitCase::Completed),
            Just(ExitCase::Canceled),
            any_with::<E>(args).prop_map(ExitCase::Error),
        ]
        .boxed()
    }
}

#[cfg(feature = "proptest")]
impl<E, A> Arbitrary for Outcome<E, A>
where
    E: Arbitrary + Clone + 'static,
    A: Arbitrary + Clone + 'static,
{
    type Parameters = (E::Parameters, A::Parameters);
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(args: Self::Parameters) -> Self::Strategy {
        let (e_params, a_params) = args;
        prop_oneof![
            any_with::<A>(a_params).prop_map(Outcome::Completed),
            any_with::<E>(e_params).prop_map(Outcome::Errored),
            Just(Outcome::Canceled),
        ]
        .boxed()
    }
}
