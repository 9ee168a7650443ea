//! Error returned by [`retry`](super::retry) when the schedule stops.

use std::fmt;
use std::time::Duration;

/// The schedule stopped while the action was still failing.
///
/// `attempts` counts every run of the action, so a schedule that allows
/// `n` retries gives up after `n + 1` attempts.
///
/// ```rust
/// use undertow::schedule::{self, Schedule};
/// use undertow::IO;
///
/// let exhausted = schedule::retry(
///     || IO::<_, ()>::raise_error("offline"),
///     Schedule::recurs(2),
/// )
/// .unsafe_run_sync()
/// .unwrap_err();
///
/// assert_eq!(exhausted.final_error, "offline");
/// assert_eq!(exhausted.attempts, 3);
/// assert_eq!(exhausted.retries(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted<E> {
    /// Error of the attempt the schedule declined to retry.
    pub final_error: E,
    /// Runs of the action, the first one included.
    pub attempts: u32,
    /// Wall time from the first attempt until the schedule stopped.
    pub total_duration: Duration,
}

impl<E> RetryExhausted<E> {
    /// Record that the schedule stopped after `attempts` runs.
    pub fn new(final_error: E, attempts: u32, total_duration: Duration) -> Self {
        RetryExhausted {
            final_error,
            attempts,
            total_duration,
        }
    }

    /// Runs after the first one, i.e. how often the schedule continued.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    /// The last error, dropping the attempt count and duration.
    pub fn into_error(self) -> E {
        self.final_error
    }

    /// Borrow the last error.
    pub fn error(&self) -> &E {
        &self.final_error
    }

    /// Transform the last error, keeping the attempt count and duration.
    pub fn map_error<E2>(self, f: impl FnOnce(E) -> E2) -> RetryExhausted<E2> {
        RetryExhausted {
            final_error: f(self.final_error),
            attempts: self.attempts,
            total_duration: self.total_duration,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "schedule stopped after {} attempt{} in {:?}; last error: {}",
            self.attempts,
            if self.attempts == 1 { "" } else { "s" },
            self.total_duration,
            self.final_error
        )
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryExhausted<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.final_error)
    }
}
