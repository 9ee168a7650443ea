//! Error wrappers shared across the crate.
//!
//! `ContextError` wraps an error and collects breadcrumbs as it travels up
//! a chain of effects, so a failure deep inside a fiber still says what the
//! program was doing when it happened. `TimeoutError` is what
//! [`IO::timeout`](crate::IO::timeout) fails with.
//!
//! ```
//! use undertow::{ContextError, IO};
//!
//! let io = IO::<_, i32>::raise_error("connection refused")
//!     .context("opening session")
//!     .and_context("loading profile");
//!
//! let err = io.unsafe_run_sync().unwrap_err();
//! assert_eq!(err.inner(), &"connection refused");
//! assert_eq!(err.context_trail(), &["opening session", "loading profile"]);
//! ```

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

/// An error plus the trail of operations it propagated through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextError<E> {
    error: E,
    context: Vec<String>,
}

impl<E> ContextError<E> {
    /// Wrap an error with an empty trail.
    pub fn new(error: E) -> Self {
        ContextError {
            error,
            context: Vec::new(),
        }
    }

    /// Append a context message. Messages are kept innermost first.
    pub fn context(mut self, msg: impl Into<String>) -> Self {
        self.context.push(msg.into());
        self
    }

    /// The wrapped error.
    pub fn inner(&self) -> &E {
        &self.error
    }

    /// Discard the trail and return the wrapped error.
    pub fn into_inner(self) -> E {
        self.error
    }

    /// All context messages, innermost first.
    pub fn context_trail(&self) -> &[String] {
        &self.context
    }
}

impl<E: fmt::Display> fmt::Display for ContextError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}", self.error)?;
        for ctx in &self.context {
            write!(f, "\n  -> {}", ctx)?;
        }
        Ok(())
    }
}

impl<E: StdError + 'static> StdError for ContextError<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.error)
    }
}

/// Failure of a computation run under a deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutError<E> {
    /// The deadline passed first; the computation was canceled.
    Timeout {
        /// The deadline that was exceeded.
        duration: Duration,
    },
    /// The computation failed before the deadline.
    Inner(E),
}

impl<E> TimeoutError<E> {
    /// Returns true if the deadline passed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TimeoutError::Timeout { .. })
    }

    /// Returns true if the computation itself failed.
    pub fn is_inner(&self) -> bool {
        matches!(self, TimeoutError::Inner(_))
    }

    /// The computation's own error, if that is what happened.
    pub fn into_inner(self) -> Option<E> {
        match self {
            TimeoutError::Inner(e) => Some(e),
            TimeoutError::Timeout { .. } => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for TimeoutError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutError::Timeout { duration } => write!(f, "timed out after {:?}", duration),
            TimeoutError::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: StdError + 'static> StdError for TimeoutError<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            TimeoutError::Timeout { .. } => None,
            TimeoutError::Inner(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_accumulation() {
        let err = ContextError::new("base error")
            .context("first context")
            .context(String::from("second context"));

        assert_eq!(err.inner(), &"base error");
        assert_eq!(err.context_trail(), &["first context", "second context"]);
    }

    #[test]
    fn test_display_format_with_context() {
        let err = ContextError::new("fiber crashed")
            .context("joining worker")
            .context("draining queue");

        let output = format!("{}", err);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Error: fiber crashed",
                "  -> joining worker",
                "  -> draining queue"
            ]
        );
    }

    #[test]
    fn test_error_source_points_to_inner() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "lock file missing");
        let err = ContextError::new(inner).context("acquiring lock");

        assert!(err.source().is_some());
        assert_eq!(err.into_inner().kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_timeout_error_accessors() {
        let timed_out: TimeoutError<String> = TimeoutError::Timeout {
            duration: Duration::from_millis(250),
        };
        assert!(timed_out.is_timeout());
        assert_eq!(format!("{}", timed_out), "timed out after 250ms");
        assert!(timed_out.into_inner().is_none());

        let failed = TimeoutError::Inner("disk full");
        assert!(failed.is_inner());
        assert_eq!(format!("{}", failed), "disk full");
        assert_eq!(failed.into_inner(), Some("disk full"));
    }
}
