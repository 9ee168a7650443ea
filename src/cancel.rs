//! Cooperative cancellation.
//!
//! Every interpreter run carries a [`Connection`]: a stack of
//! [`CancelToken`]s describing how to interrupt whatever the computation is
//! currently blocked on. Canceling the connection swaps the stack for a
//! `Canceled` marker and runs the tokens; computations notice at their next
//! cancellation point (an async wait or a bracket boundary).
//!
//! ```rust
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::sync::Arc;
//! use undertow::cancel::{CancelToken, Connection};
//!
//! let conn = Connection::new();
//! let ran = Arc::new(AtomicBool::new(false));
//! let flag = Arc::clone(&ran);
//! conn.push(CancelToken::new(move || flag.store(true, Ordering::SeqCst)));
//!
//! conn.cancel();
//! assert!(conn.is_canceled());
//! assert!(ran.load(Ordering::SeqCst));
//! ```

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;

static UNCANCELABLE: LazyLock<Arc<Connection>> =
    LazyLock::new(|| Arc::new(Connection { state: None }));

/// An action that interrupts a suspended computation.
pub struct CancelToken {
    action: Box<dyn FnOnce() + Send>,
}

impl CancelToken {
    /// Wrap an interrupt action.
    pub fn new<F>(action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        CancelToken {
            action: Box::new(action),
        }
    }

    /// A token that does nothing.
    pub fn noop() -> Self {
        CancelToken::new(|| {})
    }

    /// Run the action.
    pub fn run(self) {
        (self.action)()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("action", &"<function>")
            .finish()
    }
}

enum State {
    Active(Vec<CancelToken>),
    Canceled,
}

/// Cancellation state of one running computation.
///
/// `state` is `None` for the uncancelable connection, which ignores every
/// operation and never reports itself canceled.
pub struct Connection {
    state: Option<Mutex<State>>,
}

impl Connection {
    /// A fresh, active connection with no tokens.
    pub fn new() -> Arc<Connection> {
        Arc::new(Connection {
            state: Some(Mutex::new(State::Active(Vec::new()))),
        })
    }

    /// The shared connection for regions immune to interruption.
    pub fn uncancelable() -> Arc<Connection> {
        Arc::clone(&UNCANCELABLE)
    }

    /// Whether this is the uncancelable connection.
    pub fn is_uncancelable(&self) -> bool {
        self.state.is_none()
    }

    /// Whether [`cancel`](Self::cancel) has run.
    pub fn is_canceled(&self) -> bool {
        match &self.state {
            Some(state) => matches!(*state.lock(), State::Canceled),
            None => false,
        }
    }

    /// Install a token on top of the stack.
    ///
    /// If the connection is already canceled the token runs immediately
    /// instead of being stored.
    pub fn push(&self, token: CancelToken) {
        let Some(state) = &self.state else {
            return;
        };
        let mut guard = state.lock();
        if let State::Active(tokens) = &mut *guard {
            tokens.push(token);
            return;
        }
        drop(guard);
        token.run();
    }

    /// Install a token that cancels `child` when this connection is canceled.
    pub fn push_connection(&self, child: &Arc<Connection>) {
        let child = Arc::clone(child);
        self.push(CancelToken::new(move || child.cancel()));
    }

    /// Remove the top token without running it.
    pub fn pop(&self) -> Option<CancelToken> {
        let state = self.state.as_ref()?;
        match &mut *state.lock() {
            State::Active(tokens) => tokens.pop(),
            State::Canceled => None,
        }
    }

    /// Cancel the connection and run every stored token, most recent first.
    ///
    /// A panicking token does not prevent the others from running; the first
    /// panic is resumed once all tokens have run. Canceling twice is a no-op.
    pub fn cancel(&self) {
        let Some(state) = &self.state else {
            return;
        };
        let tokens = match std::mem::replace(&mut *state.lock(), State::Canceled) {
            State::Active(tokens) => tokens,
            State::Canceled => return,
        };
        tracing::debug!(tokens = tokens.len(), "canceling connection");

        let mut first_panic = None;
        for token in tokens.into_iter().rev() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| token.run())) {
                tracing::error!("cancel token panicked");
                first_panic.get_or_insert(payload);
            }
        }
        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
    }

    /// Reset a canceled connection to an empty active stack.
    ///
    /// Returns `false`, changing nothing, if the connection is not canceled.
    pub fn try_reactivate(&self) -> bool {
        let Some(state) = &self.state else {
            return false;
        };
        let mut guard = state.lock();
        match *guard {
            State::Canceled => {
                *guard = State::Active(Vec::new());
                true
            }
            State::Active(_) => false,
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            None => "uncancelable".to_string(),
            Some(state) => match &*state.lock() {
                State::Active(tokens) => format!("active({})", tokens.len()),
                State::Canceled => "canceled".to_string(),
            },
        };
        f.debug_struct("Connection").field("state", &state).finish()
    }
}
