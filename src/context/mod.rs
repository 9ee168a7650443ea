//! Named execution contexts.
//!
//! An [`ExecutionContext`] is where a computation's steps physically run.
//! There is no user-space scheduler: dispatching to a context hands a
//! closure to an OS thread, and suspension blocks that thread.
//!
//! Three dispatch modes exist:
//!
//! - **Inline** - run on whichever thread asks. It is "current" everywhere.
//! - **Concurrent** - every task gets a fresh thread named `<name>-<n>`.
//! - **Serial** - one worker thread drains a FIFO queue, like a serial
//!   dispatch queue. A task that blocks waiting for a later task on the same
//!   serial context deadlocks, which is why hops onto the current context
//!   always take the inline fast path.
//!
//! # Example
//!
//! ```rust
//! use undertow::context::ExecutionContext;
//!
//! let worker = ExecutionContext::builder("worker").serial().build();
//! let name = worker.run_sync(|| {
//!     std::thread::current().name().map(str::to_string)
//! });
//! assert_eq!(name.as_deref(), Some("worker"));
//! assert!(!worker.is_current());
//! ```

pub(crate) mod timer;

use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::thread;

use parking_lot::{Condvar, Mutex};

use crate::signal::Latch;

type Task = Box<dyn FnOnce() + Send + 'static>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

static INLINE: LazyLock<ExecutionContext> = LazyLock::new(|| {
    ExecutionContext::from_inner(Inner::new("inline".to_string(), Dispatch::Inline, None))
});

static GLOBAL: LazyLock<ExecutionContext> =
    LazyLock::new(|| ExecutionContext::concurrent("undertow-global"));

thread_local! {
    static CURRENT: Cell<Option<u64>> = const { Cell::new(None) };
}

/// A named target for dispatching work.
///
/// Cloning is cheap and clones compare equal: they dispatch to the same
/// threads.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<Inner>,
}

struct Inner {
    id: u64,
    name: String,
    dispatch: Dispatch,
    stack_size: Option<usize>,
    spawned: AtomicU64,
}

enum Dispatch {
    Inline,
    Concurrent,
    Serial(Arc<SerialQueue>),
}

impl Inner {
    fn new(name: String, dispatch: Dispatch, stack_size: Option<usize>) -> Self {
        Inner {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            name,
            dispatch,
            stack_size,
            spawned: AtomicU64::new(0),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Dispatch::Serial(queue) = &self.dispatch {
            queue.close();
        }
    }
}

impl ExecutionContext {
    fn from_inner(inner: Inner) -> Self {
        ExecutionContext {
            inner: Arc::new(inner),
        }
    }

    /// The context that runs everything on the calling thread.
    pub fn inline() -> Self {
        INLINE.clone()
    }

    /// A shared concurrent context for callers without a preference.
    pub fn global() -> Self {
        GLOBAL.clone()
    }

    /// A concurrent context: one new thread per dispatched task.
    pub fn concurrent(name: impl Into<String>) -> Self {
        ExecutionContext::builder(name).build()
    }

    /// A serial context: a single worker thread running tasks in FIFO order.
    pub fn serial(name: impl Into<String>) -> Self {
        ExecutionContext::builder(name).serial().build()
    }

    /// Start configuring a context.
    pub fn builder(name: impl Into<String>) -> ContextBuilder {
        ContextBuilder {
            name: name.into(),
            serial: false,
            stack_size: None,
        }
    }

    /// The configured name, used for thread names and log fields.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether this is the inline context.
    pub fn is_inline(&self) -> bool {
        matches!(self.inner.dispatch, Dispatch::Inline)
    }

    /// Whether this is a serial context.
    pub fn is_serial(&self) -> bool {
        matches!(self.inner.dispatch, Dispatch::Serial(_))
    }

    /// Whether the calling thread belongs to this context.
    ///
    /// Always true for the inline context.
    pub fn is_current(&self) -> bool {
        match self.inner.dispatch {
            Dispatch::Inline => true,
            Dispatch::Concurrent | Dispatch::Serial(_) => {
                CURRENT.with(|current| current.get() == Some(self.inner.id))
            }
        }
    }

    /// A new concurrent context named `<name>.<label>`.
    ///
    /// Parallel branches run on derived contexts so their threads are easy
    /// to attribute in logs and debuggers.
    pub fn derive(&self, label: &str) -> ExecutionContext {
        let mut builder = ExecutionContext::builder(format!("{}.{}", self.name(), label));
        builder.stack_size = self.inner.stack_size;
        builder.build()
    }

    /// Dispatch a task without waiting for it.
    pub fn execute<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.inner.dispatch {
            Dispatch::Inline => task(),
            Dispatch::Concurrent => self.spawn_thread(Box::new(task)),
            Dispatch::Serial(queue) => queue.push(Box::new(task)),
        }
    }

    /// Run `f` on this context and block until it returns.
    ///
    /// If the calling thread already belongs to this context `f` runs
    /// inline. A panic inside `f` is resumed on the calling thread.
    pub fn run_sync<T, F>(&self, f: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_current() {
            return f();
        }

        let latch = Arc::new(Latch::new());
        let done = Arc::clone(&latch);
        self.execute(move || {
            done.set(panic::catch_unwind(AssertUnwindSafe(f)));
        });

        match latch.wait() {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    fn spawn_thread(&self, task: Task) {
        let n = self.inner.spawned.fetch_add(1, Ordering::Relaxed);
        let mut builder = thread::Builder::new().name(format!("{}-{}", self.name(), n));
        if let Some(size) = self.inner.stack_size {
            builder = builder.stack_size(size);
        }

        // The task is parked in a shared slot so it can be recovered and run
        // inline if the OS refuses to give us a thread.
        let slot = Arc::new(Mutex::new(Some(task)));
        let worker_slot = Arc::clone(&slot);
        let id = self.inner.id;
        tracing::trace!(context = %self.name(), n, "dispatching task");

        let spawned = builder.spawn(move || {
            CURRENT.with(|current| current.set(Some(id)));
            if let Some(task) = worker_slot.lock().take() {
                task();
            }
        });

        if let Err(err) = spawned {
            tracing::error!(context = %self.name(), error = %err, "thread spawn failed, running task inline");
            if let Some(task) = slot.lock().take() {
                task();
            }
        }
    }
}

impl PartialEq for ExecutionContext {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ExecutionContext {}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.inner.dispatch {
            Dispatch::Inline => "inline",
            Dispatch::Concurrent => "concurrent",
            Dispatch::Serial(_) => "serial",
        };
        f.debug_struct("ExecutionContext")
            .field("name", &self.inner.name)
            .field("mode", &mode)
            .finish()
    }
}

/// Builder for [`ExecutionContext`].
///
/// ```rust
/// use undertow::context::ExecutionContext;
///
/// let ctx = ExecutionContext::builder("io")
///     .stack_size(4 * 1024 * 1024)
///     .build();
/// assert_eq!(ctx.name(), "io");
/// assert!(!ctx.is_serial());
/// ```
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    name: String,
    serial: bool,
    stack_size: Option<usize>,
}

impl ContextBuilder {
    /// Run tasks one at a time on a dedicated worker thread.
    pub fn serial(mut self) -> Self {
        self.serial = true;
        self
    }

    /// Stack size for threads spawned by this context.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Create the context. Serial contexts start their worker immediately.
    pub fn build(self) -> ExecutionContext {
        if !self.serial {
            return ExecutionContext::from_inner(Inner::new(
                self.name,
                Dispatch::Concurrent,
                self.stack_size,
            ));
        }

        let queue = Arc::new(SerialQueue::default());
        let inner = Inner::new(
            self.name.clone(),
            Dispatch::Serial(Arc::clone(&queue)),
            self.stack_size,
        );
        let id = inner.id;

        let mut builder = thread::Builder::new().name(self.name.clone());
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        let worker_queue = Arc::clone(&queue);
        if let Err(err) = builder.spawn(move || worker_queue.drain(id)) {
            // Without a worker every task would hang; degrade to inline.
            tracing::error!(context = %self.name, error = %err, "serial worker spawn failed");
            return ExecutionContext::from_inner(Inner::new(
                self.name,
                Dispatch::Inline,
                self.stack_size,
            ));
        }

        ExecutionContext::from_inner(inner)
    }
}

#[derive(Default)]
struct SerialQueue {
    state: Mutex<SerialState>,
    ready: Condvar,
}

#[derive(Default)]
struct SerialState {
    tasks: VecDeque<Task>,
    closed: bool,
}

impl SerialQueue {
    fn push(&self, task: Task) {
        let mut state = self.state.lock();
        state.tasks.push_back(task);
        self.ready.notify_one();
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.ready.notify_one();
    }

    fn drain(&self, id: u64) {
        CURRENT.with(|current| current.set(Some(id)));
        loop {
            let task = {
                let mut state = self.state.lock();
                loop {
                    if let Some(task) = state.tasks.pop_front() {
                        break task;
                    }
                    if state.closed {
                        return;
                    }
                    self.ready.wait(&mut state);
                }
            };

            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                tracing::error!("task panicked on serial context, worker continues");
            }
        }
    }
}
