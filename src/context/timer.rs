//! Process-wide timer thread backing `IO::sleep`.
//!
//! One thread owns a deadline heap and waits on a condition variable until
//! the earliest deadline, using `Instant` as the monotonic clock. Tasks are
//! kept apart from the heap, keyed by sequence number, so canceling an entry
//! frees its task immediately; the heap skips sequence numbers whose task is
//! gone.
//!
//! A delay too large to express as an `Instant` never fires. Its task is
//! held until the entry is canceled.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

type Task = Box<dyn FnOnce() + Send>;

/// Stale heap entries tolerated before a cancel compacts the heap.
const COMPACT_SLACK: usize = 32;

static TIMER: LazyLock<Arc<Timer>> = LazyLock::new(Timer::start);

/// Run `task` on the timer thread once `delay` has elapsed.
pub(crate) fn schedule<F>(delay: Duration, task: F) -> TimerHandle
where
    F: FnOnce() + Send + 'static,
{
    Timer::push(&TIMER, delay, Box::new(task))
}

/// Handle to a pending timer entry.
#[derive(Clone)]
pub(crate) struct TimerHandle {
    seq: u64,
    timer: Arc<Timer>,
}

impl TimerHandle {
    /// Drop the task if it has not fired yet.
    pub(crate) fn cancel(&self) {
        self.timer.remove(self.seq);
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle").field("seq", &self.seq).finish()
    }
}

#[derive(Default)]
struct State {
    tasks: HashMap<u64, Task>,
    // Min-heap on (deadline, seq); `seq` keeps equal deadlines in
    // insertion order.
    deadlines: BinaryHeap<Reverse<(Instant, u64)>>,
}

struct Timer {
    state: Mutex<State>,
    wake: Condvar,
    seq: AtomicU64,
}

impl Timer {
    fn start() -> Arc<Timer> {
        let timer = Arc::new(Timer {
            state: Mutex::new(State::default()),
            wake: Condvar::new(),
            seq: AtomicU64::new(0),
        });
        let worker = Arc::clone(&timer);
        thread::Builder::new()
            .name("undertow-timer".to_string())
            .spawn(move || worker.run())
            .unwrap_or_else(|err| panic!("cannot start timer thread: {}", err));
        timer
    }

    fn push(timer: &Arc<Timer>, delay: Duration, task: Task) -> TimerHandle {
        let seq = timer.seq.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now().checked_add(delay);
        {
            let mut state = timer.state.lock();
            state.tasks.insert(seq, task);
            match deadline {
                Some(deadline) => state.deadlines.push(Reverse((deadline, seq))),
                None => tracing::trace!(?delay, "timer delay out of range; entry never fires"),
            }
        }
        timer.wake.notify_one();
        TimerHandle {
            seq,
            timer: Arc::clone(timer),
        }
    }

    fn remove(&self, seq: u64) {
        let mut state = self.state.lock();
        if state.tasks.remove(&seq).is_none() {
            return;
        }
        if state.deadlines.len() > state.tasks.len() * 2 + COMPACT_SLACK {
            let State { tasks, deadlines } = &mut *state;
            deadlines.retain(|Reverse((_, seq))| tasks.contains_key(seq));
        }
    }

    /// Number of tasks that have neither fired nor been canceled.
    #[cfg(test)]
    fn pending(&self) -> usize {
        self.state.lock().tasks.len()
    }

    fn run(&self) {
        let mut state = self.state.lock();
        loop {
            let next = state.deadlines.peek().map(|Reverse(entry)| *entry);
            match next {
                None => self.wake.wait(&mut state),
                Some((deadline, seq)) if deadline <= Instant::now() => {
                    state.deadlines.pop();
                    if let Some(task) = state.tasks.remove(&seq) {
                        MutexGuard::unlocked(&mut state, || {
                            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                                tracing::error!("timer task panicked");
                            }
                        });
                    }
                }
                Some((deadline, _)) => {
                    self.wake.wait_until(&mut state, deadline);
                }
            }
        }
    }
}
