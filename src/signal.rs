//! Blocking wake-up primitives used at suspension points.
//!
//! The interpreter never parks a green thread; it blocks the OS thread on
//! one of these until another thread signals it.

use parking_lot::{Condvar, Mutex};

/// A slot filled at most once and drained by a single waiter.
///
/// The first [`set`](Latch::set) wins; later values are dropped.
#[derive(Debug)]
pub(crate) struct Latch<T> {
    slot: Mutex<LatchState<T>>,
    ready: Condvar,
}

#[derive(Debug)]
enum LatchState<T> {
    Empty,
    Full(T),
    Drained,
}

impl<T> Latch<T> {
    pub(crate) fn new() -> Self {
        Latch {
            slot: Mutex::new(LatchState::Empty),
            ready: Condvar::new(),
        }
    }

    /// Fill the latch. Returns `false` when it was already filled.
    pub(crate) fn set(&self, value: T) -> bool {
        let mut slot = self.slot.lock();
        match *slot {
            LatchState::Empty => {
                *slot = LatchState::Full(value);
                self.ready.notify_all();
                true
            }
            LatchState::Full(_) | LatchState::Drained => false,
        }
    }

    /// Block until the latch is filled and take the value.
    ///
    /// Only one caller may wait; a second `wait` after the value was taken
    /// blocks forever.
    pub(crate) fn wait(&self) -> T {
        let mut slot = self.slot.lock();
        loop {
            match std::mem::replace(&mut *slot, LatchState::Drained) {
                LatchState::Full(value) => return value,
                LatchState::Empty => {
                    *slot = LatchState::Empty;
                    self.ready.wait(&mut slot);
                }
                LatchState::Drained => self.ready.wait(&mut slot),
            }
        }
    }
}

/// A one-way gate: closed until [`open`](Gate::open), then every waiter passes.
#[derive(Debug, Default)]
pub(crate) struct Gate {
    open: Mutex<bool>,
    opened: Condvar,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Gate::default()
    }

    pub(crate) fn open(&self) {
        let mut open = self.open.lock();
        *open = true;
        self.opened.notify_all();
    }

    pub(crate) fn is_open(&self) -> bool {
        *self.open.lock()
    }

    pub(crate) fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn latch_keeps_first_value() {
        let latch = Latch::new();
        assert!(latch.set(1));
        assert!(!latch.set(2));
        assert_eq!(latch.wait(), 1);
    }

    #[test]
    fn latch_wakes_blocked_waiter() {
        let latch = Arc::new(Latch::new());
        let setter = Arc::clone(&latch);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            setter.set("ready");
        });
        assert_eq!(latch.wait(), "ready");
        handle.join().unwrap();
    }

    #[test]
    fn gate_releases_all_waiters() {
        let gate = Arc::new(Gate::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let gate = Arc::clone(&gate);
                thread::spawn(move || gate.wait())
            })
            .collect();

        assert!(!gate.is_open());
        gate.open();
        for waiter in waiters {
            waiter.join().unwrap();
        }
        assert!(gate.is_open());
    }
}
