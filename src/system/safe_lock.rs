//! A mutex-guarded state paired with one condition variable.
//!
//! Every producer/consumer handoff in the samplers (stage queues, publish
//! slots, interruptible sleeps) goes through this type so that the
//! "mutate under the lock, then notify" discipline lives in one place.
//! Predicated waits re-check their condition after every wakeup, so
//! spurious wakeups and notifications sent before the wait began are both
//! harmless as long as the state change itself happened under the lock.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct SafeLock<T> {
    state: Mutex<T>,
    cond: Condvar,
}

impl<T> SafeLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: Mutex::new(value),
            cond: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.state.lock()
    }

    /// Block until notified. May return spuriously; prefer [`wait_while`].
    ///
    /// [`wait_while`]: SafeLock::wait_while
    pub fn wait(&self, guard: &mut MutexGuard<'_, T>) {
        self.cond.wait(guard);
    }

    /// Block while `condition` holds.
    pub fn wait_while<F>(&self, guard: &mut MutexGuard<'_, T>, condition: F)
    where
        F: FnMut(&mut T) -> bool,
    {
        self.cond.wait_while(guard, condition);
    }

    /// Block until notified or `timeout` elapses. Returns `true` on timeout.
    pub fn wait_for(&self, guard: &mut MutexGuard<'_, T>, timeout: Duration) -> bool {
        self.cond.wait_for(guard, timeout).timed_out()
    }

    /// Block while `condition` holds, for at most `timeout`.
    ///
    /// Returns `true` if the deadline passed with the condition still holding.
    pub fn wait_for_while<F>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        timeout: Duration,
        mut condition: F,
    ) -> bool
    where
        F: FnMut(&mut T) -> bool,
    {
        let deadline = Instant::now() + timeout;
        while condition(&mut **guard) {
            if self.cond.wait_until(guard, deadline).timed_out() {
                return condition(&mut **guard);
            }
        }
        false
    }

    pub fn notify_one(&self) {
        self.cond.notify_one();
    }

    pub fn notify_all(&self) {
        self.cond.notify_all();
    }

    /// Mutate the state under the lock, then wake every waiter.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = {
            let mut guard = self.state.lock();
            f(&mut guard)
        };
        self.cond.notify_all();
        result
    }
}
