//! The per-object advisory lock.
//!
//! Unlike `std::sync::Mutex`, acquisition does not produce a guard: `lock`
//! and `unlock` are separate requests that may arrive from different threads,
//! and no owner is recorded. Cooperating callers pair them themselves.

use std::{
    sync::{Condvar, Mutex},
    time::Duration,
};

#[derive(Default)]
pub struct AdvisoryLock {
    locked: Mutex<bool>,
    released: Condvar,
}

impl AdvisoryLock {
    pub fn new() -> AdvisoryLock {
        AdvisoryLock::default()
    }

    /// Blocks until the lock is free, then takes it.
    pub fn lock(&self) {
        let guard = self.locked.lock().unwrap();
        let mut guard = self
            .released
            .wait_while(guard, |locked| *locked)
            .unwrap();
        *guard = true;
    }

    /// Takes the lock if it is free within `timeout`.
    ///
    /// Returns `false` on timeout.
    pub fn lock_timeout(&self, timeout: Duration) -> bool {
        let guard = self.locked.lock().unwrap();
        let (mut guard, res) = self
            .released
            .wait_timeout_while(guard, timeout, |locked| *locked)
            .unwrap();
        if res.timed_out() && *guard {
            return false;
        }
        *guard = true;
        true
    }

    /// Takes the lock only if it is free right now.
    pub fn try_lock(&self) -> bool {
        let mut guard = self.locked.lock().unwrap();
        if *guard {
            false
        } else {
            *guard = true;
            true
        }
    }

    /// Releases the lock and wakes one waiter.
    ///
    /// Returns `false` if the lock was not held.
    pub fn unlock(&self) -> bool {
        let mut guard = self.locked.lock().unwrap();
        if !*guard {
            return false;
        }
        *guard = false;
        drop(guard);
        self.released.notify_one();
        true
    }

    pub fn is_locked(&self) -> bool {
        *self.locked.lock().unwrap()
    }
}

impl std::fmt::Debug for AdvisoryLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdvisoryLock")
            .field("locked", &self.is_locked())
            .finish()
    }
}
