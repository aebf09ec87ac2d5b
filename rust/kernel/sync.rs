// SPDX-License-Identifier: GPL-2.0

//! Synchronisation primitives.
//!
//! This module contains the locking and waiting primitives used by the drivers. Mutexes are
//! non-poisoning (a panicking holder does not wedge the lock for everyone else), and condition
//! variables carry a name so that long waits can be attributed in the log.

use core::time::Duration;

pub use parking_lot::{Mutex, MutexGuard};
pub use std::sync::{Arc, Weak};

/// A condition variable, the moral equivalent of a kernel wait queue.
///
/// Waiters must hold the mutex that protects the condition they are waiting on, and must re-check
/// the condition after every wakeup.
pub struct CondVar {
    inner: parking_lot::Condvar,
    name: &'static str,
}

/// The outcome of a bounded wait on a [`CondVar`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CondVarTimeoutResult {
    /// The wait was ended by a notification before the deadline.
    Woken,
    /// The deadline passed without a notification.
    Timeout,
}

impl CondVar {
    /// Creates a new named condition variable.
    pub const fn new(name: &'static str) -> Self {
        CondVar {
            inner: parking_lot::Condvar::new(),
            name,
        }
    }

    /// Returns the name this condition variable was created with.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Releases the lock and waits for a notification, reacquiring the lock before returning.
    pub fn wait<T: ?Sized>(&self, guard: &mut MutexGuard<'_, T>) {
        self.inner.wait(guard);
    }

    /// Like [`CondVar::wait`], but gives up once `timeout` has elapsed.
    pub fn wait_timeout<T: ?Sized>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        timeout: Duration,
    ) -> CondVarTimeoutResult {
        if self.inner.wait_for(guard, timeout).timed_out() {
            CondVarTimeoutResult::Timeout
        } else {
            CondVarTimeoutResult::Woken
        }
    }

    /// Wakes a single waiter, if any.
    pub fn notify_one(&self) {
        self.inner.notify_one();
    }

    /// Wakes all waiters.
    pub fn notify_all(&self) {
        self.inner.notify_all();
    }
}

impl core::fmt::Debug for CondVar {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CondVar").field("name", &self.name).finish()
    }
}
