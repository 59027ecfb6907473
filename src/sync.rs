// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Fault-Aware Spinlock
//!
//! A spin mutex that remembers which thread holds it. The fault handler
//! runs on the faulting thread; if that thread already holds the lock the
//! handler must not spin on it (it would never be released), so it asks
//! with [`FaultLock::lock_from_fault`] and gets `None` instead.
//!
//! Spinning rather than parking keeps the handler path free of futex
//! bookkeeping; critical sections are short table edits and page copies.

use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::mutex::{SpinMutex, SpinMutexGuard};

/// No thread holds the lock
const NO_OWNER: usize = 0;

/// Identifier of the calling thread
fn current_thread() -> usize {
    // SAFETY: pthread_self has no preconditions and is async-signal-safe
    // in practice on every supported libc.
    unsafe { libc::pthread_self() as usize }
}

/// Spin mutex with owner tracking
pub struct FaultLock<T> {
    inner: SpinMutex<T>,
    owner: AtomicUsize,
}

impl<T> FaultLock<T> {
    /// Create a new lock
    pub const fn new(data: T) -> Self {
        Self {
            inner: SpinMutex::new(data),
            owner: AtomicUsize::new(NO_OWNER),
        }
    }

    /// Acquire the lock, spinning until it becomes available
    pub fn lock(&self) -> FaultLockGuard<'_, T> {
        let guard = self.inner.lock();
        self.owner.store(current_thread(), Ordering::Release);
        FaultLockGuard { guard, owner: &self.owner }
    }

    /// Acquire the lock from fault context
    ///
    /// Returns `None` when the faulting thread is the one holding the lock.
    pub fn lock_from_fault(&self) -> Option<FaultLockGuard<'_, T>> {
        let me = current_thread();
        loop {
            if let Some(guard) = self.inner.try_lock() {
                self.owner.store(me, Ordering::Release);
                return Some(FaultLockGuard { guard, owner: &self.owner });
            }
            if self.owner.load(Ordering::Acquire) == me {
                return None;
            }
            core::hint::spin_loop();
        }
    }

}

/// RAII guard for a [`FaultLock`]
pub struct FaultLockGuard<'a, T> {
    guard: SpinMutexGuard<'a, T>,
    owner: &'a AtomicUsize,
}

impl<T> Drop for FaultLockGuard<'_, T> {
    fn drop(&mut self) {
        // Cleared before the inner guard releases the mutex.
        self.owner.store(NO_OWNER, Ordering::Release);
    }
}

impl<T> Deref for FaultLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for FaultLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
