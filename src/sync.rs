//! Cross-context synchronization primitives.
//!
//! Two building blocks cover every hand-off in the pipeline:
//!
//! - [`Notify`]: binary, interrupt-safe notification (chirp start, DMA
//!   conversion done, capture available). Implemented by the platform.
//! - [`TimedLock`]: a mutex whose acquisition is always bounded by a timeout.
//!   Used for the reconfiguration lock, the settings store and the send gate.
//!
//! # Rules
//!
//! - No allocation, no blocking in `notify_from_isr()`
//! - Every lock acquisition outside the owning task is timeout-bounded
//! - A lock is never held across the wait for the next chirp

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::hal::{wait_step, Clock};

/// Binary notification between execution contexts.
///
/// Multiple notifications before a wait collapse into one (binary semantics,
/// like a FreeRTOS binary semaphore or task notification with clear-on-exit).
pub trait Notify: Sync {
    /// Signal from task context.
    fn notify(&self);

    /// Signal from interrupt context. Must not allocate or block.
    fn notify_from_isr(&self) {
        self.notify();
    }

    /// Wait for a notification.
    ///
    /// `None` waits forever. Returns `true` if a notification was consumed,
    /// `false` on timeout.
    fn wait(&self, timeout_us: Option<u64>) -> bool;
}

impl<N: Notify + ?Sized> Notify for &N {
    fn notify(&self) {
        (**self).notify()
    }

    fn notify_from_isr(&self) {
        (**self).notify_from_isr()
    }

    fn wait(&self, timeout_us: Option<u64>) -> bool {
        (**self).wait(timeout_us)
    }
}

/// Polling interval while waiting for a contended [`TimedLock`].
pub const LOCK_POLL_US: u32 = 100;

/// Mutex with timeout-bounded acquisition.
///
/// Acquisition is a single atomic compare-exchange; contention is resolved by
/// polling through [`wait_step`] until the deadline passes, yielding only
/// while a whole scheduler tick still fits. The guard releases on drop.
pub struct TimedLock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: Access to `value` is only possible through a guard, and at most one
// guard exists at a time (enforced by the `locked` flag with Acquire/Release).
unsafe impl<T: Send> Sync for TimedLock<T> {}
unsafe impl<T: Send> Send for TimedLock<T> {}

impl<T> TimedLock<T> {
    /// Create a new unlocked lock.
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Try to acquire without waiting.
    #[inline]
    pub fn try_lock(&self) -> Option<TimedLockGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| TimedLockGuard { lock: self })
    }

    /// Acquire, waiting at most `timeout_us`.
    ///
    /// Returns `None` on timeout. A zero timeout is a single attempt.
    pub fn lock_timeout<C: Clock + ?Sized>(
        &self,
        clock: &C,
        timeout_us: u64,
    ) -> Option<TimedLockGuard<'_, T>> {
        let deadline = clock.now_us().saturating_add(timeout_us);
        loop {
            if let Some(guard) = self.try_lock() {
                return Some(guard);
            }
            if clock.now_us() >= deadline {
                return None;
            }
            wait_step(clock, deadline, LOCK_POLL_US);
        }
    }

    /// Check whether the lock is currently held.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Consume the lock and return the protected value.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Default> Default for TimedLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// RAII guard for [`TimedLock`].
pub struct TimedLockGuard<'a, T> {
    lock: &'a TimedLock<T>,
}

impl<T> Deref for TimedLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: Guard existence proves exclusive access.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for TimedLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: Guard existence proves exclusive access.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for TimedLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
