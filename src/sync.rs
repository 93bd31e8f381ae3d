//! Spinlock primitives used throughout the nucleus and support layer.
//!
//! A single-processor kernel does not strictly need a spinning mutex
//! (interrupts, not other cores, are the only source of concurrency), but
//! using one keeps the locking discipline uniform between data genuinely
//! shared only by this core (ASL, PCB pool) and data a device interrupt
//! handler can also touch concurrently with the mutator (swap-pool table,
//! delay list, ALSL).

use core::cell::{Cell, UnsafeCell};
use core::hint;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

/// A spinlock mutex.
pub struct SpinLock<T: ?Sized> {
    is_locked: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: The spinlock guarantees exclusive access to `data` while locked.
unsafe impl<T> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a spinlock around the given data.
    #[inline]
    pub const fn new(data: T) -> Self {
        Self {
            data: UnsafeCell::new(data),
            is_locked: AtomicBool::new(false),
        }
    }

    /// Locks the mutex. The mutex is automatically unlocked when the
    /// returned `MutexGuard` is dropped.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T> {
        while self.is_locked.swap(true, Ordering::Acquire) {
            while self.is_locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
        MutexGuard(self, Cell::new(true))
    }

    /// Safety: must only be called by the destructor of the `MutexGuard`
    /// that locked this mutex.
    #[inline]
    unsafe fn unlock(&self) {
        self.is_locked.store(false, Ordering::Release);
    }

    /// Returns a mutable reference straight through, bypassing locking.
    /// Only sound where the caller can prove exclusive access, e.g. during
    /// single-threaded nucleus init before any interrupt source is armed.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

pub struct MutexGuard<'locked, T>(&'locked SpinLock<T>, Cell<bool>);

impl<T> MutexGuard<'_, T> {
    /// Releases the lock early, before the guard would otherwise drop.
    pub fn unlock(&self) {
        assert!(self.1.get(), "lock already released");
        self.1.set(false);
        // SAFETY: `self` is the guard that acquired this lock.
        unsafe { self.0.unlock() }
    }

    const fn get_pointer(&self) -> NonNull<T> {
        // SAFETY: pointers derived from `UnsafeCell::get` are never null.
        unsafe { NonNull::new_unchecked(self.0.data.get()) }
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        assert!(self.1.get(), "lock already released");
        // SAFETY: holding the guard proves the lock is held
        unsafe { self.get_pointer().as_ref() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        assert!(self.1.get(), "lock already released");
        // SAFETY: holding the guard proves the lock is held
        unsafe { self.get_pointer().as_mut() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        if self.1.get() {
            // SAFETY: this guard acquired the lock and has not yet released it
            unsafe { self.0.unlock() };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SpinLock;

    #[test]
    fn lock_excludes_reentry_after_unlock() {
        let lock = SpinLock::new(0_u32);
        {
            let mut guard = lock.lock();
            *guard += 1;
        }
        let guard = lock.lock();
        assert_eq!(*guard, 1);
    }

    #[test]
    fn manual_unlock_allows_relock() {
        let lock = SpinLock::new(5_u32);
        let guard = lock.lock();
        guard.unlock();
        let mut guard2 = lock.lock();
        *guard2 += 1;
        assert_eq!(*guard2, 6);
    }
}
