//! A typed pointer to a fixed MMIO register block: a `Deref` to the register
//! struct, with no bounds or liveness checking beyond what the caller's
//! `unsafe fn new` promised.

use core::ops::Deref;

pub struct Mmio<T> {
    start_addr: *mut T,
}

impl<T> Mmio<T> {
    /// # Safety
    /// `start_addr` must point to a live, correctly-sized register block for
    /// the remainder of the program, and must not alias any other `Mmio<T>`.
    pub const unsafe fn new(start_addr: *mut T) -> Self {
        Self { start_addr }
    }
}

impl<T> Deref for Mmio<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: guaranteed by the caller of `Mmio::new`.
        unsafe { &*self.start_addr }
    }
}

// SAFETY: the devices behind these pointers are touched only with interrupts
// masked or through a `SpinLock`, never concurrently.
unsafe impl<T> Sync for Mmio<T> {}
