//! The time-of-day clock, local (quantum) timer, and interval (pseudo-clock)
//! timer.
//!
//! The quantum timer and interval timer are both CP0-adjacent facilities on
//! this machine rather than bus devices: the quantum timer is a per-process
//! countdown armed by the scheduler, the interval timer is a free-running
//! 100ms tick whose expiry the nucleus handles as an ordinary interrupt on
//! line 1.

#[cfg(target_arch = "mips")]
use core::ptr;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::config::PSEUDO_CLOCK_PERIOD_US;

/// Fixed address of the memory-mapped time-of-day clock: a free-running
/// microsecond counter, read-only.
#[cfg(target_arch = "mips")]
const TOD_ADDR: *const u64 = 0x1000_0008 as *const u64;

/// Fixed address of the quantum (local) timer's reload register.
#[cfg(target_arch = "mips")]
const LOCAL_TIMER_ADDR: *mut u32 = 0x1000_0010 as *mut u32;

/// Fixed address of the interval timer's reload register.
#[cfg(target_arch = "mips")]
const INTERVAL_TIMER_ADDR: *mut u32 = 0x1000_0018 as *mut u32;

/// Host-test stand-in for the time-of-day clock: there is no real machine
/// to read it from, so elapsed time is simulated by a monotonically
/// advancing counter instead of touching the fixed "hardware" address.
#[cfg(not(target_arch = "mips"))]
static SIMULATED_CLOCK_US: AtomicU64 = AtomicU64::new(0);

/// Microseconds elapsed since boot.
pub fn now_us() -> u64 {
    #[cfg(target_arch = "mips")]
    // SAFETY: `TOD_ADDR` is a fixed, always-mapped read-only register.
    unsafe {
        ptr::read_volatile(TOD_ADDR)
    }
    #[cfg(not(target_arch = "mips"))]
    {
        SIMULATED_CLOCK_US.fetch_add(1, Ordering::Relaxed)
    }
}

/// Alias used by the `log!` macro for its timestamp column.
pub fn elapsed_us() -> u64 {
    now_us()
}

/// Arms the quantum timer to fire `quantum_us` microseconds from now.
pub fn arm_quantum(quantum_us: u64) {
    #[cfg(target_arch = "mips")]
    // SAFETY: fixed, always-mapped write-only register; truncation to
    // `u32` matches the hardware's reload register width.
    unsafe {
        ptr::write_volatile(LOCAL_TIMER_ADDR, quantum_us as u32);
    }
    #[cfg(not(target_arch = "mips"))]
    {
        let _ = quantum_us;
    }
}

/// Reloads the interval timer with the standard pseudo-clock period. Called
/// once at nucleus init and again every time line 1 interrupts.
pub fn reload_interval_timer() {
    #[cfg(target_arch = "mips")]
    // SAFETY: see `arm_quantum`.
    unsafe {
        ptr::write_volatile(INTERVAL_TIMER_ADDR, PSEUDO_CLOCK_PERIOD_US as u32);
    }
    #[cfg(not(target_arch = "mips"))]
    {
        let _ = PSEUDO_CLOCK_PERIOD_US;
    }
}
