//! Architecture-specific primitives: CP0 register layouts, TLB instructions,
//! the clock/timer trio, and a scoped interrupt mask.

pub mod cp0;
pub mod timer;
pub mod tlb;

use core::sync::atomic::{AtomicU32, Ordering};

use cp0::Status;

/// The processor's status register is mirrored here in host-test builds,
/// where there is no real CP0 to read; on real hardware this would be a
/// `mfc0`/`mtc0` pair instead. Kept as a single global since the machine is
/// single-core.
static SOFTWARE_STATUS: AtomicU32 = AtomicU32::new(Status::new().with_ie_c(true).into_bits());

fn read_status() -> Status {
    #[cfg(target_arch = "mips")]
    {
        let raw: u32;
        // SAFETY: reads CP0 register 12 (Status), no side effects.
        unsafe { core::arch::asm!("mfc0 {0}, $12", out(reg) raw, options(nostack, readonly)) };
        Status::from_bits(raw)
    }
    #[cfg(not(target_arch = "mips"))]
    {
        Status::from_bits(SOFTWARE_STATUS.load(Ordering::Relaxed))
    }
}

fn write_status(status: Status) {
    #[cfg(target_arch = "mips")]
    // SAFETY: writes CP0 register 12 (Status); the caller constructed a
    // well-formed `Status` value.
    unsafe {
        core::arch::asm!("mtc0 {0}, $12", in(reg) status.into_bits(), options(nostack));
    }
    #[cfg(not(target_arch = "mips"))]
    {
        SOFTWARE_STATUS.store(status.into_bits(), Ordering::Relaxed);
    }
}

/// Masks every interrupt line while alive, restoring the prior mask state
/// on drop. Used around the PCB-pool/ASL mutations in the syscall and
/// interrupt handlers where a half-updated queue must never be observed by
/// a nested interrupt.
pub struct InterruptMask {
    previous: Status,
}

impl InterruptMask {
    #[must_use]
    pub fn new() -> Self {
        let previous = read_status();
        write_status(previous.with_ie_c(false));
        Self { previous }
    }
}

impl Default for InterruptMask {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptMask {
    fn drop(&mut self) {
        write_status(self.previous);
    }
}

/// Halts the processor forever. Used by the panic handler and by the
/// scheduler when no process will ever become ready again.
pub fn halt_forever() -> ! {
    loop {
        #[cfg(target_arch = "mips")]
        // SAFETY: `wait` just idles the core; the loop keeps it there.
        unsafe {
            core::arch::asm!("wait", options(nostack, nomem));
        }
        #[cfg(not(target_arch = "mips"))]
        core::hint::spin_loop();
    }
}

/// Enables interrupts and idles until one arrives, used by the scheduler
/// when the ready queue is empty but some process is soft-blocked.
pub fn wait_for_interrupt() {
    let status = read_status();
    write_status(status.with_ie_c(true));
    #[cfg(target_arch = "mips")]
    // SAFETY: `wait` resumes on the next interrupt; the caller's dispatcher
    // runs immediately afterward.
    unsafe {
        core::arch::asm!("wait", options(nostack, nomem));
    }
}

/// Loads `state` into the processor and jumps to it (the MIPS `LDST`
/// instruction on real hardware): restores every CP0 register and GPR in
/// one atomic step, so a nested interrupt can never observe a half-restored
/// context. Never returns.
pub fn resume(state: &crate::pcb::SavedState) -> ! {
    #[cfg(target_arch = "mips")]
    // SAFETY: `state` was itself produced by a prior trap that saved a
    // live process context, or assembled at process-creation time to a
    // valid initial context.
    unsafe {
        core::arch::asm!(
            "move $29, {state}",
            "lui $8, 0x0FFF",
            "ldst $8",
            state = in(reg) state,
            options(noreturn, nostack)
        );
    }
    #[cfg(not(target_arch = "mips"))]
    {
        let _ = state;
        unreachable!("resuming a saved context only happens on real hardware")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_restores_prior_state_on_drop() {
        write_status(Status::new().with_ie_c(true));
        {
            let _mask = InterruptMask::new();
            assert!(!read_status().ie_c());
        }
        assert!(read_status().ie_c());
    }

    #[test]
    fn nested_masks_restore_in_order() {
        write_status(Status::new().with_ie_c(true));
        let outer = InterruptMask::new();
        assert!(!read_status().ie_c());
        let inner = InterruptMask::new();
        assert!(!read_status().ie_c());
        drop(inner);
        assert!(!read_status().ie_c());
        drop(outer);
        assert!(read_status().ie_c());
    }
}
