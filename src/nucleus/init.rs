//! Nucleus bring-up (not the instantiator's own bring-up, see
//! [`crate::support::instantiator`]): resets every pool, arms the hardware
//! the nucleus depends on, and launches the instantiator as PCB 0.

use crate::arch;
use crate::config::TLB_SIZE;
use crate::nucleus::state::Nucleus;
use crate::pcb::{PcbId, SavedState};
use crate::support::record::SupportPool;

/// Resets the nucleus's and support layer's pools, clears the TLB, reloads
/// the interval timer, and creates the instantiator's own kernel-mode PCB
/// (no support record: it has no paging state of its own). Returns the
/// instantiator's `PcbId`, queued and ready to run.
pub fn init(nucleus: &mut Nucleus, support: &mut SupportPool) -> PcbId {
    nucleus.init();
    support.init();

    arch::tlb::clear_all(TLB_SIZE);
    arch::timer::reload_interval_timer();

    let instantiator = nucleus
        .pcbs
        .allocate()
        .expect("the PCB pool was just reset; the very first allocation cannot fail");
    nucleus.pcbs.get_mut(instantiator).state = SavedState::default();
    let mut tail = nucleus.ready_tail;
    nucleus.pcbs.enqueue_tail(&mut tail, instantiator);
    nucleus.ready_tail = tail;
    nucleus.live_process_count = 1;

    instantiator
}

/// Writes the Pass-Up Vector at its fixed address: two (handler, stack)
/// pairs the BIOS reads once at power-up, before the nucleus's own support
/// records exist — so these point at the support layer's own trampolines,
/// not at any particular U-proc's registered handler. Real hardware only:
/// host tests have no fixed low-memory address to write to.
#[cfg(target_arch = "mips")]
fn write_pass_up_vector() {
    use crate::config::{INSTANTIATOR_STACK_WORDS, PASS_UP_VECTOR_ADDR};

    #[repr(C)]
    struct PassUpVector {
        tlb_refill_pc: u32,
        tlb_refill_sp: u32,
        general_pc: u32,
        general_sp: u32,
    }

    static NUCLEUS_EXCEPTION_STACK: crate::sync::SpinLock<[u32; INSTANTIATOR_STACK_WORDS]> =
        crate::sync::SpinLock::new([0; INSTANTIATOR_STACK_WORDS]);

    let sp = {
        let stack = NUCLEUS_EXCEPTION_STACK.lock();
        // SAFETY: one past the last element is always a valid pointer value.
        unsafe { stack.as_ptr().add(stack.len()) as u32 }
    };
    let vector = PassUpVector {
        tlb_refill_pc: crate::support::pager_trampoline as usize as u32,
        tlb_refill_sp: sp,
        general_pc: crate::support::general_trampoline as usize as u32,
        general_sp: sp,
    };
    // SAFETY: `PASS_UP_VECTOR_ADDR` is the machine's fixed, always-mapped
    // low-memory vector slot, written exactly once here before any
    // exception can occur.
    unsafe {
        core::ptr::write_volatile(PASS_UP_VECTOR_ADDR as *mut PassUpVector, vector);
    }
}

/// Brings up the nucleus against the real static pools, wires the
/// instantiator's PC to its real entry point, then runs the scheduler
/// forever. Never returns: only reachable on real hardware, since the
/// scheduler's own success paths end in
/// [`arch::resume`]/[`arch::halt_forever`].
#[cfg(target_arch = "mips")]
pub fn start() -> ! {
    use crate::nucleus::scheduler;
    use crate::nucleus::state::NUCLEUS;
    use crate::support::SUPPORT;

    let instantiator = {
        let mut nucleus = NUCLEUS.lock();
        let mut support = SUPPORT.lock();
        let instantiator = init(&mut nucleus, &mut support);
        write_pass_up_vector();
        nucleus.pcbs.get_mut(instantiator).state.pc = crate::support::instantiator::run as usize as u32;
        instantiator
    };
    let _ = instantiator;
    scheduler::schedule(&NUCLEUS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_exactly_one_live_process_ready_to_run() {
        let mut nucleus = Nucleus::new();
        let mut support = SupportPool::new();
        let instantiator = init(&mut nucleus, &mut support);
        assert_eq!(nucleus.live_process_count, 1);
        let mut tail = nucleus.ready_tail;
        assert_eq!(nucleus.pcbs.dequeue_head(&mut tail), Some(instantiator));
    }

    #[test]
    fn init_resets_pools_left_dirty_by_a_prior_run() {
        let mut nucleus = Nucleus::new();
        let mut support = SupportPool::new();
        let first = init(&mut nucleus, &mut support);
        nucleus.pcbs.allocate().unwrap();
        support.allocate(5).unwrap();

        let second = init(&mut nucleus, &mut support);
        assert_eq!(second, first);
        assert_eq!(nucleus.live_process_count, 1);
    }
}
