//! The support layer (§4.7-4.11): demand paging, DMA-backed device I/O,
//! the delay daemon, shared-semaphore services, and the instantiator that
//! brings up all eight U-procs.

pub mod alsl;
pub mod delay;
pub mod dma;
pub mod instantiator;
pub mod pager;
pub mod record;

use crate::config::KUSEGSHARE_PAGES;
use crate::error::TrapCause;
use crate::nucleus::state::Nucleus;
use crate::pcb::PcbId;
use crate::sync::SpinLock;
use alsl::ActiveLogicalSemaphoreList;
use delay::ActiveDelayList;
use dma::IoDirection;
use pager::SwapPool;
use record::{ExceptionSlot, Pte, SupportPool};

/// The support record pool, separate from [`crate::nucleus::state::NUCLEUS`]
/// since a PCB only ever needs to know its own [`record::SupportId`], never
/// the pool itself.
pub static SUPPORT: SpinLock<SupportPool> = SpinLock::new(SupportPool::new());

/// The 16-frame swap pool the pager replaces frames in.
pub static SWAP_POOL: SpinLock<SwapPool> = SpinLock::new(SwapPool::new());

/// The global page table backing the shared (KUSEGSHARE) region: one entry
/// per shared page, visible to every U-proc under the same mapping.
pub static SHARED_PAGE_TABLE: SpinLock<[Pte; KUSEGSHARE_PAGES as usize]> =
    SpinLock::new([Pte::new(); KUSEGSHARE_PAGES as usize]);

/// The Active Logical Semaphore List backing SYS19/20.
pub static ALSL: SpinLock<ActiveLogicalSemaphoreList> = SpinLock::new(ActiveLogicalSemaphoreList::new());

/// The Active Delay List backing SYS18.
pub static DELAY_LIST: SpinLock<ActiveDelayList> = SpinLock::new(ActiveDelayList::new());

/// Services SYS9-20, the syscalls the nucleus passes up to the support
/// level rather than handling itself (§4.5's table, rows 9-20): reads the
/// syscall number from `a0` of the process's general exception-slot saved
/// state and routes to the matching handler.
///
/// SYS11 (WritePrinter), SYS12 (WriteTerminal), and SYS13 (ReadTerminal) —
/// the character-device echo/print helpers — and any number this kernel
/// doesn't recognize fall through to `UnknownSyscall`, the same trap a
/// genuinely bogus syscall number would produce.
pub fn dispatch_general_exception(
    nucleus: &mut Nucleus,
    support: &mut SupportPool,
    swap: &mut SwapPool,
    shared_table: &mut [Pte; KUSEGSHARE_PAGES as usize],
    delay_list: &mut ActiveDelayList,
    alsl: &mut ActiveLogicalSemaphoreList,
    bus: &crate::board::bus::Bus,
    pid: PcbId,
) -> Result<i32, TrapCause> {
    let support_id = nucleus
        .pcbs
        .get(pid)
        .support
        .expect("general exceptions only pass up to processes with a support record");
    let state = *support.get(support_id).state(ExceptionSlot::General);
    let number = state.a0();

    match number {
        9 => {
            crate::nucleus::syscalls::terminate_process(nucleus, pid);
            Ok(0)
        }
        10 => Ok(crate::arch::timer::now_us() as i32),
        14 | 15 => {
            let direction = if number == 14 {
                IoDirection::Write
            } else {
                IoDirection::Read
            };
            dma::sys_page_io(
                nucleus,
                pid,
                &state,
                bus,
                false,
                direction,
                state.a1(),
                state.a2(),
                state.a3(),
            )
        }
        16 | 17 => {
            let direction = if number == 16 {
                IoDirection::Write
            } else {
                IoDirection::Read
            };
            dma::sys_page_io(
                nucleus,
                pid,
                &state,
                bus,
                true,
                direction,
                state.a1(),
                state.a2(),
                state.a3(),
            )
        }
        18 => {
            let seconds = state.a1() as i32;
            delay::sys_delay(nucleus, support, pid, &state, delay_list, seconds).map(|()| 0)
        }
        19 => alsl::sys_p(nucleus, support, pid, &state, alsl, state.a1()).map(|()| 0),
        20 => alsl::sys_v(nucleus, alsl, state.a1()).map(|()| 0),
        // Everything else, including the out-of-scope character-device
        // helpers (11-13), is unrecognized here.
        _ => Err(TrapCause::UnknownSyscall(number)),
    }
}

#[cfg(target_arch = "mips")]
mod trampoline {
    use super::*;
    use crate::arch;
    use crate::nucleus::{scheduler, state::NUCLEUS, syscalls};
    use crate::support::pager::{self, DiskBackingStore};

    /// The TLB-refill/page-fault handler's real entry point: the PC wired
    /// into every U-proc's `ExceptionContext::PageFault` at creation time.
    /// Runs entirely under the nucleus lock — no process ever runs `Passeren`
    /// against it directly, only through the ordinary pager call it makes.
    #[no_mangle]
    pub extern "C" fn pager_trampoline() -> ! {
        let outcome;
        {
            let mut nucleus = NUCLEUS.lock();
            let mut support = SUPPORT.lock();
            let mut swap = SWAP_POOL.lock();
            let mut shared = SHARED_PAGE_TABLE.lock();
            let pid = nucleus
                .current
                .expect("the pager only ever runs on behalf of the process it faulted");
            let support_id = nucleus
                .pcbs
                .get(pid)
                .support
                .expect("pass-up-or-die only reaches the pager for a U-proc with a support record");
            let retry_state = *support.get(support_id).state(ExceptionSlot::PageFault);
            let mut backing = DiskBackingStore::new(crate::board::bus());
            let result = pager::handle_page_fault(
                &mut nucleus,
                pid,
                &mut support,
                &mut swap,
                &mut shared,
                &mut backing,
            );
            outcome = match result {
                // A page fault that contends the swap-pool mutex blocks `pid`
                // on it partway through `handle_page_fault` (see that
                // function's comment) and still returns `Ok`; `current` no
                // longer being `pid` is how that's told apart from an
                // uncontended fault that's actually ready to retry.
                Ok(()) if nucleus.current == Some(pid) => {
                    nucleus.pcbs.get_mut(pid).state = retry_state;
                    Ok(retry_state)
                }
                Ok(()) => Err(()),
                Err(_) => {
                    syscalls::terminate_process(&mut nucleus, pid);
                    Err(())
                }
            };
        }
        match outcome {
            Ok(retry_state) => arch::resume(&retry_state),
            Err(()) => scheduler::schedule(&NUCLEUS),
        }
    }

    /// The general exception handler's real entry point: the PC wired into
    /// every U-proc's `ExceptionContext::General`.
    #[no_mangle]
    pub extern "C" fn general_trampoline() -> ! {
        let outcome;
        {
            let mut nucleus = NUCLEUS.lock();
            let mut support = SUPPORT.lock();
            let mut swap = SWAP_POOL.lock();
            let mut shared = SHARED_PAGE_TABLE.lock();
            let mut delay_list = DELAY_LIST.lock();
            let mut alsl = ALSL.lock();
            let pid = nucleus
                .current
                .expect("the general handler only ever runs on behalf of the process it trapped");
            let support_id = nucleus
                .pcbs
                .get(pid)
                .support
                .expect("pass-up-or-die only reaches here for a U-proc with a support record");
            let mut retry_state = *support.get(support_id).state(ExceptionSlot::General);
            let result = dispatch_general_exception(
                &mut nucleus,
                &mut support,
                &mut swap,
                &mut shared,
                &mut delay_list,
                &mut alsl,
                crate::board::bus(),
                pid,
            );
            outcome = match result {
                // SYS14-17 (DMA I/O), SYS18 (delay), and SYS19 (shared-P) all
                // block `pid` on a semaphore before returning `Ok` once they
                // contend; `current` no longer being `pid` is how that's told
                // apart from a handler that ran to completion synchronously.
                Ok(v0) if nucleus.current == Some(pid) => {
                    retry_state.advance_past_trap();
                    retry_state.set_v0(v0 as u32);
                    nucleus.pcbs.get_mut(pid).state = retry_state;
                    Ok(retry_state)
                }
                Ok(_) => Err(()),
                Err(_) => {
                    syscalls::terminate_process(&mut nucleus, pid);
                    Err(())
                }
            };
        }
        match outcome {
            Ok(retry_state) => arch::resume(&retry_state),
            Err(()) => scheduler::schedule(&NUCLEUS),
        }
    }
}

#[cfg(target_arch = "mips")]
pub use trampoline::{general_trampoline, pager_trampoline};
