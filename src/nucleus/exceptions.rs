//! The unified exception/interrupt dispatcher (§4.4): every trap, on every
//! cause, lands here first.
//!
//! Kernel-mode-only syscalls 1-8 are not reachable through an ordinary
//! `syscall` instruction issued from user mode — the dispatcher treats that
//! as a reserved-instruction program trap and passes it up like any other,
//! rather than servicing it.

use crate::arch::cp0::{Cause, ExceptionCode, Status};
use crate::nucleus::interrupts;
use crate::nucleus::state::Nucleus;
use crate::nucleus::syscalls;
use crate::pcb::{PcbId, SavedState};
use crate::support::record::{ExceptionSlot, SupportPool};

/// Where a given exception code routes, independent of any process state —
/// pulled out so the routing table itself is testable without a `Nucleus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Routing {
    Interrupt,
    PageFault,
    Syscall,
    General,
    Unknown,
}

/// Classifies a raw 5-bit `Cause.ExcCode` field directly, rather than going
/// through `ExceptionCode::from`, whose `FromPrimitive` fallback folds every
/// out-of-range value into `ReservedInstruction` — which would make a truly
/// unrecognized code indistinguishable from a general exception instead of
/// the panic it deserves.
fn classify(raw_code: u8) -> Routing {
    match raw_code {
        code if code == ExceptionCode::Interrupt as u8 => Routing::Interrupt,
        code
            if code == ExceptionCode::TlbModification as u8
                || code == ExceptionCode::TlbInvalidOnLoad as u8
                || code == ExceptionCode::TlbInvalidOnStore as u8 =>
        {
            Routing::PageFault
        }
        code if code == ExceptionCode::Syscall as u8 => Routing::Syscall,
        0..=12 => Routing::General,
        _ => Routing::Unknown,
    }
}

/// Entry point called by the architecture glue after it has copied CP0
/// state into `nucleus.current`'s saved state.
pub fn handle(nucleus: &mut Nucleus, support: &mut SupportPool) {
    let pid = nucleus
        .current
        .expect("an exception only ever occurs while a process is running");
    let state = nucleus.pcbs.get(pid).state;
    let cause = Cause::from_bits(state.cause);

    match classify(cause.exc_code()) {
        Routing::Interrupt => interrupts::dispatch(nucleus, u32::from(cause.interrupt_pending())),
        Routing::PageFault => pass_up_or_die(nucleus, support, pid, ExceptionSlot::PageFault),
        Routing::Syscall => dispatch_syscall(nucleus, support, pid),
        Routing::General => pass_up_or_die(nucleus, support, pid, ExceptionSlot::General),
        Routing::Unknown => panic!("unrecognized exception code {}", cause.exc_code()),
    }
}

/// Whether `number` must be rejected as a privileged syscall issued from
/// user mode, forcing a pass-up instead of service. Pulled out as a pure
/// predicate so the privilege rule is testable on its own.
fn is_privileged_violation(status: Status, number: i32) -> bool {
    status.ku_p() && (1..=8).contains(&number)
}

fn dispatch_syscall(nucleus: &mut Nucleus, support: &mut SupportPool, pid: PcbId) {
    let mut state = nucleus.pcbs.get(pid).state;
    let status = Status::from_bits(state.status);
    let number = state.a0() as i32;

    if is_privileged_violation(status, number) {
        let mut cause = Cause::from_bits(state.cause);
        cause.set_exc_code(u32::from(ExceptionCode::ReservedInstruction) as u8);
        state.cause = cause.into_bits();
        nucleus.pcbs.get_mut(pid).state = state;
        pass_up_or_die(nucleus, support, pid, ExceptionSlot::General);
        return;
    }

    state.advance_past_trap();
    nucleus.pcbs.get_mut(pid).state = state;

    match number {
        1 => {
            // SAFETY: by convention `a1`/`a2` are addresses the caller (the
            // process issuing SYS1, always kernel-mode) prepared itself: a
            // `SavedState` for the child to begin in, and optionally a
            // `SupportId` byte. Not hardware-enforced, same as every other
            // caller-supplied-address syscall argument in this module.
            let initial_state = unsafe { &*(state.a1() as *const SavedState) };
            let support_id = if state.a2() == 0 {
                None
            } else {
                Some(unsafe { *(state.a2() as *const u8) })
            };
            let result = syscalls::create_process(nucleus, pid, initial_state, support_id);
            let mut state = nucleus.pcbs.get(pid).state;
            state.set_v0(result as u32);
            nucleus.pcbs.get_mut(pid).state = state;
        }
        2 => syscalls::terminate_process(nucleus, pid),
        3 => {
            syscalls::passeren(nucleus, pid, &state, state.a1() as usize);
        }
        4 => syscalls::verhogen(nucleus, state.a1() as usize),
        5 => {
            let line = state.a1() as usize;
            let device = state.a2() as usize;
            let sub = terminal_sub_device(line, state.a3());
            syscalls::wait_io(nucleus, pid, &state, line, device, sub);
        }
        6 => {
            let cpu_time = syscalls::get_cpu_time(nucleus, pid);
            let mut state = nucleus.pcbs.get(pid).state;
            state.set_v0(cpu_time as u32);
            nucleus.pcbs.get_mut(pid).state = state;
        }
        7 => syscalls::wait_clock(nucleus, pid, &state),
        8 => {
            let support_id = syscalls::get_support_ptr(nucleus, pid);
            let mut state = nucleus.pcbs.get(pid).state;
            state.set_v0(support_id.map_or(0, u32::from));
            nucleus.pcbs.get_mut(pid).state = state;
        }
        // 9-20 are support-level syscalls (§4.8-4.10): the nucleus doesn't
        // service them itself, it passes them up like any other trap, and
        // the U-proc's registered SYS/Bp handler dispatches from there.
        _ => pass_up_or_die(nucleus, support, pid, ExceptionSlot::General),
    }
}

/// `a3` disambiguates the terminal's two sub-devices for SYS5 on line 7;
/// meaningless (and ignored) for every other device class.
fn terminal_sub_device(line: usize, a3: u32) -> Option<crate::board::TerminalSubDevice> {
    use crate::board::TerminalSubDevice;
    use crate::config::LAST_DEVICE_LINE;
    if line == LAST_DEVICE_LINE {
        Some(if a3 == 0 {
            TerminalSubDevice::Transmit
        } else {
            TerminalSubDevice::Receive
        })
    } else {
        None
    }
}

/// Copies the trapped state into the current process's support record and
/// resumes it at the handler registered for `slot`; if the process has no
/// support record (it isn't a U-proc, or the instantiator itself), there is
/// nowhere to pass the exception up to, so it dies instead.
fn pass_up_or_die(
    nucleus: &mut Nucleus,
    support: &mut SupportPool,
    pid: PcbId,
    slot: ExceptionSlot,
) {
    let trapped_state = nucleus.pcbs.get(pid).state;
    match nucleus.pcbs.get(pid).support {
        Some(support_id) => {
            let record = support.get_mut(support_id);
            *record.state_mut(slot) = trapped_state;
            let context = record.context(slot);
            let mut resumed = SavedState::default();
            resumed.pc = context.pc;
            resumed.status = context.status;
            resumed.set_sp(context.stack_ptr);
            nucleus.pcbs.get_mut(pid).state = resumed;
        }
        None => syscalls::terminate_process(nucleus, pid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::cp0::Status;

    #[test]
    fn routing_table_matches_the_three_exception_classes() {
        assert_eq!(
            classify(ExceptionCode::Interrupt as u8),
            Routing::Interrupt
        );
        assert_eq!(
            classify(ExceptionCode::TlbModification as u8),
            Routing::PageFault
        );
        assert_eq!(
            classify(ExceptionCode::TlbInvalidOnLoad as u8),
            Routing::PageFault
        );
        assert_eq!(classify(ExceptionCode::Syscall as u8), Routing::Syscall);
        assert_eq!(
            classify(ExceptionCode::ArithmeticOverflow as u8),
            Routing::General
        );
        assert_eq!(classify(ExceptionCode::Breakpoint as u8), Routing::General);
    }

    #[test]
    fn unrecognized_exception_codes_route_to_unknown() {
        assert_eq!(classify(13), Routing::Unknown);
        assert_eq!(classify(31), Routing::Unknown);
    }

    #[test]
    #[should_panic(expected = "unrecognized exception code")]
    fn handle_panics_on_an_unrecognized_exception_code() {
        let (mut nucleus, mut support, pid) = booted();
        let mut state = nucleus.pcbs.get(pid).state;
        state.cause = Cause::new().with_exc_code(31).into_bits();
        nucleus.pcbs.get_mut(pid).state = state;
        handle(&mut nucleus, &mut support);
    }

    #[test]
    fn user_mode_syscall_1_through_8_is_a_privilege_violation() {
        let user = Status::new().with_ku_p(true);
        let kernel = Status::new().with_ku_p(false);
        assert!(is_privileged_violation(user, 1));
        assert!(is_privileged_violation(user, 8));
        assert!(!is_privileged_violation(user, 9));
        assert!(!is_privileged_violation(kernel, 1));
    }

    fn booted() -> (Nucleus, SupportPool, PcbId) {
        let mut nucleus = Nucleus::new();
        nucleus.init();
        let mut support = SupportPool::new();
        support.init();
        let pid = nucleus.pcbs.allocate().unwrap();
        nucleus.current = Some(pid);
        nucleus.live_process_count = 1;
        (nucleus, support, pid)
    }

    #[test]
    fn pass_up_without_a_support_record_terminates_the_process() {
        let (mut nucleus, mut support, pid) = booted();
        pass_up_or_die(&mut nucleus, &mut support, pid, ExceptionSlot::General);
        assert_eq!(nucleus.live_process_count, 0);
    }

    #[test]
    fn pass_up_with_a_support_record_resumes_at_its_registered_handler() {
        let (mut nucleus, mut support, pid) = booted();
        let support_id = support.allocate(1).unwrap();
        nucleus.pcbs.get_mut(pid).support = Some(support_id);
        support.get_mut(support_id).set_context(
            ExceptionSlot::PageFault,
            crate::support::record::ExceptionContext {
                pc: 0x1234,
                status: 0,
                stack_ptr: 0xABCD,
            },
        );
        nucleus.pcbs.get_mut(pid).state.cause =
            Cause::new().with_exc_code(u32::from(ExceptionCode::TlbInvalidOnLoad) as u8).into_bits();

        pass_up_or_die(&mut nucleus, &mut support, pid, ExceptionSlot::PageFault);

        assert_eq!(nucleus.live_process_count, 1);
        let resumed = nucleus.pcbs.get(pid).state;
        assert_eq!(resumed.pc, 0x1234);
        assert_eq!(resumed.sp(), 0xABCD);
    }

    #[test]
    fn syscall_4_verhogen_wakes_a_waiter() {
        let (mut nucleus, mut support, pid) = booted();
        let mut sem: i32 = -1;
        let addr = core::ptr::addr_of!(sem) as usize;
        let waiter = nucleus.pcbs.allocate().unwrap();
        nucleus
            .asl
            .insert_blocked(&mut nucleus.pcbs, addr, waiter)
            .unwrap();

        let mut state = SavedState::default();
        state.gpr[crate::pcb::gpr_index::A0] = 4;
        state.gpr[crate::pcb::gpr_index::A1] = addr as u32;
        nucleus.pcbs.get_mut(pid).state = state;

        dispatch_syscall(&mut nucleus, &mut support, pid);

        assert_eq!(sem, 0);
        let mut tail = nucleus.ready_tail;
        assert_eq!(nucleus.pcbs.dequeue_head(&mut tail), Some(waiter));
    }
}
