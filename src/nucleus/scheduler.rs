//! Round-robin scheduling with a fixed quantum (§4.3).
//!
//! `schedule` never returns to its caller on the success paths — it always
//! ends in [`crate::arch::resume`] or [`crate::arch::halt_forever`] — but is
//! written as an ordinary function (not `-> !`) so host tests can exercise
//! the PCB-selection logic up to, but not including, the final jump.

use crate::arch::{self, timer};
use crate::config::QUANTUM_US;
use crate::nucleus::state::Nucleus;
use crate::pcb::PcbId;

/// What the scheduler decided to do, for a caller (real or test) that
/// cannot itself perform a context jump or halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Resume(PcbId),
    WaitForInterrupt,
    Halt,
    Deadlock,
}

/// Picks the next thing to run, mutating `nucleus` to reflect it (dequeuing
/// the new current process, stamping `quantum_start_us`), but stops short
/// of the irreversible action so it can be tested.
pub fn decide(nucleus: &mut Nucleus) -> Decision {
    if let Some(next) = nucleus.pcbs.dequeue_head(&mut nucleus.ready_tail) {
        nucleus.current = Some(next);
        nucleus.quantum_start_us = timer::now_us();
        return Decision::Resume(next);
    }
    nucleus.current = None;
    if nucleus.live_process_count == 0 {
        return Decision::Halt;
    }
    if nucleus.soft_block_count > 0 {
        return Decision::WaitForInterrupt;
    }
    Decision::Deadlock
}

/// Runs the scheduler to its conclusion: resumes a process, idles for an
/// interrupt and recurses, or halts/panics. Only reachable on real
/// hardware — the recursive idle path and the final `resume` never return.
pub fn schedule(nucleus_lock: &crate::sync::SpinLock<Nucleus>) -> ! {
    loop {
        let (decision, resume_state) = {
            let mut nucleus = nucleus_lock.lock();
            let decision = decide(&mut nucleus);
            let resume_state = match decision {
                Decision::Resume(pid) => Some(nucleus.pcbs.get(pid).state),
                _ => None,
            };
            (decision, resume_state)
        };
        match decision {
            Decision::Resume(_) => {
                timer::arm_quantum(QUANTUM_US);
                arch::resume(&resume_state.expect("Resume decision carries a saved state"));
            }
            Decision::WaitForInterrupt => {
                arch::wait_for_interrupt();
                // Falls through to loop and re-enter the scheduler.
            }
            Decision::Halt => {
                crate::println!("all processes have terminated, halting");
                arch::halt_forever();
            }
            Decision::Deadlock => {
                panic!("deadlock: live processes remain but none are soft-blocked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nucleus::state::Nucleus;

    #[test]
    fn halts_when_no_processes_remain() {
        let mut nucleus = Nucleus::new();
        nucleus.init();
        assert_eq!(decide(&mut nucleus), Decision::Halt);
    }

    #[test]
    fn waits_when_ready_queue_empty_but_soft_blocked() {
        let mut nucleus = Nucleus::new();
        nucleus.init();
        nucleus.live_process_count = 1;
        nucleus.soft_block_count = 1;
        assert_eq!(decide(&mut nucleus), Decision::WaitForInterrupt);
    }

    #[test]
    fn deadlocks_when_nothing_can_ever_become_ready() {
        let mut nucleus = Nucleus::new();
        nucleus.init();
        nucleus.live_process_count = 1;
        nucleus.soft_block_count = 0;
        assert_eq!(decide(&mut nucleus), Decision::Deadlock);
    }

    #[test]
    fn dequeues_ready_process_in_fifo_order() {
        let mut nucleus = Nucleus::new();
        nucleus.init();
        let a = nucleus.pcbs.allocate().unwrap();
        let b = nucleus.pcbs.allocate().unwrap();
        nucleus.live_process_count = 2;
        let mut tail = nucleus.ready_tail;
        nucleus.pcbs.enqueue_tail(&mut tail, a);
        nucleus.pcbs.enqueue_tail(&mut tail, b);
        nucleus.ready_tail = tail;

        assert_eq!(decide(&mut nucleus), Decision::Resume(a));
        assert_eq!(nucleus.current, Some(a));
    }
}
