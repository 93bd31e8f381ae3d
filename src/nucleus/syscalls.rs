//! System calls 1-8 (§4.5). Privileged: reachable only from kernel mode —
//! a user-mode `syscall` with `a0` in this range is rewritten to a reserved
//! -instruction program trap by the dispatcher before it ever gets here.
//!
//! Each function here takes already-decoded arguments rather than reaching
//! into a raw `SavedState`; [`crate::nucleus::exceptions`] is the layer that
//! pulls `a0..a3` out of the trapped state and calls into this module.

use crate::arch::timer;
use crate::nucleus::state::Nucleus;
use crate::pcb::{PcbId, SavedState};
use crate::support::record::SupportId;

/// `v0` result of a syscall that signals success/failure in the classic
/// 0/-1 idiom.
pub const OK: i32 = 0;
pub const FAILED: i32 = -1;

fn charge_current_quantum(nucleus: &mut Nucleus, pid: PcbId) {
    let now = timer::now_us();
    let elapsed = now.saturating_sub(nucleus.quantum_start_us);
    nucleus.pcbs.get_mut(pid).cpu_time_us += elapsed;
}

/// SYS1: allocates a PCB for `initial_state`, makes it `parent`'s newest
/// child, and places it on the ready queue.
pub fn create_process(
    nucleus: &mut Nucleus,
    parent: PcbId,
    initial_state: &SavedState,
    support: Option<SupportId>,
) -> i32 {
    match nucleus.pcbs.allocate() {
        Ok(child) => {
            nucleus.pcbs.get_mut(child).state = *initial_state;
            nucleus.pcbs.get_mut(child).support = support;
            nucleus.pcbs.insert_child(parent, child);
            let mut tail = nucleus.ready_tail;
            nucleus.pcbs.enqueue_tail(&mut tail, child);
            nucleus.ready_tail = tail;
            nucleus.live_process_count += 1;
            OK
        }
        Err(_) => FAILED,
    }
}

/// SYS2: terminates `victim` and its whole descendant subtree. The caller
/// is responsible for reschedule after this returns (the caller is
/// normally `victim` itself, whose `current` slot this function clears).
pub fn terminate_process(nucleus: &mut Nucleus, victim: PcbId) {
    // Collect the subtree iteratively (DFS over first_child/next_sibling)
    // before mutating anything, since detaching a node invalidates its own
    // sibling pointers.
    let mut stack = [PcbId::default(); crate::config::MAXPROC];
    let mut len = 0;
    stack[len] = victim;
    len += 1;
    let mut cursor = 0;
    while cursor < len {
        let id = stack[cursor];
        cursor += 1;
        let mut child = nucleus.pcbs.get(id).first_child();
        while let Some(c) = child {
            let next = nucleus.pcbs.get(c).next_sibling();
            stack[len] = c;
            len += 1;
            child = next;
        }
    }

    nucleus
        .pcbs
        .detach_from_parent_subtree(victim);

    for &id in &stack[..len] {
        kill_one(nucleus, id);
    }
}

fn kill_one(nucleus: &mut Nucleus, id: PcbId) {
    if nucleus.current == Some(id) {
        nucleus.current = None;
    } else {
        let mut tail = nucleus.ready_tail;
        let was_ready = nucleus.pcbs.remove_specific(&mut tail, id);
        nucleus.ready_tail = tail;
        if !was_ready {
            if let Some(addr) = nucleus.pcbs.get(id).blocked_on {
                let is_soft_block = is_nucleus_device_semaphore(nucleus, addr);
                nucleus.asl.out_blocked(&mut nucleus.pcbs, id);
                if is_soft_block {
                    nucleus.soft_block_count -= 1;
                } else {
                    // Victim was blocked on an ordinary semaphore: its
                    // decrement must be undone so capacity isn't lost.
                    increment_semaphore_at(nucleus, addr);
                }
            }
        }
    }
    nucleus.pcbs.free(id);
    nucleus.live_process_count -= 1;
}

/// If `addr` falls inside the nucleus's own device-semaphore array, the
/// index within it; `None` means it is some other in-memory `i32` the
/// caller supplied directly (e.g. a U-proc's private semaphore).
fn device_semaphore_index_at(nucleus: &Nucleus, addr: usize) -> Option<usize> {
    let base = core::ptr::addr_of!(nucleus.device_semaphores) as usize;
    let end = base + core::mem::size_of_val(&nucleus.device_semaphores);
    if addr >= base && addr < end {
        Some((addr - base) / core::mem::size_of::<i32>())
    } else {
        None
    }
}

fn is_nucleus_device_semaphore(nucleus: &Nucleus, addr: usize) -> bool {
    device_semaphore_index_at(nucleus, addr).is_some()
}

fn increment_semaphore_at(nucleus: &mut Nucleus, addr: usize) {
    match device_semaphore_index_at(nucleus, addr) {
        Some(index) => nucleus.device_semaphores[index] += 1,
        // SAFETY: `addr` was recorded by a prior `insert_blocked` call,
        // which only ever stores addresses of live `i32` semaphore cells.
        None => unsafe { *(addr as *mut i32) += 1 },
    }
}

/// Shared tail of every blocking syscall (§4.5's "single helper"): snapshot
/// `state` into the current PCB, charge the elapsed quantum, block on
/// `addr`, and clear `current`.
fn block_current(nucleus: &mut Nucleus, pid: PcbId, state: &SavedState, addr: usize) {
    nucleus.pcbs.get_mut(pid).state = *state;
    charge_current_quantum(nucleus, pid);
    nucleus
        .asl
        .insert_blocked(&mut nucleus.pcbs, addr, pid)
        .expect(
            "ASL pool is sized MAXPROC+2 sentinels; at most MAXPROC PCBs can ever be blocked",
        );
    nucleus.current = None;
}

/// SYS3 (Passeren): decrements the semaphore at `addr`; blocks `pid` if it
/// goes negative. Returns whether the caller now must reschedule.
pub fn passeren(nucleus: &mut Nucleus, pid: PcbId, state: &SavedState, addr: usize) -> bool {
    decrement_semaphore_at(nucleus, addr);
    if read_semaphore_at(nucleus, addr) < 0 {
        block_current(nucleus, pid, state, addr);
        true
    } else {
        false
    }
}

/// SYS4 (Verhogen): increments the semaphore at `addr`; wakes the oldest
/// waiter, if any, onto the ready queue.
pub fn verhogen(nucleus: &mut Nucleus, addr: usize) {
    increment_semaphore_at(nucleus, addr);
    if read_semaphore_at(nucleus, addr) <= 0 {
        if let Some(woken) = nucleus.asl.remove_blocked(&mut nucleus.pcbs, addr) {
            let mut tail = nucleus.ready_tail;
            nucleus.pcbs.enqueue_tail(&mut tail, woken);
            nucleus.ready_tail = tail;
        }
    }
}

fn read_semaphore_at(nucleus: &Nucleus, addr: usize) -> i32 {
    match device_semaphore_index_at(nucleus, addr) {
        Some(index) => nucleus.device_semaphores[index],
        // SAFETY: see `increment_semaphore_at`.
        None => unsafe { *(addr as *const i32) },
    }
}

fn decrement_semaphore_at(nucleus: &mut Nucleus, addr: usize) {
    match device_semaphore_index_at(nucleus, addr) {
        Some(index) => nucleus.device_semaphores[index] -= 1,
        // SAFETY: see `increment_semaphore_at`.
        None => unsafe { *(addr as *mut i32) -= 1 },
    }
}

/// SYS5 (WaitIO): blocks `pid` on the device semaphore for
/// `(line, device, sub)`, marking it a soft block.
pub fn wait_io(
    nucleus: &mut Nucleus,
    pid: PcbId,
    state: &SavedState,
    line: usize,
    device: usize,
    sub: Option<crate::board::TerminalSubDevice>,
) {
    let index = crate::board::device_semaphore_index(line, device, sub);
    let addr = nucleus.device_semaphore_addr(index);
    nucleus.device_semaphores[index] -= 1;
    nucleus.soft_block_count += 1;
    block_current(nucleus, pid, state, addr);
}

/// SYS6 (GetCPUTime): total accumulated time plus the elapsed slice so far.
pub fn get_cpu_time(nucleus: &Nucleus, pid: PcbId) -> u64 {
    let elapsed = timer::now_us().saturating_sub(nucleus.quantum_start_us);
    nucleus.pcbs.get(pid).cpu_time_us + elapsed
}

/// SYS7 (WaitClock): blocks `pid` on the pseudo-clock semaphore.
pub fn wait_clock(nucleus: &mut Nucleus, pid: PcbId, state: &SavedState) {
    let addr = nucleus.device_semaphore_addr(crate::config::PSEUDO_CLOCK_SEM_INDEX);
    nucleus.device_semaphores[crate::config::PSEUDO_CLOCK_SEM_INDEX] -= 1;
    nucleus.soft_block_count += 1;
    block_current(nucleus, pid, state, addr);
}

/// SYS8 (GetSupportPtr).
pub fn get_support_ptr(nucleus: &Nucleus, pid: PcbId) -> Option<SupportId> {
    nucleus.pcbs.get(pid).support
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booted() -> (Nucleus, PcbId) {
        let mut nucleus = Nucleus::new();
        nucleus.init();
        let root = nucleus.pcbs.allocate().unwrap();
        nucleus.live_process_count = 1;
        (nucleus, root)
    }

    #[test]
    fn create_process_enqueues_child_as_ready() {
        let (mut nucleus, root) = booted();
        let initial = SavedState::default();
        assert_eq!(create_process(&mut nucleus, root, &initial, None), OK);
        assert_eq!(nucleus.live_process_count, 2);
        let mut tail = nucleus.ready_tail;
        let child = nucleus.pcbs.dequeue_head(&mut tail).unwrap();
        assert_eq!(nucleus.pcbs.get(root).first_child(), Some(child));
    }

    #[test]
    fn create_process_reports_pool_exhaustion() {
        let (mut nucleus, root) = booted();
        let initial = SavedState::default();
        for _ in 0..(crate::config::MAXPROC - 1) {
            assert_eq!(create_process(&mut nucleus, root, &initial, None), OK);
        }
        assert_eq!(create_process(&mut nucleus, root, &initial, None), FAILED);
    }

    #[test]
    fn passeren_blocks_on_negative_result_verhogen_wakes_fifo() {
        let (mut nucleus, root) = booted();
        let mut sem: i32 = 1;
        let addr = core::ptr::addr_of!(sem) as usize;
        let state = SavedState::default();

        let child = nucleus.pcbs.allocate().unwrap();
        nucleus.pcbs.insert_child(root, child);
        nucleus.live_process_count += 1;

        // First P succeeds without blocking (1 -> 0).
        assert!(!passeren(&mut nucleus, root, &state, addr));
        // Second P blocks (0 -> -1).
        assert!(passeren(&mut nucleus, child, &state, addr));
        assert_eq!(sem, -1);
        assert!(nucleus.current.is_none());

        verhogen(&mut nucleus, addr);
        assert_eq!(sem, 0);
        let mut tail = nucleus.ready_tail;
        assert_eq!(nucleus.pcbs.dequeue_head(&mut tail), Some(child));
    }

    #[test]
    fn terminate_process_kills_entire_subtree() {
        let (mut nucleus, root) = booted();
        let a = nucleus.pcbs.allocate().unwrap();
        let b = nucleus.pcbs.allocate().unwrap();
        let grandchild = nucleus.pcbs.allocate().unwrap();
        nucleus.pcbs.insert_child(root, a);
        nucleus.pcbs.insert_child(root, b);
        nucleus.pcbs.insert_child(a, grandchild);
        nucleus.live_process_count = 4;

        terminate_process(&mut nucleus, root);
        assert_eq!(nucleus.live_process_count, 0);
        // Every slot should be back on the free list.
        for _ in 0..crate::config::MAXPROC {
            nucleus.pcbs.allocate().unwrap();
        }
    }

    #[test]
    fn terminate_process_undoes_a_blocked_victims_decrement() {
        let (mut nucleus, root) = booted();
        let mut sem: i32 = 0;
        let addr = core::ptr::addr_of!(sem) as usize;
        let state = SavedState::default();
        let child = nucleus.pcbs.allocate().unwrap();
        nucleus.pcbs.insert_child(root, child);
        nucleus.live_process_count += 1;

        assert!(passeren(&mut nucleus, child, &state, addr));
        assert_eq!(sem, -1);

        terminate_process(&mut nucleus, child);
        assert_eq!(sem, 0);
    }
}
