//! The interrupt handler (§4.6): quantum timer, pseudo-clock, and the five
//! device classes, dispatched by bus-controller priority.

use crate::arch::timer;
use crate::board::devices::{command, DeviceStatus};
use crate::board::{self, TerminalSubDevice};
use crate::config::{FIRST_DEVICE_LINE, LAST_DEVICE_LINE, PSEUDO_CLOCK_SEM_INDEX, QUANTUM_US};
use crate::nucleus::state::Nucleus;

/// Line 0 carries the local (quantum) timer; line 1, the interval timer.
const QUANTUM_LINE: usize = 0;
const INTERVAL_LINE: usize = 1;

/// Handles the quantum timer firing: pure preemption, no device involved.
pub fn handle_quantum_timer(nucleus: &mut Nucleus) {
    timer::arm_quantum(QUANTUM_US);
    if let Some(pid) = nucleus.current.take() {
        let now = timer::now_us();
        let elapsed = now.saturating_sub(nucleus.quantum_start_us);
        nucleus.pcbs.get_mut(pid).cpu_time_us += elapsed;
        let mut tail = nucleus.ready_tail;
        nucleus.pcbs.enqueue_tail(&mut tail, pid);
        nucleus.ready_tail = tail;
    }
}

/// Handles the pseudo-clock tick: wakes every waiter, all at once.
pub fn handle_pseudo_clock(nucleus: &mut Nucleus) {
    timer::reload_interval_timer();
    let addr = nucleus.device_semaphore_addr(PSEUDO_CLOCK_SEM_INDEX);
    nucleus.device_semaphores[PSEUDO_CLOCK_SEM_INDEX] = 0;
    while let Some(woken) = nucleus.asl.remove_blocked(&mut nucleus.pcbs, addr) {
        let mut tail = nucleus.ready_tail;
        nucleus.pcbs.enqueue_tail(&mut tail, woken);
        nucleus.ready_tail = tail;
        nucleus.soft_block_count -= 1;
    }
}

/// Handles a device interrupt on `line` (3..=7): ACKs the highest-priority
/// pending device on that line and wakes its waiter, if any, with the
/// device status in `v0`.
pub fn handle_device_interrupt(nucleus: &mut Nucleus, line: usize) {
    let bus = board::bus();
    let Some(device) = bus.pending_device(line) else {
        return;
    };

    let (status, sem_index) = if line == LAST_DEVICE_LINE {
        let term = bus.terminal(device);
        let transm_status = term.TransmStatus.get();
        if transm_status != 0 {
            term.TransmCommand.set(command::ACK);
            (
                transm_status,
                board::device_semaphore_index(line, device, Some(TerminalSubDevice::Transmit)),
            )
        } else {
            let recv_status = term.RecvStatus.get();
            term.RecvCommand.set(command::ACK);
            (
                recv_status,
                board::device_semaphore_index(line, device, Some(TerminalSubDevice::Receive)),
            )
        }
    } else {
        let block = bus.device_class(line - FIRST_DEVICE_LINE, device);
        let status = block.Status.get();
        block.Command.set(command::ACK);
        let _ = DeviceStatus::from_raw(status);
        (status, board::device_semaphore_index(line, device, None))
    };

    let addr = nucleus.device_semaphore_addr(sem_index);
    nucleus.device_semaphores[sem_index] += 1;
    if nucleus.device_semaphores[sem_index] <= 0 {
        if let Some(woken) = nucleus.asl.remove_blocked(&mut nucleus.pcbs, addr) {
            nucleus.pcbs.get_mut(woken).state.set_v0(status);
            let mut tail = nucleus.ready_tail;
            nucleus.pcbs.enqueue_tail(&mut tail, woken);
            nucleus.ready_tail = tail;
            nucleus.soft_block_count -= 1;
        }
    }
}

/// Services the highest-priority pending interrupt line, given the `IP`
/// bits read from CP0 Cause: quantum first, then the pseudo-clock, then
/// device lines 3..7 in ascending order.
pub fn dispatch(nucleus: &mut Nucleus, pending_lines: u32) {
    use bitvec::prelude::*;
    let bits = pending_lines.view_bits::<Lsb0>();
    if bits[QUANTUM_LINE] {
        handle_quantum_timer(nucleus);
    } else if bits[INTERVAL_LINE] {
        handle_pseudo_clock(nucleus);
    } else {
        for line in FIRST_DEVICE_LINE..=LAST_DEVICE_LINE {
            if bits[line] {
                handle_device_interrupt(nucleus, line);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantum_interrupt_reenqueues_current_at_tail() {
        let mut nucleus = Nucleus::new();
        nucleus.init();
        let running = nucleus.pcbs.allocate().unwrap();
        let waiting = nucleus.pcbs.allocate().unwrap();
        nucleus.current = Some(running);
        let mut tail = nucleus.ready_tail;
        nucleus.pcbs.enqueue_tail(&mut tail, waiting);
        nucleus.ready_tail = tail;

        handle_quantum_timer(&mut nucleus);

        assert!(nucleus.current.is_none());
        let mut tail = nucleus.ready_tail;
        assert_eq!(nucleus.pcbs.dequeue_head(&mut tail), Some(waiting));
        assert_eq!(nucleus.pcbs.dequeue_head(&mut tail), Some(running));
    }

    #[test]
    fn pseudo_clock_wakes_every_waiter_and_resets_semaphore() {
        let mut nucleus = Nucleus::new();
        nucleus.init();
        let a = nucleus.pcbs.allocate().unwrap();
        let b = nucleus.pcbs.allocate().unwrap();
        let addr = nucleus.device_semaphore_addr(PSEUDO_CLOCK_SEM_INDEX);
        nucleus.device_semaphores[PSEUDO_CLOCK_SEM_INDEX] = -2;
        nucleus
            .asl
            .insert_blocked(&mut nucleus.pcbs, addr, a)
            .unwrap();
        nucleus
            .asl
            .insert_blocked(&mut nucleus.pcbs, addr, b)
            .unwrap();
        nucleus.soft_block_count = 2;

        handle_pseudo_clock(&mut nucleus);

        assert_eq!(nucleus.device_semaphores[PSEUDO_CLOCK_SEM_INDEX], 0);
        assert_eq!(nucleus.soft_block_count, 0);
        let mut tail = nucleus.ready_tail;
        assert_eq!(nucleus.pcbs.dequeue_head(&mut tail), Some(a));
        assert_eq!(nucleus.pcbs.dequeue_head(&mut tail), Some(b));
    }
}
