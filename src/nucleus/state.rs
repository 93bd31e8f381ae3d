//! Global nucleus state: the single `Nucleus` instance behind one spinlock,
//! process-wide, lives for the entire kernel run.

use crate::asl::ActiveSemaphoreList;
use crate::config::TOTAL_NUCLEUS_SEMAPHORES;
use crate::pcb::{PcbId, PcbPool, QueueTail};
use crate::sync::SpinLock;

/// Everything the scheduler, dispatcher, and syscall handlers share.
pub struct Nucleus {
    pub pcbs: PcbPool,
    pub asl: ActiveSemaphoreList,
    /// The PCB currently assigned to the processor; `None` only while the
    /// scheduler is idling with no ready process.
    pub current: Option<PcbId>,
    pub ready_tail: QueueTail,
    pub live_process_count: u32,
    /// Processes blocked on a device or pseudo-clock semaphore: distinct
    /// from "blocked" in general, since it determines whether the
    /// scheduler should idle-wait (some process may yet become ready) or
    /// halt (nothing ever will again).
    pub soft_block_count: u32,
    pub quantum_start_us: u64,
    /// The 48 device semaphores plus the pseudo-clock semaphore, addressed
    /// by `&device_semaphores[i] as *const i32 as usize` wherever a
    /// semaphore address is needed.
    pub device_semaphores: [i32; TOTAL_NUCLEUS_SEMAPHORES],
    /// Counts U-proc terminations; the instantiator `P`s this once per
    /// U-proc it launched to know when every U-proc it is responsible for
    /// has exited.
    pub master_semaphore: i32,
}

impl Nucleus {
    pub const fn new() -> Self {
        Self {
            pcbs: PcbPool::new(),
            asl: ActiveSemaphoreList::new(),
            current: None,
            ready_tail: None,
            live_process_count: 0,
            soft_block_count: 0,
            quantum_start_us: 0,
            device_semaphores: [0; TOTAL_NUCLEUS_SEMAPHORES],
            master_semaphore: 0,
        }
    }

    /// Address of device semaphore `index`, suitable as an ASL key.
    pub fn device_semaphore_addr(&self, index: usize) -> usize {
        core::ptr::addr_of!(self.device_semaphores[index]) as usize
    }

    pub fn master_semaphore_addr(&self) -> usize {
        core::ptr::addr_of!(self.master_semaphore) as usize
    }

    /// Resets every pool and counter. Called exactly once, from nucleus
    /// init, *after* this `Nucleus` has reached its final static address
    /// (so the semaphore addresses computed above stay valid forever).
    pub fn init(&mut self) {
        self.pcbs.init();
        self.asl.init();
        self.current = None;
        self.ready_tail = None;
        self.live_process_count = 0;
        self.soft_block_count = 0;
        self.quantum_start_us = 0;
        self.device_semaphores = [0; TOTAL_NUCLEUS_SEMAPHORES];
        self.master_semaphore = 0;
    }
}

impl Default for Nucleus {
    fn default() -> Self {
        Self::new()
    }
}

pub static NUCLEUS: SpinLock<Nucleus> = SpinLock::new(Nucleus::new());
