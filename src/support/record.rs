//! Support records: the per-U-proc state the support layer hangs off each
//! PCB's `support` pointer — exception contexts, a private page table, and
//! the reserved stacks the support-level handlers run on.

use crate::arch::cp0::{EntryHi, EntryLo};
use crate::config::{EXCEPTION_STACK_WORDS, PRIVATE_PAGE_TABLE_SIZE, SUPPORT_POOL_SIZE};
use crate::error::KernelError;
use crate::pcb::SavedState;

/// Which of a support record's two exception contexts/saved states a
/// pass-up targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionSlot {
    PageFault,
    General,
}

impl ExceptionSlot {
    fn index(self) -> usize {
        match self {
            Self::PageFault => 0,
            Self::General => 1,
        }
    }
}

/// Where the support layer's handler for a slot starts: PC, the kernel
/// `Status` to run with, and the stack pointer.
#[derive(Debug, Clone, Copy)]
pub struct ExceptionContext {
    pub pc: u32,
    pub status: u32,
    pub stack_ptr: u32,
}

impl ExceptionContext {
    const fn new() -> Self {
        Self {
            pc: 0,
            status: 0,
            stack_ptr: 0,
        }
    }
}

/// A page table entry: the hardware-dictated (EntryHi, EntryLo) pair.
#[derive(Debug, Clone, Copy)]
pub struct Pte {
    pub entry_hi: EntryHi,
    pub entry_lo: EntryLo,
}

impl Pte {
    pub const fn new() -> Self {
        Self {
            entry_hi: EntryHi::new(),
            entry_lo: EntryLo::new(),
        }
    }
}

/// One U-proc's support state: ASID, paging state, and the two reserved
/// exception contexts/stacks the TLB and general pass-up handlers run on.
pub struct SupportRecord {
    pub asid: u8,
    pub private_page_table: [Pte; PRIVATE_PAGE_TABLE_SIZE],
    exception_state: [SavedState; 2],
    exception_context: [ExceptionContext; 2],
    stacks: [[u32; EXCEPTION_STACK_WORDS]; 2],
    /// Blocking primitive for `sysDelay` and the shared-semaphore services
    /// (SYS18-20): initialized to 0, private to this U-proc.
    pub private_semaphore: i32,
    next_free: Option<u8>,
}

impl SupportRecord {
    const fn empty() -> Self {
        Self {
            asid: 0,
            private_page_table: [Pte::new(); PRIVATE_PAGE_TABLE_SIZE],
            exception_state: [SavedState {
                entry_hi: 0,
                cause: 0,
                status: 0,
                pc: 0,
                gpr: [0; crate::pcb::GPR_COUNT],
                hi: 0,
                lo: 0,
            }; 2],
            exception_context: [ExceptionContext::new(); 2],
            stacks: [[0; EXCEPTION_STACK_WORDS]; 2],
            private_semaphore: 0,
            next_free: None,
        }
    }

    pub fn state(&self, slot: ExceptionSlot) -> &SavedState {
        &self.exception_state[slot.index()]
    }

    pub fn state_mut(&mut self, slot: ExceptionSlot) -> &mut SavedState {
        &mut self.exception_state[slot.index()]
    }

    pub fn context(&self, slot: ExceptionSlot) -> ExceptionContext {
        self.exception_context[slot.index()]
    }

    pub fn set_context(&mut self, slot: ExceptionSlot, context: ExceptionContext) {
        self.exception_context[slot.index()] = context;
    }

    /// The top-of-stack address for `slot`'s reserved stack, for wiring up
    /// its `ExceptionContext::stack_ptr` at U-proc creation time.
    pub fn stack_top(&mut self, slot: ExceptionSlot) -> *mut u32 {
        let words = &mut self.stacks[slot.index()];
        // SAFETY: one past the last element is always a valid pointer value.
        unsafe { words.as_mut_ptr().add(words.len()) }
    }
}

/// Identifies a [`SupportRecord`] within [`SupportPool`].
pub type SupportId = u8;

pub struct SupportPool {
    slots: [SupportRecord; SUPPORT_POOL_SIZE],
    free_list: Option<u8>,
}

impl SupportPool {
    pub const fn new() -> Self {
        Self {
            slots: [SupportRecord::empty(); SUPPORT_POOL_SIZE],
            free_list: None,
        }
    }

    pub fn init(&mut self) {
        self.free_list = None;
        for index in (0..SUPPORT_POOL_SIZE).rev() {
            self.slots[index] = SupportRecord::empty();
            self.slots[index].next_free = self.free_list;
            self.free_list = Some(index as u8);
        }
    }

    pub fn get(&self, id: SupportId) -> &SupportRecord {
        &self.slots[usize::from(id)]
    }

    pub fn get_mut(&mut self, id: SupportId) -> &mut SupportRecord {
        &mut self.slots[usize::from(id)]
    }

    pub fn allocate(&mut self, asid: u8) -> Result<SupportId, KernelError> {
        let id = self.free_list.ok_or(KernelError::SupportPoolExhausted)?;
        self.free_list = self.slots[usize::from(id)].next_free;
        self.slots[usize::from(id)] = SupportRecord::empty();
        self.slots[usize::from(id)].asid = asid;
        Ok(id)
    }

    pub fn free(&mut self, id: SupportId) {
        self.slots[usize::from(id)].next_free = self.free_list;
        self.free_list = Some(id);
    }
}

impl Default for SupportPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_assigns_requested_asid_and_zeroes_state() {
        let mut pool = SupportPool::new();
        pool.init();
        let id = pool.allocate(3).unwrap();
        assert_eq!(pool.get(id).asid, 3);
        assert_eq!(pool.get(id).private_semaphore, 0);
    }

    #[test]
    fn exhaustion_is_reported_and_free_makes_room() {
        let mut pool = SupportPool::new();
        pool.init();
        let mut ids = Vec::new();
        for asid in 1..=SUPPORT_POOL_SIZE as u8 {
            ids.push(pool.allocate(asid).unwrap());
        }
        assert_eq!(pool.allocate(99), Err(KernelError::SupportPoolExhausted));
        pool.free(ids.pop().unwrap());
        assert!(pool.allocate(99).is_ok());
    }
}
