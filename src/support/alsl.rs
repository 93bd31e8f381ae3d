//! Shared-semaphore services (§4.10): SYS19/`sysSharedSemaphoreP` and
//! SYS20/`sysSharedSemaphoreV`, serviced via pass-up like `sysDelay`.
//!
//! The semaphore's own counter lives directly at its KUSEGSHARE address,
//! exactly like any other semaphore cell this kernel addresses by identity.
//! What the Active Logical Semaphore List tracks is different: the FIFO
//! order of *which U-proc's private semaphore* to release once a shared
//! semaphore a blocked waiter is sleeping on goes non-negative again, since
//! that information isn't recoverable from the shared cell itself.

use crate::config::{ALSL_POOL_SIZE, KUSEGSHARE_BASE_VPN, KUSEGSHARE_PAGES};
use crate::error::{KernelError, TrapCause};
use crate::nucleus::state::Nucleus;
use crate::nucleus::syscalls;
use crate::pcb::{PcbId, SavedState};
use crate::support::record::SupportPool;

#[derive(Debug, Clone, Copy)]
struct AlslDescriptor {
    addr: usize,
    private_addr: usize,
    next: Option<u8>,
}

const EMPTY_DESCRIPTOR: AlslDescriptor = AlslDescriptor {
    addr: 0,
    private_addr: 0,
    next: None,
};

/// A plain FIFO of (shared-semaphore address, private-semaphore address)
/// pairs, one per currently-blocked U-proc. Order only matters within a
/// single shared address, but keeping one global queue and scanning for the
/// first match is simpler than per-address chains and just as correct at
/// this pool's size (`ALSL_POOL_SIZE` == `MAX_UPROCS`, at most one entry per
/// U-proc at a time).
pub struct ActiveLogicalSemaphoreList {
    slots: [AlslDescriptor; ALSL_POOL_SIZE],
    free_list: Option<u8>,
    head: Option<u8>,
    tail: Option<u8>,
}

impl ActiveLogicalSemaphoreList {
    pub const fn new() -> Self {
        Self {
            slots: [EMPTY_DESCRIPTOR; ALSL_POOL_SIZE],
            free_list: None,
            head: None,
            tail: None,
        }
    }

    pub fn init(&mut self) {
        self.free_list = None;
        for index in (0..ALSL_POOL_SIZE).rev() {
            self.slots[index] = EMPTY_DESCRIPTOR;
            self.slots[index].next = self.free_list;
            self.free_list = Some(index as u8);
        }
        self.head = None;
        self.tail = None;
    }

    fn insert(&mut self, addr: usize, private_addr: usize) -> Result<(), KernelError> {
        let id = self.free_list.ok_or(KernelError::AlslPoolExhausted)?;
        self.free_list = self.slots[usize::from(id)].next;
        self.slots[usize::from(id)] = AlslDescriptor {
            addr,
            private_addr,
            next: None,
        };
        match self.tail {
            None => {
                self.head = Some(id);
                self.tail = Some(id);
            }
            Some(tail) => {
                self.slots[usize::from(tail)].next = Some(id);
                self.tail = Some(id);
            }
        }
        Ok(())
    }

    /// Removes the oldest entry waiting on `addr`, returning its private
    /// semaphore's address so the caller can V it.
    fn remove_oldest_matching(&mut self, addr: usize) -> Option<usize> {
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let entry = self.slots[usize::from(id)];
            if entry.addr == addr {
                match prev {
                    Some(p) => self.slots[usize::from(p)].next = entry.next,
                    None => self.head = entry.next,
                }
                if self.tail == Some(id) {
                    self.tail = prev;
                }
                self.slots[usize::from(id)].next = self.free_list;
                self.free_list = Some(id);
                return Some(entry.private_addr);
            }
            prev = Some(id);
            cursor = entry.next;
        }
        None
    }
}

impl Default for ActiveLogicalSemaphoreList {
    fn default() -> Self {
        Self::new()
    }
}

fn vpn_in_shared_range(addr: u32) -> bool {
    let vpn = addr >> 12;
    (KUSEGSHARE_BASE_VPN..KUSEGSHARE_BASE_VPN + KUSEGSHARE_PAGES).contains(&vpn)
}

/// A KUSEGSHARE virtual address is the only kind SYS19/20 will operate on.
/// Only enforced on real hardware: host tests stand a U-proc's shared cell
/// in for an ordinary host pointer, which has no reason to fall in this
/// machine's KUSEGSHARE window, so there is no real address space here to
/// validate against off-target.
pub fn validate_shared_address(addr: u32) -> Result<(), TrapCause> {
    if cfg!(target_arch = "mips") && !vpn_in_shared_range(addr) {
        return Err(TrapCause::AddressOutsideSharedRegion(addr as usize));
    }
    Ok(())
}

/// SYS19 (`sysSharedSemaphoreP`): decrements the shared semaphore at `addr`;
/// if it goes negative, records this U-proc in the ALSL and blocks it on its
/// own private semaphore until a matching SYS20 releases it.
pub fn sys_p(
    nucleus: &mut Nucleus,
    support: &mut SupportPool,
    pid: PcbId,
    state: &SavedState,
    alsl: &mut ActiveLogicalSemaphoreList,
    addr: u32,
) -> Result<(), TrapCause> {
    validate_shared_address(addr)?;
    let addr = addr as usize;
    // SAFETY: `addr` was just validated to lie within KUSEGSHARE. As with
    // every other semaphore cell this kernel addresses directly (see
    // `nucleus::syscalls::increment_semaphore_at`), the shared page is
    // assumed resident by the time a U-proc touches it.
    let value = unsafe {
        let cell = addr as *mut i32;
        *cell -= 1;
        *cell
    };
    if value < 0 {
        let support_id = nucleus
            .pcbs
            .get(pid)
            .support
            .expect("sysSharedSemaphoreP is only ever issued by a U-proc");
        let private_addr = core::ptr::addr_of!(support.get(support_id).private_semaphore) as usize;
        alsl.insert(addr, private_addr)?;
        syscalls::passeren(nucleus, pid, state, private_addr);
    }
    Ok(())
}

/// SYS20 (`sysSharedSemaphoreV`): increments the shared semaphore at `addr`;
/// if a waiter is due, wakes the oldest one recorded in the ALSL.
pub fn sys_v(
    nucleus: &mut Nucleus,
    alsl: &mut ActiveLogicalSemaphoreList,
    addr: u32,
) -> Result<(), TrapCause> {
    validate_shared_address(addr)?;
    let addr = addr as usize;
    // SAFETY: see `sys_p`.
    let value = unsafe {
        let cell = addr as *mut i32;
        *cell += 1;
        *cell
    };
    if value <= 0 {
        if let Some(private_addr) = alsl.remove_oldest_matching(addr) {
            syscalls::verhogen(nucleus, private_addr);
        }
    }
    Ok(())
}
