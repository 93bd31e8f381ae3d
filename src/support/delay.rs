//! The delay daemon (§4.9): `sysDelay` (SYS18) and the Active Delay List it
//! sleeps the caller on until a periodic tick wakes it back up.

use crate::arch::timer;
use crate::arch::InterruptMask;
use crate::config::DELAY_POOL_SIZE;
use crate::error::TrapCause;
use crate::nucleus::state::Nucleus;
use crate::nucleus::syscalls;
use crate::pcb::{PcbId, SavedState};
use crate::support::record::SupportPool;

#[derive(Debug, Clone, Copy)]
struct DelayDescriptor {
    wake_time_us: u64,
    semaphore_addr: usize,
    next: Option<u8>,
}

impl DelayDescriptor {
    const fn empty() -> Self {
        Self {
            wake_time_us: 0,
            semaphore_addr: 0,
            next: None,
        }
    }
}

/// A sorted (by wake time, ascending) singly-linked free-list pool, guarded
/// by its own mutex semaphore — the layout mirrors [`crate::asl::ActiveSemaphoreList`]
/// but keys on a wake time instead of an address.
pub struct ActiveDelayList {
    slots: [DelayDescriptor; DELAY_POOL_SIZE],
    free_list: Option<u8>,
    head: Option<u8>,
    pub mutex: i32,
}

impl ActiveDelayList {
    pub const fn new() -> Self {
        Self {
            slots: [DelayDescriptor::empty(); DELAY_POOL_SIZE],
            free_list: None,
            head: None,
            mutex: 1,
        }
    }

    pub fn init(&mut self) {
        self.free_list = None;
        for index in (0..DELAY_POOL_SIZE).rev() {
            self.slots[index] = DelayDescriptor::empty();
            self.slots[index].next = self.free_list;
            self.free_list = Some(index as u8);
        }
        self.head = None;
    }

    pub fn mutex_addr(&self) -> usize {
        core::ptr::addr_of!(self.mutex) as usize
    }

    /// Inserts a new descriptor in ascending wake-time order.
    fn insert(&mut self, wake_time_us: u64, semaphore_addr: usize) -> Result<(), crate::error::KernelError> {
        let id = self
            .free_list
            .ok_or(crate::error::KernelError::DelayPoolExhausted)?;
        self.free_list = self.slots[usize::from(id)].next;
        self.slots[usize::from(id)] = DelayDescriptor {
            wake_time_us,
            semaphore_addr,
            next: None,
        };

        match self.head {
            Some(head) if self.slots[usize::from(head)].wake_time_us <= wake_time_us => {
                let mut cursor = head;
                while let Some(next) = self.slots[usize::from(cursor)].next {
                    if self.slots[usize::from(next)].wake_time_us > wake_time_us {
                        break;
                    }
                    cursor = next;
                }
                self.slots[usize::from(id)].next = self.slots[usize::from(cursor)].next;
                self.slots[usize::from(cursor)].next = Some(id);
            }
            _ => {
                self.slots[usize::from(id)].next = self.head;
                self.head = Some(id);
            }
        }
        Ok(())
    }

    /// Removes every descriptor whose wake time has arrived (in order),
    /// returning their semaphore addresses. Bounded by the pool's own
    /// capacity, so a plain array return avoids any heap allocation.
    fn drain_expired(&mut self, now_us: u64) -> ([usize; DELAY_POOL_SIZE], usize) {
        let mut out = [0usize; DELAY_POOL_SIZE];
        let mut len = 0;
        while let Some(head) = self.head {
            if self.slots[usize::from(head)].wake_time_us > now_us {
                break;
            }
            out[len] = self.slots[usize::from(head)].semaphore_addr;
            len += 1;
            self.head = self.slots[usize::from(head)].next;
            self.slots[usize::from(head)].next = self.free_list;
            self.free_list = Some(head);
        }
        (out, len)
    }
}

impl Default for ActiveDelayList {
    fn default() -> Self {
        Self::new()
    }
}

/// The delay daemon's periodic action: called once per pseudo-clock tick,
/// pops every descriptor due by now and wakes its U-proc.
pub fn wake_expired(nucleus: &mut Nucleus, list: &mut ActiveDelayList, now_us: u64) {
    let (addrs, len) = list.drain_expired(now_us);
    for &addr in &addrs[..len] {
        syscalls::verhogen(nucleus, addr);
    }
}

/// SYS18 (`sysDelay`): sleeps the calling U-proc for `seconds`, serviced via
/// pass-up from the general exception handler. A negative request is a
/// program trap rather than a silently-ignored no-op.
pub fn sys_delay(
    nucleus: &mut Nucleus,
    support: &mut SupportPool,
    pid: PcbId,
    state: &SavedState,
    list: &mut ActiveDelayList,
    seconds: i32,
) -> Result<(), TrapCause> {
    if seconds < 0 {
        return Err(TrapCause::NegativeDelay(seconds));
    }

    let support_id = nucleus
        .pcbs
        .get(pid)
        .support
        .expect("sysDelay is only ever issued by a U-proc, which always has a support record");
    let private_addr = core::ptr::addr_of!(support.get(support_id).private_semaphore) as usize;
    let wake_time_us = timer::now_us() + u64::from(seconds as u32) * 1_000_000;

    syscalls::passeren(nucleus, pid, state, list.mutex_addr());
    list.insert(wake_time_us, private_addr)?;

    // Release the list mutex and block on the private semaphore as one
    // atomic step: a pseudo-clock tick landing between the two could wake
    // this U-proc before it ever reaches the block, losing the wakeup.
    let _mask = InterruptMask::new();
    syscalls::verhogen(nucleus, list.mutex_addr());
    syscalls::passeren(nucleus, pid, state, private_addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booted_uproc(nucleus: &mut Nucleus, support: &mut SupportPool) -> PcbId {
        let support_id = support.allocate(1).unwrap();
        let pid = nucleus.pcbs.allocate().unwrap();
        nucleus.pcbs.get_mut(pid).support = Some(support_id);
        nucleus.live_process_count += 1;
        pid
    }

    #[test]
    fn negative_delay_is_rejected_without_touching_the_list() {
        let mut nucleus = Nucleus::new();
        nucleus.init();
        let mut support = SupportPool::new();
        support.init();
        let mut list = ActiveDelayList::new();
        list.init();
        let pid = booted_uproc(&mut nucleus, &mut support);
        nucleus.current = Some(pid);
        let state = SavedState::default();

        let result = sys_delay(&mut nucleus, &mut support, pid, &state, &mut list, -1);
        assert_eq!(result, Err(TrapCause::NegativeDelay(-1)));
        assert_eq!(list.head, None);
    }

    #[test]
    fn delay_blocks_the_caller_and_a_later_tick_wakes_it() {
        let mut nucleus = Nucleus::new();
        nucleus.init();
        let mut support = SupportPool::new();
        support.init();
        let mut list = ActiveDelayList::new();
        list.init();
        let pid = booted_uproc(&mut nucleus, &mut support);
        nucleus.current = Some(pid);
        let state = SavedState::default();

        sys_delay(&mut nucleus, &mut support, pid, &state, &mut list, 1).unwrap();
        assert!(nucleus.current.is_none());

        wake_expired(&mut nucleus, &mut list, crate::arch::timer::now_us() + 2_000_000);

        let mut tail = nucleus.ready_tail;
        assert_eq!(nucleus.pcbs.dequeue_head(&mut tail), Some(pid));
    }

    #[test]
    fn three_waiters_wake_in_ascending_wake_time_order() {
        let mut list = ActiveDelayList::new();
        list.init();
        let mut a: i32 = 0;
        let mut b: i32 = 0;
        let mut c: i32 = 0;
        list.insert(300, core::ptr::addr_of!(c) as usize).unwrap();
        list.insert(100, core::ptr::addr_of!(a) as usize).unwrap();
        list.insert(200, core::ptr::addr_of!(b) as usize).unwrap();

        let (addrs, len) = list.drain_expired(250);
        assert_eq!(len, 2);
        assert_eq!(addrs[0], core::ptr::addr_of!(a) as usize);
        assert_eq!(addrs[1], core::ptr::addr_of!(b) as usize);
        let (addrs, len) = list.drain_expired(1_000);
        assert_eq!(len, 1);
        assert_eq!(addrs[0], core::ptr::addr_of!(c) as usize);
    }

    #[test]
    fn pool_exhaustion_is_reported() {
        let mut list = ActiveDelayList::new();
        list.init();
        let mut sem: i32 = 0;
        let addr = core::ptr::addr_of!(sem) as usize;
        for i in 0..DELAY_POOL_SIZE {
            assert!(list.insert(i as u64, addr).is_ok());
        }
        assert_eq!(
            list.insert(999, addr),
            Err(crate::error::KernelError::DelayPoolExhausted)
        );
    }
}
