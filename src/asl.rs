//! The Active Semaphore List: every semaphore with at least one blocked
//! process, kept as a singly-linked list sorted by semaphore address between
//! two permanent sentinel nodes.
//!
//! A semaphore with an empty blocked queue has no descriptor here at all —
//! "active" means "has waiters", not "exists". `P`/`V` on an uncontended
//! semaphore never touches this structure.

use crate::config::{ASL_POOL_SIZE, ASL_SENTINEL_HIGH, ASL_SENTINEL_LOW};
use crate::error::KernelError;
use crate::pcb::{PcbId, PcbPool, QueueTail};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct AslId(u8);

impl AslId {
    fn index(self) -> usize {
        usize::from(self.0)
    }
}

#[derive(Clone, Copy)]
struct SemDescriptor {
    addr: usize,
    next: Option<AslId>,
    blocked: QueueTail,
}

const EMPTY_DESCRIPTOR: SemDescriptor = SemDescriptor {
    addr: 0,
    next: None,
    blocked: None,
};

/// Slot 0 is always the low sentinel, slot 1 always the high sentinel; both
/// are permanently "active" and never returned to the free list.
const LOW_SENTINEL: AslId = AslId(0);
const HIGH_SENTINEL: AslId = AslId(1);

pub struct ActiveSemaphoreList {
    slots: [SemDescriptor; ASL_POOL_SIZE],
    free_list: Option<AslId>,
}

impl ActiveSemaphoreList {
    pub const fn new() -> Self {
        Self {
            slots: [EMPTY_DESCRIPTOR; ASL_POOL_SIZE],
            free_list: None,
        }
    }

    /// Wires up the two sentinels and chains every remaining slot onto the
    /// free list. Called exactly once, from nucleus init.
    pub fn init(&mut self) {
        self.slots[LOW_SENTINEL.index()] = SemDescriptor {
            addr: ASL_SENTINEL_LOW,
            next: Some(HIGH_SENTINEL),
            blocked: None,
        };
        self.slots[HIGH_SENTINEL.index()] = SemDescriptor {
            addr: ASL_SENTINEL_HIGH,
            next: None,
            blocked: None,
        };
        self.free_list = None;
        for index in (2..ASL_POOL_SIZE).rev() {
            self.slots[index] = EMPTY_DESCRIPTOR;
            self.slots[index].next = self.free_list;
            self.free_list = Some(AslId(index as u8));
        }
    }

    /// Finds the descriptor for `addr` and the one immediately before it in
    /// address order. `prev` is always sentinel-or-real; `found` is `None`
    /// when `addr` has no active descriptor.
    fn locate(&self, addr: usize) -> (AslId, Option<AslId>) {
        let mut prev = LOW_SENTINEL;
        loop {
            let next = self.slots[prev.index()].next.expect("sentinel chain ends at HIGH");
            let next_addr = self.slots[next.index()].addr;
            if next_addr == addr {
                return (prev, Some(next));
            }
            if next_addr > addr {
                return (prev, None);
            }
            prev = next;
        }
    }

    /// Blocks `pid` on the semaphore at `addr`, allocating a new descriptor
    /// if this is the first waiter. Mirrors the PCB's `blocked_on` field so
    /// [`Self::out_blocked`] can find the right descriptor without a scan.
    pub fn insert_blocked(
        &mut self,
        pcbs: &mut PcbPool,
        addr: usize,
        pid: PcbId,
    ) -> Result<(), KernelError> {
        let (prev, found) = self.locate(addr);
        let descriptor = match found {
            Some(id) => id,
            None => {
                let id = self.free_list.ok_or(KernelError::AslPoolExhausted)?;
                self.free_list = self.slots[id.index()].next;
                self.slots[id.index()] = SemDescriptor {
                    addr,
                    next: self.slots[prev.index()].next,
                    blocked: None,
                };
                self.slots[prev.index()].next = Some(id);
                id
            }
        };
        pcbs.enqueue_tail(&mut self.slots[descriptor.index()].blocked, pid);
        pcbs.get_mut(pid).blocked_on = Some(addr);
        Ok(())
    }

    /// Removes and returns the head of `addr`'s blocked queue. Frees the
    /// descriptor if the queue becomes empty. Returns `None` if `addr` has
    /// no active descriptor or its queue is (degenerately) already empty.
    pub fn remove_blocked(&mut self, pcbs: &mut PcbPool, addr: usize) -> Option<PcbId> {
        let (prev, found) = self.locate(addr);
        let descriptor = found?;
        let head = pcbs.dequeue_head(&mut self.slots[descriptor.index()].blocked)?;
        pcbs.get_mut(head).blocked_on = None;
        if PcbPool::is_empty(&self.slots[descriptor.index()].blocked) {
            self.slots[prev.index()].next = self.slots[descriptor.index()].next;
            self.slots[descriptor.index()].next = self.free_list;
            self.free_list = Some(descriptor);
        }
        Some(head)
    }

    /// Returns (without removing) the head of `addr`'s blocked queue.
    pub fn head_blocked(&self, pcbs: &PcbPool, addr: usize) -> Option<PcbId> {
        let (_, found) = self.locate(addr);
        let descriptor = found?;
        pcbs.peek_head(&self.slots[descriptor.index()].blocked)
    }

    /// Forcibly removes `pid` from whatever semaphore it is blocked on
    /// (used when terminating a process subtree). Returns `false` if `pid`
    /// was not blocked, or its recorded semaphore has no matching
    /// descriptor (which would indicate a bookkeeping bug elsewhere).
    pub fn out_blocked(&mut self, pcbs: &mut PcbPool, pid: PcbId) -> bool {
        let Some(addr) = pcbs.get(pid).blocked_on else {
            return false;
        };
        let (prev, found) = self.locate(addr);
        let Some(descriptor) = found else {
            return false;
        };
        let removed = pcbs.remove_specific(&mut self.slots[descriptor.index()].blocked, pid);
        if removed {
            if PcbPool::is_empty(&self.slots[descriptor.index()].blocked) {
                self.slots[prev.index()].next = self.slots[descriptor.index()].next;
                self.slots[descriptor.index()].next = self.free_list;
                self.free_list = Some(descriptor);
            }
        }
        removed
    }
}

impl Default for ActiveSemaphoreList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (ActiveSemaphoreList, PcbPool) {
        let mut asl = ActiveSemaphoreList::new();
        asl.init();
        let mut pcbs = PcbPool::new();
        pcbs.init();
        (asl, pcbs)
    }

    #[test]
    fn single_waiter_round_trips() {
        let (mut asl, mut pcbs) = setup();
        let p = pcbs.allocate().unwrap();
        asl.insert_blocked(&mut pcbs, 0x1000, p).unwrap();
        assert_eq!(asl.head_blocked(&pcbs, 0x1000), Some(p));
        assert_eq!(asl.remove_blocked(&mut pcbs, 0x1000), Some(p));
        assert_eq!(asl.head_blocked(&pcbs, 0x1000), None);
    }

    #[test]
    fn multiple_semaphores_stay_sorted_and_independent() {
        let (mut asl, mut pcbs) = setup();
        let p1 = pcbs.allocate().unwrap();
        let p2 = pcbs.allocate().unwrap();
        let p3 = pcbs.allocate().unwrap();

        asl.insert_blocked(&mut pcbs, 0x3000, p1).unwrap();
        asl.insert_blocked(&mut pcbs, 0x1000, p2).unwrap();
        asl.insert_blocked(&mut pcbs, 0x2000, p3).unwrap();

        assert_eq!(asl.head_blocked(&pcbs, 0x1000), Some(p2));
        assert_eq!(asl.head_blocked(&pcbs, 0x2000), Some(p3));
        assert_eq!(asl.head_blocked(&pcbs, 0x3000), Some(p1));
    }

    #[test]
    fn fifo_order_within_one_semaphore() {
        let (mut asl, mut pcbs) = setup();
        let p1 = pcbs.allocate().unwrap();
        let p2 = pcbs.allocate().unwrap();
        asl.insert_blocked(&mut pcbs, 0x4000, p1).unwrap();
        asl.insert_blocked(&mut pcbs, 0x4000, p2).unwrap();
        assert_eq!(asl.remove_blocked(&mut pcbs, 0x4000), Some(p1));
        assert_eq!(asl.remove_blocked(&mut pcbs, 0x4000), Some(p2));
        assert_eq!(asl.remove_blocked(&mut pcbs, 0x4000), None);
    }

    #[test]
    fn out_blocked_detaches_from_the_middle_of_a_queue() {
        let (mut asl, mut pcbs) = setup();
        let p1 = pcbs.allocate().unwrap();
        let p2 = pcbs.allocate().unwrap();
        let p3 = pcbs.allocate().unwrap();
        asl.insert_blocked(&mut pcbs, 0x5000, p1).unwrap();
        asl.insert_blocked(&mut pcbs, 0x5000, p2).unwrap();
        asl.insert_blocked(&mut pcbs, 0x5000, p3).unwrap();

        assert!(asl.out_blocked(&mut pcbs, p2));
        assert!(!asl.out_blocked(&mut pcbs, p2));
        assert_eq!(asl.remove_blocked(&mut pcbs, 0x5000), Some(p1));
        assert_eq!(asl.remove_blocked(&mut pcbs, 0x5000), Some(p3));
    }

    #[test]
    fn descriptor_pool_exhaustion_is_reported() {
        let (mut asl, mut pcbs) = setup();
        // ASL_POOL_SIZE includes the two sentinels, so this many distinct
        // addresses saturates the free list exactly.
        // Each semaphore here gets exactly one waiter, so a single recycled
        // PCB id is fine: every insert starts a fresh one-element queue.
        let p = pcbs.allocate().unwrap();
        let capacity = crate::config::ASL_POOL_SIZE - 2;
        for i in 0..capacity {
            asl.insert_blocked(&mut pcbs, 0x1_0000 + i, p).unwrap();
        }
        assert_eq!(
            asl.insert_blocked(&mut pcbs, 0x1_0000 + capacity, p),
            Err(KernelError::AslPoolExhausted)
        );
    }
}
