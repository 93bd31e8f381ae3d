//! Process Control Blocks and the queue/tree primitives built on top of them.
//!
//! Per the Design Notes, the process tree and every wait queue are modeled
//! as an arena: a fixed `[Pcb; MAXPROC]` array addressed by `PcbId`, rather
//! than individually-owned heap nodes. No single `Pcb` "owns" another; all
//! linkage is by index, and cycles are precluded only by the invariants
//! documented on each operation, not by the type system.

use crate::config::MAXPROC;
use crate::error::KernelError;

/// Index of a [`Pcb`] within the pool. `MAXPROC` is small enough that a
/// `u8` is sufficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PcbId(u8);

impl PcbId {
    fn new(index: usize) -> Self {
        Self(u8::try_from(index).expect("MAXPROC should fit in a u8"))
    }

    fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// Number of general-purpose registers saved per the MIPS calling
/// convention (all but `$zero`), laid out in the canonical order used by the
/// machine's exception-state encoding.
pub const GPR_COUNT: usize = 29;

/// Named offsets into [`SavedState::gpr`].
pub mod gpr_index {
    pub const AT: usize = 0;
    pub const V0: usize = 1;
    pub const V1: usize = 2;
    pub const A0: usize = 3;
    pub const A1: usize = 4;
    pub const A2: usize = 5;
    pub const A3: usize = 6;
    pub const T0: usize = 7;
    pub const T1: usize = 8;
    pub const T2: usize = 9;
    pub const T3: usize = 10;
    pub const T4: usize = 11;
    pub const T5: usize = 12;
    pub const T6: usize = 13;
    pub const T7: usize = 14;
    pub const S0: usize = 15;
    pub const S1: usize = 16;
    pub const S2: usize = 17;
    pub const S3: usize = 18;
    pub const S4: usize = 19;
    pub const S5: usize = 20;
    pub const S6: usize = 21;
    pub const S7: usize = 22;
    pub const T8: usize = 23;
    pub const T9: usize = 24;
    pub const GP: usize = 25;
    pub const SP: usize = 26;
    pub const FP: usize = 27;
    pub const RA: usize = 28;
}

/// The processor state saved on exception entry and restored on dispatch:
/// CP0 registers plus the general-purpose register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SavedState {
    pub entry_hi: u32,
    pub cause: u32,
    pub status: u32,
    pub pc: u32,
    pub gpr: [u32; GPR_COUNT],
    pub hi: u32,
    pub lo: u32,
}

impl SavedState {
    pub fn sp(&self) -> u32 {
        self.gpr[gpr_index::SP]
    }

    pub fn set_sp(&mut self, value: u32) {
        self.gpr[gpr_index::SP] = value;
    }

    pub fn a0(&self) -> u32 {
        self.gpr[gpr_index::A0]
    }

    pub fn a1(&self) -> u32 {
        self.gpr[gpr_index::A1]
    }

    pub fn a2(&self) -> u32 {
        self.gpr[gpr_index::A2]
    }

    pub fn a3(&self) -> u32 {
        self.gpr[gpr_index::A3]
    }

    pub fn v0(&self) -> u32 {
        self.gpr[gpr_index::V0]
    }

    pub fn set_v0(&mut self, value: u32) {
        self.gpr[gpr_index::V0] = value;
    }

    /// Advances `pc` past the instruction that trapped, so that resuming the
    /// process does not immediately re-trigger the same syscall/exception.
    pub fn advance_past_trap(&mut self) {
        self.pc = self.pc.wrapping_add(4);
    }
}

/// Identifies the support record owning a U-proc's paging state. Opaque
/// here; defined by [`crate::support::record`].
pub type SupportId = u8;

/// A Process Control Block.
///
/// *Invariant*: at any instant a `Pcb` is in at most one of {running, ready
/// queue, blocked on one semaphore, free}. It is blocked iff
/// `blocked_on.is_some()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pcb {
    pub state: SavedState,
    pub cpu_time_us: u64,
    queue_prev: Option<PcbId>,
    queue_next: Option<PcbId>,
    parent: Option<PcbId>,
    first_child: Option<PcbId>,
    prev_sibling: Option<PcbId>,
    next_sibling: Option<PcbId>,
    /// The address of the semaphore this PCB is blocked on, if any.
    pub blocked_on: Option<usize>,
    /// Weak reference to this process's support record; `None` for the
    /// instantiator, which has no support structure of its own.
    pub support: Option<SupportId>,
}

impl Pcb {
    pub fn parent(&self) -> Option<PcbId> {
        self.parent
    }

    pub fn first_child(&self) -> Option<PcbId> {
        self.first_child
    }

    pub fn next_sibling(&self) -> Option<PcbId> {
        self.next_sibling
    }
}

/// A FIFO queue of PCBs: a circular doubly-linked list addressed by its tail
/// pointer, so that `head = tail.next`. An empty queue is `None`.
pub type QueueTail = Option<PcbId>;

/// The fixed-capacity pool of PCBs plus the queue and tree primitives that
/// operate on indices into it.
pub struct PcbPool {
    slots: [Pcb; MAXPROC],
    free_list: QueueTail,
}

impl PcbPool {
    pub const fn new() -> Self {
        Self {
            slots: [Pcb {
                state: SavedState {
                    entry_hi: 0,
                    cause: 0,
                    status: 0,
                    pc: 0,
                    gpr: [0; GPR_COUNT],
                    hi: 0,
                    lo: 0,
                },
                cpu_time_us: 0,
                queue_prev: None,
                queue_next: None,
                parent: None,
                first_child: None,
                prev_sibling: None,
                next_sibling: None,
                blocked_on: None,
                support: None,
            }; MAXPROC],
            free_list: None,
        }
    }

    /// Populates the free list with every slot, most-recently-initialized
    /// first. Called exactly once, from nucleus init.
    pub fn init(&mut self) {
        self.free_list = None;
        for index in 0..MAXPROC {
            let id = PcbId::new(index);
            self.slots[index].queue_next = self.free_list;
            self.free_list = Some(id);
        }
    }

    pub fn get(&self, id: PcbId) -> &Pcb {
        &self.slots[id.index()]
    }

    pub fn get_mut(&mut self, id: PcbId) -> &mut Pcb {
        &mut self.slots[id.index()]
    }

    /// Allocates a PCB from the free list, clearing every field. Returns
    /// `None` (never blocks) when the pool is exhausted.
    ///
    /// "PCBs get reused; no previous value may persist" — every field named
    /// in §3 is reset here, not just the ones this allocation happens to
    /// care about.
    pub fn allocate(&mut self) -> Result<PcbId, KernelError> {
        let id = self.free_list.ok_or(KernelError::PcbPoolExhausted)?;
        self.free_list = self.slots[id.index()].queue_next;
        self.slots[id.index()] = Pcb::default();
        Ok(id)
    }

    /// Returns a PCB to the free list. The caller must have already removed
    /// it from any queue and detached it from the process tree.
    pub fn free(&mut self, id: PcbId) {
        let slot = &mut self.slots[id.index()];
        debug_assert!(slot.queue_prev.is_none() && slot.blocked_on.is_none());
        slot.queue_next = self.free_list;
        self.free_list = Some(id);
    }

    pub fn make_empty_queue() -> QueueTail {
        None
    }

    pub fn is_empty(tail: &QueueTail) -> bool {
        tail.is_none()
    }

    pub fn peek_head(&self, tail: &QueueTail) -> Option<PcbId> {
        let tail = (*tail)?;
        self.slots[tail.index()].queue_next
    }

    /// Appends `id` to the tail of the queue pointed to by `tail`.
    pub fn enqueue_tail(&mut self, tail: &mut QueueTail, id: PcbId) {
        match *tail {
            None => {
                self.slots[id.index()].queue_next = Some(id);
                self.slots[id.index()].queue_prev = Some(id);
            }
            Some(old_tail) => {
                let head = self.slots[old_tail.index()]
                    .queue_next
                    .expect("a non-empty queue always has a head");
                self.slots[id.index()].queue_next = Some(head);
                self.slots[id.index()].queue_prev = Some(old_tail);
                self.slots[old_tail.index()].queue_next = Some(id);
                self.slots[head.index()].queue_prev = Some(id);
            }
        }
        *tail = Some(id);
    }

    /// Removes and returns the head of the queue, or `None` if it is empty.
    pub fn dequeue_head(&mut self, tail: &mut QueueTail) -> Option<PcbId> {
        let tail_id = (*tail)?;
        let head = self.slots[tail_id.index()]
            .queue_next
            .expect("a non-empty queue always has a head");
        self.remove_from_queue(tail, head);
        Some(head)
    }

    /// Removes `id` from whichever queue `tail` addresses, wherever in the
    /// queue it is. `O(n)` in the queue length, since the search for `id`'s
    /// neighbors requires walking from the head.
    pub fn remove_specific(&mut self, tail: &mut QueueTail, id: PcbId) -> bool {
        let Some(tail_id) = *tail else {
            return false;
        };
        let mut cursor = self.slots[tail_id.index()]
            .queue_next
            .expect("a non-empty queue always has a head");
        loop {
            if cursor == id {
                self.remove_from_queue(tail, id);
                return true;
            }
            if cursor == tail_id {
                return false;
            }
            cursor = self.slots[cursor.index()]
                .queue_next
                .expect("queue links should never dangle");
        }
    }

    fn remove_from_queue(&mut self, tail: &mut QueueTail, id: PcbId) {
        let prev = self.slots[id.index()]
            .queue_prev
            .expect("a queued PCB always has a predecessor");
        let next = self.slots[id.index()]
            .queue_next
            .expect("a queued PCB always has a successor");
        if prev == id {
            // `id` was the only element.
            *tail = None;
        } else {
            self.slots[prev.index()].queue_next = Some(next);
            self.slots[next.index()].queue_prev = Some(prev);
            if *tail == Some(id) {
                *tail = Some(prev);
            }
        }
        self.slots[id.index()].queue_prev = None;
        self.slots[id.index()].queue_next = None;
    }

    /// Inserts `child` as `parent`'s new first child (LIFO order).
    pub fn insert_child(&mut self, parent: PcbId, child: PcbId) {
        let old_first = self.slots[parent.index()].first_child;
        self.slots[child.index()].parent = Some(parent);
        self.slots[child.index()].prev_sibling = None;
        self.slots[child.index()].next_sibling = old_first;
        if let Some(old_first) = old_first {
            self.slots[old_first.index()].prev_sibling = Some(child);
        }
        self.slots[parent.index()].first_child = Some(child);
    }

    /// Removes and returns `parent`'s first child, if any.
    pub fn remove_first_child(&mut self, parent: PcbId) -> Option<PcbId> {
        let child = self.slots[parent.index()].first_child?;
        self.detach_from_parent_subtree(child);
        Some(child)
    }

    /// Detaches `id` from its parent's child list and sibling chain. Does
    /// not touch `id`'s own children — termination walks the subtree
    /// separately. `O(1)`: the sibling list is doubly linked.
    pub fn detach_from_parent_subtree(&mut self, id: PcbId) {
        let prev = self.slots[id.index()].prev_sibling;
        let next = self.slots[id.index()].next_sibling;
        match prev {
            Some(prev) => self.slots[prev.index()].next_sibling = next,
            None => {
                if let Some(parent) = self.slots[id.index()].parent {
                    self.slots[parent.index()].first_child = next;
                }
            }
        }
        if let Some(next) = next {
            self.slots[next.index()].prev_sibling = prev;
        }
        self.slots[id.index()].parent = None;
        self.slots[id.index()].prev_sibling = None;
        self.slots[id.index()].next_sibling = None;
    }
}

impl Default for PcbPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> PcbPool {
        let mut pool = PcbPool::new();
        pool.init();
        pool
    }

    #[test]
    fn allocate_returns_zeroed_pcb() {
        let mut pool = pool();
        let id = pool.allocate().unwrap();
        let pcb = pool.get_mut(id);
        pcb.cpu_time_us = 12345;
        pcb.state.pc = 0xDEAD_BEEF;
        pool.free(id);

        let id2 = pool.allocate().unwrap();
        let pcb2 = pool.get(id2);
        assert_eq!(pcb2.cpu_time_us, 0);
        assert_eq!(pcb2.state.pc, 0);
        assert!(pcb2.blocked_on.is_none());
        assert!(pcb2.support.is_none());
    }

    #[test]
    fn allocate_fails_when_exhausted() {
        let mut pool = pool();
        let mut ids: Vec<PcbId> = (0..MAXPROC).map(|_| pool.allocate().unwrap()).collect();
        assert!(pool.allocate().is_err());
        // Freeing one makes room for exactly one more.
        pool.free(ids.pop().unwrap());
        assert!(pool.allocate().is_ok());
    }

    #[test]
    fn ready_queue_is_fifo() {
        let mut pool = pool();
        let mut tail = PcbPool::make_empty_queue();
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();

        pool.enqueue_tail(&mut tail, a);
        pool.enqueue_tail(&mut tail, b);
        pool.enqueue_tail(&mut tail, c);

        assert_eq!(pool.dequeue_head(&mut tail), Some(a));
        assert_eq!(pool.dequeue_head(&mut tail), Some(b));
        assert_eq!(pool.dequeue_head(&mut tail), Some(c));
        assert!(PcbPool::is_empty(&tail));
    }

    #[test]
    fn remove_specific_mid_queue_preserves_order() {
        let mut pool = pool();
        let mut tail = PcbPool::make_empty_queue();
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        pool.enqueue_tail(&mut tail, a);
        pool.enqueue_tail(&mut tail, b);
        pool.enqueue_tail(&mut tail, c);

        assert!(pool.remove_specific(&mut tail, b));
        assert_eq!(pool.dequeue_head(&mut tail), Some(a));
        assert_eq!(pool.dequeue_head(&mut tail), Some(c));
        assert!(PcbPool::is_empty(&tail));
    }

    #[test]
    fn remove_specific_only_element_empties_queue() {
        let mut pool = pool();
        let mut tail = PcbPool::make_empty_queue();
        let a = pool.allocate().unwrap();
        pool.enqueue_tail(&mut tail, a);
        assert!(pool.remove_specific(&mut tail, a));
        assert!(PcbPool::is_empty(&tail));
    }

    #[test]
    fn tree_linkage_is_lifo_and_detachable() {
        let mut pool = pool();
        let parent = pool.allocate().unwrap();
        let c1 = pool.allocate().unwrap();
        let c2 = pool.allocate().unwrap();
        let c3 = pool.allocate().unwrap();

        pool.insert_child(parent, c1);
        pool.insert_child(parent, c2);
        pool.insert_child(parent, c3);

        // LIFO: most recently inserted child is first.
        assert_eq!(pool.get(parent).first_child(), Some(c3));

        pool.detach_from_parent_subtree(c2);
        assert_eq!(pool.get(c3).next_sibling(), Some(c1));
        assert!(pool.get(c2).parent().is_none());

        assert_eq!(pool.remove_first_child(parent), Some(c3));
        assert_eq!(pool.get(parent).first_child(), Some(c1));
    }
}
