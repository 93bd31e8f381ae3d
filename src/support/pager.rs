//! The Pager: the TLB-refill/page-fault handler for U-procs (§4.7).
//!
//! Reached by pass-up into the support record's page-fault slot, not
//! through the nucleus's own syscall table. The swap-pool mutex and the
//! private/shared page tables it touches are protected the same way every
//! other kernel semaphore is — a plain P/V pair — so contention recurses
//! through the ordinary nucleus blocking path rather than needing a
//! pager-specific lock primitive.

use crate::arch::cp0::{Cause, EntryHi, EntryLo, ExceptionCode};
use crate::arch::InterruptMask;
use crate::config::{
    KUSEGSHARE_BASE_VPN, KUSEGSHARE_PAGES, KUSEG_CODE_BASE_VPN, KUSEG_CODE_PAGES, KUSEG_STACK_VPN,
    PAGE_SIZE_WORDS, PRIVATE_PAGE_TABLE_SIZE, SHARED_PAGES_BASE_SECTOR, SWAP_POOL_FRAMES,
};
use crate::error::TrapCause;
use crate::nucleus::state::Nucleus;
use crate::nucleus::syscalls;
use crate::pcb::PcbId;
use crate::support::record::{ExceptionSlot, Pte, SupportId, SupportPool};

/// A backing store the pager reads/writes a page at a time. Real hardware
/// implements this over disk 0 through the DMA helpers of
/// [`crate::support::dma`]; host tests implement it over a `Vec` of pages.
pub trait BackingStore {
    /// Reads sector `sector` into `page`. `Err` carries the device status
    /// that signaled the failure.
    fn read_sector(&mut self, sector: u32, page: &mut [u32; PAGE_SIZE_WORDS]) -> Result<(), u32>;
    /// Writes `page` to sector `sector`.
    fn write_sector(&mut self, sector: u32, page: &[u32; PAGE_SIZE_WORDS]) -> Result<(), u32>;
}

/// Which page table a faulting VPN belongs to, and its index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageOwner {
    Private { support: SupportId, page: usize },
    Shared { page: usize },
}

impl PageOwner {
    fn backing_sector(self, asid: u8) -> u32 {
        match self {
            Self::Private { page, .. } => (u32::from(asid) - 1) * PRIVATE_PAGE_TABLE_SIZE as u32 + page as u32,
            Self::Shared { page } => SHARED_PAGES_BASE_SECTOR + page as u32,
        }
    }
}

/// Resolves `vpn` to a page-table slot: one of the U-proc's own 32 private
/// entries (31 code/data pages plus the stack page), or the shared region.
fn locate_page(support_id: SupportId, asid: u8, vpn: u32) -> Result<PageOwner, TrapCause> {
    let _ = asid;
    if vpn >= KUSEG_CODE_BASE_VPN && vpn < KUSEG_CODE_BASE_VPN + KUSEG_CODE_PAGES {
        return Ok(PageOwner::Private {
            support: support_id,
            page: (vpn - KUSEG_CODE_BASE_VPN) as usize,
        });
    }
    if vpn == KUSEG_STACK_VPN {
        return Ok(PageOwner::Private {
            support: support_id,
            page: PRIVATE_PAGE_TABLE_SIZE - 1,
        });
    }
    if vpn >= KUSEGSHARE_BASE_VPN && vpn < KUSEGSHARE_BASE_VPN + KUSEGSHARE_PAGES {
        return Ok(PageOwner::Shared {
            page: (vpn - KUSEGSHARE_BASE_VPN) as usize,
        });
    }
    Err(TrapCause::AddressOutsideKuseg(vpn as usize))
}

/// A resident physical frame: which page (if any) currently occupies it.
struct Frame {
    owner: Option<PageOwner>,
    words: [u32; PAGE_SIZE_WORDS],
}

impl Frame {
    const fn empty() -> Self {
        Self {
            owner: None,
            words: [0; PAGE_SIZE_WORDS],
        }
    }
}

/// The 16-frame swap pool (§3) and its FIFO replacement cursor.
pub struct SwapPool {
    frames: [Frame; SWAP_POOL_FRAMES],
    /// Value of the swap-pool mutual-exclusion semaphore; its address is
    /// this field's, so it can be P'd/V'd through the ordinary nucleus
    /// semaphore machinery like any other kernel semaphore.
    pub mutex: i32,
    next_victim: usize,
}

impl SwapPool {
    pub const fn new() -> Self {
        const EMPTY: Frame = Frame::empty();
        Self {
            frames: [EMPTY; SWAP_POOL_FRAMES],
            mutex: 1,
            next_victim: 0,
        }
    }

    pub fn mutex_addr(&self) -> usize {
        core::ptr::addr_of!(self.mutex) as usize
    }

    /// Resets every frame to unoccupied. Called exactly once, from support
    /// layer init.
    pub fn init(&mut self) {
        for frame in &mut self.frames {
            frame.owner = None;
        }
        self.mutex = 1;
        self.next_victim = 0;
    }

    /// First unoccupied frame, else the next victim in round-robin order.
    fn choose_victim(&self) -> usize {
        self.frames
            .iter()
            .position(|f| f.owner.is_none())
            .unwrap_or(self.next_victim)
    }
}

impl Default for SwapPool {
    fn default() -> Self {
        Self::new()
    }
}

/// The real [`BackingStore`]: the whole disk-0 backing store lives on
/// device 0 of the disk line, reached through the non-blocking DMA path
/// since the pager always calls this while holding [`crate::nucleus::state::NUCLEUS`]'s
/// lock. Real hardware only — host tests use a `Vec`-backed fake instead.
#[cfg(target_arch = "mips")]
pub struct DiskBackingStore<'a> {
    bus: &'a crate::board::bus::Bus,
}

#[cfg(target_arch = "mips")]
impl<'a> DiskBackingStore<'a> {
    pub fn new(bus: &'a crate::board::bus::Bus) -> Self {
        Self { bus }
    }
}

#[cfg(target_arch = "mips")]
impl BackingStore for DiskBackingStore<'_> {
    fn read_sector(&mut self, sector: u32, page: &mut [u32; PAGE_SIZE_WORDS]) -> Result<(), u32> {
        crate::support::dma::busy_wait_transfer(
            self.bus,
            crate::support::dma::DISK_LINE,
            0,
            sector,
            crate::support::dma::IoDirection::Read,
            page,
        )
    }

    fn write_sector(&mut self, sector: u32, page: &[u32; PAGE_SIZE_WORDS]) -> Result<(), u32> {
        let mut scratch = *page;
        crate::support::dma::busy_wait_transfer(
            self.bus,
            crate::support::dma::DISK_LINE,
            0,
            sector,
            crate::support::dma::IoDirection::Write,
            &mut scratch,
        )
    }
}

/// Invalidates the TLB slot matching `entry_hi`, if any is resident. A
/// no-op on host test builds, where there is no real TLB to probe.
fn tlb_invalidate_matching(entry_hi: EntryHi) {
    #[cfg(target_arch = "mips")]
    if let Some(index) = crate::arch::tlb::probe(entry_hi) {
        crate::arch::tlb::write_indexed(index, entry_hi, EntryLo::new());
    }
    #[cfg(not(target_arch = "mips"))]
    {
        let _ = entry_hi;
    }
}

/// Rewrites the TLB slot matching `entry_hi` with `entry_lo` (TLBWI), or
/// lets the hardware pick a random slot (TLBWR) if none matched. A no-op on
/// host test builds.
fn tlb_rewrite_matching(entry_hi: EntryHi, entry_lo: EntryLo) {
    #[cfg(target_arch = "mips")]
    match crate::arch::tlb::probe(entry_hi) {
        Some(index) => crate::arch::tlb::write_indexed(index, entry_hi, entry_lo),
        // SAFETY: TLBWR lets the hardware choose the victim slot itself;
        // both operands were just validated by the failed probe above.
        None => unsafe {
            core::arch::asm!(
                "mtc0 {entry_hi}, $10",
                "mtc0 {entry_lo}, $2",
                "tlbwr",
                entry_hi = in(reg) entry_hi.into_bits(),
                entry_lo = in(reg) entry_lo.into_bits(),
                options(nostack)
            );
        },
    }
    #[cfg(not(target_arch = "mips"))]
    {
        let _ = (entry_hi, entry_lo);
    }
}

/// Locates the PTE a [`PageOwner`] refers to, in whichever table it lives.
fn pte_mut<'a>(
    owner: PageOwner,
    support: &'a mut SupportPool,
    shared_table: &'a mut [Pte; KUSEGSHARE_PAGES as usize],
) -> &'a mut Pte {
    match owner {
        PageOwner::Private { support: id, page } => &mut support.get_mut(id).private_page_table[page],
        PageOwner::Shared { page } => &mut shared_table[page],
    }
}

/// Services one page fault for the process currently running the pager
/// (the faulting U-proc, resumed into its support record's page-fault
/// slot). On success the U-proc's saved state is ready to resume; on
/// failure the caller must terminate its subtree.
#[allow(clippy::too_many_arguments)]
pub fn handle_page_fault(
    nucleus: &mut Nucleus,
    pid: PcbId,
    support: &mut SupportPool,
    swap: &mut SwapPool,
    shared_table: &mut [Pte; KUSEGSHARE_PAGES as usize],
    backing: &mut dyn BackingStore,
) -> Result<(), TrapCause> {
    let support_id = nucleus
        .pcbs
        .get(pid)
        .support
        .expect("pass-up-or-die only reaches here when a support record exists");
    let record = support.get(support_id);
    let asid = record.asid;
    let fault_state = *record.state(ExceptionSlot::PageFault);
    let cause = Cause::from_bits(fault_state.cause);
    if cause.exc_code() == ExceptionCode::TlbModification as u8 {
        return Err(TrapCause::TlbModified);
    }
    let entry_hi = EntryHi::from_bits(fault_state.entry_hi);
    let owner = locate_page(support_id, asid, entry_hi.vpn())?;

    // If this P contends, `passeren` blocks `pid` exactly as it would for
    // any other kernel semaphore; the caller's run loop reschedules and
    // this invocation is abandoned, resuming fresh once `pid` is woken and
    // dispatched again by `verhogen`'s counterpart call below.
    let mutex_addr = swap.mutex_addr();
    let state_for_block = nucleus.pcbs.get(pid).state;
    syscalls::passeren(nucleus, pid, &state_for_block, mutex_addr);

    // A shared page may have been paged in by another U-proc while this one
    // waited on the mutex; nothing left to do in that case.
    if let PageOwner::Shared { .. } = owner {
        if pte_mut(owner, support, shared_table).entry_lo.valid() {
            syscalls::verhogen(nucleus, mutex_addr);
            return Ok(());
        }
    }

    let victim_index = swap.choose_victim();
    if let Some(victim_owner) = swap.frames[victim_index].owner {
        {
            let _mask = InterruptMask::new();
            let victim_pte = pte_mut(victim_owner, support, shared_table);
            victim_pte.entry_lo.set_valid(false);
            tlb_invalidate_matching(victim_pte.entry_hi);
        }
        let victim_sector = victim_owner.backing_sector(asid);
        if let Err(status) = backing.write_sector(victim_sector, &swap.frames[victim_index].words) {
            syscalls::verhogen(nucleus, mutex_addr);
            return Err(TrapCause::DeviceIoFailed(status));
        }
        swap.frames[victim_index].owner = None;
    }

    let sector = owner.backing_sector(asid);
    if let Err(status) = backing.read_sector(sector, &mut swap.frames[victim_index].words) {
        syscalls::verhogen(nucleus, mutex_addr);
        return Err(TrapCause::DeviceIoFailed(status));
    }
    swap.frames[victim_index].owner = Some(owner);
    swap.next_victim = (victim_index + 1) % SWAP_POOL_FRAMES;

    {
        let _mask = InterruptMask::new();
        let pte = pte_mut(owner, support, shared_table);
        pte.entry_lo.set_pfn(victim_index as u32);
        pte.entry_lo.set_dirty(true);
        pte.entry_lo.set_valid(true);
        pte.entry_hi = entry_hi;
        tlb_rewrite_matching(entry_hi, pte.entry_lo);
    }

    syscalls::verhogen(nucleus, mutex_addr);
    Ok(())
}
