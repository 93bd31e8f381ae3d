//! The instantiator (§4.11): brings up the support layer's shared state,
//! copies each U-proc's boot image from flash to the backing disk, and
//! launches all eight U-procs under the nucleus.
//!
//! Everything here but the real entry point at the bottom is plain,
//! host-testable logic — it only ever touches `Nucleus`/`SupportPool`/etc.
//! through the same APIs the nucleus and support modules already expose.

use crate::arch::cp0::{EntryHi, EntryLo, Status};
use crate::config::{
    FIRST_ASID, FLASH_HEADER_DATA_SIZE_OFFSET, FLASH_HEADER_TEXT_SIZE_OFFSET, FLASH_HEADER_WORDS,
    KUSEGSHARE_PAGES, KUSEG_CODE_BASE_VPN, KUSEG_CODE_PAGES, KUSEG_STACK_VPN, LAST_ASID,
    MAX_UPROCS, PAGE_SIZE_WORDS, PRIVATE_PAGE_TABLE_SIZE,
};
use crate::error::KernelError;
use crate::nucleus::state::Nucleus;
use crate::nucleus::syscalls;
use crate::pcb::{PcbId, SavedState};
use crate::support::pager::BackingStore;
use crate::support::record::{ExceptionContext, ExceptionSlot, Pte, SupportPool};

/// A flash device the instantiator reads a boot image from: block 0 holds
/// the header, subsequent blocks hold `.text` then `.data`, one page per
/// block. Real hardware implements this over [`crate::support::dma`]'s
/// non-blocking path; host tests implement it over a `Vec` of pages.
pub trait FlashDevice {
    /// Reads block `block` into `page`. `Err` carries the device status that
    /// signaled the failure.
    fn read_block(&mut self, block: u32, page: &mut [u32; PAGE_SIZE_WORDS]) -> Result<(), u32>;
}

/// Reads a `u32` out of a header page at a given byte offset, big-endian
/// (the boot image format this header comes from is word-addressed).
fn header_word(header: &[u32; FLASH_HEADER_WORDS], byte_offset: usize) -> u32 {
    header[byte_offset / 4]
}

/// Number of `PAGE_SIZE_WORDS` blocks the boot image occupies, derived from
/// the `.text`/`.data` sizes recorded in its header — clamped to the 31
/// code/data pages a U-proc's private page table has room for.
fn boot_image_page_count(header: &[u32; FLASH_HEADER_WORDS]) -> u32 {
    let text_words = header_word(header, FLASH_HEADER_TEXT_SIZE_OFFSET);
    let data_words = header_word(header, FLASH_HEADER_DATA_SIZE_OFFSET);
    let total_words = text_words + data_words;
    let pages = total_words.div_ceil(PAGE_SIZE_WORDS as u32);
    pages.min(KUSEG_CODE_PAGES)
}

/// Copies U-proc `asid`'s boot image from `flash` to its private sectors on
/// `backing`, reading the header first to learn how many pages to move.
/// Returns the number of pages copied.
pub fn copy_boot_image(
    asid: u8,
    flash: &mut dyn FlashDevice,
    backing: &mut dyn BackingStore,
) -> Result<u32, u32> {
    let mut page = [0u32; PAGE_SIZE_WORDS];
    flash.read_block(0, &mut page)?;
    let pages = boot_image_page_count(&page);
    let base_sector = (u32::from(asid) - 1) * PRIVATE_PAGE_TABLE_SIZE as u32;
    backing.write_sector(base_sector, &page)?;
    for block in 1..pages {
        flash.read_block(block, &mut page)?;
        backing.write_sector(base_sector + block, &page)?;
    }
    Ok(pages)
}

/// Lays out a freshly allocated support record's 32-entry private page
/// table: 31 code/data entries plus the stack entry, all `valid = false`
/// (nothing is resident until the pager loads it in) but `dirty = true` (a
/// page-out always writes back, never silently discards).
pub fn layout_private_page_table(record: &mut crate::support::record::SupportRecord, asid: u8) {
    for page in 0..KUSEG_CODE_PAGES as usize {
        record.private_page_table[page] = Pte {
            entry_hi: EntryHi::new()
                .with_vpn(KUSEG_CODE_BASE_VPN + page as u32)
                .with_asid(asid),
            entry_lo: EntryLo::new().with_dirty(true),
        };
    }
    record.private_page_table[PRIVATE_PAGE_TABLE_SIZE - 1] = Pte {
        entry_hi: EntryHi::new().with_vpn(KUSEG_STACK_VPN).with_asid(asid),
        entry_lo: EntryLo::new().with_dirty(true),
    };
}

/// Wires a support record's two exception contexts (the PC/status/stack the
/// TLB-refill and general pass-up handlers resume at) to `pager_pc` and
/// `general_pc`, each with its own reserved stack.
fn wire_exception_contexts(
    record: &mut crate::support::record::SupportRecord,
    pager_pc: u32,
    general_pc: u32,
) {
    let kernel_status = Status::new().with_ie_c(true);
    let page_fault_sp = record.stack_top(ExceptionSlot::PageFault) as u32;
    record.set_context(
        ExceptionSlot::PageFault,
        ExceptionContext {
            pc: pager_pc,
            status: kernel_status.into_bits(),
            stack_ptr: page_fault_sp,
        },
    );
    let general_sp = record.stack_top(ExceptionSlot::General) as u32;
    record.set_context(
        ExceptionSlot::General,
        ExceptionContext {
            pc: general_pc,
            status: kernel_status.into_bits(),
            stack_ptr: general_sp,
        },
    );
}

/// Allocates a support record for `asid`, lays out its page table and
/// exception contexts, and asks the nucleus to create the U-proc itself,
/// starting at `entry_pc`/`stack_top` in user mode with interrupts enabled.
///
/// Recovers the newly created child's [`PcbId`] from `nucleus.ready_tail`:
/// `syscalls::create_process` enqueues the new child as the new tail of the
/// ready queue, so reading it back immediately after a successful call is
/// the only lookup this needs — no separate "id of the process I just
/// created" API exists on the pool.
#[allow(clippy::too_many_arguments)]
pub fn create_uproc(
    nucleus: &mut Nucleus,
    support_pool: &mut SupportPool,
    instantiator_pid: PcbId,
    asid: u8,
    entry_pc: u32,
    stack_top: u32,
    pager_pc: u32,
    general_pc: u32,
) -> Result<PcbId, KernelError> {
    let support_id = support_pool.allocate(asid)?;
    let record = support_pool.get_mut(support_id);
    layout_private_page_table(record, asid);
    wire_exception_contexts(record, pager_pc, general_pc);

    let mut initial = SavedState::default();
    initial.pc = entry_pc;
    initial.status = Status::new().with_ie_c(true).with_ku_c(true).into_bits();
    initial.entry_hi = EntryHi::new().with_asid(asid).into_bits();
    initial.set_sp(stack_top);

    match syscalls::create_process(nucleus, instantiator_pid, &initial, Some(support_id)) {
        syscalls::OK => Ok(nucleus
            .ready_tail
            .expect("create_process just enqueued the new child as the ready queue's tail")),
        _ => {
            support_pool.free(support_id);
            Err(KernelError::PcbPoolExhausted)
        }
    }
}

/// Bring-up: resets every support-layer pool, copies each U-proc's boot
/// image from its flash device to the backing disk, and launches all
/// `MAX_UPROCS` U-procs as children of `instantiator_pid`. Returns the
/// created U-procs' PCB ids in ASID order.
///
/// Portable and host-testable; the real entry point below wraps this with
/// the actual flash/disk devices and the `#[no_mangle]` trampoline
/// addresses, then issues the blocking SYS1..SYS3 sequence described in
/// §4.11 before halting.
#[allow(clippy::too_many_arguments)]
pub fn bring_up(
    nucleus: &mut Nucleus,
    support_pool: &mut SupportPool,
    swap: &mut crate::support::pager::SwapPool,
    shared_table: &mut [Pte; KUSEGSHARE_PAGES as usize],
    alsl: &mut crate::support::alsl::ActiveLogicalSemaphoreList,
    delay_list: &mut crate::support::delay::ActiveDelayList,
    device_mutexes: &mut crate::support::dma::DeviceMutexes,
    instantiator_pid: PcbId,
    flash_devices: &mut [&mut dyn FlashDevice; MAX_UPROCS],
    backing: &mut dyn BackingStore,
    entry_pc: u32,
    stack_top_per_uproc: u32,
    stack_stride: u32,
    pager_pc: u32,
    general_pc: u32,
) -> Result<[PcbId; MAX_UPROCS], KernelError> {
    support_pool.init();
    swap.init();
    *shared_table = [Pte::new(); KUSEGSHARE_PAGES as usize];
    alsl.init();
    delay_list.init();
    device_mutexes.init();

    let mut created = [PcbId::default(); MAX_UPROCS];
    for (offset, asid) in (FIRST_ASID..=LAST_ASID).enumerate() {
        copy_boot_image(asid, flash_devices[offset], backing)
            .map_err(|_| KernelError::SupportPoolExhausted)?;
        let stack_top = stack_top_per_uproc + offset as u32 * stack_stride;
        created[offset] = create_uproc(
            nucleus,
            support_pool,
            instantiator_pid,
            asid,
            entry_pc,
            stack_top,
            pager_pc,
            general_pc,
        )?;
    }
    Ok(created)
}

#[cfg(target_arch = "mips")]
mod entry {
    use super::*;
    use crate::config::INSTANTIATOR_STACK_WORDS;
    use crate::nucleus::state::NUCLEUS;
    use crate::support::dma::{busy_wait_transfer, IoDirection, DEVICE_MUTEXES, FLASH_LINE};
    use crate::support::pager::{DiskBackingStore, SwapPool};
    use crate::support::{alsl::ActiveLogicalSemaphoreList, delay::ActiveDelayList, SHARED_PAGE_TABLE, SUPPORT, SWAP_POOL, ALSL, DELAY_LIST};

    struct RealFlash {
        device: u32,
    }

    impl FlashDevice for RealFlash {
        fn read_block(&mut self, block: u32, page: &mut [u32; PAGE_SIZE_WORDS]) -> Result<(), u32> {
            busy_wait_transfer(
                crate::board::bus(),
                FLASH_LINE,
                self.device as usize,
                block,
                IoDirection::Read,
                page,
            )
        }
    }

    /// Reserved kernel-mode stacks for the instantiator itself (one) and,
    /// packed after it, one reserved user-mode stack per U-proc (the boot
    /// images' initial `sp`).
    static INSTANTIATOR_STACK: crate::sync::SpinLock<[u32; INSTANTIATOR_STACK_WORDS]> =
        crate::sync::SpinLock::new([0; INSTANTIATOR_STACK_WORDS]);

    const UPROC_STACK_WORDS: usize = 1024;
    static UPROC_STACKS: crate::sync::SpinLock<[[u32; UPROC_STACK_WORDS]; MAX_UPROCS]> =
        crate::sync::SpinLock::new([[0; UPROC_STACK_WORDS]; MAX_UPROCS]);

    /// The real instantiator entry point: brings up the support layer, boots
    /// every U-proc, then blocks on the master semaphore once per U-proc and
    /// halts once they have all terminated (§4.11's "P 8 times on master
    /// semaphore then halt").
    pub fn run(instantiator_pid: crate::pcb::PcbId) -> ! {
        {
            let mut nucleus = NUCLEUS.lock();
            let mut support = SUPPORT.lock();
            let mut swap = SWAP_POOL.lock();
            let mut shared = SHARED_PAGE_TABLE.lock();
            let mut alsl = ALSL.lock();
            let mut delay_list = DELAY_LIST.lock();
            let mut mutexes = DEVICE_MUTEXES.lock();
            let mut backing = DiskBackingStore::new(crate::board::bus());
            let mut flashes: [RealFlash; MAX_UPROCS] = core::array::from_fn(|i| RealFlash { device: i as u32 });
            // SAFETY: each raw pointer addresses a distinct element of
            // `flashes`; the array outlives every reference built from it,
            // and no two elements are ever aliased by the same reference.
            let mut flash_refs: [&mut dyn FlashDevice; MAX_UPROCS] =
                core::array::from_fn(|i| unsafe { &mut *(&mut flashes[i] as *mut RealFlash) } as &mut dyn FlashDevice);

            let stack_base = UPROC_STACKS.lock().as_ptr() as u32;
            let stride = (UPROC_STACK_WORDS * core::mem::size_of::<u32>()) as u32;
            let stack_top0 = stack_base + stride;

            bring_up(
                &mut nucleus,
                &mut support,
                &mut swap,
                &mut shared,
                &mut alsl,
                &mut delay_list,
                &mut mutexes,
                instantiator_pid,
                &mut flash_refs,
                &mut backing,
                crate::config::KUSEG_CODE_BASE_VPN << 12,
                stack_top0,
                stride,
                crate::support::pager_trampoline as usize as u32,
                crate::support::general_trampoline as usize as u32,
            )
            .expect("boot-time pool exhaustion means the image is misconfigured");
        }

        let master_addr = NUCLEUS.lock().master_semaphore_addr();
        for _ in 0..MAX_UPROCS {
            // SAFETY: issuing the real SYS3 trap against the kernel's own
            // master semaphore, the same mechanism every other blocking
            // syscall in this kernel uses.
            unsafe {
                core::arch::asm!(
                    "move $4, {sys}",
                    "move $5, {addr}",
                    "syscall",
                    sys = in(reg) 3,
                    addr = in(reg) master_addr,
                    out("$4") _,
                    out("$5") _,
                );
            }
        }
        crate::println!("all U-procs have terminated");
        crate::arch::halt_forever();
    }
}

#[cfg(target_arch = "mips")]
pub use entry::run;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAXPROC;

    struct FakeFlash {
        pages: [[u32; PAGE_SIZE_WORDS]; 4],
    }

    impl FakeFlash {
        fn with_pages(text_words: u32, data_words: u32) -> Self {
            let mut header = [0u32; PAGE_SIZE_WORDS];
            header[FLASH_HEADER_TEXT_SIZE_OFFSET / 4] = text_words;
            header[FLASH_HEADER_DATA_SIZE_OFFSET / 4] = data_words;
            let mut pages = [[0u32; PAGE_SIZE_WORDS]; 4];
            pages[0] = header;
            pages[1] = [0xAAu32; PAGE_SIZE_WORDS];
            Self { pages }
        }
    }

    impl FlashDevice for FakeFlash {
        fn read_block(&mut self, block: u32, page: &mut [u32; PAGE_SIZE_WORDS]) -> Result<(), u32> {
            *page = self.pages[block as usize];
            Ok(())
        }
    }

    struct FakeDisk {
        sectors: [[u32; PAGE_SIZE_WORDS]; 512],
    }

    impl FakeDisk {
        fn new() -> Self {
            Self {
                sectors: [[0; PAGE_SIZE_WORDS]; 512],
            }
        }
    }

    impl BackingStore for FakeDisk {
        fn read_sector(&mut self, sector: u32, page: &mut [u32; PAGE_SIZE_WORDS]) -> Result<(), u32> {
            *page = self.sectors[sector as usize];
            Ok(())
        }
        fn write_sector(&mut self, sector: u32, page: &[u32; PAGE_SIZE_WORDS]) -> Result<(), u32> {
            self.sectors[sector as usize] = *page;
            Ok(())
        }
    }

    #[test]
    fn boot_image_page_count_rounds_up_and_clamps_to_code_pages() {
        let mut header = [0u32; FLASH_HEADER_WORDS];
        header[FLASH_HEADER_TEXT_SIZE_OFFSET / 4] = PAGE_SIZE_WORDS as u32 + 1;
        header[FLASH_HEADER_DATA_SIZE_OFFSET / 4] = 0;
        assert_eq!(boot_image_page_count(&header), 2);

        let mut huge = [0u32; FLASH_HEADER_WORDS];
        huge[FLASH_HEADER_TEXT_SIZE_OFFSET / 4] = u32::MAX / 2;
        assert_eq!(boot_image_page_count(&huge), KUSEG_CODE_PAGES);
    }

    #[test]
    fn copy_boot_image_writes_the_right_number_of_sectors_at_the_right_base() {
        let mut flash = FakeFlash::with_pages(PAGE_SIZE_WORDS as u32, 0);
        let mut disk = FakeDisk::new();
        let pages = copy_boot_image(2, &mut flash, &mut disk).unwrap();
        assert_eq!(pages, 2);
        assert_eq!(disk.sectors[32], flash.pages[0]);
        assert_eq!(disk.sectors[33], flash.pages[1]);
    }

    #[test]
    fn layout_private_page_table_marks_every_entry_dirty_and_invalid() {
        let mut record = crate::support::record::SupportPool::new();
        record.init();
        let id = record.allocate(3).unwrap();
        layout_private_page_table(record.get_mut(id), 3);
        let rec = record.get(id);
        for page in 0..KUSEG_CODE_PAGES as usize {
            let pte = rec.private_page_table[page];
            assert!(!pte.entry_lo.valid());
            assert!(pte.entry_lo.dirty());
            assert_eq!(pte.entry_hi.asid(), 3);
            assert_eq!(pte.entry_hi.vpn(), KUSEG_CODE_BASE_VPN + page as u32);
        }
        let stack_pte = rec.private_page_table[PRIVATE_PAGE_TABLE_SIZE - 1];
        assert_eq!(stack_pte.entry_hi.vpn(), KUSEG_STACK_VPN);
        assert!(!stack_pte.entry_lo.valid());
    }

    #[test]
    fn create_uproc_recovers_the_new_pcb_id_via_the_ready_queue_tail() {
        let mut nucleus = Nucleus::new();
        nucleus.init();
        let mut support = SupportPool::new();
        support.init();
        let instantiator = nucleus.pcbs.allocate().unwrap();
        nucleus.live_process_count = 1;

        let pid = create_uproc(&mut nucleus, &mut support, instantiator, 1, 0x8000_0000, 0xC000_0000, 0x1000, 0x2000).unwrap();
        assert_eq!(nucleus.pcbs.get(pid).parent(), Some(instantiator));
        assert_eq!(nucleus.live_process_count, 2);
        let support_id = nucleus.pcbs.get(pid).support.unwrap();
        assert_eq!(support.get(support_id).asid, 1);
        assert_eq!(support.get(support_id).context(ExceptionSlot::PageFault).pc, 0x1000);
        assert_eq!(support.get(support_id).context(ExceptionSlot::General).pc, 0x2000);
    }

    #[test]
    fn create_uproc_frees_the_support_record_on_pcb_exhaustion() {
        let mut nucleus = Nucleus::new();
        nucleus.init();
        let mut support = SupportPool::new();
        support.init();
        let instantiator = nucleus.pcbs.allocate().unwrap();
        nucleus.live_process_count = 1;
        for _ in 0..(MAXPROC - 1) {
            nucleus.pcbs.allocate().unwrap();
        }

        let result = create_uproc(&mut nucleus, &mut support, instantiator, 1, 0, 0, 0, 0);
        assert!(result.is_err());
        // The support record was freed back, leaving room for a fresh one.
        assert!(support.allocate(9).is_ok());
    }

    #[test]
    fn bring_up_creates_one_uproc_per_asid_with_its_boot_image_copied() {
        let mut nucleus = Nucleus::new();
        nucleus.init();
        let mut support = SupportPool::new();
        support.init();
        let mut swap = crate::support::pager::SwapPool::new();
        let mut shared = [Pte::new(); KUSEGSHARE_PAGES as usize];
        let mut alsl = crate::support::alsl::ActiveLogicalSemaphoreList::new();
        let mut delay_list = crate::support::delay::ActiveDelayList::new();
        let mut mutexes = crate::support::dma::DeviceMutexes::new();
        let instantiator = nucleus.pcbs.allocate().unwrap();
        nucleus.live_process_count = 1;

        let mut flashes: Vec<FakeFlash> = (0..MAX_UPROCS)
            .map(|_| FakeFlash::with_pages(PAGE_SIZE_WORDS as u32, 0))
            .collect();
        let flash_refs: Vec<&mut dyn FlashDevice> =
            flashes.iter_mut().map(|f| f as &mut dyn FlashDevice).collect();
        let mut flash_refs: [&mut dyn FlashDevice; MAX_UPROCS] =
            flash_refs.try_into().unwrap_or_else(|_| unreachable!());
        let mut disk = FakeDisk::new();

        let created = bring_up(
            &mut nucleus,
            &mut support,
            &mut swap,
            &mut shared,
            &mut alsl,
            &mut delay_list,
            &mut mutexes,
            instantiator,
            &mut flash_refs,
            &mut disk,
            0x8000_0000,
            0xC000_1000,
            0x1000,
            0x100,
            0x200,
        )
        .unwrap();

        assert_eq!(created.len(), MAX_UPROCS);
        for (offset, &pid) in created.iter().enumerate() {
            let support_id = nucleus.pcbs.get(pid).support.unwrap();
            assert_eq!(support.get(support_id).asid, FIRST_ASID + offset as u8);
        }
        assert_eq!(disk.sectors[0], flashes[0].pages[0]);
    }
}
