//! Compile-time constants named once, cross-referenced everywhere else.
//!
//! Every magic number appearing in the prose of the kernel's design lives
//! here instead of being repeated at each use site.

/// Maximum number of PCBs the nucleus can have allocated at once.
pub const MAXPROC: usize = 20;

/// Maximum number of concurrently-running U-procs the support layer serves.
pub const MAX_UPROCS: usize = 8;

/// Length of a scheduling quantum, in microseconds.
pub const QUANTUM_US: u64 = 5_000;

/// Period of the pseudo-clock (interval timer) tick, in microseconds.
pub const PSEUDO_CLOCK_PERIOD_US: u64 = 100_000;

/// Number of physical frames in the swap pool (2 * MAX_UPROCS).
pub const SWAP_POOL_FRAMES: usize = 2 * MAX_UPROCS;

/// Number of entries in a U-proc's private page table.
pub const PRIVATE_PAGE_TABLE_SIZE: usize = 32;

/// Number of entries in the global (shared) page table.
pub const SHARED_PAGE_TABLE_SIZE: usize = 32;

/// Number of device semaphores: 5 classes * 8 lines * (up to) 2 sub-devices
/// for terminals, plus one pseudo-clock semaphore. The nucleus only needs to
/// know the total count; `DeviceSemIndex` computes the index into this array.
pub const DEVICE_SEMAPHORES: usize = 48;

/// Index of the pseudo-clock semaphore, one past the last device semaphore.
pub const PSEUDO_CLOCK_SEM_INDEX: usize = DEVICE_SEMAPHORES;

/// Total semaphores in the nucleus device-semaphore array (48 devices + 1
/// pseudo-clock).
pub const TOTAL_NUCLEUS_SEMAPHORES: usize = DEVICE_SEMAPHORES + 1;

/// Number of interrupt lines on the bus, excluding the local quantum timer.
pub const DEVICE_LINES: usize = 5;

/// Number of devices per interrupt line.
pub const DEVICES_PER_LINE: usize = 8;

/// First interrupt line carrying a device class (line 0 is the quantum
/// timer, line 1 is the pseudo-clock).
pub const FIRST_DEVICE_LINE: usize = 3;

/// Last interrupt line carrying a device class.
pub const LAST_DEVICE_LINE: usize = 7;

/// Sentinel VPN marking the low end of the ASL's address-sorted list.
pub const ASL_SENTINEL_LOW: usize = 0;

/// Sentinel semaphore address marking the high end of the ASL's
/// address-sorted list.
pub const ASL_SENTINEL_HIGH: usize = usize::MAX;

/// Capacity of the Active Semaphore List descriptor pool: at most one
/// descriptor per PCB (a process blocks on at most one semaphore at a time)
/// plus the two sentinel nodes.
pub const ASL_POOL_SIZE: usize = MAXPROC + 2;

/// Virtual page number at which a U-proc's 31 code/data pages begin.
pub const KUSEG_CODE_BASE_VPN: u32 = 0x8_0000;

/// Number of code/data pages per U-proc (the remaining page of the 32-page
/// address space is the stack).
pub const KUSEG_CODE_PAGES: u32 = 31;

/// Virtual page number of a U-proc's stack page.
pub const KUSEG_STACK_VPN: u32 = 0xB_FFFF;

/// Virtual page number at which the shared region (`KUSEGSHARE`) begins.
pub const KUSEGSHARE_BASE_VPN: u32 = 0xC_0000;

/// Number of pages in the shared region.
pub const KUSEGSHARE_PAGES: u32 = SHARED_PAGE_TABLE_SIZE as u32;

/// Sector on the backing store (disk 0) at which the shared pages begin:
/// `8 * 32`, one past the last private sector.
pub const SHARED_PAGES_BASE_SECTOR: u32 = (MAX_UPROCS as u32) * (PRIVATE_PAGE_TABLE_SIZE as u32);

/// Pool capacity for the delay daemon's descriptor free list.
pub const DELAY_POOL_SIZE: usize = MAX_UPROCS;

/// Pool capacity for the Active Logical Semaphore List.
pub const ALSL_POOL_SIZE: usize = MAX_UPROCS;

/// Pool capacity for support records. Sized to `MAX_UPROCS` since every
/// U-proc the instantiator creates needs one, with no spare capacity for
/// descendants a U-proc might itself spawn via `CreateProcess`.
pub const SUPPORT_POOL_SIZE: usize = MAX_UPROCS;

/// Words per reserved exception-handler stack (one per exception context).
pub const EXCEPTION_STACK_WORDS: usize = 128;

/// Words per page (4KB pages, 32-bit words): the unit the pager moves
/// between a swap-pool frame and the backing store.
pub const PAGE_SIZE_WORDS: usize = 1024;

/// Maximum bytes per single WriteTerminal/WritePrinter/ReadTerminal call.
pub const MAX_IO_BYTES: usize = 128;

/// Lowest ASID a U-proc can be assigned; ASID 0 is reserved for kernel-mode
/// processes (the instantiator itself has no support record and no ASID).
pub const FIRST_ASID: u8 = 1;

/// Highest ASID a U-proc can be assigned (inclusive); `MAX_UPROCS` ASIDs in
/// total, one per U-proc the instantiator creates.
pub const LAST_ASID: u8 = MAX_UPROCS as u8;

/// Fixed low-memory address of the Pass-Up Vector the BIOS/bootstrap reads
/// once, at power-up, to learn where each exception context's new PC/Status/
/// stack-pointer triple is stored; written once during nucleus init and
/// never touched again.
pub const PASS_UP_VECTOR_ADDR: usize = 0x0000_0900;

/// Byte offset, within a flash boot-image header, of the `.text` segment's
/// size in words.
pub const FLASH_HEADER_TEXT_SIZE_OFFSET: usize = 0x14;

/// Byte offset, within a flash boot-image header, of the `.data` segment's
/// size in words.
pub const FLASH_HEADER_DATA_SIZE_OFFSET: usize = 0x24;

/// Words per boot-image header block (same layout as an ordinary page).
pub const FLASH_HEADER_WORDS: usize = PAGE_SIZE_WORDS;

/// Words in the instantiator's own reserved kernel-mode stack.
pub const INSTANTIATOR_STACK_WORDS: usize = 512;

/// Number of slots in the hardware TLB, cleared wholesale at nucleus init.
pub const TLB_SIZE: u32 = 16;
