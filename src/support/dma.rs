//! DMA-backed disk/flash I/O (§4.8): per-device mutual exclusion, the
//! seek-then-transfer sequence, and the user-facing page-copy syscalls
//! (14-17).
//!
//! Device register byte layouts are explicitly out of scope (§1's
//! Non-goals) beyond the field names `board::devices` already exposes;
//! this module only sequences *when* those registers are touched, not
//! their bit encoding.

use tock_registers::interfaces::{Readable, Writeable};

use crate::arch::InterruptMask;
use crate::board::bus::Bus;
use crate::board::devices::{command, DeviceStatus};
use crate::config::{
    DEVICES_PER_LINE, DEVICE_SEMAPHORES, FIRST_DEVICE_LINE, KUSEGSHARE_BASE_VPN, KUSEGSHARE_PAGES,
    KUSEG_CODE_BASE_VPN, KUSEG_STACK_VPN, PAGE_SIZE_WORDS, PRIVATE_PAGE_TABLE_SIZE,
};
use crate::error::TrapCause;
use crate::nucleus::state::Nucleus;
use crate::nucleus::syscalls;
use crate::pcb::{PcbId, SavedState};
use crate::sync::SpinLock;

/// Disk is bus line 3, flash is line 4 (the `board::device_semaphore_index`
/// numbering this module's mutexes don't need to match — these mutexes are
/// a support-layer-only concept, distinct from the nucleus's own device
/// semaphores — but reusing the same per-class offset keeps one index space
/// for both).
pub(crate) const DISK_LINE: usize = 3;
pub(crate) const FLASH_LINE: usize = 4;

/// One binary mutex per physical disk/flash/network/printer/terminal
/// device, guarding it against concurrent DMA users. Distinct from the
/// nucleus's own per-device semaphores (which start at 0 and exist purely
/// to synchronize with the interrupt handler); these start at 1.
pub struct DeviceMutexes {
    values: [i32; DEVICE_SEMAPHORES],
}

impl DeviceMutexes {
    pub const fn new() -> Self {
        Self {
            values: [1; DEVICE_SEMAPHORES],
        }
    }

    pub fn addr(&self, index: usize) -> usize {
        core::ptr::addr_of!(self.values[index]) as usize
    }

    /// Resets every mutex to unlocked. Called exactly once, from support
    /// layer init.
    pub fn init(&mut self) {
        self.values = [1; DEVICE_SEMAPHORES];
    }
}

impl Default for DeviceMutexes {
    fn default() -> Self {
        Self::new()
    }
}

pub static DEVICE_MUTEXES: SpinLock<DeviceMutexes> = SpinLock::new(DeviceMutexes::new());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDirection {
    Read,
    Write,
}

/// A user virtual address must lie entirely within KUSEG (private or
/// shared) before the kernel will DMA into or out of it on its behalf.
pub fn validate_kuseg_address(addr: u32) -> Result<(), TrapCause> {
    let vpn = addr >> 12;
    let in_private = (KUSEG_CODE_BASE_VPN..=KUSEG_STACK_VPN).contains(&vpn);
    let in_shared = (KUSEGSHARE_BASE_VPN..KUSEGSHARE_BASE_VPN + KUSEGSHARE_PAGES).contains(&vpn);
    if in_private || in_shared {
        Ok(())
    } else {
        Err(TrapCause::AddressOutsideKuseg(addr as usize))
    }
}

/// Disk device 0 is the backing store; U-procs may not DMA to/from it.
pub fn validate_disk_device(device: u32) -> Result<(), TrapCause> {
    if device == 0 {
        Err(TrapCause::ReservedBackingStoreDisk)
    } else {
        Ok(())
    }
}

/// The first `PRIVATE_PAGE_TABLE_SIZE` blocks of every flash device hold
/// the boot image copied to the backing store at instantiation; U-procs
/// may not overwrite them afterward.
pub fn validate_flash_block(block: u32) -> Result<(), TrapCause> {
    if block < PRIVATE_PAGE_TABLE_SIZE as u32 {
        Err(TrapCause::ReservedBackingStoreFlashBlock(block))
    } else {
        Ok(())
    }
}

/// Blocks on the device's interrupt semaphore via the ordinary SYS5 path
/// and returns the status the interrupt handler placed in `v0`.
fn wait_for_device(
    nucleus: &mut Nucleus,
    pid: PcbId,
    state: &SavedState,
    line: usize,
    device: usize,
) -> u32 {
    syscalls::wait_io(nucleus, pid, state, line, device, None);
    nucleus.pcbs.get(pid).state.v0()
}

/// Seeks (disk only) then transfers one page between `page` and `device`'s
/// sector/block `target`, under the device's mutex. Real hardware only:
/// touches the live bus, so no host test exercises this directly (the
/// seek-geometry/command sequencing it performs is verified indirectly
/// through the pure validators and the mutex/WaitIO plumbing it shares with
/// every other blocking syscall, which those functions' own tests cover).
fn transfer(
    nucleus: &mut Nucleus,
    pid: PcbId,
    state: &SavedState,
    bus: &Bus,
    line: usize,
    device: usize,
    target: u32,
    direction: IoDirection,
    page: &mut [u32; PAGE_SIZE_WORDS],
) -> Result<(), u32> {
    let mutex_index = (line - DISK_LINE) * DEVICES_PER_LINE + device;
    let mutex_addr = DEVICE_MUTEXES.lock().addr(mutex_index);
    syscalls::passeren(nucleus, pid, state, mutex_addr);

    let block = bus.device_class(line - FIRST_DEVICE_LINE, device);

    if line == DISK_LINE {
        let geometry = block.Data1.get();
        let heads = (geometry >> 16).max(1);
        let sectors_per_track = (geometry & 0xFFFF).max(1);
        let cylinder = target / (heads * sectors_per_track);
        let head = (target / sectors_per_track) % heads;
        let sector = target % sectors_per_track;
        block.Data0.set((cylinder << 16) | (head << 8) | sector);
        {
            let _mask = InterruptMask::new();
            let seek: u32 = 1;
            block.Command.set((seek << 8) | command::ACK);
        }
        let status = wait_for_device(nucleus, pid, state, line, device);
        if DeviceStatus::from_raw(status) != DeviceStatus::Ready {
            syscalls::verhogen(nucleus, mutex_addr);
            return Err(status);
        }
    }

    if let IoDirection::Write = direction {
        // SAFETY: `page` is the caller's private buffer, not an arbitrary
        // address — only its contents cross the DMA boundary.
        block.Data1.set(page.as_ptr() as u32);
    } else {
        block.Data1.set(page.as_mut_ptr() as u32);
    }
    {
        let _mask = InterruptMask::new();
        let op = match direction {
            IoDirection::Read => 2,
            IoDirection::Write => 3,
        };
        block.Command.set((op << 8) | command::ACK);
    }
    let status = wait_for_device(nucleus, pid, state, line, device);
    syscalls::verhogen(nucleus, mutex_addr);
    if DeviceStatus::from_raw(status) == DeviceStatus::Ready {
        Ok(())
    } else {
        Err(status)
    }
}

/// Services SYS14/15 (DiskWrite/DiskRead) or SYS16/17 (FlashWrite/FlashRead):
/// validates the user address and device/block, then copies one page
/// between it and the device. `v0` is `1` on success, the negated device
/// status on I/O failure; a validation failure is a program trap instead.
#[allow(clippy::too_many_arguments)]
pub fn sys_page_io(
    nucleus: &mut Nucleus,
    pid: PcbId,
    state: &SavedState,
    bus: &Bus,
    is_flash: bool,
    direction: IoDirection,
    page_addr: u32,
    device: u32,
    sector_or_block: u32,
) -> Result<i32, TrapCause> {
    validate_kuseg_address(page_addr)?;
    if is_flash {
        validate_flash_block(sector_or_block)?;
    } else {
        validate_disk_device(device)?;
    }

    let mut buffer = [0u32; PAGE_SIZE_WORDS];
    if let IoDirection::Write = direction {
        // SAFETY: `page_addr` was just validated to lie within KUSEG and
        // is page-aligned by the U-proc ABI.
        unsafe {
            core::ptr::copy_nonoverlapping(page_addr as *const u32, buffer.as_mut_ptr(), PAGE_SIZE_WORDS);
        }
    }

    let line = if is_flash { FLASH_LINE } else { DISK_LINE };
    let result = transfer(
        nucleus,
        pid,
        state,
        bus,
        line,
        device as usize,
        sector_or_block,
        direction,
        &mut buffer,
    );

    match result {
        Ok(()) => {
            if let IoDirection::Read = direction {
                // SAFETY: see above.
                unsafe {
                    core::ptr::copy_nonoverlapping(buffer.as_ptr(), page_addr as *mut u32, PAGE_SIZE_WORDS);
                }
            }
            Ok(1)
        }
        Err(status) => Ok(-(status as i32)),
    }
}

/// Busy-waits on `block`'s status register until it leaves `Busy`. Used by
/// the real-hardware pager/instantiator I/O paths, which run with
/// [`crate::nucleus::state::NUCLEUS`] already locked by their caller and so
/// cannot go through [`wait_for_device`]'s ordinary SYS5/semaphore block.
#[cfg(target_arch = "mips")]
fn busy_wait_for_device(block: &DeviceRegisterBlock) -> u32 {
    loop {
        let status = block.Status.get();
        if DeviceStatus::from_raw(status) != DeviceStatus::Busy {
            return status;
        }
        core::hint::spin_loop();
    }
}

/// The non-blocking counterpart of [`transfer`], for callers that already
/// hold the nucleus lock (the pager's page-fault handler, the instantiator's
/// boot-image copy). Takes the device mutex directly rather than through
/// `passeren`/`verhogen`, since those require a live `Nucleus` + `PcbId` to
/// block a caller against — there is no process to block here, only a busy
/// loop to spin.
#[cfg(target_arch = "mips")]
pub fn busy_wait_transfer(
    bus: &Bus,
    line: usize,
    device: usize,
    target: u32,
    direction: IoDirection,
    page: &mut [u32; PAGE_SIZE_WORDS],
) -> Result<(), u32> {
    let mutex_index = (line - DISK_LINE) * DEVICES_PER_LINE + device;
    loop {
        let mut mutexes = DEVICE_MUTEXES.lock();
        if mutexes.values[mutex_index] > 0 {
            mutexes.values[mutex_index] -= 1;
            break;
        }
        drop(mutexes);
        core::hint::spin_loop();
    }

    let block = bus.device_class(line - FIRST_DEVICE_LINE, device);

    if line == DISK_LINE {
        let geometry = block.Data1.get();
        let heads = (geometry >> 16).max(1);
        let sectors_per_track = (geometry & 0xFFFF).max(1);
        let cylinder = target / (heads * sectors_per_track);
        let head = (target / sectors_per_track) % heads;
        let sector = target % sectors_per_track;
        block.Data0.set((cylinder << 16) | (head << 8) | sector);
        block.Command.set((1u32 << 8) | command::ACK);
        let status = busy_wait_for_device(block);
        if DeviceStatus::from_raw(status) != DeviceStatus::Ready {
            DEVICE_MUTEXES.lock().values[mutex_index] += 1;
            return Err(status);
        }
    }

    if let IoDirection::Write = direction {
        block.Data1.set(page.as_ptr() as u32);
    } else {
        block.Data1.set(page.as_mut_ptr() as u32);
    }
    let op = match direction {
        IoDirection::Read => 2,
        IoDirection::Write => 3,
    };
    block.Command.set((op << 8) | command::ACK);
    let status = busy_wait_for_device(block);
    DEVICE_MUTEXES.lock().values[mutex_index] += 1;
    if DeviceStatus::from_raw(status) == DeviceStatus::Ready {
        Ok(())
    } else {
        Err(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kuseg_validation_accepts_private_and_shared_ranges_only() {
        assert!(validate_kuseg_address(KUSEG_CODE_BASE_VPN << 12).is_ok());
        assert!(validate_kuseg_address(KUSEG_STACK_VPN << 12).is_ok());
        assert!(validate_kuseg_address(KUSEGSHARE_BASE_VPN << 12).is_ok());
        assert!(validate_kuseg_address(0).is_err());
        assert!(validate_kuseg_address((KUSEGSHARE_BASE_VPN + KUSEGSHARE_PAGES) << 12).is_err());
    }

    #[test]
    fn disk_device_zero_is_reserved() {
        assert_eq!(
            validate_disk_device(0),
            Err(TrapCause::ReservedBackingStoreDisk)
        );
        assert!(validate_disk_device(1).is_ok());
    }

    #[test]
    fn flash_blocks_inside_the_boot_image_are_reserved() {
        assert_eq!(
            validate_flash_block(0),
            Err(TrapCause::ReservedBackingStoreFlashBlock(0))
        );
        assert!(validate_flash_block(PRIVATE_PAGE_TABLE_SIZE as u32).is_ok());
    }

    #[test]
    fn device_mutexes_start_unlocked() {
        let mutexes = DeviceMutexes::new();
        assert_eq!(mutexes.values[0], 1);
        assert_eq!(mutexes.values[DEVICE_SEMAPHORES - 1], 1);
    }
}
