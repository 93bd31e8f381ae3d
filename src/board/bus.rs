//! The interrupt-pending bitmap and device register area, as memory-mapped
//! by the bus controller.
//!
//! Eight interrupt lines exist; [`crate::config::FIRST_DEVICE_LINE`] through
//! [`crate::config::LAST_DEVICE_LINE`] each carry one of the five device
//! classes, eight devices per line. Lines below that range are the local
//! quantum timer and the pseudo-clock, which the nucleus reads through CP0
//! and the interval timer directly rather than through this bitmap.

use bitvec::prelude::*;
use tock_registers::interfaces::Readable;
use tock_registers::register_structs;
use tock_registers::registers::ReadOnly;

use crate::board::devices::{DeviceRegisterBlock, TerminalRegisterBlock};
use crate::board::mmio::Mmio;
use crate::config::{DEVICES_PER_LINE, DEVICE_LINES};

const TOTAL_BUS_LINES: usize = 8;

register_structs! {
    #[allow(non_snake_case)]
    pub InterruptBitmapBlock {
        (0x00 => pub Lines: [ReadOnly<u32>; TOTAL_BUS_LINES]),
        (0x20 => @END),
    }
}

/// The five non-terminal device classes share one register layout; the bus
/// exposes terminals through a distinct block shape (see
/// [`crate::board::devices::TerminalRegisterBlock`]), so the generic device
/// area and the terminal area are mapped separately here.
pub struct Bus {
    bitmap: Mmio<InterruptBitmapBlock>,
    generic_devices: [Mmio<[DeviceRegisterBlock; DEVICES_PER_LINE]>; DEVICE_LINES - 1],
    terminals: Mmio<[TerminalRegisterBlock; DEVICES_PER_LINE]>,
}

impl Bus {
    /// # Safety
    /// Must be called with the real, fixed hardware addresses of the
    /// interrupt bitmap and device register areas, exactly once.
    pub const unsafe fn new(
        bitmap_addr: *mut InterruptBitmapBlock,
        generic_devices_addr: [*mut [DeviceRegisterBlock; DEVICES_PER_LINE]; DEVICE_LINES - 1],
        terminals_addr: *mut [TerminalRegisterBlock; DEVICES_PER_LINE],
    ) -> Self {
        Self {
            bitmap: Mmio::new(bitmap_addr),
            generic_devices: [
                Mmio::new(generic_devices_addr[0]),
                Mmio::new(generic_devices_addr[1]),
                Mmio::new(generic_devices_addr[2]),
                Mmio::new(generic_devices_addr[3]),
            ],
            terminals: Mmio::new(terminals_addr),
        }
    }

    /// The lowest-numbered device with a pending interrupt on `line`, if
    /// any. Device 0 on a line is the highest-priority device, matching the
    /// bus's own priority arbitration.
    pub fn pending_device(&self, line: usize) -> Option<usize> {
        let raw = self.bitmap.Lines[line].get();
        raw.view_bits::<Lsb0>().first_one()
    }

    pub fn device_class(&self, line: usize, device: usize) -> &DeviceRegisterBlock {
        &(*self.generic_devices[line])[device]
    }

    pub fn terminal(&self, device: usize) -> &TerminalRegisterBlock {
        &(*self.terminals)[device]
    }
}

// SAFETY: every field is itself `Sync`; the bus as a whole is read through
// shared references only, with writes going through each device's own
// command register (a single hardware write, not a read-modify-write).
unsafe impl Sync for Bus {}
