//! Device register layout for the five I/O device classes sitting behind
//! the bus: disks, flash drives, network (ethernet) adapters, printers,
//! and terminals.
//!
//! Every non-terminal device exposes the same four-word block (status,
//! command, and two data registers); a terminal reuses the same sixteen
//! bytes as two independent halves, one per sub-device (receiver,
//! transmitter), since a terminal is really two devices sharing an
//! interrupt line position.

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::register_structs;
use tock_registers::registers::{ReadOnly, ReadWrite};

register_structs! {
    #[allow(non_snake_case)]
    pub DeviceRegisterBlock {
        (0x00 => pub Status: ReadOnly<u32>),
        (0x04 => pub Command: ReadWrite<u32>),
        (0x08 => pub Data0: ReadWrite<u32>),
        (0x0C => pub Data1: ReadWrite<u32>),
        (0x10 => @END),
    }
}

register_structs! {
    #[allow(non_snake_case)]
    pub TerminalRegisterBlock {
        (0x00 => pub RecvStatus: ReadOnly<u32>),
        (0x04 => pub RecvCommand: ReadWrite<u32>),
        (0x08 => pub TransmStatus: ReadOnly<u32>),
        (0x0C => pub TransmCommand: ReadWrite<u32>),
        (0x10 => @END),
    }
}

/// Status-register values common to every device class (bits 0-3 of
/// `Status`/`RecvStatus`/`TransmStatus`); device-class-specific status
/// codes, if any, live above these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DeviceStatus {
    NotInstalled = 0,
    Ready = 1,
    Busy = 3,
    /// Any value `>= 4` is a device/transaction-specific error code; the
    /// nucleus forwards the raw code rather than decoding it further.
    Error = 4,
}

impl DeviceStatus {
    pub fn from_raw(raw: u32) -> Self {
        match raw & 0xFF {
            0 => Self::NotInstalled,
            1 => Self::Ready,
            3 => Self::Busy,
            _ => Self::Error,
        }
    }
}

/// Command codes accepted by every device's command register.
pub mod command {
    pub const RESET: u32 = 0;
    pub const ACK: u32 = 1;
}

pub fn status(block: &DeviceRegisterBlock) -> DeviceStatus {
    DeviceStatus::from_raw(block.Status.get())
}

pub fn issue(block: &DeviceRegisterBlock, command: u32) {
    block.Command.set(command);
}
