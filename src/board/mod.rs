//! The board: the bus's interrupt bitmap and device register area, and the
//! terminal used for kernel diagnostics (terminal 0's transmitter).

pub mod bus;
pub mod devices;
pub mod mmio;

use core::fmt;

use tock_registers::interfaces::{Readable, Writeable};

use bus::{Bus, InterruptBitmapBlock};
use devices::{command, DeviceRegisterBlock, DeviceStatus, TerminalRegisterBlock};

use crate::config::DEVICES_PER_LINE;
use crate::sync::{MutexGuard, SpinLock};

const BITMAP_BASE: usize = 0x1000_0000;
const GENERIC_DEVICES_BASE: usize = 0x1000_0040;
const GENERIC_LINE_STRIDE: usize = DEVICES_PER_LINE * 0x10;
const TERMINALS_BASE: usize = GENERIC_DEVICES_BASE + 4 * GENERIC_LINE_STRIDE;

// SAFETY: these addresses are fixed by the machine and touched exactly
// once, here, to build the single system-wide `Bus`.
static BUS: Bus = unsafe {
    Bus::new(
        BITMAP_BASE as *mut InterruptBitmapBlock,
        [
            GENERIC_DEVICES_BASE as *mut [DeviceRegisterBlock; DEVICES_PER_LINE],
            (GENERIC_DEVICES_BASE + GENERIC_LINE_STRIDE) as *mut [DeviceRegisterBlock; DEVICES_PER_LINE],
            (GENERIC_DEVICES_BASE + 2 * GENERIC_LINE_STRIDE) as *mut [DeviceRegisterBlock; DEVICES_PER_LINE],
            (GENERIC_DEVICES_BASE + 3 * GENERIC_LINE_STRIDE) as *mut [DeviceRegisterBlock; DEVICES_PER_LINE],
        ],
        TERMINALS_BASE as *mut [TerminalRegisterBlock; DEVICES_PER_LINE],
    )
};

/// The system-wide bus: interrupt bitmap plus every device register block.
pub fn bus() -> &'static Bus {
    &BUS
}

static DIAGNOSTICS_LOCK: SpinLock<()> = SpinLock::new(());

/// A blocking writer over terminal 0's transmitter, used for kernel
/// diagnostics (`println!`/`log!`). Busy-waits rather than blocking on the
/// terminal's semaphore, since this is called from contexts — including the
/// panic handler — that may run with interrupts masked or before the
/// nucleus's semaphores exist. Holds [`DIAGNOSTICS_LOCK`] for its whole
/// lifetime so that concurrent `println!`s from different call sites don't
/// interleave their bytes.
pub struct DiagnosticsTerminal(MutexGuard<'static, ()>);

impl fmt::Write for DiagnosticsTerminal {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let term = BUS.terminal(0);
        for byte in s.bytes() {
            while DeviceStatus::from_raw(term.TransmStatus.get()) == DeviceStatus::Busy {
                core::hint::spin_loop();
            }
            term.TransmCommand
                .set((u32::from(byte) << 8) | command::ACK);
        }
        Ok(())
    }
}

/// Returns a writer for kernel diagnostic output.
pub fn terminal0() -> DiagnosticsTerminal {
    DiagnosticsTerminal(DIAGNOSTICS_LOCK.lock())
}

/// A terminal is really two sub-devices sharing one interrupt line
/// position: a receiver and a transmitter, each with its own semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalSubDevice {
    Transmit,
    Receive,
}

/// Maps (line, device[, sub-device]) to an index into the nucleus's device
/// semaphore array. Lines [`crate::config::FIRST_DEVICE_LINE`]..7 are the
/// four non-terminal classes (disk, flash, network, printer), 8 devices
/// each; line 7 is terminals, split into a transmit bank (32-39) and a
/// receive bank (40-47) with transmit taking priority.
pub fn device_semaphore_index(line: usize, device: usize, sub: Option<TerminalSubDevice>) -> usize {
    use crate::config::{DEVICES_PER_LINE, FIRST_DEVICE_LINE, LAST_DEVICE_LINE};
    if line == LAST_DEVICE_LINE {
        let bank = match sub.expect("terminal line requires a sub-device") {
            TerminalSubDevice::Transmit => 4 * DEVICES_PER_LINE,
            TerminalSubDevice::Receive => 5 * DEVICES_PER_LINE,
        };
        bank + device
    } else {
        (line - FIRST_DEVICE_LINE) * DEVICES_PER_LINE + device
    }
}
