//! CP0 register layouts: `Status`, `Cause`, `EntryHi`, `EntryLo`.
//!
//! These are bit-for-bit the fields the hardware defines; decoding logic
//! (which exception code maps to which handler, etc.) lives in
//! [`crate::nucleus::exceptions`], not here.

use bitfield_struct::bitfield;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};

/// The processor status register.
#[bitfield(u32)]
pub struct Status {
    /// Interrupt enable, current.
    pub ie_c: bool,
    /// Kernel/user mode, current (`true` = user mode).
    pub ku_c: bool,
    /// Interrupt enable, previous.
    pub ie_p: bool,
    /// Kernel/user mode, previous.
    pub ku_p: bool,
    /// Interrupt enable, old.
    pub ie_o: bool,
    /// Kernel/user mode, old.
    pub ku_o: bool,
    #[bits(2)]
    __reserved0: u8,
    /// Per-line interrupt mask: bit `n` enables interrupt line `n`.
    #[bits(8)]
    pub interrupt_mask: u8,
    #[bits(11)]
    __reserved1: u16,
    /// Enables the local (quantum) timer.
    pub timer_enabled: bool,
    #[bits(4)]
    __reserved2: u8,
}

/// Exception codes as encoded in `Cause.exc_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum ExceptionCode {
    Interrupt = 0,
    TlbModification = 1,
    TlbInvalidOnLoad = 2,
    TlbInvalidOnStore = 3,
    AddressErrorOnLoad = 4,
    AddressErrorOnStore = 5,
    BusErrorOnInstructionFetch = 6,
    BusErrorOnData = 7,
    Syscall = 8,
    Breakpoint = 9,
    ReservedInstruction = 10,
    CoprocessorUnusable = 11,
    ArithmeticOverflow = 12,
}

impl From<u32> for ExceptionCode {
    fn from(value: u32) -> Self {
        FromPrimitive::from_u32(value).unwrap_or(Self::ReservedInstruction)
    }
}

impl From<ExceptionCode> for u32 {
    fn from(value: ExceptionCode) -> Self {
        // SAFETY: every variant fits in a u32.
        unsafe { ToPrimitive::to_u32(&value).unwrap_unchecked() }
    }
}

/// The exception cause register.
#[bitfield(u32)]
pub struct Cause {
    #[bits(2)]
    __reserved0: u8,
    #[bits(5)]
    pub exc_code: u8,
    __reserved1: bool,
    /// Pending interrupt lines: bit `n` is set if line `n` is asserted.
    #[bits(8)]
    pub interrupt_pending: u8,
    #[bits(12)]
    __reserved2: u16,
    #[bits(2)]
    __coprocessor_error: u8,
    __reserved3: bool,
    /// Set if the exception happened in a branch delay slot; `pc` in the
    /// saved state then points at the branch, not the delay slot.
    pub branch_delay: bool,
}

/// `EntryHi`: the virtual page number and ASID of a TLB lookup/entry.
#[bitfield(u32)]
pub struct EntryHi {
    #[bits(6)]
    __reserved0: u8,
    #[bits(6)]
    pub asid: u8,
    #[bits(20)]
    pub vpn: u32,
}

/// `EntryLo`: the physical frame and permission bits of a TLB entry.
#[bitfield(u32)]
pub struct EntryLo {
    pub global: bool,
    pub valid: bool,
    pub dirty: bool,
    #[bits(9)]
    __reserved0: u16,
    #[bits(20)]
    pub pfn: u32,
}
