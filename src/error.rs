//! The kernel's error taxonomy.
//!
//! `KernelError` is returned by allocation from one of the fixed-capacity
//! pools; callers either surface it as a syscall failure (`-1` in `v0`) or
//! convert it into a `TrapCause` and terminate the offending U-proc.
//! `TrapCause` is never wrapped in a `Result` past the point of detection —
//! it is handed to `syscalls::terminate_process` via `exceptions::pass_up_or_die`,
//! not recovered from by the code that detects it.

use derive_more::Display;

/// Exhaustion of one of the kernel's fixed-size pools.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    #[display(fmt = "PCB pool exhausted")]
    PcbPoolExhausted,
    #[display(fmt = "semaphore descriptor pool exhausted")]
    AslPoolExhausted,
    #[display(fmt = "support record pool exhausted")]
    SupportPoolExhausted,
    #[display(fmt = "delay descriptor pool exhausted")]
    DelayPoolExhausted,
    #[display(fmt = "logical semaphore descriptor pool exhausted")]
    AlslPoolExhausted,
}

/// A program trap: a condition that terminates the faulting U-proc's entire
/// process subtree (a bad argument from user level, or a failed I/O), or the
/// whole system if the instantiator itself is the offender.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum TrapCause {
    #[display(fmt = "user pointer {_0:#x} lies outside KUSEG")]
    AddressOutsideKuseg(usize),
    #[display(fmt = "disk device 0 is reserved for the backing store")]
    ReservedBackingStoreDisk,
    #[display(fmt = "flash block {_0} lies inside the backing-store region")]
    ReservedBackingStoreFlashBlock(u32),
    #[display(fmt = "negative delay requested: {_0}")]
    NegativeDelay(i32),
    #[display(fmt = "shared semaphore address {_0:#x} lies outside KUSEGSHARE")]
    AddressOutsideSharedRegion(usize),
    #[display(fmt = "unknown syscall number {_0}")]
    UnknownSyscall(u32),
    #[display(fmt = "device I/O failed with status {_0}")]
    DeviceIoFailed(u32),
    #[display(fmt = "TLB-modified exception on a user page")]
    TlbModified,
    #[display(fmt = "pool exhausted: {_0}")]
    PoolExhausted(KernelError),
}

impl From<KernelError> for TrapCause {
    fn from(value: KernelError) -> Self {
        Self::PoolExhausted(value)
    }
}
