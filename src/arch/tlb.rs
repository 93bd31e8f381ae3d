//! Raw TLB instructions. Real hardware only on `target_arch = "mips"`; the
//! host-test build stubs these out since no test exercises them directly
//! (the pager's replacement policy is tested against a fake backing store,
//! not real TLB state).

use crate::arch::cp0::{EntryHi, EntryLo};

/// Probes the TLB for `entry_hi`'s VPN/ASID. Returns the matching index, or
/// `None` if no entry matched (the hardware sets the probe failure bit).
pub fn probe(entry_hi: EntryHi) -> Option<u32> {
    #[cfg(target_arch = "mips")]
    {
        let index: u32;
        // SAFETY: TLBP only reads CP0 registers; EntryHi was just written.
        unsafe {
            core::arch::asm!(
                "mtc0 {entry_hi}, $10",
                "tlbp",
                "mfc0 {index}, $0",
                entry_hi = in(reg) entry_hi.into_bits(),
                index = out(reg) index,
                options(nostack)
            );
        }
        if index & 0x8000_0000 != 0 {
            None
        } else {
            Some(index & 0x3F)
        }
    }
    #[cfg(not(target_arch = "mips"))]
    {
        let _ = entry_hi;
        unimplemented!("TLB probe is only meaningful on real hardware")
    }
}

/// Writes `(entry_hi, entry_lo)` into the TLB at `index`.
pub fn write_indexed(index: u32, entry_hi: EntryHi, entry_lo: EntryLo) {
    #[cfg(target_arch = "mips")]
    // SAFETY: `index` is caller-checked to be within the TLB's size.
    unsafe {
        core::arch::asm!(
            "mtc0 {index}, $0",
            "mtc0 {entry_hi}, $10",
            "mtc0 {entry_lo}, $2",
            "tlbwi",
            index = in(reg) index,
            entry_hi = in(reg) entry_hi.into_bits(),
            entry_lo = in(reg) entry_lo.into_bits(),
            options(nostack)
        );
    }
    #[cfg(not(target_arch = "mips"))]
    {
        let _ = (index, entry_hi, entry_lo);
        unimplemented!("TLB writes are only meaningful on real hardware")
    }
}

/// Invalidates the whole TLB by writing an impossible VPN/ASID pair to
/// every entry, paired with an unmapped, invalid `EntryLo`. Used at nucleus
/// init and whenever a U-proc's ASID is about to be reused.
pub fn clear_all(tlb_size: u32) {
    let invalid_hi = EntryHi::new().with_vpn(0xF_FFFF);
    let invalid_lo = EntryLo::new();
    for index in 0..tlb_size {
        write_indexed(index, invalid_hi, invalid_lo);
    }
}
