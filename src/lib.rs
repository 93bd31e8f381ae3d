//! A multiprogramming kernel for a MIPS-class educational machine: a
//! nucleus (process/semaphore/interrupt management) plus a support layer
//! (demand paging, device I/O helpers, and shared-semaphore services)
//! layered on top of it.
//!
//! Built as `no_std` except when compiled for host tests (`cfg(test)`),
//! which run the pure data-structure logic — PCB pool, ASL, scheduler
//! queues, pager replacement policy — against a fake backing store instead
//! of the real UMPS3 hardware.

#![cfg_attr(not(test), no_std)]
#![warn(clippy::all)]

pub mod arch;
pub mod asl;
pub mod board;
pub mod config;
pub mod error;
pub mod nucleus;
pub mod pcb;
pub mod print;
pub mod support;
pub mod sync;
