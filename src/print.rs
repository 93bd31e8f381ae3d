//! `println!`/`log!` diagnostics, written to the machine's terminal 0.
//!
//! A thin `_print` wrapper around the board's serial writer, plus a `log!`
//! that is a real macro under the `verbose` feature and a compiled-out
//! no-op otherwise.

#[doc(hidden)]
pub fn _print(args: core::fmt::Arguments) {
    use core::fmt::Write;
    let _ = crate::board::terminal0().write_fmt(args);
}

#[doc(hidden)]
#[cfg(not(feature = "verbose"))]
pub fn _unused(_args: core::fmt::Arguments) {}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::print::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ({
        $crate::print::_print(format_args!($($arg)*));
        $crate::print::_print(format_args!("\n"));
    })
}

/// Prints a line prefixed with the elapsed pseudo-clock time, gated behind
/// the `verbose` feature: the nucleus runs most logging call sites with
/// interrupts masked, and the extra serial writes are not free.
#[cfg(feature = "verbose")]
#[macro_export]
macro_rules! log {
    ($($arg:tt)*) => ({
        let ticks = $crate::arch::timer::elapsed_us();
        $crate::print::_print(format_args!("[{:>10}us] ", ticks));
        $crate::println!($($arg)*);
    })
}

#[cfg(not(feature = "verbose"))]
#[macro_export]
macro_rules! log {
    ($($arg:tt)*) => {
        $crate::print::_unused(format_args!($($arg)*))
    };
}
