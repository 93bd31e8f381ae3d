//! Kernel entry point: the first Rust code the bootstrap hands off to after
//! loading the image into memory.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    let (file, line, column) = match info.location() {
        Some(loc) => (loc.file(), loc.line(), loc.column()),
        None => ("<unknown>", 0, 0),
    };
    pandos::println!("PANIC at {file}:{line}:{column}\n{}", info.message());
    pandos::arch::halt_forever();
}

/// The bootstrap jumps here directly; nothing above this has run yet, so
/// every pool, register, and device this kernel depends on is still in its
/// power-on state.
#[no_mangle]
pub extern "C" fn kernel_main() -> ! {
    pandos::nucleus::init::start()
}
