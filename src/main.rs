//! Freestanding entry point for the bare-metal inference engine.
//!
//! This binary is intentionally thin: shell, block-device loading, the
//! TCP/IP stack, model-slot registry, and GPU backend are external
//! collaborators that live outside this crate (§1), so there is no
//! equivalent here of the kernel's process/vfs/net/driver subsystem list.
//! `_start` brings up the heap and boot clock, logs build metadata, and
//! hands off; a real boot image wires a collaborator's shell/command
//! surface in before reaching the idle loop.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), no_main)]
#![cfg_attr(feature = "strict", deny(warnings))]

extern crate alloc;

use forgecore::{build_info, hal, heap, time};

#[cfg(all(not(test), target_arch = "x86_64"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    kernel_main()
}

#[cfg(all(not(test), target_arch = "aarch64"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    kernel_main()
}

#[cfg(all(not(test), target_arch = "riscv64"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    kernel_main()
}

#[cfg(not(test))]
fn kernel_main() -> ! {
    heap::init_heap();
    time::init_boot_timestamp();

    forgecore::info!("forgecore starting");
    forgecore::info!("{}", build_info::get_version_string());

    loop {
        hal::wait_for_event();
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    forgecore::lib::panic::panic_handler(info)
}

#[cfg(test)]
fn main() {}
