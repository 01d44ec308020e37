// Panic handler with basic forensics: location, message, heap stats, build info.

use core::panic::PanicInfo;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static PANICKING: AtomicBool = AtomicBool::new(false);
static PANIC_COUNT: AtomicU64 = AtomicU64::new(0);

pub fn panic_handler(info: &PanicInfo) -> ! {
    if PANICKING.swap(true, Ordering::SeqCst) {
        crate::hal::console_write(b"\n!!! RECURSIVE PANIC !!!\n");
        halt();
    }

    let panic_num = PANIC_COUNT.fetch_add(1, Ordering::SeqCst) + 1;
    crate::hal::disable_interrupts();

    print_panic_header(panic_num);
    print_panic_info(info);
    print_system_state();
    log_panic_structured(info);

    halt();
}

fn print_panic_header(panic_num: u64) {
    crate::hal::console_write(b"\n");
    crate::hal::console_write(b"================================================================================\n");
    crate::hal::console_write(b"!!!                          KERNEL PANIC                                    !!!\n");
    crate::hal::console_write(b"================================================================================\n");
    if panic_num > 1 {
        let msg = alloc::format!("Panic #{}\n", panic_num);
        crate::hal::console_write(msg.as_bytes());
    }
}

fn print_panic_info(info: &PanicInfo) {
    crate::hal::console_write(b"PANIC INFORMATION:\n");
    if let Some(location) = info.location() {
        let loc = alloc::format!(
            "  Location: {}:{}:{}\n",
            location.file(),
            location.line(),
            location.column()
        );
        crate::hal::console_write(loc.as_bytes());
    } else {
        crate::hal::console_write(b"  Location: <unknown>\n");
    }

    if let Some(payload) = info.payload().downcast_ref::<&str>() {
        let msg = alloc::format!("  Message:  {}\n", payload);
        crate::hal::console_write(msg.as_bytes());
    } else if let Some(payload) = info.payload().downcast_ref::<alloc::string::String>() {
        let msg = alloc::format!("  Message:  {}\n", payload);
        crate::hal::console_write(msg.as_bytes());
    } else {
        crate::hal::console_write(b"  Message:  <no message>\n");
    }
}

fn print_system_state() {
    crate::hal::console_write(b"SYSTEM STATE:\n");

    let uptime_ms = crate::time::get_uptime_ms();
    let msg = alloc::format!("  Uptime:  {} ms\n", uptime_ms);
    crate::hal::console_write(msg.as_bytes());

    let stats = crate::heap::get_heap_stats();
    let msg = alloc::format!(
        "  Heap:    {} bytes current, {} bytes peak, {} allocs, {} failures\n",
        stats.current_allocated(),
        stats.peak_allocated(),
        stats.total_allocations(),
        stats.allocation_failures(),
    );
    crate::hal::console_write(msg.as_bytes());

    let msg = alloc::format!("  Version: {}\n", crate::build_info::get_version_string());
    crate::hal::console_write(msg.as_bytes());
}

fn log_panic_structured(info: &PanicInfo) {
    #[cfg(feature = "structured-logging")]
    {
        let location = info
            .location()
            .map(|l| alloc::format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| alloc::string::String::from("unknown"));
        let timestamp = crate::time::get_timestamp_us();
        let log = alloc::format!(
            "{{\"ts\":{},\"level\":\"FATAL\",\"location\":\"{}\"}}\n",
            timestamp, location
        );
        crate::hal::console_write(log.as_bytes());
    }
    #[cfg(not(feature = "structured-logging"))]
    {
        let _ = info;
    }
}

fn halt() -> ! {
    crate::hal::console_write(b"System halted.\n");
    loop {
        crate::hal::wait_for_event();
    }
}

pub fn get_panic_count() -> u64 {
    PANIC_COUNT.load(Ordering::Relaxed)
}

pub fn is_panicking() -> bool {
    PANICKING.load(Ordering::Relaxed)
}
