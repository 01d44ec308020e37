//! Monotonic counter collaborator: used only for statistics; no correctness
//! depends on it (§6).

use core::sync::atomic::{AtomicU64, Ordering};

static BOOT_TIMESTAMP_US: AtomicU64 = AtomicU64::new(0);

#[cfg(test)]
static TEST_CLOCK_US: AtomicU64 = AtomicU64::new(0);

/// Current timestamp in microseconds since an arbitrary epoch.
pub fn get_timestamp_us() -> u64 {
    #[cfg(test)]
    {
        TEST_CLOCK_US.fetch_add(1, Ordering::Relaxed)
    }
    #[cfg(all(not(test), target_arch = "aarch64"))]
    unsafe {
        let mut cntpct: u64;
        core::arch::asm!("mrs {0}, cntpct_el0", out(reg) cntpct);
        let mut cntfrq: u64;
        core::arch::asm!("mrs {0}, cntfrq_el0", out(reg) cntfrq);
        if cntfrq > 0 {
            (cntpct * 1_000_000) / cntfrq
        } else {
            cntpct / 62
        }
    }
    #[cfg(all(not(test), target_arch = "x86_64"))]
    unsafe {
        core::arch::x86_64::_rdtsc()
    }
    #[cfg(all(not(test), not(any(target_arch = "aarch64", target_arch = "x86_64"))))]
    {
        0
    }
}

pub fn init_boot_timestamp() {
    BOOT_TIMESTAMP_US.store(get_timestamp_us(), Ordering::Relaxed);
}

pub fn get_time_since_boot_us() -> u64 {
    let current = get_timestamp_us();
    let boot = BOOT_TIMESTAMP_US.load(Ordering::Relaxed);
    current.saturating_sub(boot)
}

pub fn get_uptime_ms() -> u64 {
    get_time_since_boot_us() / 1000
}
