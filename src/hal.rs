//! Minimal platform HAL surface consumed by the core engine: a console sink,
//! per-CPU id / pin / yield, and release-acquire-full memory fences.
//!
//! Everything heavier (keyboard, timer, PCI, DMA, interrupt controllers) is
//! an external collaborator and lives outside this crate's scope; this
//! module only carries what `llm::scheduler` and the logging/panic paths
//! need to link against.

use core::sync::atomic::{AtomicUsize, Ordering};

pub const MAX_CPUS: usize = 8;

/// Write raw bytes to the console. Best-effort; never blocks indefinitely.
pub fn console_write(bytes: &[u8]) {
    #[cfg(test)]
    {
        use std::io::Write;
        let _ = std::io::stdout().write_all(bytes);
    }
    #[cfg(all(not(test), target_arch = "x86_64"))]
    unsafe {
        x86_64_uart_write(bytes);
    }
    #[cfg(all(not(test), not(target_arch = "x86_64")))]
    {
        let _ = bytes;
    }
}

#[cfg(all(not(test), target_arch = "x86_64"))]
unsafe fn x86_64_uart_write(bytes: &[u8]) {
    use uart_16550::SerialPort;
    static PORT: spin::Mutex<Option<SerialPort>> = spin::Mutex::new(None);
    let mut guard = PORT.lock();
    if guard.is_none() {
        let mut serial = unsafe { SerialPort::new(0x3F8) };
        serial.init();
        *guard = Some(serial);
    }
    if let Some(serial) = guard.as_mut() {
        for &b in bytes {
            serial.send(b);
        }
    }
}

/// Current logical CPU id, used to index per-core scheduler statistics.
pub fn current_cpu_id() -> usize {
    #[cfg(test)]
    {
        0
    }
    #[cfg(all(not(test), target_arch = "x86_64"))]
    {
        raw_cpuid::CpuId::new()
            .get_feature_info()
            .map(|_| apic_id_x86_64())
            .unwrap_or(0)
            % MAX_CPUS
    }
    #[cfg(all(not(test), target_arch = "aarch64"))]
    {
        let mut mpidr: u64;
        unsafe { core::arch::asm!("mrs {0}, mpidr_el1", out(reg) mpidr) };
        (mpidr & 0xff) as usize % MAX_CPUS
    }
    #[cfg(all(not(test), not(any(target_arch = "x86_64", target_arch = "aarch64"))))]
    {
        0
    }
}

#[cfg(all(not(test), target_arch = "x86_64"))]
fn apic_id_x86_64() -> usize {
    raw_cpuid::CpuId::new()
        .get_feature_info()
        .map(|f| f.initial_local_apic_id() as usize)
        .unwrap_or(0)
}

/// Pin the calling thread/core to the given logical CPU id. A no-op stub
/// outside a multi-core boot environment; the scheduler treats failure to
/// pin as non-fatal (`parallel_pin_cores` only affects placement, not
/// correctness).
pub fn pin_to_cpu(_cpu_id: usize) {}

/// Cooperative yield used by workers spinning on `work_available`.
pub fn cpu_relax() {
    #[cfg(all(not(test), target_arch = "x86_64"))]
    unsafe {
        core::arch::asm!("pause", options(nostack, preserves_flags));
    }
    #[cfg(all(not(test), target_arch = "aarch64"))]
    unsafe {
        core::arch::asm!("yield", options(nostack, preserves_flags));
    }
    #[cfg(test)]
    {
        std::hint::spin_loop();
    }
}

#[inline(always)]
pub fn fence_acquire() {
    core::sync::atomic::fence(Ordering::Acquire);
}

#[inline(always)]
pub fn fence_release() {
    core::sync::atomic::fence(Ordering::Release);
}

#[inline(always)]
pub fn fence_full() {
    core::sync::atomic::fence(Ordering::SeqCst);
}

pub fn disable_interrupts() {
    #[cfg(all(not(test), target_arch = "x86_64"))]
    unsafe {
        core::arch::asm!("cli", options(nostack, preserves_flags));
    }
    #[cfg(all(not(test), target_arch = "aarch64"))]
    unsafe {
        core::arch::asm!("msr daifset, #0xf");
    }
}

pub fn enable_interrupts() {
    #[cfg(all(not(test), target_arch = "x86_64"))]
    unsafe {
        core::arch::asm!("sti", options(nostack, preserves_flags));
    }
    #[cfg(all(not(test), target_arch = "aarch64"))]
    unsafe {
        core::arch::asm!("msr daifclr, #0xf");
    }
}

pub fn wait_for_event() {
    #[cfg(all(not(test), target_arch = "x86_64"))]
    unsafe {
        core::arch::asm!("hlt", options(nostack, preserves_flags));
    }
    #[cfg(all(not(test), target_arch = "aarch64"))]
    unsafe {
        core::arch::asm!("wfe", options(nostack, preserves_flags));
    }
    #[cfg(test)]
    {
        std::thread::yield_now();
    }
}

static NEXT_CPU_HINT: AtomicUsize = AtomicUsize::new(0);

/// Round-robin hint for assigning worker threads to cores at pool init.
pub fn next_cpu_hint(n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    NEXT_CPU_HINT.fetch_add(1, Ordering::Relaxed) % n
}
