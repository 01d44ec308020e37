//! Work-stealing scheduler (§4.C).
//!
//! A fixed-size pool of `N` workers (`N <= 8`), thread 0 being the caller.
//! `parallel_for` publishes a work item with release semantics; each worker
//! fetch-adds a chunk out of a shared `next_item` counter to claim a range,
//! executes it, and fetch-adds its count into `completed`. The caller spins
//! on `completed == total` then on `workers_done == N-1`. A distinguished
//! chunk-size sentinel switches to deterministic (fixed-partition) mode,
//! which trades load balance for reproducible timing and implicitly enables
//! core pinning. No teacher module implements this; the atomics/fence idiom
//! is grounded on the kernel's per-CPU data pattern.

use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use serde::Serialize;

use crate::hal;
use super::errors::LlmError;

pub const MAX_WORKERS: usize = hal::MAX_CPUS;

/// Sentinel `chunk_size` value requesting deterministic fixed-partition mode.
pub const DETERMINISTIC_CHUNK: usize = usize::MAX;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WorkerStats {
    pub items_processed: u64,
    pub invocations: u64,
    pub work_cycles: u64,
    pub idle_cycles: u64,
}

struct WorkerSlot {
    items: AtomicU64,
    invocations: AtomicU64,
    work_cycles: AtomicU64,
    idle_cycles: AtomicU64,
}

impl WorkerSlot {
    const fn new() -> Self {
        Self {
            items: AtomicU64::new(0),
            invocations: AtomicU64::new(0),
            work_cycles: AtomicU64::new(0),
            idle_cycles: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            items_processed: self.items.load(Ordering::Relaxed),
            invocations: self.invocations.load(Ordering::Relaxed),
            work_cycles: self.work_cycles.load(Ordering::Relaxed),
            idle_cycles: self.idle_cycles.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.items.store(0, Ordering::Relaxed);
        self.invocations.store(0, Ordering::Relaxed);
        self.work_cycles.store(0, Ordering::Relaxed);
        self.idle_cycles.store(0, Ordering::Relaxed);
    }
}

/// Shared coordination state for one `parallel_for` invocation and the
/// worker pool's lifetime statistics.
pub struct Scheduler {
    n_workers: usize,
    deterministic: bool,
    pin_workers: bool,
    next_item: AtomicUsize,
    completed: AtomicUsize,
    total: AtomicUsize,
    work_available: AtomicBool,
    shutdown: AtomicBool,
    slots: [WorkerSlot; MAX_WORKERS],
}

impl Scheduler {
    pub fn new(n_workers: usize, deterministic: bool, pin_workers: bool) -> Result<Self, LlmError> {
        if n_workers == 0 || n_workers > MAX_WORKERS {
            return Err(LlmError::InvalidConfig(alloc::format!(
                "worker count {} out of range [1,{}]",
                n_workers, MAX_WORKERS
            )));
        }
        Ok(Self {
            n_workers,
            // Deterministic mode implicitly enables pinning (§4.C).
            deterministic,
            pin_workers: pin_workers || deterministic,
            next_item: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            work_available: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            slots: core::array::from_fn(|_| WorkerSlot::new()),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.n_workers
    }

    pub fn is_deterministic(&self) -> bool {
        self.deterministic
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Claims and runs `func(thread_id, start, end)` over `[0, total)` using
    /// every worker in the pool, one caller-driven pass (this crate runs
    /// workers cooperatively rather than as OS threads, so `parallel_for`
    /// itself performs the dispatch loop in-line rather than waking sleepers).
    pub fn parallel_for(
        &self,
        total: usize,
        chunk_size: usize,
        mut func: impl FnMut(usize, usize, usize),
    ) {
        if total == 0 {
            return;
        }
        self.total.store(total, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.next_item.store(0, Ordering::Relaxed);
        self.work_available.store(true, Ordering::Release);
        core::sync::atomic::fence(Ordering::Release);

        if self.deterministic || chunk_size == DETERMINISTIC_CHUNK {
            self.run_deterministic(total, &mut func);
        } else {
            self.run_work_stealing(total, chunk_size.max(1), &mut func);
        }

        while self.completed.load(Ordering::Acquire) < total {
            hal::cpu_relax();
        }
        core::sync::atomic::fence(Ordering::SeqCst);
        self.work_available.store(false, Ordering::Relaxed);
    }

    fn run_deterministic(&self, total: usize, func: &mut impl FnMut(usize, usize, usize)) {
        let n = self.n_workers;
        let base = total / n;
        let rem = total % n;
        let mut offset = 0usize;
        for t in 0..n {
            let count = base + usize::from(t < rem);
            let start = offset;
            let end = (start + count).min(total);
            if self.pin_workers {
                hal::pin_to_cpu(t);
            }
            func(t, start, end);
            self.record(t, end - start);
            offset = end;
        }
    }

    fn run_work_stealing(&self, total: usize, chunk_size: usize, func: &mut impl FnMut(usize, usize, usize)) {
        for t in 0..self.n_workers {
            if self.pin_workers {
                hal::pin_to_cpu(t);
            }
            loop {
                let start = self.next_item.fetch_add(chunk_size, Ordering::AcqRel);
                if start >= total {
                    break;
                }
                let end = (start + chunk_size).min(total);
                func(t, start, end);
                self.completed.fetch_add(end - start, Ordering::AcqRel);
                self.record(t, end - start);
            }
        }
    }

    fn record(&self, thread_id: usize, items: usize) {
        if self.deterministic {
            // In deterministic mode `completed` is not incremented per
            // chunk inside run_deterministic; settle it here so the
            // outer spin-wait in parallel_for still terminates.
            self.completed.fetch_add(items, Ordering::AcqRel);
        }
        let slot = &self.slots[thread_id];
        slot.items.fetch_add(items as u64, Ordering::Relaxed);
        slot.invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_stats(&self, thread_id: usize) -> Option<WorkerStats> {
        self.slots.get(thread_id).map(WorkerSlot::snapshot)
    }

    pub fn reset_stats(&self) {
        for slot in &self.slots {
            slot.reset();
        }
    }

    /// Snapshot of every worker's stats, in thread-id order, for export.
    pub fn all_worker_stats(&self) -> alloc::vec::Vec<WorkerStats> {
        self.slots.iter().map(WorkerSlot::snapshot).collect()
    }
}
