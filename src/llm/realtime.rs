//! Deterministic real-time forward-pass wrapper (§5).
//!
//! Normal operation runs a forward pass with interrupts enabled and the
//! scheduler free to work-steal. Deterministic mode additionally disables
//! interrupts for the duration of one forward pass (the caller is expected
//! to have already switched its `Scheduler` to fixed-partition mode via
//! `scheduler::DETERMINISTIC_CHUNK`) and measures wall-clock latency
//! against `ResourceLimits::forward_latency_budget_us`. The latency
//! tracker's bucketed-histogram shape is grounded on the kernel's own
//! stress-test latency histogram.

use alloc::vec::Vec;
use bitflags::bitflags;
use core::sync::atomic::{AtomicU64, Ordering};
use heapless::Vec as HVec;
use spin::Mutex;

use super::errors::LlmError;
use super::fixed::Fx;
use super::generate::GenerationDriver;

bitflags! {
    /// Real-time execution mode flags for [`forward_deterministic`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RealtimeFlags: u32 {
        /// Disable interrupts for the duration of the forward pass.
        const DISABLE_INTERRUPTS = 0b0000_0001;
        /// Caller has already put the scheduler into fixed-partition mode.
        const FIXED_PARTITION = 0b0000_0010;
    }
}

impl RealtimeFlags {
    /// The combination described by §5: pinned, fixed-partitioned,
    /// interrupt-free forward passes.
    pub fn deterministic() -> Self {
        Self::DISABLE_INTERRUPTS | Self::FIXED_PARTITION
    }
}

const MAX_RECENT_SAMPLES: usize = 64;
const NUM_BUCKETS: usize = 8;
// Bucket boundaries in microseconds: <10us, 10-100us, 100us-1ms, 1-10ms,
// 10-100ms, 100ms-1s, 1-10s, 10s+.
const BUCKET_UPPER_BOUNDS_US: [u64; NUM_BUCKETS - 1] =
    [10, 100, 1_000, 10_000, 100_000, 1_000_000, 10_000_000];

fn bucket_index(latency_us: u64) -> usize {
    BUCKET_UPPER_BOUNDS_US
        .iter()
        .position(|&bound| latency_us < bound)
        .unwrap_or(NUM_BUCKETS - 1)
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct RealtimeReport {
    pub count: u64,
    pub deadline_misses: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub avg_us: u64,
}

/// Per-engine latency tracker: a bucketed histogram plus a bounded ring of
/// the most recent raw samples, used to bound memory regardless of how
/// long the engine has been running.
pub struct LatencyTracker {
    buckets: [AtomicU64; NUM_BUCKETS],
    count: AtomicU64,
    sum_us: AtomicU64,
    min_us: AtomicU64,
    max_us: AtomicU64,
    deadline_misses: AtomicU64,
    recent_us: Mutex<HVec<u64, MAX_RECENT_SAMPLES>>,
}

impl LatencyTracker {
    pub const fn new() -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        Self {
            buckets: [ZERO; NUM_BUCKETS],
            count: AtomicU64::new(0),
            sum_us: AtomicU64::new(0),
            min_us: AtomicU64::new(u64::MAX),
            max_us: AtomicU64::new(0),
            deadline_misses: AtomicU64::new(0),
            recent_us: Mutex::new(HVec::new()),
        }
    }

    /// Record one forward pass of `latency_us`, checked against
    /// `budget_us` (typically `ResourceLimits::forward_latency_budget_us`).
    pub fn record(&self, latency_us: u64, budget_us: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);

        let mut min = self.min_us.load(Ordering::Relaxed);
        while latency_us < min {
            match self.min_us.compare_exchange_weak(
                min,
                latency_us,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => min = x,
            }
        }
        let mut max = self.max_us.load(Ordering::Relaxed);
        while latency_us > max {
            match self.max_us.compare_exchange_weak(
                max,
                latency_us,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => max = x,
            }
        }

        if latency_us > budget_us {
            self.deadline_misses.fetch_add(1, Ordering::Relaxed);
        }

        let mut recent = self.recent_us.lock();
        if recent.len() == MAX_RECENT_SAMPLES {
            let _ = recent.remove(0);
        }
        let _ = recent.push(latency_us);
    }

    pub fn report(&self) -> RealtimeReport {
        let count = self.count.load(Ordering::Relaxed);
        let avg_us = if count > 0 {
            self.sum_us.load(Ordering::Relaxed) / count
        } else {
            0
        };
        RealtimeReport {
            count,
            deadline_misses: self.deadline_misses.load(Ordering::Relaxed),
            min_us: if count > 0 { self.min_us.load(Ordering::Relaxed) } else { 0 },
            max_us: self.max_us.load(Ordering::Relaxed),
            avg_us,
        }
    }

    pub fn recent_samples(&self) -> Vec<u64> {
        self.recent_us.lock().iter().copied().collect()
    }

    pub fn reset(&self) {
        for b in &self.buckets {
            b.store(0, Ordering::Relaxed);
        }
        self.count.store(0, Ordering::Relaxed);
        self.sum_us.store(0, Ordering::Relaxed);
        self.min_us.store(u64::MAX, Ordering::Relaxed);
        self.max_us.store(0, Ordering::Relaxed);
        self.deadline_misses.store(0, Ordering::Relaxed);
        self.recent_us.lock().clear();
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one forward pass under the flags requested, measuring wall-clock
/// latency and recording it against `driver`'s configured budget. When
/// `DISABLE_INTERRUPTS` is set, interrupts are re-enabled before returning
/// regardless of whether `forward` succeeded.
pub fn forward_deterministic(
    driver: &mut GenerationDriver<'_>,
    tracker: &LatencyTracker,
    flags: RealtimeFlags,
    token_id: u32,
    logits_out: &mut [Fx],
) -> Result<(), LlmError> {
    let budget_us = driver.limits().forward_latency_budget_us;

    if flags.contains(RealtimeFlags::DISABLE_INTERRUPTS) {
        crate::hal::disable_interrupts();
    }
    let start = crate::time::get_timestamp_us();
    let result = driver.forward(token_id, logits_out);
    let end = crate::time::get_timestamp_us();
    if flags.contains(RealtimeFlags::DISABLE_INTERRUPTS) {
        crate::hal::enable_interrupts();
    }

    tracker.record(end.saturating_sub(start), budget_us);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn record_under_budget_is_not_a_deadline_miss() {
        let tracker = LatencyTracker::new();
        tracker.record(100, 500);
        let report = tracker.report();
        assert_eq!(report.count, 1);
        assert_eq!(report.deadline_misses, 0);
    }

    #[test]
    fn record_over_budget_counts_as_a_deadline_miss() {
        let tracker = LatencyTracker::new();
        tracker.record(600, 500);
        let report = tracker.report();
        assert_eq!(report.deadline_misses, 1);
    }

    #[test]
    fn recent_samples_ring_never_exceeds_capacity() {
        let tracker = LatencyTracker::new();
        for i in 0..(MAX_RECENT_SAMPLES * 2) {
            tracker.record(i as u64, u64::MAX);
        }
        assert_eq!(tracker.recent_samples().len(), MAX_RECENT_SAMPLES);
        assert_eq!(tracker.report().count, (MAX_RECENT_SAMPLES * 2) as u64);
    }

    #[test]
    fn deterministic_flags_combine_both_bits() {
        let flags = RealtimeFlags::deterministic();
        assert!(flags.contains(RealtimeFlags::DISABLE_INTERRUPTS));
        assert!(flags.contains(RealtimeFlags::FIXED_PARTITION));
    }

    fn identity(rows: usize, cols: usize) -> vec::Vec<Fx> {
        let mut m = vec![0 as Fx; rows * cols];
        for i in 0..rows.min(cols) {
            m[i * cols + i] = super::super::fixed::ONE;
        }
        m
    }

    #[test]
    fn forward_deterministic_records_one_sample_and_toggles_interrupts() {
        use super::super::generate::{GenerationDriver, ModelWeights};
        use super::super::kv_cache::EvictionPolicy;
        use super::super::limits::ResourceLimits;
        use super::super::transformer::{LayerWeights, TransformerConfig};

        let config = TransformerConfig {
            n_vocab: 4,
            n_embd: 4,
            n_head: 2,
            n_kv_head: 1,
            n_layer: 1,
            max_seq_len: 8,
            ffn_hidden: 8,
        };
        let n_embd = config.n_embd;
        let kv_dim = config.n_kv_head * config.head_dim();

        let token_embeddings = vec![0 as Fx; config.n_vocab * n_embd];
        let attn_norm = vec![super::super::fixed::ONE; n_embd];
        let ffn_norm = vec![super::super::fixed::ONE; n_embd];
        let q_weight = identity(n_embd, n_embd);
        let k_weight = identity(kv_dim, n_embd);
        let v_weight = identity(kv_dim, n_embd);
        let o_weight = identity(n_embd, n_embd);
        let gate_weight = vec![0 as Fx; config.ffn_hidden * n_embd];
        let up_weight = vec![0 as Fx; config.ffn_hidden * n_embd];
        let down_weight = vec![0 as Fx; n_embd * config.ffn_hidden];
        let output_norm = vec![super::super::fixed::ONE; n_embd];
        let lm_head = vec![0 as Fx; config.n_vocab * n_embd];

        let layer = LayerWeights {
            attn_norm: &attn_norm,
            q_weight: &q_weight,
            k_weight: &k_weight,
            v_weight: &v_weight,
            o_weight: &o_weight,
            ffn_norm: &ffn_norm,
            gate_weight: &gate_weight,
            up_weight: &up_weight,
            down_weight: &down_weight,
        };
        let weights = ModelWeights {
            token_embeddings: &token_embeddings,
            layers: vec![layer],
            output_norm: &output_norm,
            lm_head: &lm_head,
        };

        let mut driver =
            GenerationDriver::new(config, ResourceLimits::default(), weights, EvictionPolicy::None)
                .unwrap();
        let mut logits = vec![0 as Fx; config.n_vocab];
        let tracker = LatencyTracker::new();

        forward_deterministic(
            &mut driver,
            &tracker,
            RealtimeFlags::deterministic(),
            0,
            &mut logits,
        )
        .unwrap();

        assert_eq!(tracker.report().count, 1);
        assert_eq!(driver.get_position(), 1);
    }
}
