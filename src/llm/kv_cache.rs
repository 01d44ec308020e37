//! Layered KV cache (§4.D).
//!
//! Stores key/value row-vectors of length `n_kv_heads * head_dim` per
//! (layer, position). Writes are confined to `position == seq_len` within a
//! single forward pass, so earlier positions can be read concurrently with
//! the in-flight write. A sliding-window eviction policy keeps only the
//! most recent `window_size` positions once `max_seq_len` is reached;
//! `start_pos` tracks the oldest retained position per layer.

use alloc::vec;
use alloc::vec::Vec;
use serde::Serialize;

use super::errors::LlmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EvictionPolicy {
    /// Reject further stores once `max_seq_len` is reached.
    None,
    /// Retain the most recent `window_size` positions, rebasing `start_pos`.
    SlidingWindow { window_size: usize },
    /// Overwrite `position % max_seq_len`, never erroring.
    Ring,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LayerStats {
    pub hits: u64,
    pub stores: u64,
    pub evictions: u64,
    pub recomputations: u64,
}

struct Layer {
    keys: Vec<Vec<f32>>,
    values: Vec<Vec<f32>>,
    /// Row index (within `keys`/`values`) of logical position `start_pos`.
    start_pos: usize,
    seq_len: usize,
    stats: LayerStats,
}

impl Layer {
    fn new(capacity: usize, row_len: usize) -> Self {
        Self {
            keys: vec![vec![0.0f32; row_len]; capacity],
            values: vec![vec![0.0f32; row_len]; capacity],
            start_pos: 0,
            seq_len: 0,
        }
    }
}

pub struct KvCache {
    layers: Vec<Layer>,
    max_seq_len: usize,
    row_len: usize,
    policy: EvictionPolicy,
    enabled: bool,
    reset_count: u64,
}

impl KvCache {
    pub fn new(
        n_layer: usize,
        max_seq_len: usize,
        row_len: usize,
        policy: EvictionPolicy,
    ) -> Result<Self, LlmError> {
        if n_layer == 0 || max_seq_len == 0 || row_len == 0 {
            return Err(LlmError::InvalidConfig(alloc::format!(
                "kv cache dims must be nonzero: n_layer={} max_seq_len={} row_len={}",
                n_layer, max_seq_len, row_len
            )));
        }
        let layers = (0..n_layer).map(|_| Layer::new(max_seq_len, row_len)).collect();
        Ok(Self {
            layers,
            max_seq_len,
            row_len,
            policy,
            enabled: true,
            reset_count: 0,
        })
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn check_layer(&self, layer: usize) -> Result<(), LlmError> {
        if layer >= self.layers.len() {
            return Err(LlmError::OutOfBounds {
                index: layer,
                len: self.layers.len(),
            });
        }
        Ok(())
    }

    /// Store a (key, value) row pair at `position` for `layer`. Writing an
    /// already-stored position (a recompute) overwrites in place and
    /// increments `recomputations` instead of `stores`.
    pub fn store(
        &mut self,
        layer: usize,
        position: usize,
        key: &[f32],
        value: &[f32],
    ) -> Result<(), LlmError> {
        self.check_layer(layer)?;
        if key.len() != self.row_len || value.len() != self.row_len {
            return Err(LlmError::OutOfBounds {
                index: key.len().max(value.len()),
                len: self.row_len,
            });
        }

        let max_seq_len = self.max_seq_len;
        let l = &mut self.layers[layer];

        if position < l.start_pos {
            return Err(LlmError::OutOfBounds {
                index: position,
                len: max_seq_len,
            });
        }

        let is_recompute = position < l.start_pos + l.seq_len;

        match self.policy {
            EvictionPolicy::None => {
                if position >= l.start_pos + max_seq_len {
                    return Err(LlmError::ContextLengthExceeded {
                        position,
                        max: max_seq_len,
                    });
                }
            }
            EvictionPolicy::SlidingWindow { window_size } => {
                // Evict whenever the retained span would exceed `window_size`,
                // not `max_seq_len` — the window bounds logical retention,
                // `max_seq_len` only bounds the physical ring's capacity.
                let window = window_size.min(max_seq_len);
                if position + 1 > l.start_pos + window {
                    let new_start = position + 1 - window;
                    let evicted = new_start.saturating_sub(l.start_pos);
                    l.start_pos = new_start;
                    l.seq_len = l.seq_len.saturating_sub(evicted).min(window);
                    l.stats.evictions += evicted as u64;
                }
            }
            EvictionPolicy::Ring => {
                if position >= l.start_pos + max_seq_len {
                    l.start_pos = position.saturating_sub(max_seq_len - 1);
                }
            }
        }

        // Physical slot is `position % max_seq_len`, independent of how far
        // `start_pos` has drifted: store and fetch must agree on the same
        // absolute-position-to-slot mapping, and `start_pos` advances by a
        // variable amount per eviction (not a multiple of `max_seq_len`),
        // so indexing off the *current* `start_pos` here would desync from
        // rows written under an earlier `start_pos`.
        let row = position % max_seq_len;
        l.keys[row].copy_from_slice(key);
        l.values[row].copy_from_slice(value);

        if is_recompute {
            l.stats.recomputations += 1;
        } else {
            l.seq_len = (position - l.start_pos + 1).min(max_seq_len);
            l.stats.stores += 1;
        }

        Ok(())
    }

    /// Fetch key/value rows for every stored position in `[start_pos, p]`
    /// at `layer`. Returns `None` when caching is disabled, signalling the
    /// caller must recompute attention from scratch.
    pub fn fetch(&mut self, layer: usize, up_to: usize) -> Result<Option<(Vec<&[f32]>, Vec<&[f32]>)>, LlmError> {
        self.check_layer(layer)?;
        if !self.enabled {
            return Ok(None);
        }
        let l = &mut self.layers[layer];
        let end_logical = up_to.min(l.start_pos + l.seq_len);
        if end_logical < l.start_pos {
            return Ok(Some((Vec::new(), Vec::new())));
        }
        let count = end_logical - l.start_pos;
        l.stats.hits += 1;

        // Same absolute-position-to-slot mapping as `store`: slot for
        // logical position `start_pos + i` is `(start_pos + i) % max_seq_len`.
        let keys = (0..count)
            .map(|i| l.keys[(l.start_pos + i) % self.max_seq_len].as_slice())
            .collect();
        let values = (0..count)
            .map(|i| l.values[(l.start_pos + i) % self.max_seq_len].as_slice())
            .collect();
        Ok(Some((keys, values)))
    }

    pub fn start_pos(&self, layer: usize) -> Result<usize, LlmError> {
        self.check_layer(layer)?;
        Ok(self.layers[layer].start_pos)
    }

    pub fn seq_len(&self, layer: usize) -> Result<usize, LlmError> {
        self.check_layer(layer)?;
        Ok(self.layers[layer].seq_len)
    }

    /// Whether `position` is currently retained at `layer`, i.e.
    /// `start_pos <= position < start_pos + seq_len` (§3 KV cache invariant).
    pub fn contains_position(&self, layer: usize, position: usize) -> Result<bool, LlmError> {
        self.check_layer(layer)?;
        let l = &self.layers[layer];
        Ok(position >= l.start_pos && position < l.start_pos + l.seq_len)
    }

    pub fn layer_stats(&self, layer: usize) -> Result<LayerStats, LlmError> {
        self.check_layer(layer)?;
        Ok(self.layers[layer].stats)
    }

    /// Reset every layer's position tracking, preserving allocations.
    pub fn reset(&mut self) {
        for l in &mut self.layers {
            l.start_pos = 0;
            l.seq_len = 0;
        }
        self.reset_count += 1;
    }

    pub fn reset_count(&self) -> u64 {
        self.reset_count
    }

    pub fn memory_bytes(&self) -> usize {
        self.layers.len() * 2 * self.max_seq_len * self.row_len * core::mem::size_of::<f32>()
    }

    pub fn aggregate_stats(&self) -> LayerStats {
        let mut total = LayerStats::default();
        for l in &self.layers {
            total.hits += l.stats.hits;
            total.stores += l.stats.stores;
            total.evictions += l.stats.evictions;
            total.recomputations += l.stats.recomputations;
        }
        total
    }

    pub fn peak_seq_len(&self) -> usize {
        self.layers.iter().map(|l| l.seq_len).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_fetch_round_trips_rows() {
        let mut cache = KvCache::new(1, 8, 4, EvictionPolicy::None).unwrap();
        cache.store(0, 0, &[1.0, 2.0, 3.0, 4.0], &[5.0, 6.0, 7.0, 8.0]).unwrap();
        let (keys, values) = cache.fetch(0, 1).unwrap().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0], &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(values[0], &[5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn none_policy_errors_past_capacity() {
        let mut cache = KvCache::new(1, 2, 4, EvictionPolicy::None).unwrap();
        cache.store(0, 0, &[0.0; 4], &[0.0; 4]).unwrap();
        cache.store(0, 1, &[0.0; 4], &[0.0; 4]).unwrap();
        let err = cache.store(0, 2, &[0.0; 4], &[0.0; 4]).unwrap_err();
        assert!(matches!(err, LlmError::ContextLengthExceeded { .. }));
    }

    #[test]
    fn sliding_window_evicts_and_rebases_start_pos() {
        let mut cache =
            KvCache::new(1, 4, 2, EvictionPolicy::SlidingWindow { window_size: 4 }).unwrap();
        for p in 0..6 {
            cache.store(0, p, &[p as f32, 0.0], &[p as f32, 0.0]).unwrap();
        }
        assert_eq!(cache.start_pos(0).unwrap(), 2);
        assert_eq!(cache.seq_len(0).unwrap(), 4);
        let stats = cache.layer_stats(0).unwrap();
        assert_eq!(stats.evictions, 2);
        let (keys, _) = cache.fetch(0, 6).unwrap().unwrap();
        assert_eq!(keys.len(), 4);
        assert_eq!(keys[0], &[2.0, 0.0]);
    }

    /// §8 end-to-end scenario 4: `max_seq=8, window=4`. After 12 stores the
    /// window (not the larger physical capacity) bounds retention: exactly
    /// the 4 most recent positions stay reachable and `start_pos` rebases
    /// to `max_seq_len - window` past it.
    #[test]
    fn sliding_window_narrower_than_capacity_matches_scenario_four() {
        let mut cache =
            KvCache::new(1, 8, 2, EvictionPolicy::SlidingWindow { window_size: 4 }).unwrap();
        for p in 0..12 {
            cache.store(0, p, &[p as f32, 0.0], &[p as f32, 0.0]).unwrap();
        }
        assert_eq!(cache.start_pos(0).unwrap(), 8);
        assert_eq!(cache.seq_len(0).unwrap(), 4);

        // The most recently stored position is still reachable...
        assert!(cache.contains_position(0, 11).unwrap());
        // ...while a position well before the window (here, 3) is not.
        assert!(!cache.contains_position(0, 3).unwrap());

        let (keys, _) = cache.fetch(0, 12).unwrap().unwrap();
        assert_eq!(keys.len(), 4);
        assert_eq!(keys[0], &[8.0, 0.0]);
        assert_eq!(keys[3], &[11.0, 0.0]);
    }

    #[test]
    fn recompute_of_existing_position_increments_recomputations() {
        let mut cache = KvCache::new(1, 4, 2, EvictionPolicy::None).unwrap();
        cache.store(0, 0, &[1.0, 1.0], &[1.0, 1.0]).unwrap();
        cache.store(0, 0, &[2.0, 2.0], &[2.0, 2.0]).unwrap();
        let stats = cache.layer_stats(0).unwrap();
        assert_eq!(stats.stores, 1);
        assert_eq!(stats.recomputations, 1);
    }

    #[test]
    fn ring_policy_overwrites_modulo_capacity_without_erroring() {
        let mut cache = KvCache::new(1, 4, 2, EvictionPolicy::Ring).unwrap();
        for p in 0..6 {
            cache.store(0, p, &[p as f32, 0.0], &[p as f32, 0.0]).unwrap();
        }
        assert_eq!(cache.seq_len(0).unwrap(), 4);
        assert_eq!(cache.start_pos(0).unwrap(), 2);
        let (keys, _) = cache.fetch(0, 6).unwrap().unwrap();
        assert_eq!(keys.len(), 4);
        assert_eq!(keys[3], &[5.0, 0.0]);
    }

    #[test]
    fn disabled_cache_fetch_returns_none() {
        let mut cache = KvCache::new(1, 4, 2, EvictionPolicy::None).unwrap();
        cache.set_enabled(false);
        cache.store(0, 0, &[1.0, 1.0], &[1.0, 1.0]).unwrap();
        assert!(cache.fetch(0, 1).unwrap().is_none());
    }

    #[test]
    fn reset_clears_positions_but_keeps_allocation_and_bumps_counter() {
        let mut cache = KvCache::new(1, 4, 2, EvictionPolicy::None).unwrap();
        cache.store(0, 0, &[1.0, 1.0], &[1.0, 1.0]).unwrap();
        cache.reset();
        assert_eq!(cache.seq_len(0).unwrap(), 0);
        assert_eq!(cache.start_pos(0).unwrap(), 0);
        assert_eq!(cache.reset_count(), 1);
    }

    #[test]
    fn out_of_range_layer_is_an_error() {
        let cache = KvCache::new(1, 4, 2, EvictionPolicy::None).unwrap();
        assert!(cache.start_pos(5).is_err());
    }

    #[test]
    fn memory_bytes_matches_formula() {
        let cache = KvCache::new(6, 256, 384, EvictionPolicy::None).unwrap();
        let expected = 6 * 2 * 256 * 384 * 4;
        assert_eq!(cache.memory_bytes(), expected);
    }
}
