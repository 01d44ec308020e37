//! Generation driver (§4.F): owns the inference state (hidden buffer, KV
//! cache, position counter) and drives one layer stack per forward call.
//! Per the design note, this is a single owned value passed by reference;
//! there is no global singleton here.

use alloc::vec;
use alloc::vec::Vec;

use super::errors::LlmError;
use super::fixed::{self, Fx, RopeTable};
use super::kv_cache::{EvictionPolicy, KvCache};
use super::limits::ResourceLimits;
use super::sampling::{self, SamplingConfig};
use super::transformer::{self, LayerWeights, TransformerConfig};

/// Owned weight bundle for the whole model, as non-owning views into the
/// arena-backed dequantized tensors (one per layer plus the shared tables).
pub struct ModelWeights<'a> {
    pub token_embeddings: &'a [Fx], // [n_vocab * n_embd]
    pub layers: Vec<LayerWeights<'a>>,
    pub output_norm: &'a [Fx],
    pub lm_head: &'a [Fx], // [n_vocab * n_embd]
}

pub struct GenerationDriver<'a> {
    config: TransformerConfig,
    limits: ResourceLimits,
    weights: ModelWeights<'a>,
    cache: KvCache,
    rope: RopeTable,
    hidden: Vec<Fx>,
    current_pos: usize,
}

impl<'a> GenerationDriver<'a> {
    pub fn new(
        config: TransformerConfig,
        limits: ResourceLimits,
        weights: ModelWeights<'a>,
        eviction: EvictionPolicy,
    ) -> Result<Self, LlmError> {
        let config = config.validate()?;
        if weights.layers.len() != config.n_layer {
            return Err(LlmError::InvalidConfig(alloc::format!(
                "weight bundle has {} layers, config expects {}",
                weights.layers.len(),
                config.n_layer
            )));
        }
        let head_dim = config.head_dim();
        let kv_dim = config.n_kv_head * head_dim;
        let cache = KvCache::new(config.n_layer, config.max_seq_len, kv_dim, eviction)?;
        let rope = RopeTable::new(head_dim);

        Ok(Self {
            config,
            limits,
            weights,
            cache,
            rope,
            hidden: vec![0 as Fx; config.n_embd],
            current_pos: 0,
        })
    }

    pub fn get_position(&self) -> usize {
        self.current_pos
    }

    pub fn config(&self) -> TransformerConfig {
        self.config
    }

    pub fn limits(&self) -> ResourceLimits {
        self.limits
    }

    pub fn kv_cache(&self) -> &KvCache {
        &self.cache
    }

    /// Resets `current_pos` and every KV layer's position tracking,
    /// preserving allocations (§4.F).
    pub fn reset(&mut self) {
        self.current_pos = 0;
        self.cache.reset();
        self.hidden.iter_mut().for_each(|h| *h = 0);
    }

    /// No-op place-holder for symmetry with the arena/scheduler lifecycle;
    /// this engine owns no resources beyond its fields, which `Drop`
    /// reclaims normally.
    pub fn cleanup(&mut self) {
        self.reset();
    }

    /// One forward step: embed `token_id`, run every layer, project to
    /// `logits_out` (length `n_vocab`), advance `current_pos` (§4.F).
    pub fn forward(&mut self, token_id: u32, logits_out: &mut [Fx]) -> Result<(), LlmError> {
        if self.current_pos >= self.config.max_seq_len {
            return Err(LlmError::ContextLengthExceeded {
                position: self.current_pos,
                max: self.config.max_seq_len,
            });
        }
        if self.current_pos >= self.limits.max_generation_tokens + self.limits.max_prompt_tokens {
            return Err(LlmError::ContextLengthExceeded {
                position: self.current_pos,
                max: self.limits.max_generation_tokens + self.limits.max_prompt_tokens,
            });
        }
        let n_vocab = self.config.n_vocab;
        let n_embd = self.config.n_embd;
        if token_id as usize >= n_vocab {
            return Err(LlmError::InvalidTokenId(token_id));
        }
        if logits_out.len() != n_vocab {
            return Err(LlmError::OutOfBounds {
                index: logits_out.len(),
                len: n_vocab,
            });
        }

        let embed_row = &self.weights.token_embeddings
            [token_id as usize * n_embd..(token_id as usize + 1) * n_embd];
        self.hidden.copy_from_slice(embed_row);

        for (layer_idx, layer) in self.weights.layers.iter().enumerate() {
            transformer::apply_layer(
                &mut self.hidden,
                layer,
                &mut self.cache,
                layer_idx,
                self.current_pos,
                self.config.n_head,
                self.config.n_kv_head,
                self.config.head_dim(),
                &self.rope,
            )?;
        }

        let mut normed = vec![0 as Fx; n_embd];
        transformer::rms_norm(&self.hidden, self.weights.output_norm, &mut normed);

        for v in 0..n_vocab {
            let row = &self.weights.lm_head[v * n_embd..(v + 1) * n_embd];
            let mut acc: i64 = 0;
            for i in 0..n_embd {
                acc += ((row[i] as i64) * (normed[i] as i64)) >> 16;
            }
            logits_out[v] = acc as Fx;
        }

        self.current_pos += 1;
        Ok(())
    }

    /// Greedy-decode `logits` (converted from Q16.16 to float for the
    /// sampler) with temperature scaling.
    pub fn sample(&self, logits: &[Fx], config: SamplingConfig) -> u32 {
        let floats: Vec<f32> = logits.iter().map(|&l| fixed::to_f32(l)).collect();
        sampling::sample(&floats, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> TransformerConfig {
        TransformerConfig {
            n_vocab: 4,
            n_embd: 4,
            n_head: 2,
            n_kv_head: 1,
            n_layer: 1,
            max_seq_len: 8,
            ffn_hidden: 8,
        }
    }

    fn identity(rows: usize, cols: usize) -> Vec<Fx> {
        let mut m = vec![0 as Fx; rows * cols];
        for i in 0..rows.min(cols) {
            m[i * cols + i] = fixed::ONE;
        }
        m
    }

    #[test]
    fn forward_rejects_position_at_max_seq_len() {
        let config = tiny_config();
        let n_embd = config.n_embd;
        let kv_dim = config.n_kv_head * config.head_dim();

        let token_embeddings = vec![0 as Fx; config.n_vocab * n_embd];
        let attn_norm = vec![fixed::ONE; n_embd];
        let ffn_norm = vec![fixed::ONE; n_embd];
        let q_weight = identity(n_embd, n_embd);
        let k_weight = identity(kv_dim, n_embd);
        let v_weight = identity(kv_dim, n_embd);
        let o_weight = identity(n_embd, n_embd);
        let gate_weight = vec![0 as Fx; config.ffn_hidden * n_embd];
        let up_weight = vec![0 as Fx; config.ffn_hidden * n_embd];
        let down_weight = vec![0 as Fx; n_embd * config.ffn_hidden];
        let output_norm = vec![fixed::ONE; n_embd];
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

        for _ in 0..config.max_seq_len {
            driver.forward(0, &mut logits).unwrap();
        }
        let err = driver.forward(0, &mut logits).unwrap_err();
        assert!(matches!(err, LlmError::ContextLengthExceeded { .. }));
    }

    #[test]
    fn reset_zeroes_position_and_preserves_allocation_capacity() {
        let config = tiny_config();
        let n_embd = config.n_embd;
        let kv_dim = config.n_kv_head * config.head_dim();
        let token_embeddings = vec![0 as Fx; config.n_vocab * n_embd];
        let attn_norm = vec![fixed::ONE; n_embd];
        let ffn_norm = vec![fixed::ONE; n_embd];
        let q_weight = identity(n_embd, n_embd);
        let k_weight = identity(kv_dim, n_embd);
        let v_weight = identity(kv_dim, n_embd);
        let o_weight = identity(n_embd, n_embd);
        let gate_weight = vec![0 as Fx; config.ffn_hidden * n_embd];
        let up_weight = vec![0 as Fx; config.ffn_hidden * n_embd];
        let down_weight = vec![0 as Fx; n_embd * config.ffn_hidden];
        let output_norm = vec![fixed::ONE; n_embd];
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
        driver.forward(0, &mut logits).unwrap();
        assert_eq!(driver.get_position(), 1);
        driver.reset();
        assert_eq!(driver.get_position(), 0);
    }
}
