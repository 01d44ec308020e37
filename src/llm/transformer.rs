//! Transformer layer engine (§4.E) and model configuration (§4.I).
//!
//! One layer application: RMSNorm -> QKV projection -> RoPE -> causal GQA/MQA
//! attention against the KV cache -> output projection -> residual ->
//! RMSNorm -> SwiGLU FFN -> residual. This is the Q16.16 fixed-point engine;
//! the parallel floating engine in [`super::float_engine`] runs the same
//! algorithm over `f32` so the two stay in lockstep rather than drifting
//! into separately-maintained implementations.

use alloc::vec;
use alloc::vec::Vec;

use super::errors::LlmError;
use super::fixed::{self, Fx, RopeTable};
use super::kv_cache::KvCache;

/// Model hyperparameters, validated once at construction (§4.I).
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct TransformerConfig {
    pub n_vocab: usize,
    pub n_embd: usize,
    pub n_head: usize,
    pub n_kv_head: usize,
    pub n_layer: usize,
    pub max_seq_len: usize,
    pub ffn_hidden: usize,
}

impl TransformerConfig {
    pub fn validate(self) -> Result<Self, LlmError> {
        if self.n_embd == 0 || self.n_head == 0 || self.n_kv_head == 0 || self.n_layer == 0 {
            return Err(LlmError::InvalidConfig(alloc::format!(
                "dimensions must be nonzero: n_embd={} n_head={} n_kv_head={} n_layer={}",
                self.n_embd, self.n_head, self.n_kv_head, self.n_layer
            )));
        }
        if self.n_embd % self.n_head != 0 {
            return Err(LlmError::InvalidConfig(alloc::format!(
                "n_embd {} not divisible by n_head {}",
                self.n_embd, self.n_head
            )));
        }
        if self.n_head % self.n_kv_head != 0 {
            return Err(LlmError::InvalidConfig(alloc::format!(
                "n_head {} not divisible by n_kv_head {} (GQA/MQA requires integer grouping)",
                self.n_head, self.n_kv_head
            )));
        }
        if self.max_seq_len == 0 {
            return Err(LlmError::InvalidConfig(alloc::string::String::from(
                "max_seq_len must be > 0",
            )));
        }
        Ok(self)
    }

    pub fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }
}

/// One layer's weights as non-owning views into the weight arena (§9 design
/// note: layer bundles hold borrows, the arena owns the bytes).
pub struct LayerWeights<'a> {
    pub attn_norm: &'a [Fx],
    pub q_weight: &'a [Fx],
    pub k_weight: &'a [Fx],
    pub v_weight: &'a [Fx],
    pub o_weight: &'a [Fx],
    pub ffn_norm: &'a [Fx],
    pub gate_weight: &'a [Fx],
    pub up_weight: &'a [Fx],
    pub down_weight: &'a [Fx],
}

const RMS_EPS: Fx = 13; // ~1e-5 * 2^16, rounded

/// `normalized[i] = hidden[i] / rms(hidden) * weight[i]`. `rms == 0` is
/// treated as `1` to avoid a divide-by-zero blow-up (§4.E step 2).
pub fn rms_norm(hidden: &[Fx], weight: &[Fx], out: &mut [Fx]) {
    let n = hidden.len() as i64;
    let mut sum_sq: i64 = 0;
    for &h in hidden {
        sum_sq += ((h as i64) * (h as i64)) >> 16;
    }
    let mean_sq = ((sum_sq << 16) / n) as Fx;
    let mut rms = fixed::sqrt(mean_sq + RMS_EPS);
    if rms == 0 {
        rms = fixed::ONE;
    }
    for i in 0..hidden.len() {
        let normed = fixed::div(hidden[i], rms);
        out[i] = fixed::mul(normed, weight[i]);
    }
}

/// `y = W . x` for a row-major weight matrix `W` of shape `[out_dim,
/// in_dim]` flattened into `weight`.
fn matmul(weight: &[Fx], x: &[Fx], in_dim: usize, out_dim: usize, out: &mut [Fx]) {
    for o in 0..out_dim {
        let row = &weight[o * in_dim..(o + 1) * in_dim];
        let mut acc: i64 = 0;
        for i in 0..in_dim {
            acc += ((row[i] as i64) * (x[i] as i64)) >> 16;
        }
        out[o] = acc as Fx;
    }
}

/// Rotates adjacent pairs `(v[2d], v[2d+1])` by the RoPE angle at `position`
/// for each head of width `head_dim` within `v` (§4.E step 4).
fn apply_rope(v: &mut [Fx], n_heads: usize, head_dim: usize, position: usize, table: &RopeTable) {
    let half = head_dim / 2;
    for h in 0..n_heads {
        let base = h * head_dim;
        for d in 0..half {
            let cos = table.cos_at(position, d);
            let sin = table.sin_at(position, d);
            let x0 = v[base + 2 * d];
            let x1 = v[base + 2 * d + 1];
            v[base + 2 * d] = fixed::mul(x0, cos) - fixed::mul(x1, sin);
            v[base + 2 * d + 1] = fixed::mul(x0, sin) + fixed::mul(x1, cos);
        }
    }
}

/// `SiLU(g) = g * sigma(g)`, `sigma` approximated as `1/2 + 1/2 * g/(1+|g|)`
/// to avoid an `exp` call on the hot FFN path (§4.E step 9).
fn swiglu(gate: Fx, up: Fx) -> Fx {
    let abs_g = gate.abs();
    let sigma = fixed::HALF + fixed::div(fixed::mul(fixed::HALF, gate), fixed::ONE + abs_g);
    fixed::mul(fixed::mul(gate, sigma), up)
}

/// Applies one full transformer block in place to `hidden`, per §4.E.
pub fn apply_layer(
    hidden: &mut [Fx],
    weights: &LayerWeights<'_>,
    cache: &mut KvCache,
    layer: usize,
    position: usize,
    n_head: usize,
    n_kv_head: usize,
    head_dim: usize,
    rope: &RopeTable,
) -> Result<(), LlmError> {
    let n_embd = hidden.len();
    let kv_dim = n_kv_head * head_dim;

    let residual1 = hidden.to_vec();
    let mut normed = vec![0 as Fx; n_embd];
    rms_norm(hidden, weights.attn_norm, &mut normed);

    let mut q = vec![0 as Fx; n_embd];
    let mut k = vec![0 as Fx; kv_dim];
    let mut v = vec![0 as Fx; kv_dim];
    matmul(weights.q_weight, &normed, n_embd, n_embd, &mut q);
    matmul(weights.k_weight, &normed, n_embd, kv_dim, &mut k);
    matmul(weights.v_weight, &normed, n_embd, kv_dim, &mut v);

    apply_rope(&mut q, n_head, head_dim, position, rope);
    apply_rope(&mut k, n_kv_head, head_dim, position, rope);

    cache.store(layer, position, &to_f32_vec(&k), &to_f32_vec(&v))?;

    let group = n_head / n_kv_head;
    let mut attn_out = vec![0 as Fx; n_embd];
    let scale = fixed::div(fixed::ONE, fixed::sqrt(fixed::from_int(head_dim as i32)));

    let rows = cache.fetch(layer, position + 1)?;
    if let Some((k_rows, v_rows)) = rows {
        for h in 0..n_head {
            let kv_head = h / group;
            let q_h = &q[h * head_dim..(h + 1) * head_dim];

            let mut scores = vec![0 as Fx; k_rows.len()];
            let mut max_score = Fx::MIN;
            for (t, k_row) in k_rows.iter().enumerate() {
                let mut dot: i64 = 0;
                for d in 0..head_dim {
                    let kf = fixed::from_f32(k_row[kv_head * head_dim + d]);
                    dot += ((q_h[d] as i64) * (kf as i64)) >> 16;
                }
                let s = fixed::mul(dot as Fx, scale);
                scores[t] = s;
                if s > max_score {
                    max_score = s;
                }
            }

            let mut sum_exp: Fx = 0;
            for s in scores.iter_mut() {
                *s = fixed::exp(*s - max_score);
                sum_exp += *s;
            }
            if sum_exp == 0 {
                sum_exp = fixed::ONE;
            }

            let out_h = &mut attn_out[h * head_dim..(h + 1) * head_dim];
            for (t, v_row) in v_rows.iter().enumerate() {
                let weight = fixed::div(scores[t], sum_exp);
                for d in 0..head_dim {
                    let vf = fixed::from_f32(v_row[kv_head * head_dim + d]);
                    out_h[d] += fixed::mul(weight, vf);
                }
            }
        }
    }

    let mut o_proj = vec![0 as Fx; n_embd];
    matmul(weights.o_weight, &attn_out, n_embd, n_embd, &mut o_proj);
    for i in 0..n_embd {
        hidden[i] = residual1[i] + o_proj[i];
    }

    let residual2 = hidden.to_vec();
    rms_norm(hidden, weights.ffn_norm, &mut normed);

    let ffn_hidden = weights.gate_weight.len() / n_embd;
    let mut gate = vec![0 as Fx; ffn_hidden];
    let mut up = vec![0 as Fx; ffn_hidden];
    matmul(weights.gate_weight, &normed, n_embd, ffn_hidden, &mut gate);
    matmul(weights.up_weight, &normed, n_embd, ffn_hidden, &mut up);

    let mut fused = vec![0 as Fx; ffn_hidden];
    for i in 0..ffn_hidden {
        fused[i] = swiglu(gate[i], up[i]);
    }

    let mut down = vec![0 as Fx; n_embd];
    matmul(weights.down_weight, &fused, ffn_hidden, n_embd, &mut down);
    for i in 0..n_embd {
        hidden[i] = residual2[i] + down[i];
    }

    Ok(())
}

fn to_f32_vec(v: &[Fx]) -> Vec<f32> {
    v.iter().map(|&x| fixed::to_f32(x)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::kv_cache::EvictionPolicy;

    fn config() -> TransformerConfig {
        TransformerConfig {
            n_vocab: 32,
            n_embd: 8,
            n_head: 2,
            n_kv_head: 1,
            n_layer: 1,
            max_seq_len: 16,
            ffn_hidden: 16,
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn n_embd_not_divisible_by_n_head_is_rejected() {
        let mut c = config();
        c.n_head = 3;
        assert!(c.validate().is_err());
    }

    #[test]
    fn n_head_not_divisible_by_n_kv_head_is_rejected() {
        let mut c = config();
        c.n_kv_head = 3;
        assert!(c.validate().is_err());
    }

    #[test]
    fn zero_max_seq_len_is_rejected() {
        let mut c = config();
        c.max_seq_len = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn rms_norm_of_uniform_vector_is_unit_scaled_by_weight() {
        let hidden = [fixed::ONE; 4];
        let weight = [fixed::ONE; 4];
        let mut out = [0 as Fx; 4];
        rms_norm(&hidden, &weight, &mut out);
        for &v in &out {
            assert!((fixed::to_f32(v) - 1.0).abs() < 0.01);
        }
    }

    #[test]
    fn layer_forward_runs_with_identity_weights_and_updates_hidden() {
        let c = config().validate().unwrap();
        let n_embd = c.n_embd;
        let head_dim = c.head_dim();
        let kv_dim = c.n_kv_head * head_dim;

        let identity = |rows: usize, cols: usize| -> Vec<Fx> {
            let mut m = vec![0 as Fx; rows * cols];
            for i in 0..rows.min(cols) {
                m[i * cols + i] = fixed::ONE;
            }
            m
        };

        let attn_norm = vec![fixed::ONE; n_embd];
        let ffn_norm = vec![fixed::ONE; n_embd];
        let q_weight = identity(n_embd, n_embd);
        let k_weight = identity(kv_dim, n_embd);
        let v_weight = identity(kv_dim, n_embd);
        let o_weight = identity(n_embd, n_embd);
        let gate_weight = vec![0 as Fx; c.ffn_hidden * n_embd];
        let up_weight = vec![0 as Fx; c.ffn_hidden * n_embd];
        let down_weight = vec![0 as Fx; n_embd * c.ffn_hidden];

        let weights = LayerWeights {
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

        let mut cache = KvCache::new(1, c.max_seq_len, kv_dim, EvictionPolicy::None).unwrap();
        let rope = RopeTable::new(head_dim);
        let mut hidden = vec![fixed::from_f32(0.1); n_embd];

        let result = apply_layer(
            &mut hidden,
            &weights,
            &mut cache,
            0,
            0,
            c.n_head,
            c.n_kv_head,
            head_dim,
            &rope,
        );
        assert!(result.is_ok());
        assert_eq!(cache.seq_len(0).unwrap(), 1);
    }
}
