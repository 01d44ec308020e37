//! Floating-point transformer engine: the same §4.E layer algorithm as
//! [`super::transformer`], over `f32` instead of `Fx`, parallelizing the
//! per-head attention loop across the work-stealing scheduler. Selected at
//! model-load time when the weight codec reports unquantized tensors; the
//! two engines are bit-exact against each other only when the scheduler
//! runs in deterministic mode (fixed partitioning yields a fixed reduction
//! order across heads).

use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

use super::errors::LlmError;
use super::kv_cache::KvCache;
use super::scheduler::Scheduler;
use super::transformer::TransformerConfig;

/// `exp(x)` valid only on `[-10, 10]`; inputs are clamped rather than the
/// bound being silently widened (§9 open question — the clamp is
/// deliberately preserved, not relaxed).
const FAST_EXP_CLAMP: f32 = 10.0;

fn fast_exp(x: f32) -> f32 {
    let x = x.clamp(-FAST_EXP_CLAMP, FAST_EXP_CLAMP);
    libm::expf(x)
}

pub struct FloatLayerWeights<'a> {
    pub attn_norm: &'a [f32],
    pub q_weight: &'a [f32],
    pub k_weight: &'a [f32],
    pub v_weight: &'a [f32],
    pub o_weight: &'a [f32],
    pub ffn_norm: &'a [f32],
    pub gate_weight: &'a [f32],
    pub up_weight: &'a [f32],
    pub down_weight: &'a [f32],
}

const RMS_EPS: f32 = 1e-5;

pub fn rms_norm(hidden: &[f32], weight: &[f32], out: &mut [f32]) {
    let n = hidden.len() as f32;
    let sum_sq: f32 = hidden.iter().map(|&h| h * h).sum();
    let mean_sq = sum_sq / n;
    let mut rms = libm::sqrtf(mean_sq + RMS_EPS);
    if rms == 0.0 {
        rms = 1.0;
    }
    for i in 0..hidden.len() {
        out[i] = (hidden[i] / rms) * weight[i];
    }
}

fn matmul(weight: &[f32], x: &[f32], in_dim: usize, out_dim: usize, out: &mut [f32]) {
    for o in 0..out_dim {
        let row = &weight[o * in_dim..(o + 1) * in_dim];
        let mut acc = 0.0f32;
        for i in 0..in_dim {
            acc += row[i] * x[i];
        }
        out[o] = acc;
    }
}

fn rope_frequencies(head_dim: usize) -> Vec<f32> {
    let half = head_dim / 2;
    (0..half)
        .map(|d| {
            let exponent = (2 * d) as f32 / head_dim as f32;
            libm::powf(10000.0, -exponent)
        })
        .collect()
}

fn apply_rope(v: &mut [f32], n_heads: usize, head_dim: usize, position: usize, freqs: &[f32]) {
    let half = head_dim / 2;
    for h in 0..n_heads {
        let base = h * head_dim;
        for d in 0..half {
            let angle = position as f32 * freqs[d];
            let cos = libm::cosf(angle);
            let sin = libm::sinf(angle);
            let x0 = v[base + 2 * d];
            let x1 = v[base + 2 * d + 1];
            v[base + 2 * d] = x0 * cos - x1 * sin;
            v[base + 2 * d + 1] = x0 * sin + x1 * cos;
        }
    }
}

fn swiglu(gate: f32, up: f32) -> f32 {
    let sigma = 1.0 / (1.0 + fast_exp(-gate));
    gate * sigma * up
}

/// Applies one layer exactly as [`super::transformer::apply_layer`] does,
/// but parallelizing the per-head attention reduction across `scheduler`.
pub fn apply_layer(
    hidden: &mut [f32],
    weights: &FloatLayerWeights<'_>,
    cache: &mut KvCache,
    layer: usize,
    position: usize,
    config: &TransformerConfig,
    scheduler: &Scheduler,
) -> Result<(), LlmError> {
    let n_embd = hidden.len();
    let n_head = config.n_head;
    let n_kv_head = config.n_kv_head;
    let head_dim = config.head_dim();
    let kv_dim = n_kv_head * head_dim;

    let residual1 = hidden.to_vec();
    let mut normed = vec![0.0f32; n_embd];
    rms_norm(hidden, weights.attn_norm, &mut normed);

    let mut q = vec![0.0f32; n_embd];
    let mut k = vec![0.0f32; kv_dim];
    let mut v = vec![0.0f32; kv_dim];
    matmul(weights.q_weight, &normed, n_embd, n_embd, &mut q);
    matmul(weights.k_weight, &normed, n_embd, kv_dim, &mut k);
    matmul(weights.v_weight, &normed, n_embd, kv_dim, &mut v);

    let freqs = rope_frequencies(head_dim);
    apply_rope(&mut q, n_head, head_dim, position, &freqs);
    apply_rope(&mut k, n_kv_head, head_dim, position, &freqs);

    cache.store(layer, position, &k, &v)?;

    let group = n_head / n_kv_head;
    let scale = 1.0 / libm::sqrtf(head_dim as f32);
    let attn_out = Mutex::new(vec![0.0f32; n_embd]);

    let rows = cache.fetch(layer, position + 1)?;
    if let Some((k_rows, v_rows)) = rows {
        let k_rows = &k_rows;
        let v_rows = &v_rows;
        scheduler.parallel_for(n_head, 1, |_tid, start, end| {
            for h in start..end {
                let kv_head = h / group;
                let q_h = &q[h * head_dim..(h + 1) * head_dim];

                let mut scores = vec![0.0f32; k_rows.len()];
                let mut max_score = f32::NEG_INFINITY;
                for (t, k_row) in k_rows.iter().enumerate() {
                    let mut dot = 0.0f32;
                    for d in 0..head_dim {
                        dot += q_h[d] * k_row[kv_head * head_dim + d];
                    }
                    let s = dot * scale;
                    scores[t] = s;
                    if s > max_score {
                        max_score = s;
                    }
                }

                let mut sum_exp = 0.0f32;
                for s in scores.iter_mut() {
                    *s = fast_exp(*s - max_score);
                    sum_exp += *s;
                }
                if sum_exp == 0.0 {
                    sum_exp = 1.0;
                }

                let mut out_h = vec![0.0f32; head_dim];
                for (t, v_row) in v_rows.iter().enumerate() {
                    let w = scores[t] / sum_exp;
                    for d in 0..head_dim {
                        out_h[d] += w * v_row[kv_head * head_dim + d];
                    }
                }

                let mut guard = attn_out.lock();
                guard[h * head_dim..(h + 1) * head_dim].copy_from_slice(&out_h);
            }
        });
    }

    let attn_out = attn_out.into_inner();
    let mut o_proj = vec![0.0f32; n_embd];
    matmul(weights.o_weight, &attn_out, n_embd, n_embd, &mut o_proj);
    for i in 0..n_embd {
        hidden[i] = residual1[i] + o_proj[i];
    }

    let residual2 = hidden.to_vec();
    rms_norm(hidden, weights.ffn_norm, &mut normed);

    let ffn_hidden = weights.gate_weight.len() / n_embd;
    let mut gate = vec![0.0f32; ffn_hidden];
    let mut up = vec![0.0f32; ffn_hidden];
    matmul(weights.gate_weight, &normed, n_embd, ffn_hidden, &mut gate);
    matmul(weights.up_weight, &normed, n_embd, ffn_hidden, &mut up);

    let mut fused = vec![0.0f32; ffn_hidden];
    for i in 0..ffn_hidden {
        fused[i] = swiglu(gate[i], up[i]);
    }

    let mut down = vec![0.0f32; n_embd];
    matmul(weights.down_weight, &fused, ffn_hidden, n_embd, &mut down);
    for i in 0..n_embd {
        hidden[i] = residual2[i] + down[i];
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_exp_clamps_outside_bound() {
        let at_bound = fast_exp(10.0);
        let past_bound = fast_exp(100.0);
        assert_eq!(at_bound, past_bound);
    }

    #[test]
    fn rms_norm_of_uniform_vector_is_unit_scaled() {
        let hidden = [1.0f32; 4];
        let weight = [1.0f32; 4];
        let mut out = [0.0f32; 4];
        rms_norm(&hidden, &weight, &mut out);
        for &v in &out {
            assert!((v - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn swiglu_is_zero_when_gate_is_zero() {
        assert_eq!(swiglu(0.0, 5.0), 0.0);
    }
}
