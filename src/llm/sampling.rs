//! Token sampling (§4.F companion). Only greedy (argmax) selection is
//! implemented; `top_p` is accepted for interface compatibility with the
//! fuller sampling surface but reserved and ignored, per the non-goal that
//! excludes stochastic sampling from this engine.

use alloc::vec::Vec;

#[derive(Debug, Clone, Copy)]
pub struct SamplingConfig {
    /// `1.0` leaves logits unmodified; scaling is skipped entirely at `1.0`.
    pub temperature: f32,
    /// Reserved; not consulted by `sample`.
    pub top_p: f32,
}

impl SamplingConfig {
    pub fn greedy() -> Self {
        Self {
            temperature: 1.0,
            top_p: 0.0,
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self::greedy()
    }
}

/// Applies temperature scaling (skipped when `temperature == 1.0`), a
/// numerically stable softmax, and returns the argmax token id.
pub fn sample(logits: &[f32], config: SamplingConfig) -> u32 {
    let scaled: Vec<f32> = if config.temperature == 1.0 {
        logits.to_vec()
    } else {
        logits.iter().map(|&l| l / config.temperature).collect()
    };

    let max = scaled.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut best_idx = 0usize;
    let mut best_val = f32::NEG_INFINITY;
    for (i, &v) in scaled.iter().enumerate() {
        let shifted = v - max;
        if shifted > best_val {
            best_val = shifted;
            best_idx = i;
        }
    }
    best_idx as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greedy_picks_the_maximum_logit() {
        let logits = [0.1, 5.0, -2.0, 3.9];
        assert_eq!(sample(&logits, SamplingConfig::greedy()), 1);
    }

    #[test]
    fn temperature_scaling_preserves_argmax() {
        let logits = [0.1, 5.0, -2.0, 3.9];
        let cfg = SamplingConfig {
            temperature: 0.5,
            top_p: 0.0,
        };
        assert_eq!(sample(&logits, cfg), 1);
    }

    #[test]
    fn single_logit_is_trivially_chosen() {
        assert_eq!(sample(&[42.0], SamplingConfig::greedy()), 0);
    }
}
