//! Resource limits for the generation driver (§4.I). These bound the
//! externally observable surface (prompt length, generation length,
//! concurrent inference slots, per-forward latency budget); they are not
//! enforced as hard preemption, only checked at `inference_init` /
//! `inference_forward` boundaries.

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResourceLimits {
    pub max_prompt_tokens: usize,
    pub max_generation_tokens: usize,
    pub max_concurrent_inferences: usize,
    pub forward_latency_budget_us: u64,
}

impl ResourceLimits {
    /// Conservative defaults sized for the reference model family
    /// (TinyLlama/SmolLM/TinyStories) on a handful of cores.
    pub const fn default_limits() -> Self {
        Self {
            max_prompt_tokens: 2048,
            max_generation_tokens: 512,
            max_concurrent_inferences: 32,
            forward_latency_budget_us: 500,
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::default_limits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_positive() {
        let l = ResourceLimits::default();
        assert!(l.max_prompt_tokens > 0);
        assert!(l.max_generation_tokens > 0);
        assert!(l.max_concurrent_inferences > 0);
        assert!(l.forward_latency_budget_us > 0);
    }
}
