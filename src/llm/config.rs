//! Embedded default configuration (§4.I).
//!
//! The reference model family's defaults are baked in as JSON at compile
//! time and parsed once into a process-wide static, the same
//! parse-once-at-first-touch idiom the kernel uses for its descriptor
//! tables. Callers needing a different model shape construct their own
//! `TransformerConfig`/`ResourceLimits` directly; this is only the
//! fallback used when no model-specific override is supplied.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use super::limits::ResourceLimits;
use super::transformer::TransformerConfig;

/// TinyLlama-1.1B-shaped defaults: the smallest of the reference model
/// family large enough to exercise every engine path (GQA, sliding-window
/// eviction, all four quant codecs).
const DEFAULT_ENGINE_CONFIG_JSON: &str = r#"{
    "transformer": {
        "n_vocab": 32000,
        "n_embd": 2048,
        "n_head": 32,
        "n_kv_head": 4,
        "n_layer": 22,
        "max_seq_len": 2048,
        "ffn_hidden": 5632
    },
    "limits": {
        "max_prompt_tokens": 2048,
        "max_generation_tokens": 512,
        "max_concurrent_inferences": 32,
        "forward_latency_budget_us": 500
    }
}"#;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngineConfig {
    pub transformer: TransformerConfig,
    pub limits: ResourceLimits,
}

lazy_static! {
    static ref DEFAULT_ENGINE_CONFIG: EngineConfig =
        serde_json::from_str(DEFAULT_ENGINE_CONFIG_JSON)
            .expect("embedded default engine config is malformed");
}

/// The embedded default configuration, parsed once on first access.
pub fn default_engine_config() -> EngineConfig {
    *DEFAULT_ENGINE_CONFIG
}

/// Parses a caller-supplied engine configuration, e.g. one read from a
/// model's companion config file rather than embedded at compile time.
pub fn parse_engine_config(json: &str) -> Result<EngineConfig, serde_json::Error> {
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_default_parses_and_validates() {
        let cfg = default_engine_config();
        assert!(cfg.transformer.validate().is_ok());
        assert_eq!(cfg.limits.max_prompt_tokens, 2048);
    }

    #[test]
    fn parse_engine_config_rejects_malformed_json() {
        assert!(parse_engine_config("{not json").is_err());
    }

    #[test]
    fn parse_engine_config_round_trips_serialized_default() {
        let cfg = default_engine_config();
        let json = serde_json::to_string(&cfg).unwrap();
        let parsed = parse_engine_config(&json).unwrap();
        assert_eq!(parsed.transformer.n_embd, cfg.transformer.n_embd);
        assert_eq!(parsed.limits.forward_latency_budget_us, cfg.limits.forward_latency_budget_us);
    }
}
