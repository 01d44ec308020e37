//! Byte-level BPE tokenizer collaborator (§6).
//!
//! Greedy longest-match encode/decode over a vocabulary loaded from the
//! weight container's `tokenizer.ggml.tokens` metadata array. Token ids are
//! `u32` (matching [`LlmError::InvalidTokenId`]); the forward/reverse maps
//! are built once at load time and never mutated during generation.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use super::errors::LlmError;

pub const MAX_TOKEN_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokens {
    pub bos: u32,
    pub eos: u32,
    pub unk: u32,
}

impl Default for SpecialTokens {
    fn default() -> Self {
        Self {
            bos: 1,
            eos: 2,
            unk: 0,
        }
    }
}

pub struct BpeTokenizer {
    vocab: BTreeMap<u32, Vec<u8>>,
    reverse_vocab: BTreeMap<Vec<u8>, u32>,
    vocab_size: usize,
    special: SpecialTokens,
}

impl BpeTokenizer {
    pub fn new(special: SpecialTokens) -> Self {
        Self {
            vocab: BTreeMap::new(),
            reverse_vocab: BTreeMap::new(),
            vocab_size: 0,
            special,
        }
    }

    /// Load a vocabulary from a flat list of `(token_id, piece_bytes)`
    /// pairs, the shape the weight container hands back after decoding its
    /// `tokenizer.ggml.tokens` string array.
    pub fn load_vocab(&mut self, pieces: &[(u32, Vec<u8>)]) -> Result<(), LlmError> {
        self.vocab.clear();
        self.reverse_vocab.clear();

        for (id, bytes) in pieces {
            if bytes.len() > MAX_TOKEN_LEN {
                return Err(LlmError::InvalidConfig(alloc::format!(
                    "vocabulary piece length {} exceeds {}",
                    bytes.len(),
                    MAX_TOKEN_LEN
                )));
            }
            self.vocab.insert(*id, bytes.clone());
            self.reverse_vocab.insert(bytes.clone(), *id);
        }
        self.vocab_size = self.vocab.len();
        Ok(())
    }

    /// Greedy longest-match byte encode. Bytes with no matching piece at
    /// any length fall back to the unknown-token id.
    pub fn encode(&self, text: &str) -> Vec<u32> {
        let bytes = text.as_bytes();
        let mut tokens = Vec::new();
        let mut i = 0;

        while i < bytes.len() {
            let max_len = MAX_TOKEN_LEN.min(bytes.len() - i);
            let mut matched_len = 1;
            let mut matched_id = self.special.unk;

            for len in (1..=max_len).rev() {
                let candidate = &bytes[i..i + len];
                if let Some(&id) = self.reverse_vocab.get(candidate) {
                    matched_len = len;
                    matched_id = id;
                    break;
                }
            }

            tokens.push(matched_id);
            i += matched_len;
        }

        tokens
    }

    pub fn encode_with_special(&self, text: &str, add_bos: bool, add_eos: bool) -> Vec<u32> {
        let mut tokens = Vec::new();
        if add_bos {
            tokens.push(self.special.bos);
        }
        tokens.extend(self.encode(text));
        if add_eos {
            tokens.push(self.special.eos);
        }
        tokens
    }

    /// Decode ids to text. BOS/EOS are dropped; unknown ids surface as
    /// errors since a caller decoding generated output should never see an
    /// out-of-vocabulary id (§7, `InvalidTokenId`).
    pub fn decode(&self, tokens: &[u32]) -> Result<String, LlmError> {
        let mut result = Vec::new();
        for &id in tokens {
            if id == self.special.bos || id == self.special.eos {
                continue;
            }
            let bytes = self
                .vocab
                .get(&id)
                .ok_or(LlmError::InvalidTokenId(id))?;
            result.extend_from_slice(bytes);
        }
        Ok(String::from_utf8_lossy(&result).to_string())
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn has_token(&self, id: u32) -> bool {
        self.vocab.contains_key(&id)
    }

    pub fn special_tokens(&self) -> SpecialTokens {
        self.special
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tokenizer() -> BpeTokenizer {
        let mut t = BpeTokenizer::new(SpecialTokens::default());
        t.load_vocab(&[
            (0, b"<unk>".to_vec()),
            (1, b"<bos>".to_vec()),
            (2, b"<eos>".to_vec()),
            (10, b"He".to_vec()),
            (11, b"llo".to_vec()),
            (12, b",".to_vec()),
            (13, b" world".to_vec()),
            (14, b"!".to_vec()),
        ])
        .unwrap();
        t
    }

    #[test]
    fn encode_uses_longest_match_greedily() {
        let t = sample_tokenizer();
        let tokens = t.encode("Hello, world!");
        assert_eq!(tokens, vec![10, 11, 12, 13, 14]);
    }

    #[test]
    fn unknown_bytes_fall_back_to_unk() {
        let t = sample_tokenizer();
        let tokens = t.encode("\u{1F600}");
        assert!(tokens.iter().all(|&id| id == t.special.unk));
    }

    #[test]
    fn decode_skips_bos_eos_and_rejects_unknown_id() {
        let t = sample_tokenizer();
        let text = t.decode(&[1, 10, 11, 2]).unwrap();
        assert_eq!(text, "Hello");
        assert!(t.decode(&[999]).is_err());
    }

    #[test]
    fn encode_with_special_wraps_bos_eos() {
        let t = sample_tokenizer();
        let tokens = t.encode_with_special("He", true, true);
        assert_eq!(tokens, vec![1, 10, 2]);
    }
}
