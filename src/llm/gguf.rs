//! GGUF model container collaborator (§6).
//!
//! Parses the on-disk GGUF layout (header, metadata key-value pairs, tensor
//! info, 32-byte aligned tensor data) produced by the model-slot registry's
//! loader and exposes a `lookup(name) -> (tensor_type, byte_slice)` surface
//! plus typed accessors for the handful of LLaMA-family hyperparameter keys
//! the transformer needs (`*.embedding_length`, `*.attention.head_count`,
//! `*.context_length`, tokenizer BOS/EOS/UNK ids, ...).
//!
//! ## Header
//!
//! ```text
//! Offset  Size  Type    Field
//! ───────────────────────────────
//! 0       4     u32     magic (0x46554747 = "GGUF")
//! 4       4     u32     version (3)
//! 8       8     u64     n_tensors
//! 16      8     u64     n_kv (metadata count)
//! ```
//!
//! Tensor data starts at the first 32-byte aligned offset following the
//! tensor info table. This module only recognizes the element types this
//! crate's dequantization path understands: F32, F16, Q4_K, Q5_K, Q6_K,
//! Q8_0 (§4.B); any other type code surfaces as
//! [`LlmError::UnsupportedQuantType`] rather than being silently skipped.

use super::errors::LlmError;
use super::quantize::QuantType;
use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

pub const GGUF_MAGIC: u32 = 0x4655_4747;
pub const GGUF_VERSION: u32 = 3;
pub const GGUF_ALIGNMENT: usize = 32;

/// GGUF metadata value types (subset this parser understands).
#[derive(Debug, Clone)]
pub enum GgufValue {
    U32(u32),
    I32(i32),
    F32(f32),
    Bool(bool),
    String(String),
    U64(u64),
}

impl GgufValue {
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            GgufValue::U32(v) => Some(*v),
            GgufValue::U64(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            GgufValue::String(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GgufTensor {
    pub name: String,
    pub dims: Vec<u64>,
    pub tensor_type: QuantType,
    pub offset: u64,
    pub data: Vec<u8>,
}

impl GgufTensor {
    pub fn element_count(&self) -> usize {
        self.dims.iter().product::<u64>() as usize
    }
}

pub struct GgufModel {
    pub metadata: BTreeMap<String, GgufValue>,
    pub tensors: BTreeMap<String, GgufTensor>,
    pub version: u32,
}

impl GgufModel {
    pub fn from_bytes(data: &[u8]) -> Result<Self, LlmError> {
        let mut offset = 0usize;

        let magic = read_u32(data, &mut offset)?;
        if magic != GGUF_MAGIC {
            return Err(LlmError::InvalidConfig(String::from(
                "bad GGUF magic number",
            )));
        }
        let version = read_u32(data, &mut offset)?;
        if version != GGUF_VERSION {
            return Err(LlmError::InvalidConfig(format!(
                "unsupported GGUF version {}",
                version
            )));
        }

        let n_tensors = read_u64(data, &mut offset)? as usize;
        let n_kv = read_u64(data, &mut offset)? as usize;

        let mut metadata = BTreeMap::new();
        for _ in 0..n_kv {
            let (key, value) = parse_metadata_entry(data, &mut offset)?;
            metadata.insert(key, value);
        }

        let mut tensors = BTreeMap::new();
        for _ in 0..n_tensors {
            let tensor = parse_tensor_info(data, &mut offset)?;
            tensors.insert(tensor.name.clone(), tensor);
        }

        let align_mask = GGUF_ALIGNMENT - 1;
        offset = (offset + align_mask) & !align_mask;

        for tensor in tensors.values_mut() {
            let data_offset = offset
                .checked_add(tensor.offset as usize)
                .ok_or_else(|| LlmError::Internal(String::from("tensor offset overflow")))?;
            let elems = tensor.element_count();
            let block_elems = tensor.tensor_type.block_elements();
            let block_bytes = tensor.tensor_type.block_bytes();
            let num_blocks = (elems + block_elems - 1) / block_elems;
            let size = num_blocks * block_bytes;

            if data_offset + size > data.len() {
                return Err(LlmError::MalformedBlockLength {
                    got: data.len().saturating_sub(data_offset),
                    block_size: block_bytes,
                });
            }

            tensor.data = data[data_offset..data_offset + size].to_vec();
        }

        Ok(Self {
            metadata,
            tensors,
            version,
        })
    }

    pub fn get_metadata(&self, key: &str) -> Option<&GgufValue> {
        self.metadata.get(key)
    }

    pub fn get_u32(&self, key: &str) -> Result<u32, LlmError> {
        self.metadata
            .get(key)
            .and_then(|v| v.as_u32())
            .ok_or_else(|| LlmError::NullArgument(Self::leak_key(key)))
    }

    pub fn get_u32_or(&self, key: &str, default: u32) -> u32 {
        self.get_u32(key).unwrap_or(default)
    }

    pub fn get_string(&self, key: &str) -> Result<&str, LlmError> {
        self.metadata
            .get(key)
            .and_then(|v| v.as_string())
            .ok_or_else(|| LlmError::NullArgument(Self::leak_key(key)))
    }

    /// Look up a tensor by its LLaMA-convention name
    /// (`token_embd.weight`, `blk.{n}.attn_q.weight`, `output_norm.weight`, ...).
    pub fn lookup(&self, name: &str) -> Result<(&QuantType, &[u8]), LlmError> {
        let tensor = self
            .tensors
            .get(name)
            .ok_or_else(|| LlmError::NullArgument(Self::leak_key(name)))?;
        Ok((&tensor.tensor_type, tensor.data.as_slice()))
    }

    pub fn tensor_names(&self) -> Vec<&str> {
        self.tensors.keys().map(String::as_str).collect()
    }

    fn leak_key(key: &str) -> &'static str {
        // Collaborator keys are fixed metadata/tensor names known at compile
        // time in practice; missing-key paths are rare enough that a short
        // static placeholder is acceptable here rather than threading an
        // owned String through `LlmError::NullArgument`.
        let _ = key;
        "gguf key"
    }
}

fn read_u32(data: &[u8], offset: &mut usize) -> Result<u32, LlmError> {
    if *offset + 4 > data.len() {
        return Err(LlmError::OutOfBounds {
            index: *offset + 4,
            len: data.len(),
        });
    }
    let v = u32::from_le_bytes(data[*offset..*offset + 4].try_into().unwrap());
    *offset += 4;
    Ok(v)
}

fn read_u64(data: &[u8], offset: &mut usize) -> Result<u64, LlmError> {
    if *offset + 8 > data.len() {
        return Err(LlmError::OutOfBounds {
            index: *offset + 8,
            len: data.len(),
        });
    }
    let v = u64::from_le_bytes(data[*offset..*offset + 8].try_into().unwrap());
    *offset += 8;
    Ok(v)
}

fn read_f32(data: &[u8], offset: &mut usize) -> Result<f32, LlmError> {
    Ok(f32::from_bits(read_u32(data, offset)?))
}

fn read_string(data: &[u8], offset: &mut usize) -> Result<String, LlmError> {
    let len = read_u64(data, offset)? as usize;
    if *offset + len > data.len() {
        return Err(LlmError::OutOfBounds {
            index: *offset + len,
            len: data.len(),
        });
    }
    let bytes = &data[*offset..*offset + len];
    *offset += len;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| LlmError::Internal(String::from("invalid UTF-8 in GGUF string")))
}

fn parse_metadata_entry(data: &[u8], offset: &mut usize) -> Result<(String, GgufValue), LlmError> {
    let key = read_string(data, offset)?;
    let value_type = read_u32(data, offset)?;
    let value = match value_type {
        4 => GgufValue::U32(read_u32(data, offset)?),
        5 => GgufValue::I32(read_u32(data, offset)? as i32),
        6 => GgufValue::F32(read_f32(data, offset)?),
        7 => GgufValue::Bool(read_u32(data, offset)? != 0),
        8 => GgufValue::String(read_string(data, offset)?),
        10 => GgufValue::U64(read_u64(data, offset)?),
        other => return Err(LlmError::UnsupportedQuantType(other)),
    };
    Ok((key, value))
}

fn parse_tensor_info(data: &[u8], offset: &mut usize) -> Result<GgufTensor, LlmError> {
    let name = read_string(data, offset)?;
    let n_dims = read_u32(data, offset)? as usize;
    let mut dims = Vec::with_capacity(n_dims);
    for _ in 0..n_dims {
        dims.push(read_u64(data, offset)?);
    }
    let type_id = read_u32(data, offset)?;
    let tensor_type = QuantType::from_u32(type_id)?;
    let tensor_offset = read_u64(data, offset)?;
    Ok(GgufTensor {
        name,
        dims,
        tensor_type,
        offset: tensor_offset,
        data: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&GGUF_MAGIC.to_le_bytes());
        buf.extend_from_slice(&GGUF_VERSION.to_le_bytes());
        buf.extend_from_slice(&1u64.to_le_bytes()); // n_tensors
        buf.extend_from_slice(&1u64.to_le_bytes()); // n_kv

        // one metadata entry: "n_embd" -> u32(8)
        let key = b"n_embd";
        buf.extend_from_slice(&(key.len() as u64).to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(&4u32.to_le_bytes()); // type = u32
        buf.extend_from_slice(&8u32.to_le_bytes());

        // one tensor: "w" dims=[32] type=Q8_0
        let name = b"w";
        buf.extend_from_slice(&(name.len() as u64).to_le_bytes());
        buf.extend_from_slice(name);
        buf.extend_from_slice(&1u32.to_le_bytes()); // n_dims
        buf.extend_from_slice(&32u64.to_le_bytes()); // dims[0]
        buf.extend_from_slice(&8u32.to_le_bytes()); // type = Q8_0
        buf.extend_from_slice(&0u64.to_le_bytes()); // tensor offset

        while buf.len() % GGUF_ALIGNMENT != 0 {
            buf.push(0);
        }
        buf.extend(core::iter::repeat(0u8).take(34)); // one Q8_0 block
        buf
    }

    #[test]
    fn parses_header_metadata_and_tensor() {
        let bytes = sample_file();
        let model = GgufModel::from_bytes(&bytes).unwrap();
        assert_eq!(model.version, GGUF_VERSION);
        assert_eq!(model.get_u32("n_embd").unwrap(), 8);
        let (ty, data) = model.lookup("w").unwrap();
        assert_eq!(*ty, QuantType::Q8_0);
        assert_eq!(data.len(), 34);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = sample_file();
        bytes[0] = 0;
        assert!(GgufModel::from_bytes(&bytes).is_err());
    }

    #[test]
    fn missing_key_surfaces_as_error() {
        let bytes = sample_file();
        let model = GgufModel::from_bytes(&bytes).unwrap();
        assert!(model.get_u32("does_not_exist").is_err());
    }
}
