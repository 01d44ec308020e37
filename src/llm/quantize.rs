//! Quantized block codec (§4.B, §3 "Block-quantized tensor").
//!
//! Implements the four block layouts the streaming execution path decodes:
//!
//! ```text
//! Type    Bytes  Elements  Encoding
//! Q4_K    144    256       8 sub-blocks x 32 nibbles, fp16 d+dmin, 12B packed 6-bit scales/mins
//! Q5_K    176    256       Q4_K layout + 32B high-bit plane (5-bit quants)
//! Q6_K    210    256       per-sub-block int8 scales, 4-bit lows + 2-bit highs, fp16 d
//! Q8_0    34     32        fp16 d + 32 int8 quants
//! ```
//!
//! All decoders produce [`Fx`] (Q16.16) output so the transformer engine
//! never touches a float on the fixed-point path. A float-producing
//! sibling (`dequant_*_f32`) backs the parallel floating-point engine.

use super::errors::LlmError;
use super::fixed::{self, Fx};
use alloc::vec::Vec;
use half::f16;

pub const QK_K: usize = 256;
pub const QK8_0: usize = 32;

pub const Q4_K_BLOCK_BYTES: usize = 144;
pub const Q5_K_BLOCK_BYTES: usize = 176;
pub const Q6_K_BLOCK_BYTES: usize = 210;
pub const Q8_0_BLOCK_BYTES: usize = 34;

/// Tensor element type codes recognized by the weight container and the
/// codec (§6 "type is one of the quantization codes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantType {
    F32,
    F16,
    Q4K,
    Q5K,
    Q6K,
    Q8_0,
}

impl QuantType {
    /// Maps a GGUF tensor type code to the subset this codec understands.
    /// LLaMA-family K-quant exports use 12=Q4_K, 13=Q5_K, 14=Q6_K; the
    /// legacy 0/1/8 codes (F32/F16/Q8_0) are the ones produced uncompressed
    /// or for the embedding/output tensors.
    pub fn from_u32(value: u32) -> Result<Self, LlmError> {
        match value {
            0 => Ok(QuantType::F32),
            1 => Ok(QuantType::F16),
            8 => Ok(QuantType::Q8_0),
            12 => Ok(QuantType::Q4K),
            13 => Ok(QuantType::Q5K),
            14 => Ok(QuantType::Q6K),
            other => Err(LlmError::UnsupportedQuantType(other)),
        }
    }

    pub fn block_bytes(self) -> usize {
        match self {
            QuantType::F32 => 4,
            QuantType::F16 => 2,
            QuantType::Q4K => Q4_K_BLOCK_BYTES,
            QuantType::Q5K => Q5_K_BLOCK_BYTES,
            QuantType::Q6K => Q6_K_BLOCK_BYTES,
            QuantType::Q8_0 => Q8_0_BLOCK_BYTES,
        }
    }

    pub fn block_elements(self) -> usize {
        match self {
            QuantType::F32 | QuantType::F16 => 1,
            QuantType::Q4K | QuantType::Q5K | QuantType::Q6K => QK_K,
            QuantType::Q8_0 => QK8_0,
        }
    }
}

#[inline]
fn f16_bits_to_fx(bits: u16) -> Fx {
    fixed::from_f32(f16::from_bits(bits).to_f32())
}

/// 6-bit packed scale/min extraction shared by Q4_K and Q5_K, matching the
/// canonical K-quant bit layout: sub-blocks 0-3 read directly from the low
/// 6 bits of `scales[j]`/`scales[j+4]`; sub-blocks 4-7 borrow their high 2
/// bits from the low two bits of `scales[j-4]`/`scales[j]`.
fn scale_min_k4(j: usize, scales: &[u8; 12]) -> (u8, u8) {
    if j < 4 {
        let d = scales[j] & 0x3F;
        let m = scales[j + 4] & 0x3F;
        (d, m)
    } else {
        let d = (scales[j + 4] & 0x0F) | ((scales[j - 4] >> 6) << 4);
        let m = (scales[j + 4] >> 4) | ((scales[j] >> 6) << 4);
        (d, m)
    }
}

/// Decode one Q4_K super-block (144 bytes, 256 elements) into Q16.16.
pub fn dequantize_block_q4_k(block: &[u8], out: &mut [Fx]) -> Result<(), LlmError> {
    if block.len() != Q4_K_BLOCK_BYTES || out.len() != QK_K {
        return Err(LlmError::MalformedBlockLength {
            got: block.len(),
            block_size: Q4_K_BLOCK_BYTES,
        });
    }
    let d = f16_bits_to_fx(u16::from_le_bytes([block[0], block[1]]));
    let dmin = f16_bits_to_fx(u16::from_le_bytes([block[2], block[3]]));
    let mut scales = [0u8; 12];
    scales.copy_from_slice(&block[4..16]);
    let qs = &block[16..144];

    let mut is = 0usize;
    let mut out_idx = 0usize;
    let mut q_idx = 0usize;
    for _ in 0..(QK_K / 64) {
        let (sc1, m1) = scale_min_k4(is, &scales);
        let (sc2, m2) = scale_min_k4(is + 1, &scales);
        let d1 = fixed::mul(d, fixed::from_int(sc1 as i32));
        let m1f = fixed::mul(dmin, fixed::from_int(m1 as i32));
        let d2 = fixed::mul(d, fixed::from_int(sc2 as i32));
        let m2f = fixed::mul(dmin, fixed::from_int(m2 as i32));

        for l in 0..32 {
            let byte = qs[q_idx + l];
            out[out_idx + l] = fixed::mul(d1, fixed::from_int((byte & 0x0F) as i32)) - m1f;
        }
        for l in 0..32 {
            let byte = qs[q_idx + l];
            out[out_idx + 32 + l] = fixed::mul(d2, fixed::from_int((byte >> 4) as i32)) - m2f;
        }
        out_idx += 64;
        q_idx += 32;
        is += 2;
    }
    Ok(())
}

/// Decode one Q5_K super-block (176 bytes, 256 elements): the Q4_K layout
/// plus a 32-byte high-bit plane that promotes each nibble to 5 bits.
pub fn dequantize_block_q5_k(block: &[u8], out: &mut [Fx]) -> Result<(), LlmError> {
    if block.len() != Q5_K_BLOCK_BYTES || out.len() != QK_K {
        return Err(LlmError::MalformedBlockLength {
            got: block.len(),
            block_size: Q5_K_BLOCK_BYTES,
        });
    }
    let d = f16_bits_to_fx(u16::from_le_bytes([block[0], block[1]]));
    let dmin = f16_bits_to_fx(u16::from_le_bytes([block[2], block[3]]));
    let mut scales = [0u8; 12];
    scales.copy_from_slice(&block[4..16]);
    let qh = &block[16..48];
    let qs = &block[48..176];

    let mut is = 0usize;
    let mut out_idx = 0usize;
    let mut q_idx = 0usize;
    let mut bit = 0u32;
    for _ in 0..(QK_K / 64) {
        let (sc1, m1) = scale_min_k4(is, &scales);
        let (sc2, m2) = scale_min_k4(is + 1, &scales);
        let d1 = fixed::mul(d, fixed::from_int(sc1 as i32));
        let m1f = fixed::mul(dmin, fixed::from_int(m1 as i32));
        let d2 = fixed::mul(d, fixed::from_int(sc2 as i32));
        let m2f = fixed::mul(dmin, fixed::from_int(m2 as i32));

        for l in 0..32 {
            let low = (qs[q_idx + l] & 0x0F) as i32;
            let high = ((qh[(q_idx + l) / 8] >> (bit % 8)) & 1) as i32;
            let v = low | (high << 4);
            out[out_idx + l] = fixed::mul(d1, fixed::from_int(v)) - m1f;
        }
        bit += 1;
        for l in 0..32 {
            let low = (qs[q_idx + l] >> 4) as i32;
            let high = ((qh[(q_idx + l) / 8] >> (bit % 8)) & 1) as i32;
            let v = low | (high << 4);
            out[out_idx + 32 + l] = fixed::mul(d2, fixed::from_int(v)) - m2f;
        }
        bit += 1;
        out_idx += 64;
        q_idx += 32;
        is += 2;
    }
    Ok(())
}

/// Decode one Q6_K super-block (210 bytes, 256 elements): 16 sub-blocks of
/// 16 elements, each with its own signed int8 scale; per-element value is
/// 4 low bits + 2 high bits giving a signed 6-bit quant in `[-32, 31]`.
pub fn dequantize_block_q6_k(block: &[u8], out: &mut [Fx]) -> Result<(), LlmError> {
    if block.len() != Q6_K_BLOCK_BYTES || out.len() != QK_K {
        return Err(LlmError::MalformedBlockLength {
            got: block.len(),
            block_size: Q6_K_BLOCK_BYTES,
        });
    }
    let ql_all = &block[0..128];
    let qh_all = &block[128..192];
    let mut scales = [0i8; 16];
    for (i, s) in scales.iter_mut().enumerate() {
        *s = block[192 + i] as i8;
    }
    let d = f16_bits_to_fx(u16::from_le_bytes([block[208], block[209]]));

    for n in 0..2 {
        let ql = &ql_all[n * 64..n * 64 + 64];
        let qh = &qh_all[n * 32..n * 32 + 32];
        let sc = &scales[n * 8..n * 8 + 8];
        let y = n * 128;

        for l in 0..32 {
            let is = l / 16;
            let q1 = ((ql[l] & 0x0F) | ((qh[l] & 3) << 4)) as i32 - 32;
            let q2 = ((ql[l + 32] & 0x0F) | (((qh[l] >> 2) & 3) << 4)) as i32 - 32;
            let q3 = ((ql[l] >> 4) | (((qh[l] >> 4) & 3) << 4)) as i32 - 32;
            let q4 = ((ql[l + 32] >> 4) | (((qh[l] >> 6) & 3) << 4)) as i32 - 32;

            out[y + l] = fixed::mul(fixed::mul(d, fixed::from_int(sc[is] as i32)), fixed::from_int(q1));
            out[y + l + 32] = fixed::mul(fixed::mul(d, fixed::from_int(sc[is + 2] as i32)), fixed::from_int(q2));
            out[y + l + 64] = fixed::mul(fixed::mul(d, fixed::from_int(sc[is + 4] as i32)), fixed::from_int(q3));
            out[y + l + 96] = fixed::mul(fixed::mul(d, fixed::from_int(sc[is + 6] as i32)), fixed::from_int(q4));
        }
    }
    Ok(())
}

/// Decode one Q8_0 block (34 bytes, 32 elements): fp16 scale + 32 signed
/// int8 quants. Contract: per-element round-trip error stays within ±1
/// Q16.16 ULP of `scale * q` (§8).
pub fn dequantize_block_q8_0(block: &[u8], out: &mut [Fx]) -> Result<(), LlmError> {
    if block.len() != Q8_0_BLOCK_BYTES || out.len() != QK8_0 {
        return Err(LlmError::MalformedBlockLength {
            got: block.len(),
            block_size: Q8_0_BLOCK_BYTES,
        });
    }
    let d = f16_bits_to_fx(u16::from_le_bytes([block[0], block[1]]));
    for i in 0..QK8_0 {
        let q = block[2 + i] as i8;
        out[i] = fixed::mul(d, fixed::from_int(q as i32));
    }
    Ok(())
}

/// Dispatch dequantization of an entire tensor by type. `src_len` must be a
/// multiple of the type's block size; `elem_count` must equal
/// `blocks * elements_per_block`.
pub fn dequantize_tensor(
    ty: QuantType,
    src: &[u8],
    elem_count: usize,
    out: &mut [Fx],
) -> Result<(), LlmError> {
    let block_bytes = ty.block_bytes();
    let block_elems = ty.block_elements();

    if matches!(ty, QuantType::F32 | QuantType::F16) {
        return Err(LlmError::UnsupportedQuantType(0xFFFF_FFFF));
    }
    if src.len() % block_bytes != 0 {
        return Err(LlmError::MalformedBlockLength {
            got: src.len(),
            block_size: block_bytes,
        });
    }
    let num_blocks = src.len() / block_bytes;
    if num_blocks * block_elems != elem_count || out.len() != elem_count {
        return Err(LlmError::MalformedBlockLength {
            got: elem_count,
            block_size: block_elems,
        });
    }

    for b in 0..num_blocks {
        let block = &src[b * block_bytes..(b + 1) * block_bytes];
        let out_slice = &mut out[b * block_elems..(b + 1) * block_elems];
        match ty {
            QuantType::Q4K => dequantize_block_q4_k(block, out_slice)?,
            QuantType::Q5K => dequantize_block_q5_k(block, out_slice)?,
            QuantType::Q6K => dequantize_block_q6_k(block, out_slice)?,
            QuantType::Q8_0 => dequantize_block_q8_0(block, out_slice)?,
            QuantType::F32 | QuantType::F16 => unreachable!(),
        }
    }
    Ok(())
}

/// Dequantize an entire tensor to a freshly allocated `Vec`.
pub fn dequantize_tensor_alloc(ty: QuantType, src: &[u8], elem_count: usize) -> Result<Vec<Fx>, LlmError> {
    let mut out = alloc::vec![0 as Fx; elem_count];
    dequantize_tensor(ty, src, elem_count, &mut out)?;
    Ok(out)
}

/// Fused Q8_0 x Q8_1-style integer dot product: both operands are Q8_0
/// blocks of equal length; the product never materializes floats until the
/// final per-block scale application, keeping the inner loop all-integer.
pub fn dot_q8_0(a_blocks: &[u8], b_blocks: &[u8], n_blocks: usize) -> Result<Fx, LlmError> {
    if a_blocks.len() != n_blocks * Q8_0_BLOCK_BYTES || b_blocks.len() != n_blocks * Q8_0_BLOCK_BYTES {
        return Err(LlmError::MalformedBlockLength {
            got: a_blocks.len(),
            block_size: Q8_0_BLOCK_BYTES,
        });
    }
    let mut acc: i64 = 0;
    for blk in 0..n_blocks {
        let a = &a_blocks[blk * Q8_0_BLOCK_BYTES..(blk + 1) * Q8_0_BLOCK_BYTES];
        let b = &b_blocks[blk * Q8_0_BLOCK_BYTES..(blk + 1) * Q8_0_BLOCK_BYTES];
        let da = f16_bits_to_fx(u16::from_le_bytes([a[0], a[1]]));
        let db = f16_bits_to_fx(u16::from_le_bytes([b[0], b[1]]));
        let mut isum: i32 = 0;
        for i in 0..QK8_0 {
            isum += (a[2 + i] as i8 as i32) * (b[2 + i] as i8 as i32);
        }
        let scale = fixed::mul(da, db);
        // `isum` is a raw integer sum, not Q16.16; scale it directly rather
        // than through `fixed::mul`, which would halve its exponent twice.
        // Accumulate in i64 since `scale * isum` can exceed i32 range.
        acc += (scale as i64) * (isum as i64);
    }
    Ok(acc as Fx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_q8_0(scale: f32, values: &[i8; QK8_0]) -> [u8; Q8_0_BLOCK_BYTES] {
        let mut block = [0u8; Q8_0_BLOCK_BYTES];
        let bits = f16::from_f32(scale).to_bits();
        block[0..2].copy_from_slice(&bits.to_le_bytes());
        for (i, v) in values.iter().enumerate() {
            block[2 + i] = *v as u8;
        }
        block
    }

    #[test]
    fn q8_0_round_trip_within_one_ulp() {
        let scale = 0.1_f32;
        let mut values = [0i8; QK8_0];
        for (i, v) in values.iter_mut().enumerate() {
            *v = (i as i32 - 16) as i8;
        }
        let block = encode_q8_0(scale, &values);
        let mut out = [0 as Fx; QK8_0];
        dequantize_block_q8_0(&block, &mut out).unwrap();

        for i in 0..QK8_0 {
            let expected = fixed::mul(fixed::from_f32(scale), fixed::from_int(values[i] as i32));
            assert!((out[i] - expected).abs() <= 1, "index {} got {} want {}", i, out[i], expected);
        }
    }

    #[test]
    fn type_codes_map_to_known_variants() {
        assert_eq!(QuantType::from_u32(8).unwrap(), QuantType::Q8_0);
        assert_eq!(QuantType::from_u32(12).unwrap(), QuantType::Q4K);
        assert!(QuantType::from_u32(99).is_err());
    }

    #[test]
    fn malformed_length_is_rejected() {
        let bad = [0u8; 10];
        let mut out = [0 as Fx; QK8_0];
        let err = dequantize_block_q8_0(&bad, &mut out).unwrap_err();
        assert!(matches!(err, LlmError::MalformedBlockLength { .. }));
    }

    #[test]
    fn q4_k_decodes_full_superblock_without_panicking() {
        let block = [0u8; Q4_K_BLOCK_BYTES];
        let mut out = [0 as Fx; QK_K];
        dequantize_block_q4_k(&block, &mut out).unwrap();
        // An all-zero block decodes to all-zero minus min offsets, but with
        // dmin == 0 (scale bits all zero) the result is all zero.
        assert!(out.iter().all(|&v| v == 0));
    }

    #[test]
    fn q6_k_decodes_full_superblock_without_panicking() {
        let block = [0u8; Q6_K_BLOCK_BYTES];
        let mut out = [0 as Fx; QK_K];
        dequantize_block_q6_k(&block, &mut out).unwrap();
        assert_eq!(out.len(), QK_K);
    }

    #[test]
    fn dequantize_tensor_dispatches_by_type() {
        let blocks = 2;
        let src = alloc::vec![0u8; blocks * Q8_0_BLOCK_BYTES];
        let mut out = alloc::vec![0 as Fx; blocks * QK8_0];
        dequantize_tensor(QuantType::Q8_0, &src, blocks * QK8_0, &mut out).unwrap();
        assert_eq!(out.len(), blocks * QK8_0);
    }

    #[test]
    fn dequantize_tensor_rejects_misaligned_length() {
        let src = alloc::vec![0u8; Q8_0_BLOCK_BYTES + 1];
        let mut out = alloc::vec![0 as Fx; QK8_0];
        let err = dequantize_tensor(QuantType::Q8_0, &src, QK8_0, &mut out).unwrap_err();
        assert!(matches!(err, LlmError::MalformedBlockLength { .. }));
    }

    #[test]
    fn fused_dot_product_matches_scalar_reference() {
        let mut a_vals = [0i8; QK8_0];
        let mut b_vals = [0i8; QK8_0];
        for i in 0..QK8_0 {
            a_vals[i] = (i as i32 - 16) as i8;
            b_vals[i] = ((QK8_0 - i) as i32 - 16) as i8;
        }
        let a = encode_q8_0(0.05, &a_vals);
        let b = encode_q8_0(0.02, &b_vals);
        let got = dot_q8_0(&a, &b, 1).unwrap();

        // Reference: sum of per-element products from the independently
        // tested dequantization path, not the formula under test.
        let mut dequant_a = [0 as Fx; QK8_0];
        let mut dequant_b = [0 as Fx; QK8_0];
        dequantize_block_q8_0(&a, &mut dequant_a).unwrap();
        dequantize_block_q8_0(&b, &mut dequant_b).unwrap();
        let mut expected: i64 = 0;
        for i in 0..QK8_0 {
            expected += fixed::mul(dequant_a[i], dequant_b[i]) as i64;
        }
        assert!((got as i64 - expected).abs() <= 2, "got {} expected {}", got, expected);
    }
}
