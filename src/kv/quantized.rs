//! Group-quantized layer store
//!
//! Packs key/value data at 4 or 8 bits per scalar with per-group affine
//! parameters. Groups run along the token axis: for a fixed (head, dim)
//! lane, `group_size` consecutive positions share one `f16` scale and
//! bias. Quantization is min/max affine per group:
//! `scale = (max - min) / (2^bits - 1)`, `bias = min`,
//! `code = round((x - bias) / scale)`.
//!
//! Packed extents carry no growth slack: the code arrays always cover
//! exactly `offset` positions and the scale/bias arrays exactly
//! `ceil(offset / group_size)` groups. Appending into a partially filled
//! boundary group dequantizes that group, merges the incoming raw tile,
//! and re-quantizes the affected region. Trimming to a non-group-aligned
//! boundary is refused; the caller treats that as a cache miss.

use half::f16;

use super::{dense::DenseKvCache, CacheError};

/// Packed K/V store for one transformer layer
#[derive(Debug, Clone)]
pub struct QuantizedKvCache {
    /// Packed key codes, `[kv_heads, offset, head_dim]` at `bits` per code
    kq: Vec<u8>,
    /// Per-group key scales, `[kv_heads, groups, head_dim]`
    ks: Vec<f16>,
    /// Per-group key biases, `[kv_heads, groups, head_dim]`
    kb: Vec<f16>,
    /// Packed value codes
    vq: Vec<u8>,
    /// Per-group value scales
    vs: Vec<f16>,
    /// Per-group value biases
    vb: Vec<f16>,
    kv_heads: usize,
    head_dim: usize,
    offset: usize,
    group_size: usize,
    bits: u8,
}

impl QuantizedKvCache {
    /// Quantize raw `[1, kv_heads, seq, head_dim]` K/V slices into a new store
    pub fn from_raw(
        keys: &[f32],
        values: &[f32],
        kv_heads: usize,
        head_dim: usize,
        seq: usize,
        group_size: usize,
        bits: u8,
    ) -> Result<Self, CacheError> {
        validate_format(head_dim, group_size, bits)?;
        let expected = kv_heads * seq * head_dim;
        if keys.len() != expected || values.len() != expected {
            return Err(CacheError::TileShapeMismatch {
                expected,
                actual: keys.len().max(values.len()),
            });
        }
        let (kq, ks, kb) = quantize_region(keys, kv_heads, head_dim, seq, group_size, bits);
        let (vq, vs, vb) = quantize_region(values, kv_heads, head_dim, seq, group_size, bits);
        Ok(Self {
            kq,
            ks,
            kb,
            vq,
            vs,
            vb,
            kv_heads,
            head_dim,
            offset: seq,
            group_size,
            bits,
        })
    }

    /// Quantize the live region of a dense store
    pub fn from_dense(
        dense: &DenseKvCache,
        group_size: usize,
        bits: u8,
    ) -> Result<Self, CacheError> {
        let (keys, values) = dense.live();
        Self::from_raw(
            &keys,
            &values,
            dense.kv_heads(),
            dense.head_dim(),
            dense.offset(),
            group_size,
            bits,
        )
    }

    /// Number of live token positions
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Token positions per quantization group
    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Code width in bits
    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// KV head count
    pub fn kv_heads(&self) -> usize {
        self.kv_heads
    }

    /// Per-head dimension
    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    /// Append `s_new` positions of raw K/V, re-quantizing the boundary group
    pub fn append(
        &mut self,
        keys_new: &[f32],
        values_new: &[f32],
        s_new: usize,
    ) -> Result<(), CacheError> {
        let expected = self.kv_heads * s_new * self.head_dim;
        if keys_new.len() != expected || values_new.len() != expected {
            return Err(CacheError::TileShapeMismatch {
                expected,
                actual: keys_new.len().max(values_new.len()),
            });
        }
        let rem = self.offset % self.group_size;
        let aligned = self.offset - rem;
        let merged_seq = rem + s_new;

        // Raw tail = dequantized boundary group content + the incoming tile
        let merged_k = self.merge_tail(
            &self.kq,
            &self.ks,
            &self.kb,
            keys_new,
            aligned,
            rem,
            s_new,
        );
        let merged_v = self.merge_tail(
            &self.vq,
            &self.vs,
            &self.vb,
            values_new,
            aligned,
            rem,
            s_new,
        );

        let (mkq, mks, mkb) = quantize_region(
            &merged_k,
            self.kv_heads,
            self.head_dim,
            merged_seq,
            self.group_size,
            self.bits,
        );
        let (mvq, mvs, mvb) = quantize_region(
            &merged_v,
            self.kv_heads,
            self.head_dim,
            merged_seq,
            self.group_size,
            self.bits,
        );

        let new_offset = self.offset + s_new;
        self.kq = self.stitch_codes(&self.kq, &mkq, aligned, merged_seq, new_offset);
        self.vq = self.stitch_codes(&self.vq, &mvq, aligned, merged_seq, new_offset);
        let (ks, kb) = self.stitch_groups(&self.ks, &self.kb, &mks, &mkb, aligned, new_offset);
        let (vs, vb) = self.stitch_groups(&self.vs, &self.vb, &mvs, &mvb, aligned, new_offset);
        self.ks = ks;
        self.kb = kb;
        self.vs = vs;
        self.vb = vb;
        self.offset = new_offset;
        Ok(())
    }

    /// Remove the last `n` positions by rebuilding sliced inner stores
    ///
    /// Refused unless the new boundary lands on a whole group, since a
    /// partial group cannot be re-quantized without the raw scalars.
    pub fn trim(&mut self, n: usize) -> Result<usize, CacheError> {
        if n > self.offset {
            return Err(CacheError::TrimBeyondOffset {
                requested: n,
                offset: self.offset,
            });
        }
        let new_offset = self.offset - n;
        if new_offset % self.group_size != 0 {
            return Err(CacheError::UnalignedTrim {
                requested: n,
                offset: self.offset,
                group_size: self.group_size,
            });
        }
        let kv_heads = self.kv_heads;
        let head_dim = self.head_dim;
        let old_offset = self.offset;
        let new_groups = new_offset / self.group_size;
        let old_groups = old_offset.div_ceil(self.group_size);
        let rb = row_bytes(head_dim, self.bits);

        let slice_codes = move |codes: &[u8]| {
            let mut out = vec![0u8; kv_heads * new_offset * rb];
            for h in 0..kv_heads {
                let src = h * old_offset * rb;
                let dst = h * new_offset * rb;
                let len = new_offset * rb;
                out[dst..dst + len].copy_from_slice(&codes[src..src + len]);
            }
            out
        };
        let slice_groups = move |params: &[f16]| {
            let mut out = vec![f16::ZERO; kv_heads * new_groups * head_dim];
            for h in 0..kv_heads {
                let src = h * old_groups * head_dim;
                let dst = h * new_groups * head_dim;
                let len = new_groups * head_dim;
                out[dst..dst + len].copy_from_slice(&params[src..src + len]);
            }
            out
        };

        self.kq = slice_codes(&self.kq);
        self.vq = slice_codes(&self.vq);
        self.ks = slice_groups(&self.ks);
        self.kb = slice_groups(&self.kb);
        self.vs = slice_groups(&self.vs);
        self.vb = slice_groups(&self.vb);
        self.offset = new_offset;
        Ok(n)
    }

    /// Resident bytes across all six owned tensors
    pub fn size_bytes(&self) -> usize {
        self.kq.len()
            + self.vq.len()
            + (self.ks.len() + self.kb.len() + self.vs.len() + self.vb.len())
                * std::mem::size_of::<f16>()
    }

    /// Dequantize the full live region as `([kv_heads, offset, head_dim], same)`
    pub fn live(&self) -> (Vec<f32>, Vec<f32>) {
        (
            dequantize_region(
                &self.kq,
                &self.ks,
                &self.kb,
                self.kv_heads,
                self.head_dim,
                self.offset,
                self.group_size,
                self.bits,
            ),
            dequantize_region(
                &self.vq,
                &self.vs,
                &self.vb,
                self.kv_heads,
                self.head_dim,
                self.offset,
                self.group_size,
                self.bits,
            ),
        )
    }

    /// Dequantized boundary-group tail followed by the incoming raw tile,
    /// `[kv_heads, rem + s_new, head_dim]`
    #[allow(clippy::too_many_arguments)]
    fn merge_tail(
        &self,
        codes: &[u8],
        scales: &[f16],
        biases: &[f16],
        incoming: &[f32],
        aligned: usize,
        rem: usize,
        s_new: usize,
    ) -> Vec<f32> {
        let rb = row_bytes(self.head_dim, self.bits);
        let groups = self.offset.div_ceil(self.group_size);
        let merged_seq = rem + s_new;
        let mut out = vec![0.0f32; self.kv_heads * merged_seq * self.head_dim];
        for h in 0..self.kv_heads {
            for s in 0..rem {
                let row = (h * self.offset + aligned + s) * rb;
                let g = (aligned + s) / self.group_size;
                for d in 0..self.head_dim {
                    let p = (h * groups + g) * self.head_dim + d;
                    let code = unpack_code(codes, row, d, self.bits);
                    out[(h * merged_seq + s) * self.head_dim + d] =
                        scales[p].to_f32() * f32::from(code) + biases[p].to_f32();
                }
            }
            for s in 0..s_new {
                let src = (h * s_new + s) * self.head_dim;
                let dst = (h * merged_seq + rem + s) * self.head_dim;
                out[dst..dst + self.head_dim]
                    .copy_from_slice(&incoming[src..src + self.head_dim]);
            }
        }
        out
    }

    /// Aligned prefix of the old codes followed by the re-quantized tail
    fn stitch_codes(
        &self,
        old: &[u8],
        merged: &[u8],
        aligned: usize,
        merged_seq: usize,
        new_offset: usize,
    ) -> Vec<u8> {
        let rb = row_bytes(self.head_dim, self.bits);
        let mut out = vec![0u8; self.kv_heads * new_offset * rb];
        for h in 0..self.kv_heads {
            let dst = h * new_offset * rb;
            out[dst..dst + aligned * rb]
                .copy_from_slice(&old[h * self.offset * rb..h * self.offset * rb + aligned * rb]);
            out[dst + aligned * rb..dst + new_offset * rb]
                .copy_from_slice(&merged[h * merged_seq * rb..(h * merged_seq + merged_seq) * rb]);
        }
        out
    }

    /// Aligned-group prefix of the old scale/bias arrays followed by the
    /// re-quantized tail groups
    fn stitch_groups(
        &self,
        old_scales: &[f16],
        old_biases: &[f16],
        merged_scales: &[f16],
        merged_biases: &[f16],
        aligned: usize,
        new_offset: usize,
    ) -> (Vec<f16>, Vec<f16>) {
        let d = self.head_dim;
        let old_groups = self.offset.div_ceil(self.group_size);
        let aligned_groups = aligned / self.group_size;
        let new_groups = new_offset.div_ceil(self.group_size);
        let tail_groups = new_groups - aligned_groups;
        let mut scales = vec![f16::ZERO; self.kv_heads * new_groups * d];
        let mut biases = vec![f16::ZERO; self.kv_heads * new_groups * d];
        for h in 0..self.kv_heads {
            let dst = h * new_groups * d;
            scales[dst..dst + aligned_groups * d].copy_from_slice(
                &old_scales[h * old_groups * d..h * old_groups * d + aligned_groups * d],
            );
            biases[dst..dst + aligned_groups * d].copy_from_slice(
                &old_biases[h * old_groups * d..h * old_groups * d + aligned_groups * d],
            );
            scales[dst + aligned_groups * d..dst + new_groups * d]
                .copy_from_slice(&merged_scales[h * tail_groups * d..(h + 1) * tail_groups * d]);
            biases[dst + aligned_groups * d..dst + new_groups * d]
                .copy_from_slice(&merged_biases[h * tail_groups * d..(h + 1) * tail_groups * d]);
        }
        (scales, biases)
    }
}

/// Reject formats the packing cannot represent
fn validate_format(head_dim: usize, group_size: usize, bits: u8) -> Result<(), CacheError> {
    if bits != 4 && bits != 8 {
        return Err(CacheError::UnsupportedBits { bits });
    }
    if group_size == 0 || group_size % 8 != 0 || (bits == 4 && head_dim % 2 != 0) {
        return Err(CacheError::UnsupportedGroup {
            group_size,
            head_dim,
        });
    }
    Ok(())
}

/// Bytes per packed `[head_dim]` row
fn row_bytes(head_dim: usize, bits: u8) -> usize {
    head_dim * usize::from(bits) / 8
}

fn pack_code(data: &mut [u8], row_start: usize, d: usize, bits: u8, code: u8) {
    if bits == 8 {
        data[row_start + d] = code;
    } else if d % 2 == 0 {
        data[row_start + d / 2] |= code & 0x0F;
    } else {
        data[row_start + d / 2] |= code << 4;
    }
}

fn unpack_code(data: &[u8], row_start: usize, d: usize, bits: u8) -> u8 {
    if bits == 8 {
        data[row_start + d]
    } else if d % 2 == 0 {
        data[row_start + d / 2] & 0x0F
    } else {
        data[row_start + d / 2] >> 4
    }
}

/// Quantize a raw `[kv_heads, seq, head_dim]` region into packed codes plus
/// per-group scale/bias arrays
///
/// Codes are computed against the `f16`-rounded scale and bias so the
/// dequantized value matches what a reader will reconstruct. A constant
/// group stores scale zero and code zero.
fn quantize_region(
    raw: &[f32],
    kv_heads: usize,
    head_dim: usize,
    seq: usize,
    group_size: usize,
    bits: u8,
) -> (Vec<u8>, Vec<f16>, Vec<f16>) {
    let groups = seq.div_ceil(group_size);
    let levels = (1u32 << bits) - 1;
    let mut scales = vec![f16::ZERO; kv_heads * groups * head_dim];
    let mut biases = vec![f16::ZERO; kv_heads * groups * head_dim];
    for h in 0..kv_heads {
        for g in 0..groups {
            let s0 = g * group_size;
            let s1 = (s0 + group_size).min(seq);
            for d in 0..head_dim {
                let mut lo = f32::INFINITY;
                let mut hi = f32::NEG_INFINITY;
                for s in s0..s1 {
                    let x = raw[(h * seq + s) * head_dim + d];
                    lo = lo.min(x);
                    hi = hi.max(x);
                }
                let p = (h * groups + g) * head_dim + d;
                scales[p] = f16::from_f32((hi - lo) / levels as f32);
                biases[p] = f16::from_f32(lo);
            }
        }
    }

    let rb = row_bytes(head_dim, bits);
    let mut data = vec![0u8; kv_heads * seq * rb];
    for h in 0..kv_heads {
        for s in 0..seq {
            let g = s / group_size;
            let row = (h * seq + s) * rb;
            for d in 0..head_dim {
                let p = (h * groups + g) * head_dim + d;
                let scale = scales[p].to_f32();
                let code = if scale > 0.0 {
                    let x = raw[(h * seq + s) * head_dim + d];
                    let q = ((x - biases[p].to_f32()) / scale).round();
                    q.clamp(0.0, levels as f32) as u8
                } else {
                    0
                };
                pack_code(&mut data, row, d, bits, code);
            }
        }
    }
    (data, scales, biases)
}

/// Reconstruct a raw `[kv_heads, seq, head_dim]` region from packed codes
#[allow(clippy::too_many_arguments)]
fn dequantize_region(
    codes: &[u8],
    scales: &[f16],
    biases: &[f16],
    kv_heads: usize,
    head_dim: usize,
    seq: usize,
    group_size: usize,
    bits: u8,
) -> Vec<f32> {
    let groups = seq.div_ceil(group_size);
    let rb = row_bytes(head_dim, bits);
    let mut out = vec![0.0f32; kv_heads * seq * head_dim];
    for h in 0..kv_heads {
        for s in 0..seq {
            let g = s / group_size;
            let row = (h * seq + s) * rb;
            for d in 0..head_dim {
                let p = (h * groups + g) * head_dim + d;
                let code = unpack_code(codes, row, d, bits);
                out[(h * seq + s) * head_dim + d] =
                    scales[p].to_f32() * f32::from(code) + biases[p].to_f32();
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic pseudo-random values in [-1, 1]
    fn raw_region(kv_heads: usize, seq: usize, head_dim: usize, seed: u64) -> Vec<f32> {
        let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
        (0..kv_heads * seq * head_dim)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state >> 40) as f32 / (1u64 << 23) as f32 - 1.0
            })
            .collect()
    }

    fn cache_from(seq: usize, group_size: usize, bits: u8) -> QuantizedKvCache {
        let keys = raw_region(2, seq, 8, 7);
        let values = raw_region(2, seq, 8, 13);
        QuantizedKvCache::from_raw(&keys, &values, 2, 8, seq, group_size, bits).expect("test")
    }

    fn max_abs_err(a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b)
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f32::max)
    }

    // === Format validation ===

    #[test]
    fn test_rejects_bad_bits() {
        let raw = raw_region(1, 8, 8, 1);
        let result = QuantizedKvCache::from_raw(&raw, &raw, 1, 8, 8, 8, 6);
        assert!(matches!(result, Err(CacheError::UnsupportedBits { bits: 6 })));
    }

    #[test]
    fn test_rejects_bad_group() {
        let raw = raw_region(1, 8, 8, 1);
        for group in [0, 12] {
            let result = QuantizedKvCache::from_raw(&raw, &raw, 1, 8, 8, group, 8);
            assert!(matches!(result, Err(CacheError::UnsupportedGroup { .. })));
        }
    }

    #[test]
    fn test_rejects_odd_head_dim_at_4_bits() {
        let raw = raw_region(1, 8, 7, 1);
        let result = QuantizedKvCache::from_raw(&raw, &raw, 1, 7, 8, 8, 4);
        assert!(matches!(result, Err(CacheError::UnsupportedGroup { .. })));
    }

    // === Round trip ===

    #[test]
    fn test_roundtrip_error_bound_q8() {
        let keys = raw_region(2, 16, 8, 3);
        let values = raw_region(2, 16, 8, 5);
        let cache = QuantizedKvCache::from_raw(&keys, &values, 2, 8, 16, 8, 8).expect("test");
        let (dk, dv) = cache.live();
        // range <= 2.0 over [-1, 1], so q8 half-step is ~0.004 plus f16 noise
        assert!(max_abs_err(&keys, &dk) < 0.02);
        assert!(max_abs_err(&values, &dv) < 0.02);
    }

    #[test]
    fn test_roundtrip_error_bound_q4() {
        let keys = raw_region(2, 16, 8, 3);
        let values = raw_region(2, 16, 8, 5);
        let cache = QuantizedKvCache::from_raw(&keys, &values, 2, 8, 16, 8, 4).expect("test");
        let (dk, dv) = cache.live();
        // q4 half-step over a range of 2.0 is ~0.067
        assert!(max_abs_err(&keys, &dk) < 0.1);
        assert!(max_abs_err(&values, &dv) < 0.1);
    }

    #[test]
    fn test_constant_group_roundtrips_via_bias() {
        let raw = vec![0.25f32; 64];
        let cache = QuantizedKvCache::from_raw(&raw, &raw, 1, 8, 8, 8, 4).expect("test");
        let (dk, _) = cache.live();
        assert!(max_abs_err(&raw, &dk) < 1e-3);
    }

    // === Append ===

    #[test]
    fn test_append_group_aligned() {
        let mut cache = cache_from(8, 8, 8);
        let keys = raw_region(2, 8, 8, 21);
        let values = raw_region(2, 8, 8, 22);
        cache.append(&keys, &values, 8).expect("test");
        assert_eq!(cache.offset(), 16);
        let (dk, _) = cache.live();
        let tail: Vec<f32> = (0..2)
            .flat_map(|h| dk[(h * 16 + 8) * 8..(h * 16 + 16) * 8].to_vec())
            .collect();
        assert!(max_abs_err(&keys, &tail) < 0.02);
    }

    #[test]
    fn test_append_into_partial_boundary_group() {
        // 12 live tokens with group 8 leaves a 4-token partial group
        let keys_a = raw_region(1, 12, 8, 31);
        let values_a = raw_region(1, 12, 8, 32);
        let mut cache =
            QuantizedKvCache::from_raw(&keys_a, &values_a, 1, 8, 12, 8, 8).expect("test");
        let keys_b = raw_region(1, 6, 8, 33);
        let values_b = raw_region(1, 6, 8, 34);
        cache.append(&keys_b, &values_b, 6).expect("test");
        assert_eq!(cache.offset(), 18);

        let (dk, _) = cache.live();
        assert!(max_abs_err(&keys_a, &dk[..12 * 8]) < 0.05);
        assert!(max_abs_err(&keys_b, &dk[12 * 8..]) < 0.05);
    }

    #[test]
    fn test_append_single_tokens_tracks_offset() {
        let mut cache = cache_from(8, 8, 4);
        for i in 0..5 {
            let k = raw_region(2, 1, 8, 40 + i);
            let v = raw_region(2, 1, 8, 50 + i);
            cache.append(&k, &v, 1).expect("test");
        }
        assert_eq!(cache.offset(), 13);
    }

    #[test]
    fn test_append_shape_mismatch() {
        let mut cache = cache_from(8, 8, 8);
        let short = vec![0.0f32; 3];
        assert!(matches!(
            cache.append(&short, &short, 1),
            Err(CacheError::TileShapeMismatch { .. })
        ));
        assert_eq!(cache.offset(), 8);
    }

    // === Trim ===

    #[test]
    fn test_trim_group_aligned() {
        let mut cache = cache_from(24, 8, 8);
        let bytes_before = cache.size_bytes();
        let removed = cache.trim(16).expect("test");
        assert_eq!(removed, 16);
        assert_eq!(cache.offset(), 8);
        assert!(cache.size_bytes() < bytes_before);
    }

    #[test]
    fn test_trim_refuses_unaligned_boundary() {
        let mut cache = cache_from(24, 8, 8);
        let result = cache.trim(3);
        assert!(matches!(result, Err(CacheError::UnalignedTrim { .. })));
        // refused trim must not corrupt the store
        assert_eq!(cache.offset(), 24);
    }

    #[test]
    fn test_trim_to_zero() {
        let mut cache = cache_from(16, 8, 4);
        cache.trim(16).expect("test");
        assert_eq!(cache.offset(), 0);
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn test_trim_beyond_offset() {
        let mut cache = cache_from(8, 8, 8);
        assert!(matches!(
            cache.trim(9),
            Err(CacheError::TrimBeyondOffset { .. })
        ));
    }

    #[test]
    fn test_trim_preserves_kept_prefix() {
        let keys = raw_region(1, 16, 8, 61);
        let values = raw_region(1, 16, 8, 62);
        let mut cache =
            QuantizedKvCache::from_raw(&keys, &values, 1, 8, 16, 8, 8).expect("test");
        let (before, _) = cache.live();
        cache.trim(8).expect("test");
        let (after, _) = cache.live();
        assert_eq!(&before[..8 * 8], &after[..]);
    }

    // === Size ===

    #[test]
    fn test_quantized_is_smaller_than_dense() {
        let cache = cache_from(64, 8, 4);
        let dense_bytes = 2 * 2 * 64 * 8 * std::mem::size_of::<f32>();
        assert!(cache.size_bytes() < dense_bytes);
    }

    #[test]
    fn test_from_dense_matches_live_region() {
        let mut dense = DenseKvCache::new(2, 8, 8);
        let keys = raw_region(2, 16, 8, 71);
        let values = raw_region(2, 16, 8, 72);
        dense.append(&keys, &values, 16).expect("test");
        let cache = QuantizedKvCache::from_dense(&dense, 8, 8).expect("test");
        assert_eq!(cache.offset(), 16);
        let (dk, dv) = cache.live();
        assert!(max_abs_err(&keys, &dk) < 0.02);
        assert!(max_abs_err(&values, &dv) < 0.02);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_roundtrip_within_group_step(
                seq in 1usize..40,
                seed in 0u64..1000,
                q4 in proptest::bool::ANY,
            ) {
                let bits = if q4 { 4 } else { 8 };
                let raw = raw_region(1, seq, 8, seed);
                let cache =
                    QuantizedKvCache::from_raw(&raw, &raw, 1, 8, seq, 8, bits).expect("quantize");
                let (dk, _) = cache.live();
                // half a quantization step over the [-1, 1] span, plus f16 slack
                let tol = 2.0 / (((1u32 << bits) - 1) as f32) * 0.51 + 0.01;
                prop_assert!(max_abs_err(&raw, &dk) <= tol);
            }

            #[test]
            fn prop_trim_idempotence(groups in 1usize..6, drop in 0usize..6) {
                let drop = drop.min(groups);
                let mut cache = cache_from(groups * 8, 8, 8);
                cache.trim(drop * 8).expect("trim");
                let after = (cache.offset(), cache.size_bytes());
                cache.trim(0).expect("trim zero");
                prop_assert_eq!((cache.offset(), cache.size_bytes()), after);
            }
        }
    }
}
