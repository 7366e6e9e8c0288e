//! Tagged layer-cache variant
//!
//! One transformer layer's cached K/V state is either dense or
//! group-quantized. The uniform adapter contract (append, trim, size,
//! token count) dispatches on the tag; there is no trait object and no
//! virtual hierarchy.

use super::{dense::DenseKvCache, quantized::QuantizedKvCache, CacheError};

/// Materialized f32 view over a layer's live K/V region
///
/// Attention consumes plain `[kv_heads, seq_len, head_dim]` slices; for a
/// quantized store the view is the dequantized reconstruction.
#[derive(Debug, Clone)]
pub struct KvView {
    /// Key data, `[kv_heads, seq_len, head_dim]`
    pub keys: Vec<f32>,
    /// Value data, `[kv_heads, seq_len, head_dim]`
    pub values: Vec<f32>,
    /// KV head count
    pub kv_heads: usize,
    /// Per-head dimension
    pub head_dim: usize,
    /// Live positions covered by this view
    pub seq_len: usize,
}

/// Per-layer cache store, dense or group-quantized
#[derive(Debug, Clone)]
pub enum LayerCache {
    /// Growable f32 store with capacity slack
    Dense(DenseKvCache),
    /// Packed low-bit store with per-group scale/bias
    Quantized(QuantizedKvCache),
}

impl LayerCache {
    /// Extend the live region by `s_new` positions and return a view over
    /// the whole live region, ready for attention
    pub fn append(
        &mut self,
        keys_new: &[f32],
        values_new: &[f32],
        s_new: usize,
    ) -> Result<KvView, CacheError> {
        match self {
            Self::Dense(cache) => cache.append(keys_new, values_new, s_new)?,
            Self::Quantized(cache) => cache.append(keys_new, values_new, s_new)?,
        }
        Ok(self.view())
    }

    /// Remove the last `n` positions, returning the count actually removed
    pub fn trim(&mut self, n: usize) -> Result<usize, CacheError> {
        match self {
            Self::Dense(cache) => cache.trim(n),
            Self::Quantized(cache) => cache.trim(n),
        }
    }

    /// Resident bytes across all owned tensors
    pub fn size_bytes(&self) -> usize {
        match self {
            Self::Dense(cache) => cache.size_bytes(),
            Self::Quantized(cache) => cache.size_bytes(),
        }
    }

    /// Number of live token positions
    pub fn current_tokens(&self) -> usize {
        match self {
            Self::Dense(cache) => cache.offset(),
            Self::Quantized(cache) => cache.offset(),
        }
    }

    /// Both backings support trimming
    pub fn is_trimmable(&self) -> bool {
        true
    }

    /// Whether this layer is stored in packed form
    pub fn is_quantized(&self) -> bool {
        matches!(self, Self::Quantized(_))
    }

    /// Materialize the live region
    pub fn view(&self) -> KvView {
        let ((keys, values), kv_heads, head_dim, seq_len) = match self {
            Self::Dense(cache) => (
                cache.live(),
                cache.kv_heads(),
                cache.head_dim(),
                cache.offset(),
            ),
            Self::Quantized(cache) => (
                cache.live(),
                cache.kv_heads(),
                cache.head_dim(),
                cache.offset(),
            ),
        };
        KvView {
            keys,
            values,
            kv_heads,
            head_dim,
            seq_len,
        }
    }
}
