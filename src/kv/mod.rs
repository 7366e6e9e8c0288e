//! Prompt-Prefix KV Cache
//!
//! Across independent requests this subsystem detects the longest
//! prompt-token prefix already processed under identical generation
//! parameters, reuses the attention key/value tensors computed for that
//! prefix, trims any trailing divergence, feeds the live stores into the
//! next decode, and writes the extended cache back under bounded memory
//! and time-to-live admission.
//!
//! ## Structure
//!
//! - [`key`] composes the bucket key that partitions entries by model and
//!   parameter set.
//! - [`dense`] and [`quantized`] are the two layer-store backings; [`layer`]
//!   is the tagged variant dispatching the uniform adapter contract.
//! - [`entry`] is one cached (tokens, per-layer stores, timestamps) value.
//! - [`manager`] owns the bucket map: lookup, trim, write-back, LRU and TTL
//!   eviction, quantization promotion, stats.
//! - [`bridge`] is the two-call facade (`begin`/`end`) the request handlers
//!   drive; handlers never see tensors.
//!
//! ## Ownership
//!
//! On a hit the manager detaches the entry from its table and hands full
//! ownership of the layer stores to the request inside a [`CacheHandle`].
//! Ownership returns at write-back. The manager never aliases tensors that
//! are out on loan, so there is no reference counting and no concurrent
//! mutation of a cache feeding a live decode.

// Module-level clippy allows
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_errors_doc)]

pub mod bridge;
pub mod dense;
pub mod entry;
pub mod key;
pub mod layer;
pub mod manager;
pub mod quantized;

pub use bridge::{CacheHandle, CacheLayout, GenerationBridge};
pub use dense::DenseKvCache;
pub use entry::CacheEntry;
pub use key::compose_key;
pub use layer::{KvView, LayerCache};
pub use manager::{CacheStatsReport, CacheStatus, PromptKvManager};
pub use quantized::QuantizedKvCache;

use thiserror::Error;

use crate::error::RecordarError;

/// Default capacity growth block for dense stores, in token positions
pub const DEFAULT_STEP: usize = 256;

/// Error type for KV cache operations
///
/// These never reach user requests. The manager converts every cache
/// failure into a miss and logs it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Trim would leave a quantized store on a non-group boundary
    #[error(
        "trim of {requested} tokens at offset {offset} does not land on a group_size={group_size} boundary"
    )]
    UnalignedTrim {
        /// Tokens requested to remove
        requested: usize,
        /// Live length before the trim
        offset: usize,
        /// Quantization group size
        group_size: usize,
    },

    /// Trim asked for more tokens than are cached
    #[error("trim of {requested} tokens exceeds cached length {offset}")]
    TrimBeyondOffset {
        /// Tokens requested to remove
        requested: usize,
        /// Live length before the trim
        offset: usize,
    },

    /// Appended tile does not match the store geometry
    #[error("appended tile has {actual} values, expected {expected}")]
    TileShapeMismatch {
        /// Values expected from [1, kv_heads, s_new, head_dim]
        expected: usize,
        /// Values received
        actual: usize,
    },

    /// Handle and entry disagree on layer count
    #[error("handle carries {handle_layers} layers, expected {expected_layers}")]
    LayerCountMismatch {
        /// Layers in the returned handle
        handle_layers: usize,
        /// Layers the model geometry requires
        expected_layers: usize,
    },

    /// Layer offsets within one handle disagree
    #[error("layer {layer} holds {layer_tokens} tokens, expected {expected_tokens}")]
    OffsetMismatch {
        /// Index of the offending layer
        layer: usize,
        /// Tokens that layer holds
        layer_tokens: usize,
        /// Tokens every layer must hold
        expected_tokens: usize,
    },

    /// Quantization width outside {4, 8}
    #[error("unsupported kv quantization width: {bits} bits")]
    UnsupportedBits {
        /// Requested width
        bits: u8,
    },

    /// Group size zero, not a multiple of 8, or incompatible with head_dim
    #[error("unsupported kv group configuration: group_size={group_size}, head_dim={head_dim}")]
    UnsupportedGroup {
        /// Requested group size
        group_size: usize,
        /// Head dimension of the store
        head_dim: usize,
    },
}

/// Per-request generation parameters the cache core consumes
///
/// `temperature` and `top_p` only participate in bucket-key composition;
/// the sampling itself happens in [`crate::sampling`]. The `kv_*` fields
/// drive quantized storage and write-back promotion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KvCacheParams {
    /// Sampling temperature
    pub temperature: f32,
    /// Nucleus sampling cumulative-probability cutoff
    pub top_p: f32,
    /// Bit width for quantized KV storage; `None` keeps caches dense
    pub kv_bits: Option<u8>,
    /// Token positions per quantization group
    pub kv_group_size: usize,
    /// Dense caches longer than this are promoted on write-back
    pub kv_quantization_start: usize,
}

impl Default for KvCacheParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            kv_bits: None,
            kv_group_size: 64,
            kv_quantization_start: 5000,
        }
    }
}

impl KvCacheParams {
    /// Validate the quantization fields
    ///
    /// Called at the server boundary before any request reaches the
    /// manager, so the core can assume well-formed parameters.
    pub fn validate(&self) -> Result<(), RecordarError> {
        if let Some(bits) = self.kv_bits {
            if bits != 4 && bits != 8 {
                return Err(RecordarError::InvalidParameter {
                    name: "kv_bits".to_string(),
                    reason: format!("must be 4 or 8, got {bits}"),
                });
            }
        }
        if self.kv_group_size == 0 || self.kv_group_size % 8 != 0 {
            return Err(RecordarError::InvalidParameter {
                name: "kv_group_size".to_string(),
                reason: format!(
                    "must be a positive multiple of 8, got {}",
                    self.kv_group_size
                ),
            });
        }
        Ok(())
    }
}
