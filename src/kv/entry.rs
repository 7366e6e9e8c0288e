//! Cache entry
//!
//! One entry per bucket key: the exact prompt+generated token ids whose
//! attention state it holds, the per-layer stores, access timestamps, and
//! a byte estimate. Every layer shares a common offset equal to the token
//! count.

use std::time::{Duration, Instant};

use super::layer::LayerCache;

/// One cached (tokens, layer stores) value under a bucket key
#[derive(Debug)]
pub struct CacheEntry {
    /// Bucket key this entry lives under
    pub key: String,
    /// Prompt+generated token ids, in model order
    pub tokens: Vec<u32>,
    /// Per-layer stores, in layer order
    pub layers: Vec<LayerCache>,
    /// Creation instant
    pub created_at: Instant,
    /// Last lookup hit or write-back
    pub last_accessed_at: Instant,
    /// Estimated resident bytes
    pub bytes: usize,
}

impl CacheEntry {
    /// Build an entry and compute its byte estimate
    pub fn new(key: String, tokens: Vec<u32>, layers: Vec<LayerCache>, now: Instant) -> Self {
        let mut entry = Self {
            key,
            tokens,
            layers,
            created_at: now,
            last_accessed_at: now,
            bytes: 0,
        };
        entry.recompute_bytes();
        entry
    }

    /// Whether the entry is still reachable at `now` under `ttl`
    pub fn valid_at(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_accessed_at) < ttl
    }

    /// Mark the entry as accessed
    pub fn touch(&mut self, now: Instant) {
        self.last_accessed_at = now;
    }

    /// Recompute and return the byte estimate
    ///
    /// Sum of layer tensor bytes plus the token list itself.
    pub fn recompute_bytes(&mut self) -> usize {
        let layer_bytes: usize = self.layers.iter().map(LayerCache::size_bytes).sum();
        self.bytes = layer_bytes + self.tokens.len() * std::mem::size_of::<u32>();
        self.bytes
    }
}
