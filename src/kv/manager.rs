//! Prompt KV cache manager
//!
//! Owns the bucket map and implements lookup, write-back, admission, and
//! eviction. All state mutation is serialized by the embedding server
//! (the manager sits behind a mutex in `AppState`); tensor append/trim and
//! the generation loop run outside that critical section on request-owned
//! handles.
//!
//! Failure policy: cache problems never fail a user request. A refused
//! trim, an invariant violation, or a promotion failure degrades to a
//! miss (or to dense storage) and is logged.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, warn};

use super::bridge::CacheHandle;
use super::entry::CacheEntry;
use super::key::compose_key;
use super::layer::LayerCache;
use super::quantized::QuantizedKvCache;
use super::{CacheError, KvCacheParams};
use crate::config::CacheConfig;

/// Internal counters
#[derive(Debug, Default, Clone)]
struct CacheStats {
    hits: u64,
    misses: u64,
    evictions: u64,
    total_tokens_reused: u64,
    total_tokens_processed: u64,
}

/// Stats snapshot served by `GET /v1/cache/status`
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStatsReport {
    /// Lookups that reused a prefix
    pub hits: u64,
    /// Lookups that found nothing reusable
    pub misses: u64,
    /// Entries removed under the byte ceiling
    pub evictions: u64,
    /// hits / (hits + misses), 0 when idle
    pub hit_rate: f64,
    /// Prompt tokens served from cache
    pub total_tokens_reused: u64,
    /// Prompt tokens the runtime had to evaluate
    pub total_tokens_processed: u64,
    /// total_tokens_reused / max(1, hits)
    pub average_tokens_reused: f64,
}

/// Occupancy snapshot served by `GET /v1/cache/status`
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    /// Live entries across all buckets
    pub entry_count: usize,
    /// Estimated resident bytes
    pub bytes: usize,
    /// `bytes` in megabytes
    pub bytes_mb: f64,
    /// Configured ceiling in megabytes
    pub max_bytes_mb: f64,
    /// Configured time-to-live in minutes
    pub ttl_minutes: u64,
}

/// Prompt-prefix KV cache manager
///
/// At most one entry exists per bucket key. On a hit the entry is
/// detached and its layer stores loaned to the request; a second lookup
/// under the same key meanwhile behaves as a miss, and the state only
/// becomes visible again at write-back.
pub struct PromptKvManager {
    entries: HashMap<String, CacheEntry>,
    total_bytes: usize,
    max_bytes: usize,
    ttl: Duration,
    stats: CacheStats,
}

impl PromptKvManager {
    /// Create a manager with an explicit byte ceiling and TTL
    pub fn new(max_bytes: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            total_bytes: 0,
            max_bytes,
            ttl,
            stats: CacheStats::default(),
        }
    }

    /// Create a manager from the server cache configuration
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_bytes(), config.ttl())
    }

    /// Look up cached state for a prompt, using the wall clock
    pub fn lookup(
        &mut self,
        model: &str,
        tokens: &[u32],
        params: &KvCacheParams,
    ) -> (Vec<u32>, Option<CacheHandle>) {
        self.lookup_at(Instant::now(), model, tokens, params)
    }

    /// Look up cached state for a prompt at an explicit instant
    ///
    /// Returns the token suffix the runtime still has to evaluate and, on
    /// a hit, the detached cache handle holding the reused prefix state.
    /// At least one token is always left for the decoder to consume.
    pub fn lookup_at(
        &mut self,
        now: Instant,
        model: &str,
        tokens: &[u32],
        params: &KvCacheParams,
    ) -> (Vec<u32>, Option<CacheHandle>) {
        let key = compose_key(model, params);
        self.sweep_expired(now);

        if tokens.is_empty() {
            self.record_miss(0);
            return (Vec::new(), None);
        }
        let Some(mut entry) = self.entries.remove(&key) else {
            self.record_miss(tokens.len());
            return (tokens.to_vec(), None);
        };
        // The entry is detached from here on. Either it goes out with the
        // handle or it is dropped; the map never sees it again as-is.
        self.total_bytes = self.total_bytes.saturating_sub(entry.bytes);

        let prefix = common_prefix_len(&entry.tokens, tokens).min(tokens.len() - 1);
        if prefix == 0 {
            debug!(key = %key, "prompt cache: no shared prefix, dropping entry");
            self.record_miss(tokens.len());
            return (tokens.to_vec(), None);
        }

        let divergent = entry.tokens.len() - prefix;
        if divergent > 0 {
            if let Err(err) = trim_layers(&mut entry.layers, divergent) {
                debug!(key = %key, error = %err, "prompt cache: trim refused, treating as miss");
                self.record_miss(tokens.len());
                return (tokens.to_vec(), None);
            }
        }
        entry.tokens.truncate(prefix);
        if let Err(err) = check_offsets(&entry.layers, prefix) {
            error!(key = %key, error = %err, "prompt cache: invariant violation, evicting entry");
            self.record_miss(tokens.len());
            return (tokens.to_vec(), None);
        }
        entry.touch(now);
        entry.recompute_bytes();

        self.stats.hits += 1;
        self.stats.total_tokens_reused += prefix as u64;
        self.stats.total_tokens_processed += (tokens.len() - prefix) as u64;
        debug!(
            key = %key,
            reused = prefix,
            to_process = tokens.len() - prefix,
            "prompt cache hit"
        );
        (
            tokens[prefix..].to_vec(),
            Some(CacheHandle::from_layers(entry.layers)),
        )
    }

    /// Write back extended cache state, using the wall clock
    pub fn write_back(
        &mut self,
        model: &str,
        full_tokens: &[u32],
        handle: CacheHandle,
        params: &KvCacheParams,
    ) {
        self.write_back_at(Instant::now(), model, full_tokens, handle, params);
    }

    /// Write back extended cache state at an explicit instant
    ///
    /// Applies quantization promotion, then admits the entry under the
    /// byte ceiling, evicting least-recently-used entries as needed.
    pub fn write_back_at(
        &mut self,
        now: Instant,
        model: &str,
        full_tokens: &[u32],
        handle: CacheHandle,
        params: &KvCacheParams,
    ) {
        let key = compose_key(model, params);
        let mut layers = handle.into_layers();
        if layers.is_empty() || full_tokens.is_empty() {
            warn!(key = %key, "prompt cache: empty handle at write-back, discarding");
            return;
        }
        if let Err(err) = check_offsets(&layers, full_tokens.len()) {
            error!(key = %key, error = %err, "prompt cache: handle mismatch at write-back, discarding");
            if let Some(prior) = self.entries.remove(&key) {
                self.total_bytes = self.total_bytes.saturating_sub(prior.bytes);
            }
            return;
        }

        if let Some(bits) = params.kv_bits {
            let promoted = promote_layers(
                &mut layers,
                params.kv_quantization_start,
                params.kv_group_size,
                bits,
            );
            if promoted > 0 {
                debug!(key = %key, promoted, "prompt cache: promoted dense layers to quantized");
            }
        }

        let entry = CacheEntry::new(key.clone(), full_tokens.to_vec(), layers, now);
        if let Some(prior) = self.entries.remove(&key) {
            self.total_bytes = self.total_bytes.saturating_sub(prior.bytes);
        }
        self.evict_until_fits(entry.bytes);
        self.total_bytes += entry.bytes;
        self.entries.insert(key, entry);
    }

    /// Drop all entries, keeping the stats counters
    pub fn clear(&mut self) {
        let dropped = self.entries.len();
        self.entries.clear();
        self.total_bytes = 0;
        if dropped > 0 {
            debug!(dropped, "prompt cache cleared");
        }
    }

    /// Stats counters snapshot
    pub fn stats(&self) -> CacheStatsReport {
        let s = &self.stats;
        let lookups = s.hits + s.misses;
        CacheStatsReport {
            hits: s.hits,
            misses: s.misses,
            evictions: s.evictions,
            hit_rate: if lookups > 0 {
                s.hits as f64 / lookups as f64
            } else {
                0.0
            },
            total_tokens_reused: s.total_tokens_reused,
            total_tokens_processed: s.total_tokens_processed,
            average_tokens_reused: s.total_tokens_reused as f64 / (s.hits.max(1)) as f64,
        }
    }

    /// Occupancy snapshot
    pub fn status(&self) -> CacheStatus {
        const MB: f64 = 1024.0 * 1024.0;
        CacheStatus {
            entry_count: self.entries.len(),
            bytes: self.total_bytes,
            bytes_mb: self.total_bytes as f64 / MB,
            max_bytes_mb: self.max_bytes as f64 / MB,
            ttl_minutes: self.ttl.as_secs() / 60,
        }
    }

    /// Live entry count
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Estimated resident bytes across live entries
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    fn sweep_expired(&mut self, now: Instant) {
        let ttl = self.ttl;
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.valid_at(now, ttl))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            if let Some(entry) = self.entries.remove(key) {
                self.total_bytes = self.total_bytes.saturating_sub(entry.bytes);
            }
        }
        if !expired.is_empty() {
            debug!(expired = expired.len(), "prompt cache: dropped expired entries");
        }
    }

    fn evict_until_fits(&mut self, incoming: usize) {
        while self.total_bytes + incoming > self.max_bytes && !self.entries.is_empty() {
            let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed_at)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            if let Some(entry) = self.entries.remove(&oldest) {
                self.total_bytes = self.total_bytes.saturating_sub(entry.bytes);
                self.stats.evictions += 1;
                debug!(key = %oldest, bytes = entry.bytes, "prompt cache: evicted LRU entry");
            }
        }
    }

    fn record_miss(&mut self, prompt_len: usize) {
        self.stats.misses += 1;
        self.stats.total_tokens_processed += prompt_len as u64;
    }
}

/// Longest `p` with `a[i] == b[i]` for all `i < p`
fn common_prefix_len(a: &[u32], b: &[u32]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Trim every layer by `n` positions; the first refusal aborts
fn trim_layers(layers: &mut [LayerCache], n: usize) -> Result<(), CacheError> {
    for layer in layers.iter_mut() {
        layer.trim(n)?;
    }
    Ok(())
}

/// Verify every layer holds exactly `expected` token positions
fn check_offsets(layers: &[LayerCache], expected: usize) -> Result<(), CacheError> {
    for (i, layer) in layers.iter().enumerate() {
        if layer.current_tokens() != expected {
            return Err(CacheError::OffsetMismatch {
                layer: i,
                layer_tokens: layer.current_tokens(),
                expected_tokens: expected,
            });
        }
    }
    Ok(())
}

/// Promote dense layers past the threshold to quantized form
///
/// A layer that fails to promote stays dense; data is never lost.
fn promote_layers(
    layers: &mut [LayerCache],
    quantization_start: usize,
    group_size: usize,
    bits: u8,
) -> usize {
    let mut promoted = 0;
    for (i, layer) in layers.iter_mut().enumerate() {
        if let LayerCache::Dense(dense) = layer {
            if dense.offset() <= quantization_start {
                continue;
            }
            match QuantizedKvCache::from_dense(dense, group_size, bits) {
                Ok(quantized) => {
                    *layer = LayerCache::Quantized(quantized);
                    promoted += 1;
                },
                Err(err) => {
                    warn!(layer = i, error = %err, "prompt cache: promotion failed, keeping dense");
                },
            }
        }
    }
    promoted
}
