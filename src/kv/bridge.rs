//! Generation bridge
//!
//! The two-call facade between request handlers and the cache core.
//! `begin` turns a prompt into the token suffix the runtime must still
//! evaluate plus an opaque, exclusively owned cache handle; `end` returns
//! the handle with the full token list for write-back. Handlers never see
//! tensors, and a dropped handle (cancelled request) simply releases the
//! detached state.

use std::sync::{Arc, Mutex, PoisonError};

use super::dense::DenseKvCache;
use super::layer::LayerCache;
use super::manager::PromptKvManager;
use super::{KvCacheParams, DEFAULT_STEP};

/// Model geometry the bridge needs to mint fresh handles
#[derive(Debug, Clone, Copy)]
pub struct CacheLayout {
    /// Transformer layer count
    pub n_layers: usize,
    /// KV head count per layer
    pub kv_heads: usize,
    /// Per-head dimension
    pub head_dim: usize,
    /// Dense capacity growth block
    pub step: usize,
}

impl CacheLayout {
    /// Layout with the default growth step
    pub fn new(n_layers: usize, kv_heads: usize, head_dim: usize) -> Self {
        Self {
            n_layers,
            kv_heads,
            head_dim,
            step: DEFAULT_STEP,
        }
    }
}

/// Exclusively owned per-request layer sequence
///
/// Between `begin` and `end` the owning request mutates these stores
/// freely; the manager holds no aliasing reference.
#[derive(Debug)]
pub struct CacheHandle {
    layers: Vec<LayerCache>,
}

impl CacheHandle {
    /// Wrap detached entry layers
    pub fn from_layers(layers: Vec<LayerCache>) -> Self {
        Self { layers }
    }

    /// Mint empty dense layers for a cold start
    pub fn fresh(layout: &CacheLayout) -> Self {
        let layers = (0..layout.n_layers)
            .map(|_| {
                LayerCache::Dense(DenseKvCache::new(
                    layout.kv_heads,
                    layout.head_dim,
                    layout.step,
                ))
            })
            .collect();
        Self { layers }
    }

    /// Layer stores, in layer order
    pub fn layers(&self) -> &[LayerCache] {
        &self.layers
    }

    /// Mutable layer stores for the decode loop
    pub fn layers_mut(&mut self) -> &mut [LayerCache] {
        &mut self.layers
    }

    /// Unwrap the layer sequence for write-back
    pub fn into_layers(self) -> Vec<LayerCache> {
        self.layers
    }

    /// Layer count
    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    /// Token positions held by the first layer (all layers agree)
    pub fn current_tokens(&self) -> usize {
        self.layers.first().map_or(0, LayerCache::current_tokens)
    }
}

/// Facade the request handlers drive
///
/// Holds the optional shared manager; when the cache is disabled every
/// `begin` mints a fresh handle and `end` drops it.
#[derive(Clone)]
pub struct GenerationBridge {
    manager: Option<Arc<Mutex<PromptKvManager>>>,
    layout: CacheLayout,
}

impl GenerationBridge {
    /// Create a bridge over an optional manager
    pub fn new(manager: Option<Arc<Mutex<PromptKvManager>>>, layout: CacheLayout) -> Self {
        Self { manager, layout }
    }

    /// Whether prompt reuse is active
    pub fn enabled(&self) -> bool {
        self.manager.is_some()
    }

    /// Shared manager, for the status and clear endpoints
    pub fn manager(&self) -> Option<&Arc<Mutex<PromptKvManager>>> {
        self.manager.as_ref()
    }

    /// Start a generation: resolve cached state for the prompt
    ///
    /// Returns the suffix the runtime still has to evaluate and the
    /// handle to feed the decode loop.
    pub fn begin(
        &self,
        model: &str,
        prompt_tokens: &[u32],
        params: &KvCacheParams,
    ) -> (Vec<u32>, CacheHandle) {
        if let Some(manager) = &self.manager {
            let mut guard = manager.lock().unwrap_or_else(PoisonError::into_inner);
            let (suffix, handle) = guard.lookup(model, prompt_tokens, params);
            let handle = handle.unwrap_or_else(|| CacheHandle::fresh(&self.layout));
            (suffix, handle)
        } else {
            (prompt_tokens.to_vec(), CacheHandle::fresh(&self.layout))
        }
    }

    /// Finish a generation: return the extended state for write-back
    pub fn end(
        &self,
        model: &str,
        full_tokens: &[u32],
        params: &KvCacheParams,
        handle: CacheHandle,
    ) {
        if let Some(manager) = &self.manager {
            let mut guard = manager.lock().unwrap_or_else(PoisonError::into_inner);
            guard.write_back(model, full_tokens, handle, params);
        }
        // Disabled cache: the handle drops here and frees its stores
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const MODEL: &str = "demo";

    fn layout() -> CacheLayout {
        CacheLayout {
            n_layers: 2,
            kv_heads: 1,
            head_dim: 4,
            step: 8,
        }
    }

    fn bridge_with_cache() -> GenerationBridge {
        let manager = PromptKvManager::new(1024 * 1024, Duration::from_secs(1800));
        GenerationBridge::new(Some(Arc::new(Mutex::new(manager))), layout())
    }

    /// Pretend the runtime evaluated `n` suffix positions on the handle
    fn advance(handle: &mut CacheHandle, n: usize) {
        for layer in handle.layers_mut() {
            let tile = vec![0.1f32; n * 4];
            layer.append(&tile, &tile, n).expect("test");
        }
    }

    #[test]
    fn test_disabled_bridge_passes_prompt_through() {
        let bridge = GenerationBridge::new(None, layout());
        assert!(!bridge.enabled());
        let (suffix, handle) = bridge.begin(MODEL, &[1, 2, 3], &KvCacheParams::default());
        assert_eq!(suffix, vec![1, 2, 3]);
        assert_eq!(handle.n_layers(), 2);
        assert_eq!(handle.current_tokens(), 0);
        // end is a no-op without a manager
        bridge.end(MODEL, &[1, 2, 3, 4], &KvCacheParams::default(), handle);
    }

    #[test]
    fn test_begin_end_round_trip_hits() {
        let bridge = bridge_with_cache();
        let params = KvCacheParams::default();

        let (suffix, mut handle) = bridge.begin(MODEL, &[1, 2, 3], &params);
        assert_eq!(suffix, vec![1, 2, 3]);
        advance(&mut handle, 5); // prompt plus two generated tokens
        bridge.end(MODEL, &[1, 2, 3, 40, 50], &params, handle);

        let (suffix, handle) = bridge.begin(MODEL, &[1, 2, 3, 40, 50, 60], &params);
        assert_eq!(suffix, vec![60]);
        assert_eq!(handle.current_tokens(), 5);
    }

    #[test]
    fn test_second_begin_sees_absent_bucket() {
        let bridge = bridge_with_cache();
        let params = KvCacheParams::default();
        let (_, mut handle) = bridge.begin(MODEL, &[1, 2], &params);
        advance(&mut handle, 2);
        bridge.end(MODEL, &[1, 2], &params, handle);

        let (_, first) = bridge.begin(MODEL, &[1, 2, 3], &params);
        // While the first handle is out, the bucket is absent
        let (suffix, second) = bridge.begin(MODEL, &[1, 2, 3], &params);
        assert_eq!(suffix, vec![1, 2, 3]);
        assert_eq!(second.current_tokens(), 0);
        drop(first);
        drop(second);
    }

    #[test]
    fn test_dropped_handle_leaves_no_entry() {
        let bridge = bridge_with_cache();
        let params = KvCacheParams::default();
        let (_, mut handle) = bridge.begin(MODEL, &[7, 8], &params);
        advance(&mut handle, 2);
        bridge.end(MODEL, &[7, 8], &params, handle);

        // Hit detaches the entry; dropping the handle abandons it
        let (_, handle) = bridge.begin(MODEL, &[7, 8, 9], &params);
        drop(handle);
        let manager = bridge.manager().expect("test");
        let guard = manager.lock().expect("test");
        assert_eq!(guard.entry_count(), 0);
    }

    #[test]
    fn test_fresh_handle_geometry() {
        let handle = CacheHandle::fresh(&CacheLayout::new(3, 2, 16));
        assert_eq!(handle.n_layers(), 3);
        assert_eq!(handle.current_tokens(), 0);
    }
}
