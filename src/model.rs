//! Demo cached transformer runtime
//!
//! A small LLaMA-style decoder (RMSNorm, rotary embeddings, grouped-query
//! attention, SwiGLU) over flat `Vec<f32>` weights. Weights derive from a
//! seeded generator, so generations are reproducible from configuration
//! alone; no model files are loaded. The per-layer K/V state lives in the
//! request-owned [`LayerCache`] stores and is extended through the same
//! `append` contract the prompt cache trims and promotes.

use crate::error::{RecordarError, Result};
use crate::kv::{CacheLayout, KvView, LayerCache};
use crate::sampling::XorShiftRng;

/// Transformer geometry and initialization seed
#[derive(Debug, Clone, Copy)]
pub struct ModelConfig {
    /// Vocabulary size (must cover the tokenizer's ids)
    pub vocab_size: usize,
    /// Residual stream width
    pub hidden_dim: usize,
    /// Transformer layer count
    pub n_layers: usize,
    /// Query head count
    pub n_heads: usize,
    /// Key/value head count (grouped-query attention)
    pub kv_heads: usize,
    /// Feed-forward inner width
    pub intermediate_dim: usize,
    /// Rotary embedding base
    pub rope_theta: f32,
    /// RMSNorm epsilon
    pub eps: f32,
    /// Weight initialization seed
    pub seed: u64,
}

impl ModelConfig {
    /// Tiny configuration used by `AppState::demo()` and the test suite
    pub fn demo() -> Self {
        Self {
            vocab_size: 320,
            hidden_dim: 64,
            n_layers: 2,
            n_heads: 4,
            kv_heads: 2,
            intermediate_dim: 128,
            rope_theta: 10_000.0,
            eps: 1e-5,
            seed: 42,
        }
    }

    /// Per-head dimension
    pub fn head_dim(&self) -> usize {
        self.hidden_dim / self.n_heads
    }

    fn validate(&self) -> Result<()> {
        if self.hidden_dim == 0 || self.hidden_dim % self.n_heads != 0 {
            return Err(RecordarError::InvalidModelConfig {
                reason: format!(
                    "hidden_dim {} not divisible by n_heads {}",
                    self.hidden_dim, self.n_heads
                ),
            });
        }
        if self.kv_heads == 0 || self.n_heads % self.kv_heads != 0 {
            return Err(RecordarError::InvalidModelConfig {
                reason: format!(
                    "n_heads {} not divisible by kv_heads {}",
                    self.n_heads, self.kv_heads
                ),
            });
        }
        if self.head_dim() % 2 != 0 {
            return Err(RecordarError::InvalidModelConfig {
                reason: format!("head_dim {} must be even for rotary embeddings", self.head_dim()),
            });
        }
        Ok(())
    }
}

/// Per-layer weight matrices, `[in, out]` row-major
struct LayerWeights {
    wq: Vec<f32>,
    wk: Vec<f32>,
    wv: Vec<f32>,
    wo: Vec<f32>,
    w_gate: Vec<f32>,
    w_up: Vec<f32>,
    w_down: Vec<f32>,
    attn_norm: Vec<f32>,
    ffn_norm: Vec<f32>,
}

/// Decoder-only transformer with externally owned KV state
pub struct CachedTransformer {
    config: ModelConfig,
    /// Token embedding, `[vocab, hidden]`, tied with the output head
    embed: Vec<f32>,
    layers: Vec<LayerWeights>,
    final_norm: Vec<f32>,
}

impl CachedTransformer {
    /// Build a model with seeded pseudo-random weights
    pub fn new(config: ModelConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = XorShiftRng::new(config.seed);
        let hidden = config.hidden_dim;
        let q_dim = config.n_heads * config.head_dim();
        let kv_dim = config.kv_heads * config.head_dim();
        let inter = config.intermediate_dim;
        let scale = 1.0 / (hidden as f32).sqrt();

        let mut init = |rows: usize, cols: usize| -> Vec<f32> {
            (0..rows * cols)
                .map(|_| rng.next_symmetric(scale))
                .collect()
        };

        let embed = init(config.vocab_size, hidden);
        let mut layers = Vec::with_capacity(config.n_layers);
        for _ in 0..config.n_layers {
            layers.push(LayerWeights {
                wq: init(hidden, q_dim),
                wk: init(hidden, kv_dim),
                wv: init(hidden, kv_dim),
                wo: init(q_dim, hidden),
                w_gate: init(hidden, inter),
                w_up: init(hidden, inter),
                w_down: init(inter, hidden),
                attn_norm: vec![1.0; hidden],
                ffn_norm: vec![1.0; hidden],
            });
        }

        Ok(Self {
            config,
            embed,
            layers,
            final_norm: vec![1.0; hidden],
        })
    }

    /// Model configuration
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Cache geometry for minting fresh handles
    pub fn cache_layout(&self) -> CacheLayout {
        CacheLayout::new(
            self.config.n_layers,
            self.config.kv_heads,
            self.config.head_dim(),
        )
    }

    /// Evaluate `tokens` against the given per-layer caches and return the
    /// logits for the final position
    ///
    /// The caches are extended by `tokens.len()` positions. Positions are
    /// absolute: the first new token sits at each layer's current offset.
    pub fn forward_cached(
        &self,
        tokens: &[u32],
        caches: &mut [LayerCache],
    ) -> Result<Vec<f32>> {
        if tokens.is_empty() {
            return Err(RecordarError::EmptyPrompt);
        }
        if caches.len() != self.config.n_layers {
            return Err(RecordarError::ShapeMismatch {
                expected: vec![self.config.n_layers],
                actual: vec![caches.len()],
            });
        }
        let hidden = self.config.hidden_dim;
        let t = tokens.len();
        let start_pos = caches.first().map_or(0, LayerCache::current_tokens);

        // Embed the new tokens, [t, hidden]
        let mut xs = Vec::with_capacity(t * hidden);
        for &token in tokens {
            let id = token as usize;
            if id >= self.config.vocab_size {
                return Err(RecordarError::InvalidParameter {
                    name: "token_id".to_string(),
                    reason: format!("{id} outside vocabulary of {}", self.config.vocab_size),
                });
            }
            xs.extend_from_slice(&self.embed[id * hidden..(id + 1) * hidden]);
        }

        for (weights, cache) in self.layers.iter().zip(caches.iter_mut()) {
            self.attention_block(&mut xs, weights, cache, t, start_pos)?;
            self.ffn_block(&mut xs, weights, t);
        }

        // Tied unembedding of the last position
        let last = rms_norm(&xs[(t - 1) * hidden..t * hidden], &self.final_norm, self.config.eps);
        let mut logits = vec![0.0f32; self.config.vocab_size];
        for (v, row) in logits.iter_mut().zip(self.embed.chunks(hidden)) {
            *v = dot(&last, row);
        }
        Ok(logits)
    }

    /// Mean-pooled token embedding for the embeddings endpoint
    pub fn embedding(&self, tokens: &[u32]) -> Result<Vec<f32>> {
        if tokens.is_empty() {
            return Err(RecordarError::EmptyPrompt);
        }
        let hidden = self.config.hidden_dim;
        let mut pooled = vec![0.0f32; hidden];
        for &token in tokens {
            let id = (token as usize).min(self.config.vocab_size - 1);
            for (p, e) in pooled.iter_mut().zip(&self.embed[id * hidden..(id + 1) * hidden]) {
                *p += e;
            }
        }
        for p in &mut pooled {
            *p /= tokens.len() as f32;
        }
        Ok(pooled)
    }

    fn attention_block(
        &self,
        xs: &mut [f32],
        weights: &LayerWeights,
        cache: &mut LayerCache,
        t: usize,
        start_pos: usize,
    ) -> Result<()> {
        let config = &self.config;
        let hidden = config.hidden_dim;
        let head_dim = config.head_dim();
        let q_dim = config.n_heads * head_dim;
        let kv_dim = config.kv_heads * head_dim;
        let group = config.n_heads / config.kv_heads;
        let scale = 1.0 / (head_dim as f32).sqrt();

        // Project the whole tile, keeping K/V in [kv_heads, t, head_dim]
        let mut qs = vec![0.0f32; t * q_dim];
        let mut k_tile = vec![0.0f32; config.kv_heads * t * head_dim];
        let mut v_tile = vec![0.0f32; config.kv_heads * t * head_dim];
        for i in 0..t {
            let normed = rms_norm(&xs[i * hidden..(i + 1) * hidden], &weights.attn_norm, config.eps);
            let q = matvec(&normed, &weights.wq, q_dim);
            let k = matvec(&normed, &weights.wk, kv_dim);
            let v = matvec(&normed, &weights.wv, kv_dim);
            let pos = start_pos + i;
            for h in 0..config.n_heads {
                let seg = &q[h * head_dim..(h + 1) * head_dim];
                let rotated = rope(seg, pos, config.rope_theta);
                qs[i * q_dim + h * head_dim..i * q_dim + (h + 1) * head_dim]
                    .copy_from_slice(&rotated);
            }
            for h in 0..config.kv_heads {
                let seg = &k[h * head_dim..(h + 1) * head_dim];
                let rotated = rope(seg, pos, config.rope_theta);
                let dst = (h * t + i) * head_dim;
                k_tile[dst..dst + head_dim].copy_from_slice(&rotated);
                v_tile[dst..dst + head_dim]
                    .copy_from_slice(&v[h * head_dim..(h + 1) * head_dim]);
            }
        }

        let view = cache.append(&k_tile, &v_tile, t)?;

        for i in 0..t {
            let mut attn_out = vec![0.0f32; q_dim];
            let visible = start_pos + i + 1;
            for h in 0..config.n_heads {
                let kv_head = h / group;
                let q = &qs[i * q_dim + h * head_dim..i * q_dim + (h + 1) * head_dim];
                attend(
                    q,
                    &view,
                    kv_head,
                    visible,
                    scale,
                    &mut attn_out[h * head_dim..(h + 1) * head_dim],
                );
            }
            let projected = matvec(&attn_out, &weights.wo, hidden);
            for (x, p) in xs[i * hidden..(i + 1) * hidden].iter_mut().zip(&projected) {
                *x += p;
            }
        }
        Ok(())
    }

    fn ffn_block(&self, xs: &mut [f32], weights: &LayerWeights, t: usize) {
        let hidden = self.config.hidden_dim;
        let inter = self.config.intermediate_dim;
        for i in 0..t {
            let normed = rms_norm(&xs[i * hidden..(i + 1) * hidden], &weights.ffn_norm, self.config.eps);
            let gate = matvec(&normed, &weights.w_gate, inter);
            let up = matvec(&normed, &weights.w_up, inter);
            let mixed: Vec<f32> = gate
                .iter()
                .zip(&up)
                .map(|(g, u)| silu(*g) * u)
                .collect();
            let down = matvec(&mixed, &weights.w_down, hidden);
            for (x, d) in xs[i * hidden..(i + 1) * hidden].iter_mut().zip(&down) {
                *x += d;
            }
        }
    }
}

/// Scaled dot-product attention for one query head over the cached view
fn attend(q: &[f32], view: &KvView, kv_head: usize, visible: usize, scale: f32, out: &mut [f32]) {
    let head_dim = view.head_dim;
    let stride = view.seq_len;
    let mut scores = Vec::with_capacity(visible);
    let mut max = f32::NEG_INFINITY;
    for s in 0..visible {
        let k = &view.keys[(kv_head * stride + s) * head_dim..(kv_head * stride + s + 1) * head_dim];
        let score = dot(q, k) * scale;
        max = max.max(score);
        scores.push(score);
    }
    let mut sum = 0.0;
    for score in &mut scores {
        *score = (*score - max).exp();
        sum += *score;
    }
    for (s, score) in scores.iter().enumerate() {
        let w = score / sum;
        let v = &view.values
            [(kv_head * stride + s) * head_dim..(kv_head * stride + s + 1) * head_dim];
        for (o, value) in out.iter_mut().zip(v) {
            *o += w * value;
        }
    }
}

/// Rotary position embedding over one head segment
fn rope(seg: &[f32], pos: usize, theta: f32) -> Vec<f32> {
    let half = seg.len() / 2;
    let mut out = vec![0.0f32; seg.len()];
    for j in 0..half {
        let freq = theta.powf(-((2 * j) as f32) / seg.len() as f32);
        let angle = pos as f32 * freq;
        let (sin, cos) = angle.sin_cos();
        out[j] = seg[j] * cos - seg[j + half] * sin;
        out[j + half] = seg[j] * sin + seg[j + half] * cos;
    }
    out
}

/// RMS normalization with a learned gain
fn rms_norm(x: &[f32], gain: &[f32], eps: f32) -> Vec<f32> {
    let mean_sq = x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32;
    let inv = 1.0 / (mean_sq + eps).sqrt();
    x.iter().zip(gain).map(|(v, g)| v * inv * g).collect()
}

/// `out[j] = sum_i x[i] * w[i * cols + j]`
fn matvec(x: &[f32], w: &[f32], cols: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; cols];
    for (i, &xi) in x.iter().enumerate() {
        let row = &w[i * cols..(i + 1) * cols];
        for (o, wij) in out.iter_mut().zip(row) {
            *o += xi * wij;
        }
    }
    out
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn silu(x: f32) -> f32 {
    x / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::CacheHandle;

    fn demo_model() -> CachedTransformer {
        CachedTransformer::new(ModelConfig::demo()).expect("test")
    }

    fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b)
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f32::max)
    }

    #[test]
    fn test_config_validation() {
        let mut config = ModelConfig::demo();
        config.n_heads = 3;
        assert!(CachedTransformer::new(config).is_err());

        let mut config = ModelConfig::demo();
        config.kv_heads = 3;
        assert!(CachedTransformer::new(config).is_err());
    }

    #[test]
    fn test_forward_returns_vocab_logits() {
        let model = demo_model();
        let mut handle = CacheHandle::fresh(&model.cache_layout());
        let logits = model
            .forward_cached(&[1, 2, 3], handle.layers_mut())
            .expect("test");
        assert_eq!(logits.len(), model.config().vocab_size);
        assert_eq!(handle.current_tokens(), 3);
    }

    #[test]
    fn test_forward_is_deterministic() {
        let model = demo_model();
        let mut h1 = CacheHandle::fresh(&model.cache_layout());
        let mut h2 = CacheHandle::fresh(&model.cache_layout());
        let a = model.forward_cached(&[5, 6, 7], h1.layers_mut()).expect("test");
        let b = model.forward_cached(&[5, 6, 7], h2.layers_mut()).expect("test");
        assert_eq!(a, b);
    }

    #[test]
    fn test_incremental_matches_full_prefill() {
        let model = demo_model();
        let tokens = [10u32, 20, 30, 40, 50];

        let mut full = CacheHandle::fresh(&model.cache_layout());
        let at_once = model.forward_cached(&tokens, full.layers_mut()).expect("test");

        let mut split = CacheHandle::fresh(&model.cache_layout());
        model.forward_cached(&tokens[..3], split.layers_mut()).expect("test");
        let stepped = model
            .forward_cached(&tokens[3..], split.layers_mut())
            .expect("test");

        assert!(max_abs_diff(&at_once, &stepped) < 1e-5);
        assert_eq!(full.current_tokens(), split.current_tokens());
    }

    #[test]
    fn test_rejects_out_of_vocab_token() {
        let model = demo_model();
        let mut handle = CacheHandle::fresh(&model.cache_layout());
        let result = model.forward_cached(&[9999], handle.layers_mut());
        assert!(matches!(result, Err(RecordarError::InvalidParameter { .. })));
    }

    #[test]
    fn test_rejects_wrong_layer_count() {
        let model = demo_model();
        let mut handle = CacheHandle::fresh(&CacheLayout::new(1, 2, 16));
        let result = model.forward_cached(&[1], handle.layers_mut());
        assert!(matches!(result, Err(RecordarError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_embedding_shape() {
        let model = demo_model();
        let embedding = model.embedding(&[1, 2, 3]).expect("test");
        assert_eq!(embedding.len(), model.config().hidden_dim);
    }

    #[test]
    fn test_rope_preserves_norm() {
        let seg = vec![0.5, -0.2, 0.8, 0.1];
        let rotated = rope(&seg, 7, 10_000.0);
        let norm = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm(&seg) - norm(&rotated)).abs() < 1e-5);
    }
}
