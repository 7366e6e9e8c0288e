//! Decode loop
//!
//! Drives the model against a request-owned cache handle: one prefill
//! pass over the prompt suffix, then one step per generated token. Every
//! sampled token is fed back through the model before the stop check, so
//! the handle's layer offsets always cover the full token list handed to
//! write-back.

use crate::error::{RecordarError, Result};
use crate::kv::CacheHandle;
use crate::model::CachedTransformer;
use crate::sampling::Sampler;

/// Decode-loop options
#[derive(Debug, Clone, Copy)]
pub struct GenerationOptions {
    /// Maximum tokens to generate
    pub max_tokens: usize,
    /// Sampling temperature; zero selects greedy decoding
    pub temperature: f32,
    /// Nucleus sampling cutoff
    pub top_p: f32,
    /// Sampler seed
    pub seed: u64,
    /// Stop token, checked after each step
    pub eos_token: Option<u32>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: 128,
            temperature: 0.7,
            top_p: 0.9,
            seed: 42,
            eos_token: None,
        }
    }
}

/// Generate up to `max_tokens` continuations of `suffix`
///
/// `suffix` is whatever the prompt cache left to evaluate; the handle
/// already holds the reused prefix state. Returns the generated tokens
/// only; the caller concatenates them onto the prompt for write-back.
pub fn generate(
    model: &CachedTransformer,
    handle: &mut CacheHandle,
    suffix: &[u32],
    options: &GenerationOptions,
) -> Result<Vec<u32>> {
    if suffix.is_empty() {
        return Err(RecordarError::EmptyPrompt);
    }
    let mut sampler = Sampler::new(options.temperature, options.top_p, options.seed);
    let mut logits = model.forward_cached(suffix, handle.layers_mut())?;
    let mut generated = Vec::new();
    while generated.len() < options.max_tokens {
        let token = sampler.sample(&logits);
        // Extend the cache over the sampled token before any stop check,
        // keeping layer offsets equal to the full token count
        logits = model.forward_cached(&[token], handle.layers_mut())?;
        generated.push(token);
        if options.eos_token == Some(token) {
            break;
        }
    }
    Ok(generated)
}
