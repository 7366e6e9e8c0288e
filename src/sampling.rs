//! Token sampling
//!
//! Logits from the model pass through temperature scaling and nucleus
//! (top-p) truncation before a token is drawn. Temperature zero degrades
//! to greedy argmax, which is what the cache test suite relies on for
//! reproducible generations.

/// Minimal deterministic PRNG (xorshift64*)
///
/// Also seeds the demo model's weight initialization, so the whole
/// runtime is reproducible from a single seed.
#[derive(Debug, Clone)]
pub struct XorShiftRng {
    state: u64,
}

impl XorShiftRng {
    /// Seeded generator; a zero seed is remapped to a fixed odd constant
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    /// Next raw 64-bit value
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform f32 in [0, 1)
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }

    /// Uniform f32 in [-limit, limit)
    pub fn next_symmetric(&mut self, limit: f32) -> f32 {
        (self.next_f32() * 2.0 - 1.0) * limit
    }
}

/// Temperature plus nucleus sampler
#[derive(Debug, Clone)]
pub struct Sampler {
    temperature: f32,
    top_p: f32,
    rng: XorShiftRng,
}

impl Sampler {
    /// Create a sampler
    ///
    /// `top_p` is clamped to (0, 1]; `temperature <= 0` selects greedy
    /// decoding.
    pub fn new(temperature: f32, top_p: f32, seed: u64) -> Self {
        Self {
            temperature,
            top_p: if top_p <= 0.0 { 1.0 } else { top_p.min(1.0) },
            rng: XorShiftRng::new(seed),
        }
    }

    /// Draw the next token id from raw logits
    pub fn sample(&mut self, logits: &[f32]) -> u32 {
        if self.temperature <= 0.0 {
            return argmax(logits);
        }
        // Softmax over temperature-scaled logits, stabilized by the max
        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut probs: Vec<(u32, f32)> = logits
            .iter()
            .enumerate()
            .map(|(i, &l)| (i as u32, ((l - max) / self.temperature).exp()))
            .collect();
        let sum: f32 = probs.iter().map(|(_, p)| p).sum();
        for (_, p) in &mut probs {
            *p /= sum;
        }

        // Nucleus cut: keep the smallest prefix of the sorted distribution
        // whose cumulative mass reaches top_p, always at least one token
        probs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let mut kept = 0;
        let mut mass = 0.0;
        for (i, (_, p)) in probs.iter().enumerate() {
            mass += p;
            kept = i + 1;
            if mass >= self.top_p {
                break;
            }
        }
        probs.truncate(kept);

        let draw = self.rng.next_f32() * mass;
        let mut acc = 0.0;
        for (token, p) in &probs {
            acc += p;
            if draw < acc {
                return *token;
            }
        }
        probs.last().map_or(0, |(token, _)| *token)
    }
}

/// Index of the largest logit
fn argmax(logits: &[f32]) -> u32 {
    let mut best = 0;
    let mut best_val = f32::NEG_INFINITY;
    for (i, &l) in logits.iter().enumerate() {
        if l > best_val {
            best_val = l;
            best = i;
        }
    }
    best as u32
}
