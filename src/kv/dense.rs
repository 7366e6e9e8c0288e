//! Dense layer store
//!
//! Key/value tensors are flat `Vec<f32>` with explicit shape bookkeeping,
//! logical shape `[1, kv_heads, capacity, head_dim]` stored row-major as
//! `[head][position][head_dim]`. Only the first `offset` positions along
//! the sequence axis are live. Capacity grows in `step`-sized blocks by
//! copy-and-concatenate; trimming only rolls `offset` back and never
//! reallocates.

use super::CacheError;

/// Growable dense K/V store for one transformer layer
#[derive(Debug, Clone)]
pub struct DenseKvCache {
    /// Key data, `[kv_heads, capacity, head_dim]`
    keys: Vec<f32>,
    /// Value data, `[kv_heads, capacity, head_dim]`
    values: Vec<f32>,
    kv_heads: usize,
    head_dim: usize,
    capacity: usize,
    offset: usize,
    step: usize,
}

impl DenseKvCache {
    /// Create an empty store for the given geometry
    pub fn new(kv_heads: usize, head_dim: usize, step: usize) -> Self {
        Self {
            keys: Vec::new(),
            values: Vec::new(),
            kv_heads,
            head_dim,
            capacity: 0,
            offset: 0,
            step: step.max(1),
        }
    }

    /// Number of live token positions
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Allocated positions along the sequence axis
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// KV head count
    pub fn kv_heads(&self) -> usize {
        self.kv_heads
    }

    /// Per-head dimension
    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    /// Capacity growth block in token positions
    pub fn step(&self) -> usize {
        self.step
    }

    /// Append `s_new` positions of freshly computed K/V
    ///
    /// Tiles arrive as `[1, kv_heads, s_new, head_dim]` flattened row-major.
    /// Grows capacity first when the live region would overflow.
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
        if self.offset + s_new > self.capacity {
            let growth = s_new.div_ceil(self.step) * self.step;
            self.grow(self.capacity + growth);
        }
        for h in 0..self.kv_heads {
            for s in 0..s_new {
                let dst = (h * self.capacity + self.offset + s) * self.head_dim;
                let src = (h * s_new + s) * self.head_dim;
                self.keys[dst..dst + self.head_dim]
                    .copy_from_slice(&keys_new[src..src + self.head_dim]);
                self.values[dst..dst + self.head_dim]
                    .copy_from_slice(&values_new[src..src + self.head_dim]);
            }
        }
        self.offset += s_new;
        Ok(())
    }

    /// Remove the last `n` live positions
    ///
    /// The backing buffer is retained; only the watermark moves.
    pub fn trim(&mut self, n: usize) -> Result<usize, CacheError> {
        if n > self.offset {
            return Err(CacheError::TrimBeyondOffset {
                requested: n,
                offset: self.offset,
            });
        }
        self.offset -= n;
        Ok(n)
    }

    /// Resident bytes across both owned tensors, slack included
    pub fn size_bytes(&self) -> usize {
        (self.keys.len() + self.values.len()) * std::mem::size_of::<f32>()
    }

    /// Materialize the live region as `([kv_heads, offset, head_dim], same)`
    pub fn live(&self) -> (Vec<f32>, Vec<f32>) {
        let mut keys = Vec::with_capacity(self.kv_heads * self.offset * self.head_dim);
        let mut values = Vec::with_capacity(self.kv_heads * self.offset * self.head_dim);
        for h in 0..self.kv_heads {
            let start = h * self.capacity * self.head_dim;
            let end = start + self.offset * self.head_dim;
            keys.extend_from_slice(&self.keys[start..end]);
            values.extend_from_slice(&self.values[start..end]);
        }
        (keys, values)
    }

    fn grow(&mut self, new_capacity: usize) {
        let mut keys = vec![0.0; self.kv_heads * new_capacity * self.head_dim];
        let mut values = vec![0.0; self.kv_heads * new_capacity * self.head_dim];
        for h in 0..self.kv_heads {
            let src = h * self.capacity * self.head_dim;
            let dst = h * new_capacity * self.head_dim;
            let len = self.offset * self.head_dim;
            keys[dst..dst + len].copy_from_slice(&self.keys[src..src + len]);
            values[dst..dst + len].copy_from_slice(&self.values[src..src + len]);
        }
        self.keys = keys;
        self.values = values;
        self.capacity = new_capacity;
    }
}
