//! Bucket-key composition
//!
//! Entries are partitioned by a deterministic fingerprint of the loaded
//! model and the generation parameters. Two requests share cached state
//! only when their keys collide, so the formatting must be stable across
//! platforms and builds. Rust's `{:.4}` float formatting is fixed and
//! locale-independent, which satisfies that requirement.

use super::KvCacheParams;

/// Compose the bucket key for a (model, parameters) pair
///
/// The quantization tag is `kv{bits}g{group}` when quantized KV is
/// requested and `nokv` otherwise, so dense and quantized runs of the
/// same sampling parameters never share entries.
#[must_use]
pub fn compose_key(model: &str, params: &KvCacheParams) -> String {
    let tag = match params.kv_bits {
        Some(bits) => format!("kv{bits}g{}", params.kv_group_size),
        None => "nokv".to_string(),
    };
    format!(
        "{model}|t={:.4}|p={:.4}|{tag}",
        params.temperature, params.top_p
    )
}
