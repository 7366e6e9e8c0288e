//! # Recordar
//!
//! OpenAI-compatible LLM inference server built around a prompt-prefix
//! KV cache.
//!
//! Recordar (Spanish: "to remember") keeps the attention key/value state
//! computed for earlier prompts and, when a later request shares a token
//! prefix under identical generation parameters, trims and reuses that
//! state instead of recomputing it. The cache is bounded by bytes and
//! time-to-live, supports group-quantized storage with mid-lifetime
//! promotion, and degrades to a plain miss on any internal failure; user
//! requests never fail because of it.
//!
//! ## Example
//!
//! ```rust
//! use recordar::kv::{CacheLayout, GenerationBridge, KvCacheParams};
//!
//! // A bridge without a manager passes prompts straight through
//! let bridge = GenerationBridge::new(None, CacheLayout::new(2, 2, 16));
//! let (suffix, handle) = bridge.begin("demo", &[1, 2, 3], &KvCacheParams::default());
//! assert_eq!(suffix, vec![1, 2, 3]);
//! assert_eq!(handle.current_tokens(), 0);
//! ```
//!
//! ## Architecture
//!
//! - [`kv`] - the prompt-prefix cache core: layer stores, manager, bridge
//! - [`model`], [`tokenizer`], [`sampling`], [`generate`] - the demo
//!   runtime the server fronts
//! - [`api`] - axum handlers, schemas, and routing
//! - [`config`], [`metrics`], [`error`] - ambient plumbing

#![deny(missing_docs)]
#![deny(clippy::all)]

pub mod api;
pub mod config;
pub mod error;
pub mod generate;
pub mod kv;
pub mod metrics;
pub mod model;
pub mod sampling;
pub mod tokenizer;

pub use error::{RecordarError, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
