//! HTTP API for model inference
//!
//! OpenAI-compatible REST surface over the demo runtime, using axum.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /metrics` - Prometheus-formatted metrics
//! - `GET /v1/models` - Model list
//! - `POST /v1/completions` - Text completion
//! - `POST /v1/chat/completions` - Chat completion, SSE when `stream` is set
//! - `POST /v1/embeddings` - Mean-pooled embeddings
//! - `GET /v1/cache/status` - Prompt cache occupancy and stats
//! - `DELETE /v1/cache` - Drop all prompt cache entries
//!
//! ## Example
//!
//! ```rust,ignore
//! use recordar::api::{create_router, AppState};
//!
//! let state = AppState::demo()?;
//! let app = create_router(state);
//! axum::serve(listener, app).await?;
//! ```

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::kv::{CacheStatsReport, GenerationBridge, PromptKvManager};
use crate::metrics::MetricsCollector;
use crate::model::{CachedTransformer, ModelConfig};
use crate::tokenizer::ByteTokenizer;

pub mod cache_handlers;
pub mod openai_handlers;
pub mod router;

pub use router::create_router;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    model: Arc<CachedTransformer>,
    tokenizer: Arc<ByteTokenizer>,
    metrics: Arc<MetricsCollector>,
    bridge: GenerationBridge,
    config: ServerConfig,
}

impl AppState {
    /// Build state from a server configuration
    ///
    /// The prompt cache manager is created here and injected into the
    /// generation bridge; nothing else ever holds it.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let model = CachedTransformer::new(ModelConfig::demo())?;
        let manager = if config.cache.enabled {
            Some(Arc::new(Mutex::new(PromptKvManager::from_config(
                &config.cache,
            ))))
        } else {
            None
        };
        let bridge = GenerationBridge::new(manager, model.cache_layout());
        Ok(Self {
            model: Arc::new(model),
            tokenizer: Arc::new(ByteTokenizer::new()),
            metrics: Arc::new(MetricsCollector::new()),
            bridge,
            config,
        })
    }

    /// Demo state: tiny model, prompt cache enabled
    pub fn demo() -> Result<Self> {
        Self::new(ServerConfig::demo())
    }

    /// Inference model
    pub fn model(&self) -> &CachedTransformer {
        &self.model
    }

    /// Tokenizer
    pub fn tokenizer(&self) -> &ByteTokenizer {
        &self.tokenizer
    }

    /// Request metrics
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Prompt cache bridge
    pub fn bridge(&self) -> &GenerationBridge {
        &self.bridge
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Name the model is served under
    pub fn model_name(&self) -> &str {
        &self.config.model_name
    }
}

// ============================================================================
// Request / response schemas
// ============================================================================

/// One chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role: system, user, or assistant
    pub role: String,
    /// Message text
    pub content: String,
}

/// `POST /v1/chat/completions` request
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    /// Model to serve; defaults to the loaded model
    pub model: Option<String>,
    /// Conversation so far
    pub messages: Vec<ChatMessage>,
    /// Maximum tokens to generate
    pub max_tokens: Option<usize>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Nucleus sampling cutoff
    pub top_p: Option<f32>,
    /// Stream the response as SSE chunks
    pub stream: Option<bool>,
    /// KV cache quantization width (4 or 8)
    pub kv_bits: Option<u8>,
    /// KV quantization group size, positive multiple of 8
    pub kv_group_size: Option<usize>,
    /// Token count past which dense caches are promoted on write-back
    pub kv_quantization_start: Option<usize>,
}

/// One chat completion choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    /// Choice index
    pub index: usize,
    /// Assistant reply
    pub message: ChatMessage,
    /// Why generation stopped: stop or length
    pub finish_reason: String,
}

/// Token accounting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt
    pub prompt_tokens: usize,
    /// Tokens generated
    pub completion_tokens: usize,
    /// Sum of both
    pub total_tokens: usize,
}

/// `POST /v1/chat/completions` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    /// Response id
    pub id: String,
    /// Always "chat.completion"
    pub object: String,
    /// Unix timestamp
    pub created: i64,
    /// Serving model name
    pub model: String,
    /// Completion choices
    pub choices: Vec<ChatChoice>,
    /// Token accounting
    pub usage: Usage,
}

/// Incremental content inside a streamed chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatDelta {
    /// Role, present on the first chunk only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Text fragment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// One choice inside a streamed chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    /// Choice index
    pub index: usize,
    /// Incremental content
    pub delta: ChatDelta,
    /// Set on the final chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// One SSE chunk of a streamed chat completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    /// Response id, stable across chunks
    pub id: String,
    /// Always "chat.completion.chunk"
    pub object: String,
    /// Unix timestamp
    pub created: i64,
    /// Serving model name
    pub model: String,
    /// Chunk choices
    pub choices: Vec<ChunkChoice>,
}

/// `POST /v1/completions` request
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionRequest {
    /// Model to serve; defaults to the loaded model
    pub model: Option<String>,
    /// Prompt text
    pub prompt: String,
    /// Maximum tokens to generate
    pub max_tokens: Option<usize>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Nucleus sampling cutoff
    pub top_p: Option<f32>,
    /// KV cache quantization width (4 or 8)
    pub kv_bits: Option<u8>,
    /// KV quantization group size, positive multiple of 8
    pub kv_group_size: Option<usize>,
    /// Token count past which dense caches are promoted on write-back
    pub kv_quantization_start: Option<usize>,
}

/// One text completion choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChoice {
    /// Generated text
    pub text: String,
    /// Choice index
    pub index: usize,
    /// Why generation stopped
    pub finish_reason: String,
}

/// `POST /v1/completions` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Response id
    pub id: String,
    /// Always "text_completion"
    pub object: String,
    /// Unix timestamp
    pub created: i64,
    /// Serving model name
    pub model: String,
    /// Completion choices
    pub choices: Vec<CompletionChoice>,
    /// Token accounting
    pub usage: Usage,
}

/// `POST /v1/embeddings` input, a single string or a batch
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingsInput {
    /// One text
    Single(String),
    /// Several texts
    Batch(Vec<String>),
}

/// `POST /v1/embeddings` request
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsRequest {
    /// Model to serve; defaults to the loaded model
    pub model: Option<String>,
    /// Text(s) to embed
    pub input: EmbeddingsInput,
}

/// One embedding vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingData {
    /// Always "embedding"
    pub object: String,
    /// Input index this vector belongs to
    pub index: usize,
    /// The vector
    pub embedding: Vec<f32>,
}

/// `POST /v1/embeddings` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsResponse {
    /// Always "list"
    pub object: String,
    /// One entry per input
    pub data: Vec<EmbeddingData>,
    /// Serving model name
    pub model: String,
    /// Token accounting (completion_tokens is always zero)
    pub usage: Usage,
}

/// One model entry in `GET /v1/models`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIModel {
    /// Model id
    pub id: String,
    /// Always "model"
    pub object: String,
    /// Unix timestamp
    pub created: i64,
    /// Owner tag
    pub owned_by: String,
}

/// `GET /v1/models` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIModelsResponse {
    /// Always "list"
    pub object: String,
    /// Available models
    pub data: Vec<OpenAIModel>,
}

/// `GET /health` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always "healthy" when the server answers
    pub status: String,
    /// Crate version
    pub version: String,
    /// Whether the prompt cache is active
    pub cache_enabled: bool,
}

/// Error payload for non-2xx responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable reason
    pub error: String,
}

/// `GET /v1/cache/status` response
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatusResponse {
    /// Whether the prompt cache is active
    pub enabled: bool,
    /// Live entries
    pub entry_count: usize,
    /// Estimated resident megabytes
    pub current_size_mb: f64,
    /// Configured ceiling in megabytes
    pub max_size_mb: f64,
    /// Configured time-to-live in minutes
    pub ttl_minutes: u64,
    /// Hit/miss/eviction counters
    pub stats: CacheStatsReport,
}

/// `DELETE /v1/cache` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheClearResponse {
    /// Whether the clear ran
    pub success: bool,
    /// Outcome description
    pub message: String,
}

/// Render a conversation into the demo model's prompt format
pub(crate) fn format_chat_messages(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        prompt.push_str("<|");
        prompt.push_str(&message.role);
        prompt.push_str("|>\n");
        prompt.push_str(&message.content);
        prompt.push('\n');
    }
    prompt.push_str("<|assistant|>\n");
    prompt
}
