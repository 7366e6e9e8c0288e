//! OpenAI-compatible API handlers
//!
//! Chat completion (plain and SSE-streamed), text completion, model list,
//! and embeddings. Every generation runs through the prompt cache bridge:
//! `begin` resolves reusable prefix state, the decode loop extends the
//! returned handle, and `end` writes the extended state back.

use std::convert::Infallible;
use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Json,
};

use super::{
    format_chat_messages, AppState, ChatChoice, ChatCompletionChunk, ChatCompletionRequest,
    ChatCompletionResponse, ChatDelta, ChatMessage, ChunkChoice, CompletionChoice,
    CompletionRequest, CompletionResponse, EmbeddingData, EmbeddingsInput, EmbeddingsRequest,
    EmbeddingsResponse, ErrorResponse, OpenAIModel, OpenAIModelsResponse, Usage,
};
use crate::error::RecordarError;
use crate::generate::{generate, GenerationOptions};
use crate::kv::KvCacheParams;

// ============================================================================
// Shared helpers
// ============================================================================

/// Record failure and return an error response
fn fail_response(state: &AppState, status: StatusCode, msg: impl std::fmt::Display) -> Response {
    state.metrics().record_failure();
    (
        status,
        Json(ErrorResponse {
            error: msg.to_string(),
        }),
    )
        .into_response()
}

/// Current Unix timestamp
fn unix_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Resolve the serving model name, rejecting unknown models
#[allow(clippy::result_large_err)]
fn resolve_model(state: &AppState, requested: Option<&str>) -> Result<String, Response> {
    match requested {
        Some(name) if name != state.model_name() => Err(fail_response(
            state,
            StatusCode::NOT_FOUND,
            RecordarError::ModelNotFound(name.to_string()),
        )),
        _ => Ok(state.model_name().to_string()),
    }
}

/// Assemble and validate the cache parameters a request carries
#[allow(clippy::result_large_err)]
fn cache_params(
    state: &AppState,
    temperature: Option<f32>,
    top_p: Option<f32>,
    kv_bits: Option<u8>,
    kv_group_size: Option<usize>,
    kv_quantization_start: Option<usize>,
) -> Result<KvCacheParams, Response> {
    let defaults = KvCacheParams::default();
    let params = KvCacheParams {
        temperature: temperature.unwrap_or(defaults.temperature),
        top_p: top_p.unwrap_or(defaults.top_p),
        kv_bits,
        kv_group_size: kv_group_size.unwrap_or(defaults.kv_group_size),
        kv_quantization_start: kv_quantization_start.unwrap_or(defaults.kv_quantization_start),
    };
    params
        .validate()
        .map_err(|err| fail_response(state, StatusCode::BAD_REQUEST, err))?;
    Ok(params)
}

/// Outcome of one cached generation
struct GenerationRun {
    generated: Vec<u32>,
    finish_reason: String,
}

/// Run one generation through the prompt cache bridge
#[allow(clippy::result_large_err)]
fn run_generation(
    state: &AppState,
    prompt_tokens: &[u32],
    params: &KvCacheParams,
    max_tokens: usize,
) -> Result<GenerationRun, Response> {
    let model_name = state.model_name().to_string();
    let (suffix, mut handle) = state.bridge().begin(&model_name, prompt_tokens, params);

    let options = GenerationOptions {
        max_tokens,
        temperature: params.temperature,
        top_p: params.top_p,
        eos_token: Some(state.tokenizer().eot_token()),
        ..GenerationOptions::default()
    };
    let generated = match generate(state.model(), &mut handle, &suffix, &options) {
        Ok(tokens) => tokens,
        Err(err) => {
            // Dropping the handle detaches any reused entry cleanly
            return Err(fail_response(
                state,
                StatusCode::INTERNAL_SERVER_ERROR,
                err,
            ));
        },
    };

    let mut full_tokens = prompt_tokens.to_vec();
    full_tokens.extend_from_slice(&generated);
    state.bridge().end(&model_name, &full_tokens, params, handle);

    let finish_reason = if generated.last() == Some(&state.tokenizer().eot_token()) {
        "stop".to_string()
    } else {
        "length".to_string()
    };
    Ok(GenerationRun {
        generated,
        finish_reason,
    })
}

/// Stream a fully generated completion as OpenAI-style SSE chunks
fn pregenerated_sse_response(
    id: String,
    model: String,
    created: i64,
    text: String,
    finish_reason: String,
) -> Response {
    let mut chunks = Vec::new();
    chunks.push(ChatCompletionChunk {
        id: id.clone(),
        object: "chat.completion.chunk".to_string(),
        created,
        model: model.clone(),
        choices: vec![ChunkChoice {
            index: 0,
            delta: ChatDelta {
                role: Some("assistant".to_string()),
                content: None,
            },
            finish_reason: None,
        }],
    });
    if !text.is_empty() {
        chunks.push(ChatCompletionChunk {
            id: id.clone(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChatDelta {
                    role: None,
                    content: Some(text),
                },
                finish_reason: None,
            }],
        });
    }
    chunks.push(ChatCompletionChunk {
        id,
        object: "chat.completion.chunk".to_string(),
        created,
        model,
        choices: vec![ChunkChoice {
            index: 0,
            delta: ChatDelta {
                role: None,
                content: None,
            },
            finish_reason: Some(finish_reason),
        }],
    });

    let events = chunks
        .into_iter()
        .map(|chunk| {
            Ok::<Event, Infallible>(
                Event::default().data(serde_json::to_string(&chunk).unwrap_or_default()),
            )
        })
        .chain(std::iter::once(Ok(Event::default().data("[DONE]"))));
    Sse::new(futures::stream::iter(events)).into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// `POST /v1/chat/completions`
pub async fn openai_chat_completions_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    let start = Instant::now();
    if request.messages.is_empty() {
        return fail_response(&state, StatusCode::BAD_REQUEST, "Messages cannot be empty");
    }
    let model = match resolve_model(&state, request.model.as_deref()) {
        Ok(model) => model,
        Err(response) => return response,
    };
    let params = match cache_params(
        &state,
        request.temperature,
        request.top_p,
        request.kv_bits,
        request.kv_group_size,
        request.kv_quantization_start,
    ) {
        Ok(params) => params,
        Err(response) => return response,
    };

    let prompt_tokens = state.tokenizer().encode(&format_chat_messages(&request.messages));
    let max_tokens = request.max_tokens.unwrap_or(128);
    let run = match run_generation(&state, &prompt_tokens, &params, max_tokens) {
        Ok(run) => run,
        Err(response) => return response,
    };
    let text = state.tokenizer().decode(&run.generated);
    state
        .metrics()
        .record_success(run.generated.len(), start.elapsed());

    let id = format!("chatcmpl-{}", unix_timestamp());
    let created = unix_timestamp();
    if request.stream.unwrap_or(false) {
        return pregenerated_sse_response(id, model, created, text, run.finish_reason);
    }
    Json(ChatCompletionResponse {
        id,
        object: "chat.completion".to_string(),
        created,
        model,
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage {
                role: "assistant".to_string(),
                content: text,
            },
            finish_reason: run.finish_reason,
        }],
        usage: Usage {
            prompt_tokens: prompt_tokens.len(),
            completion_tokens: run.generated.len(),
            total_tokens: prompt_tokens.len() + run.generated.len(),
        },
    })
    .into_response()
}

/// `POST /v1/completions`
pub async fn openai_completions_handler(
    State(state): State<AppState>,
    Json(request): Json<CompletionRequest>,
) -> Response {
    let start = Instant::now();
    let model = match resolve_model(&state, request.model.as_deref()) {
        Ok(model) => model,
        Err(response) => return response,
    };
    let params = match cache_params(
        &state,
        request.temperature,
        request.top_p,
        request.kv_bits,
        request.kv_group_size,
        request.kv_quantization_start,
    ) {
        Ok(params) => params,
        Err(response) => return response,
    };

    let prompt_tokens = state.tokenizer().encode(&request.prompt);
    if prompt_tokens.is_empty() {
        return fail_response(&state, StatusCode::BAD_REQUEST, RecordarError::EmptyPrompt);
    }
    let max_tokens = request.max_tokens.unwrap_or(128);
    let run = match run_generation(&state, &prompt_tokens, &params, max_tokens) {
        Ok(run) => run,
        Err(response) => return response,
    };
    let text = state.tokenizer().decode(&run.generated);
    state
        .metrics()
        .record_success(run.generated.len(), start.elapsed());

    Json(CompletionResponse {
        id: format!("cmpl-{}", unix_timestamp()),
        object: "text_completion".to_string(),
        created: unix_timestamp(),
        model,
        choices: vec![CompletionChoice {
            text,
            index: 0,
            finish_reason: run.finish_reason,
        }],
        usage: Usage {
            prompt_tokens: prompt_tokens.len(),
            completion_tokens: run.generated.len(),
            total_tokens: prompt_tokens.len() + run.generated.len(),
        },
    })
    .into_response()
}

/// `GET /v1/models`
pub async fn openai_models_handler(State(state): State<AppState>) -> Json<OpenAIModelsResponse> {
    Json(OpenAIModelsResponse {
        object: "list".to_string(),
        data: vec![OpenAIModel {
            id: state.model_name().to_string(),
            object: "model".to_string(),
            created: unix_timestamp(),
            owned_by: "recordar".to_string(),
        }],
    })
}

/// `POST /v1/embeddings`
pub async fn openai_embeddings_handler(
    State(state): State<AppState>,
    Json(request): Json<EmbeddingsRequest>,
) -> Response {
    let model = match resolve_model(&state, request.model.as_deref()) {
        Ok(model) => model,
        Err(response) => return response,
    };
    let inputs = match request.input {
        EmbeddingsInput::Single(text) => vec![text],
        EmbeddingsInput::Batch(texts) => texts,
    };
    if inputs.is_empty() {
        return fail_response(&state, StatusCode::BAD_REQUEST, "Input cannot be empty");
    }

    let mut data = Vec::with_capacity(inputs.len());
    let mut prompt_tokens = 0;
    for (index, text) in inputs.iter().enumerate() {
        let tokens = state.tokenizer().encode(text);
        prompt_tokens += tokens.len();
        let embedding = match state.model().embedding(&tokens) {
            Ok(embedding) => embedding,
            Err(err) => return fail_response(&state, StatusCode::BAD_REQUEST, err),
        };
        data.push(EmbeddingData {
            object: "embedding".to_string(),
            index,
            embedding,
        });
    }

    Json(EmbeddingsResponse {
        object: "list".to_string(),
        data,
        model,
        usage: Usage {
            prompt_tokens,
            completion_tokens: 0,
            total_tokens: prompt_tokens,
        },
    })
    .into_response()
}
