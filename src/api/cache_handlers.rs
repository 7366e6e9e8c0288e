//! Prompt cache management handlers
//!
//! `GET /v1/cache/status` reports occupancy and hit/miss counters;
//! `DELETE /v1/cache` drops all entries. Both work against the same
//! manager the generation bridge holds, so the numbers reflect exactly
//! what lookups see.

use std::sync::PoisonError;

use axum::{extract::State, Json};

use super::{AppState, CacheClearResponse, CacheStatusResponse};
use crate::kv::CacheStatsReport;

/// `GET /v1/cache/status`
pub async fn cache_status_handler(State(state): State<AppState>) -> Json<CacheStatusResponse> {
    let config = &state.config().cache;
    let Some(manager) = state.bridge().manager() else {
        return Json(CacheStatusResponse {
            enabled: false,
            entry_count: 0,
            current_size_mb: 0.0,
            max_size_mb: config.max_bytes_mb as f64,
            ttl_minutes: config.ttl_minutes,
            stats: CacheStatsReport::default(),
        });
    };
    let guard = manager.lock().unwrap_or_else(PoisonError::into_inner);
    let status = guard.status();
    Json(CacheStatusResponse {
        enabled: true,
        entry_count: status.entry_count,
        current_size_mb: status.bytes_mb,
        max_size_mb: status.max_bytes_mb,
        ttl_minutes: status.ttl_minutes,
        stats: guard.stats(),
    })
}

/// `DELETE /v1/cache`
pub async fn cache_clear_handler(State(state): State<AppState>) -> Json<CacheClearResponse> {
    let Some(manager) = state.bridge().manager() else {
        return Json(CacheClearResponse {
            success: false,
            message: "prompt cache is disabled".to_string(),
        });
    };
    let mut guard = manager.lock().unwrap_or_else(PoisonError::into_inner);
    guard.clear();
    Json(CacheClearResponse {
        success: true,
        message: "prompt cache cleared".to_string(),
    })
}
