//! Request metrics
//!
//! Process-wide counters for request outcomes, generated tokens, and
//! inference latency, exposed as JSON for the status surface and in
//! Prometheus text format on `GET /metrics`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Central metrics collector
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    total_requests: Arc<AtomicUsize>,
    successful_requests: Arc<AtomicUsize>,
    failed_requests: Arc<AtomicUsize>,
    total_tokens: Arc<AtomicUsize>,
    total_inference_time_us: Arc<AtomicU64>,
    start_time: Instant,
}

impl MetricsCollector {
    /// Create a collector anchored at the current instant
    #[must_use]
    pub fn new() -> Self {
        Self {
            total_requests: Arc::new(AtomicUsize::new(0)),
            successful_requests: Arc::new(AtomicUsize::new(0)),
            failed_requests: Arc::new(AtomicUsize::new(0)),
            total_tokens: Arc::new(AtomicUsize::new(0)),
            total_inference_time_us: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    /// Record a successful request
    #[allow(clippy::cast_possible_truncation)]
    pub fn record_success(&self, tokens: usize, duration: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
        self.total_tokens.fetch_add(tokens, Ordering::Relaxed);
        self.total_inference_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a failed request
    pub fn record_failure(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Current snapshot
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let successful = self.successful_requests.load(Ordering::Relaxed);
        let failed = self.failed_requests.load(Ordering::Relaxed);
        let total_tokens = self.total_tokens.load(Ordering::Relaxed);
        let total_time_us = self.total_inference_time_us.load(Ordering::Relaxed);
        let uptime = self.start_time.elapsed();

        MetricsSnapshot {
            total_requests,
            successful_requests: successful,
            failed_requests: failed,
            total_tokens,
            uptime_secs: uptime.as_secs(),
            avg_latency_ms: if successful > 0 {
                (total_time_us as f64 / 1000.0) / successful as f64
            } else {
                0.0
            },
            error_rate: if total_requests > 0 {
                failed as f64 / total_requests as f64
            } else {
                0.0
            },
        }
    }

    /// Export in Prometheus text format
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            "# HELP recordar_requests_total Total number of requests\n\
             # TYPE recordar_requests_total counter\n\
             recordar_requests_total {}\n\
             # HELP recordar_requests_successful Successful requests\n\
             # TYPE recordar_requests_successful counter\n\
             recordar_requests_successful {}\n\
             # HELP recordar_requests_failed Failed requests\n\
             # TYPE recordar_requests_failed counter\n\
             recordar_requests_failed {}\n\
             # HELP recordar_tokens_generated Total tokens generated\n\
             # TYPE recordar_tokens_generated counter\n\
             recordar_tokens_generated {}\n",
            snapshot.total_requests,
            snapshot.successful_requests,
            snapshot.failed_requests,
            snapshot.total_tokens,
        )
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time metrics view
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// All requests seen
    pub total_requests: usize,
    /// Requests that completed
    pub successful_requests: usize,
    /// Requests that failed
    pub failed_requests: usize,
    /// Tokens generated across successful requests
    pub total_tokens: usize,
    /// Seconds since process start
    pub uptime_secs: u64,
    /// Mean inference latency per successful request
    pub avg_latency_ms: f64,
    /// failed / total
    pub error_rate: f64,
}
