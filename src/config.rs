//! Server and cache configuration
//!
//! Configuration is assembled once at process start (from CLI flags) and
//! constructor-injected into [`crate::api::AppState`]. There is no global
//! configuration state.

use std::time::Duration;

/// Prompt KV cache configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Whether prompt-prefix reuse is enabled
    pub enabled: bool,
    /// Soft ceiling on resident cache size in megabytes
    pub max_bytes_mb: u64,
    /// Idle time after which an entry expires
    pub ttl_minutes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_bytes_mb: 1024,
            ttl_minutes: 30,
        }
    }
}

impl CacheConfig {
    /// Ceiling in bytes
    #[must_use]
    pub fn max_bytes(&self) -> usize {
        (self.max_bytes_mb as usize) * 1024 * 1024
    }

    /// Entry time-to-live as a [`Duration`]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes * 60)
    }
}

/// Top-level server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Name the loaded model is served under
    pub model_name: String,
    /// Prompt cache settings
    pub cache: CacheConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            model_name: "recordar-demo".to_string(),
            cache: CacheConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Configuration for the demo runtime with the prompt cache enabled
    #[must_use]
    pub fn demo() -> Self {
        Self {
            cache: CacheConfig {
                enabled: true,
                ..CacheConfig::default()
            },
            ..Self::default()
        }
    }
}
