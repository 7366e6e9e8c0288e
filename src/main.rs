//! Recordar CLI - inference server with prompt-prefix KV cache reuse
//!
//! Run the server or print configuration info.

use std::net::SocketAddr;

use clap::{Parser, Subcommand};
use recordar::{
    api::{create_router, AppState},
    config::{CacheConfig, ServerConfig},
    error::{RecordarError, Result},
};

/// Recordar - OpenAI-compatible inference server
#[derive(Parser)]
#[command(name = "recordar")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the inference server
    Serve {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Enable prompt-prefix KV cache reuse
        #[arg(long)]
        prompt_cache: bool,

        /// Prompt cache size ceiling in megabytes
        #[arg(long, default_value = "1024")]
        cache_max_mb: u64,

        /// Prompt cache entry time-to-live in minutes
        #[arg(long, default_value = "30")]
        cache_ttl_minutes: u64,
    },
    /// Show version and configuration info
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            prompt_cache,
            cache_max_mb,
            cache_ttl_minutes,
        } => {
            let config = ServerConfig {
                host,
                port,
                cache: CacheConfig {
                    enabled: prompt_cache,
                    max_bytes_mb: cache_max_mb,
                    ttl_minutes: cache_ttl_minutes,
                },
                ..ServerConfig::default()
            };
            serve(config).await?;
        },
        Commands::Info => {
            println!("Recordar v{}", recordar::VERSION);
            println!("OpenAI-compatible inference server");
            println!();
            println!("Features:");
            println!("  - Prompt-prefix KV cache reuse across requests");
            println!("  - Group-quantized KV storage (4/8-bit) with write-back promotion");
            println!("  - LRU + TTL + byte-bounded cache admission");
            println!("  - Chat/text completions, embeddings, SSE streaming");
        },
    }

    Ok(())
}

async fn serve(config: ServerConfig) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| RecordarError::Server(format!("invalid address: {e}")))?;

    let cache_note = if config.cache.enabled {
        format!(
            "enabled ({} MB ceiling, {} min TTL)",
            config.cache.max_bytes_mb, config.cache.ttl_minutes
        )
    } else {
        "disabled".to_string()
    };
    let state = AppState::new(config)?;
    let app = create_router(state);

    println!("Recordar listening on http://{addr}");
    println!("Prompt cache: {cache_note}");
    println!();
    println!("Endpoints:");
    println!("  GET    /health              - Health check");
    println!("  POST   /v1/chat/completions - Chat completion");
    println!("  POST   /v1/completions      - Text completion");
    println!("  GET    /v1/cache/status     - Prompt cache status");
    println!("  DELETE /v1/cache            - Clear prompt cache");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| RecordarError::Server(format!("failed to bind: {e}")))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| RecordarError::Server(format!("server error: {e}")))?;

    Ok(())
}
