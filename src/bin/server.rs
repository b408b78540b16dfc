use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use virta::embedder::openai::{OpenAiEmbedderConfig, DEFAULT_EMBED_MODEL, DEFAULT_OPENAI_BASE};
use virta::generator::openai::DEFAULT_CHAT_MODEL;
use virta::{
    AppState, EmbeddingClient, OpenAiChatGenerator, OpenAiEmbedder, RecoveryPolicy,
    RetrievalConfig, Retriever, ServiceOptions, Snapshot, SnapshotPaths, DEFAULT_EMBED_DIM,
    DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_TOP_K,
};

#[derive(Parser, Debug)]
#[command(
    name = "virta-server",
    about = "HTTP API answering course questions from a prebuilt snapshot"
)]
struct ServerCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "VIRTA_BIND", default_value = "127.0.0.1:8000")]
    bind: String,

    /// Binary vector index written by virta-ingest.
    #[arg(long, env = "VIRTA_INDEX_PATH", default_value = virta::snapshot::DEFAULT_INDEX_PATH)]
    index_path: PathBuf,

    /// Metadata JSON written by virta-ingest.
    #[arg(
        long,
        env = "VIRTA_METADATA_PATH",
        default_value = virta::snapshot::DEFAULT_METADATA_PATH
    )]
    metadata_path: PathBuf,

    /// Embedding dimension; must match the snapshot.
    #[arg(long, env = "VIRTA_EMBED_DIM", default_value_t = DEFAULT_EMBED_DIM)]
    embed_dim: usize,

    /// Minimum similarity for an excerpt to be used.
    #[arg(long, env = "VIRTA_THRESHOLD", default_value_t = DEFAULT_SIMILARITY_THRESHOLD)]
    threshold: f32,

    /// Nearest neighbours fetched per query string.
    #[arg(long, env = "VIRTA_TOP_K", default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    /// OpenAI API key used for query embeddings and answers.
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: String,

    /// Base URL for OpenAI-compatible endpoints.
    #[arg(long, env = "VIRTA_OPENAI_BASE", default_value = DEFAULT_OPENAI_BASE)]
    openai_base_url: String,

    /// Embedding model identifier.
    #[arg(long, env = "VIRTA_OPENAI_MODEL", default_value = DEFAULT_EMBED_MODEL)]
    openai_model: String,

    /// Chat model used to write answers.
    #[arg(long, env = "VIRTA_CHAT_MODEL", default_value = DEFAULT_CHAT_MODEL)]
    chat_model: String,

    /// Seconds before OpenAI requests time out.
    #[arg(long, env = "VIRTA_OPENAI_TIMEOUT_SECS", default_value_t = 30)]
    openai_timeout_secs: u64,

    /// Retry attempts for transient embedding errors.
    #[arg(long, env = "VIRTA_OPENAI_MAX_RETRIES", default_value_t = 5)]
    max_retries: usize,

    /// Max cached query embeddings kept in-memory (0 disables caching).
    #[arg(long, default_value_t = 1024)]
    embedding_cache_size: usize,

    /// Max requests per minute allowed (0 disables rate limiting).
    #[arg(long, default_value_t = 120)]
    max_requests_per_minute: u32,

    /// Rate-limit burst size (tokens available instantly).
    #[arg(long, default_value_t = 12)]
    rate_limit_burst: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = ServerCli::parse();

    let paths = SnapshotPaths {
        index: cli.index_path,
        metadata: cli.metadata_path,
    };
    let snapshot = Snapshot::load(&paths, cli.embed_dim)
        .with_context(|| format!("failed to load snapshot from {:?}", paths.index))?;
    if snapshot.is_empty() {
        tracing::warn!(
            "snapshot at {:?} is empty; every question will get the apology",
            paths.index
        );
    }

    let timeout = Duration::from_secs(cli.openai_timeout_secs.max(1));
    let provider = OpenAiEmbedder::new(
        &cli.openai_api_key,
        OpenAiEmbedderConfig {
            base_url: cli.openai_base_url.clone(),
            model: cli.openai_model,
            dimensions: cli.embed_dim,
            timeout,
            max_retries: cli.max_retries.max(1),
            batch_size: 1,
        },
    )?;
    let embedder =
        EmbeddingClient::new(Arc::new(provider), cli.embed_dim, RecoveryPolicy::default())?;
    let retriever = Retriever::new(
        Arc::new(snapshot),
        embedder,
        RetrievalConfig {
            dimension: cli.embed_dim,
            similarity_threshold: cli.threshold,
            top_k: cli.top_k.max(1),
        },
    )
    .context("invalid retrieval configuration")?;
    let generator = OpenAiChatGenerator::new(
        &cli.openai_api_key,
        &cli.openai_base_url,
        cli.chat_model,
        timeout,
    )?;
    let state = AppState::new(
        retriever,
        Arc::new(generator),
        ServiceOptions {
            embedding_cache_size: cli.embedding_cache_size,
            max_requests_per_minute: cli.max_requests_per_minute,
            rate_limit_burst: cli.rate_limit_burst,
        },
    );
    let app = virta::router(state);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    tracing::info!("virta-server listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .await
        .context("server shutdown")?;
    Ok(())
}
