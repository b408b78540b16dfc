use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use virta::embedder::openai::{OpenAiEmbedderConfig, DEFAULT_EMBED_MODEL, DEFAULT_OPENAI_BASE};
use virta::{
    ChunkingConfig, Chunker, EmbeddingClient, IngestOptions, Ingestor, OpenAiEmbedder,
    RecoveryPolicy, Snapshot, SnapshotPaths, SourceLoader, SourceResolver, DEFAULT_EMBED_DIM,
};

#[derive(Parser, Debug)]
#[command(
    name = "virta-ingest",
    about = "Chunk, embed and index a course corpus into an on-disk snapshot"
)]
struct IngestCli {
    /// Root directory of the corpus (.txt, .md, .html files)
    #[arg(long, env = "VIRTA_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Output path of the binary vector index
    #[arg(long, env = "VIRTA_INDEX_PATH", default_value = virta::snapshot::DEFAULT_INDEX_PATH)]
    index_path: PathBuf,

    /// Output path of the metadata JSON array
    #[arg(
        long,
        env = "VIRTA_METADATA_PATH",
        default_value = virta::snapshot::DEFAULT_METADATA_PATH
    )]
    metadata_path: PathBuf,

    /// Directory of raw discourse thread JSON used to resolve forum URLs
    #[arg(
        long,
        env = "VIRTA_DISCOURSE_THREADS_DIR",
        default_value = virta::loader::DEFAULT_DISCOURSE_THREADS_DIR
    )]
    discourse_threads_dir: PathBuf,

    /// Base URL prepended to course page names
    #[arg(
        long,
        env = "VIRTA_COURSE_BASE_URL",
        default_value = virta::loader::DEFAULT_COURSE_BASE_URL
    )]
    course_base_url: String,

    /// Discourse forum root
    #[arg(
        long,
        env = "VIRTA_DISCOURSE_BASE_URL",
        default_value = virta::loader::DEFAULT_DISCOURSE_BASE_URL
    )]
    discourse_base_url: String,

    /// Tokens per chunk window
    #[arg(long, env = "VIRTA_CHUNK_TOKENS", default_value_t = 8000)]
    chunk_tokens: usize,

    /// Tokens shared between consecutive chunks
    #[arg(long, env = "VIRTA_CHUNK_OVERLAP", default_value_t = 200)]
    chunk_overlap: usize,

    /// OpenAI API key used for embedding calls
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: String,

    /// Embedding model identifier
    #[arg(long, env = "VIRTA_OPENAI_MODEL", default_value = DEFAULT_EMBED_MODEL)]
    openai_model: String,

    /// Embedding dimension requested from the model and stored in the index
    #[arg(long, env = "VIRTA_EMBED_DIM", default_value_t = DEFAULT_EMBED_DIM)]
    embed_dim: usize,

    /// Base URL for the OpenAI-compatible API
    #[arg(long, env = "VIRTA_OPENAI_BASE", default_value = DEFAULT_OPENAI_BASE)]
    openai_base_url: String,

    /// Max number of chunks to send per embedding request
    #[arg(long, env = "VIRTA_OPENAI_BATCH", default_value_t = 16)]
    batch_size: usize,

    /// Max seconds to wait for each embedding request
    #[arg(long, env = "VIRTA_OPENAI_TIMEOUT_SECS", default_value_t = 30)]
    openai_timeout_secs: u64,

    /// Number of retries for rate limits or transient errors
    #[arg(long, env = "VIRTA_OPENAI_MAX_RETRIES", default_value_t = 5)]
    max_retries: usize,

    /// Number of concurrent embedding workers
    #[arg(long = "openai-threads", env = "VIRTA_OPENAI_THREADS", default_value_t = 1)]
    worker_threads: usize,

    /// Maximum nested halvings for inputs that overflow the model context
    #[arg(long, env = "VIRTA_RECOVERY_DEPTH", default_value_t = 6)]
    recovery_depth: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = IngestCli::parse();
    anyhow::ensure!(
        cli.data_dir.is_dir(),
        "data directory {:?} does not exist",
        cli.data_dir
    );

    let chunker = Chunker::cl100k(ChunkingConfig {
        max_tokens: cli.chunk_tokens,
        overlap_tokens: cli.chunk_overlap,
    })
    .context("invalid chunking configuration")?;

    let batch_size = cli.batch_size.max(1);
    let provider = OpenAiEmbedder::new(
        &cli.openai_api_key,
        OpenAiEmbedderConfig {
            base_url: cli.openai_base_url,
            model: cli.openai_model,
            dimensions: cli.embed_dim,
            timeout: Duration::from_secs(cli.openai_timeout_secs.max(1)),
            max_retries: cli.max_retries.max(1),
            batch_size,
        },
    )?;
    let embedder = EmbeddingClient::new(
        Arc::new(provider),
        cli.embed_dim,
        RecoveryPolicy {
            max_depth: cli.recovery_depth,
            ..RecoveryPolicy::default()
        },
    )?;
    let loader = SourceLoader::new(SourceResolver {
        course_base_url: cli.course_base_url,
        discourse_base_url: cli.discourse_base_url,
        discourse_threads_dir: cli.discourse_threads_dir,
    });
    let ingestor = Ingestor::new(
        chunker,
        embedder,
        loader,
        IngestOptions {
            batch_size,
            workers: cli.worker_threads,
        },
    );

    let mut snapshot = Snapshot::new(cli.embed_dim)?;
    let report = ingestor
        .ingest_dir(&cli.data_dir, &mut snapshot)
        .with_context(|| format!("failed to ingest {:?}", cli.data_dir))?;

    let paths = SnapshotPaths {
        index: cli.index_path,
        metadata: cli.metadata_path,
    };
    snapshot
        .save(&paths)
        .context("failed to write snapshot")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    println!(
        "ingestion complete: index at {:?}, metadata at {:?}.",
        paths.index, paths.metadata
    );
    Ok(())
}
