#![warn(missing_docs)]
//! Grounded passage retrieval over course material.
//!
//! Documents are split into overlapping token windows, embedded, and stored in an
//! exact inner-product [`VectorIndex`] paired with a [`MetadataStore`]. At serve
//! time a [`Retriever`] embeds the question (and an optional secondary phrasing),
//! searches the read-only [`Snapshot`], drops hits below the similarity threshold
//! and hands the ordered excerpts to an answer generator.

pub mod api;
pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod generator;
pub mod index;
pub mod ingest;
pub mod loader;
pub mod metadata;
pub mod prompt;
pub mod retrieve;
pub mod snapshot;

pub use api::{router, AppState, ServiceOptions};
pub use chunker::{Chunker, Cl100kTokenizer, Tokenizer};
pub use config::{
    ChunkingConfig, RecoveryPolicy, RetrievalConfig, DEFAULT_EMBED_DIM,
    DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_TOP_K,
};
pub use embedder::{BatchOutcome, EmbeddingClient, EmbeddingProvider, OpenAiEmbedder};
pub use error::{
    EmbedError, GenerationError, IngestError, LoadError, RetrievalError, SnapshotError,
    ValidationError,
};
pub use generator::{Answer, AnswerGenerator, Link, OpenAiChatGenerator, APOLOGY};
pub use index::{Hit, Metric, VectorIndex};
pub use ingest::{IngestOptions, IngestReport, Ingestor};
pub use loader::{Document, SourceLoader, SourceResolver};
pub use metadata::{MetadataRecord, MetadataStore};
pub use prompt::build_prompt;
pub use retrieve::{Excerpt, QueryOrigin, Retrieval, RetrievalQuery, Retriever};
pub use snapshot::{Snapshot, SnapshotPaths};
