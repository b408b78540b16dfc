//! Error taxonomy shared by the chunking, embedding, indexing and retrieval stages.

use std::path::PathBuf;

use thiserror::Error;

/// Malformed input that must be rejected before any work is done.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Chunk window of zero tokens.
    #[error("chunk window must be at least one token")]
    EmptyWindow,
    /// Overlap at least as large as the window; the window would never advance.
    #[error("overlap of {overlap} tokens must be smaller than the {max_tokens}-token window")]
    OverlapTooLarge {
        /// Requested window size.
        max_tokens: usize,
        /// Requested overlap.
        overlap: usize,
    },
    /// Configured or observed embedding dimension of zero.
    #[error("embedding dimension must be positive")]
    ZeroDimension,
    /// Vector length disagrees with the index dimension.
    #[error("expected a {expected}-dimensional vector, got {actual}")]
    DimensionMismatch {
        /// Index dimension.
        expected: usize,
        /// Supplied vector length.
        actual: usize,
    },
    /// Vector contains NaN or infinite components.
    #[error("vector contains non-finite components")]
    NonFinite,
    /// Vector has zero length and cannot be normalized.
    #[error("cannot normalize a zero vector")]
    ZeroVector,
    /// Vector is not unit length, so inner product would not be cosine similarity.
    #[error("vector norm {norm} is not within tolerance of 1.0")]
    NotNormalized {
        /// Observed L2 norm.
        norm: f32,
    },
    /// Threshold outside the cosine range.
    #[error("similarity threshold {0} must lie in [-1, 1]")]
    ThresholdOutOfRange(f32),
    /// A metadata record is missing a required field.
    #[error("metadata record is missing required field `{0}`")]
    MissingField(&'static str),
    /// Query text is empty after trimming.
    #[error("query text must not be empty")]
    EmptyQuery,
}

/// Failures reported by the embedding layer.
#[derive(Debug, Clone, Error)]
pub enum EmbedError {
    /// The provider rejected the input because it exceeds the model context window.
    #[error("input exceeds the embedding model context window: {0}")]
    ContextTooLong(String),
    /// Transport, authentication, quota or protocol failure.
    #[error("embedding provider error: {0}")]
    Provider(String),
    /// Recursive bisection ran out of depth or hit the minimum split size.
    #[error("input of {chars} characters still too long after {depth} bisection(s)")]
    BisectionExhausted {
        /// Depth reached when recovery gave up.
        depth: usize,
        /// Character length of the fragment that could not be embedded.
        chars: usize,
    },
    /// The provider returned a vector the index cannot accept.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Failures while reading or writing a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Filesystem failure.
    #[error("snapshot io error at {path:?}: {source}")]
    Io {
        /// File being read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Metadata file is not a valid record array.
    #[error("invalid metadata file: {0}")]
    Metadata(#[from] serde_json::Error),
    /// Binary index file is truncated, has a bad header or a checksum mismatch.
    #[error("corrupt index file: {0}")]
    Corrupt(String),
    /// Metadata store and vector index disagree on their length.
    #[error("metadata holds {metadata_len} records but the index holds {index_size} vectors")]
    IndexConsistency {
        /// Vectors in the index.
        index_size: usize,
        /// Records in the metadata store.
        metadata_len: usize,
    },
    /// Snapshot contents violate an invariant.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Failures while serving a retrieval request.
///
/// An empty result is not an error; see [`crate::Retrieval::NoRelevantContext`].
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Query could not be embedded.
    #[error("failed to embed query: {0}")]
    Embedding(#[from] EmbedError),
    /// Request or query vector rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Failures that abort an ingestion run (individual file and chunk failures do not).
#[derive(Debug, Error)]
pub enum IngestError {
    /// Pipeline misconfiguration.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Tokenizer could not be initialized.
    #[error("failed to load tokenizer: {0}")]
    Tokenizer(String),
    /// Worker threads disappeared before returning their batches.
    #[error("embedding worker channel closed unexpectedly")]
    WorkersGone,
}

/// Failures while turning a file into a document.
#[derive(Debug, Error)]
pub enum LoadError {
    /// File could not be read.
    #[error("failed to read {path:?}: {source}")]
    Io {
        /// Offending file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Extension is not one the loader understands.
    #[error("unsupported file type: {0:?}")]
    Unsupported(PathBuf),
}

/// Failures reported by the answer generator.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Transport or API failure.
    #[error("answer generator error: {0}")]
    Provider(String),
    /// Model output did not match the requested schema.
    #[error("answer generator returned malformed output: {0}")]
    Malformed(String),
}
