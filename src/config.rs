//! Tuning knobs consumed by the retrieval core.

use crate::error::ValidationError;

/// Embedding dimension of OpenAI `text-embedding-3-small`.
pub const DEFAULT_EMBED_DIM: usize = 1536;
/// Cosine similarity below which a hit is not considered relevant.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.35;
/// Hits fetched per query.
pub const DEFAULT_TOP_K: usize = 15;

/// Search-time settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalConfig {
    /// Embedding dimension shared by the provider, the index and every query.
    pub dimension: usize,
    /// Minimum score (inclusive) for a hit to survive filtering.
    pub similarity_threshold: f32,
    /// Number of nearest neighbours fetched per query string.
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_EMBED_DIM,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            top_k: DEFAULT_TOP_K,
        }
    }
}

impl RetrievalConfig {
    /// Rejects settings that would make scores meaningless.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.dimension == 0 {
            return Err(ValidationError::ZeroDimension);
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ValidationError::ThresholdOutOfRange(
                self.similarity_threshold,
            ));
        }
        Ok(())
    }
}

/// Token window used when splitting documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Tokens per window.
    pub max_tokens: usize,
    /// Tokens shared between consecutive windows.
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    /// A window close to the 8191-token limit of the OpenAI embedding models, so
    /// ingestion rarely needs overflow recovery.
    fn default() -> Self {
        Self {
            max_tokens: 8000,
            overlap_tokens: 200,
        }
    }
}

impl ChunkingConfig {
    /// Ensures the window advances by at least one token per step.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_tokens == 0 {
            return Err(ValidationError::EmptyWindow);
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(ValidationError::OverlapTooLarge {
                max_tokens: self.max_tokens,
                overlap: self.overlap_tokens,
            });
        }
        Ok(())
    }

    /// Tokens the window advances per step.
    pub fn stride(&self) -> usize {
        self.max_tokens - self.overlap_tokens
    }
}

/// Bounds on the bisect-and-average recovery for over-long inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    /// Maximum number of nested bisections for a single input.
    pub max_depth: usize,
    /// Fragments at or below this many characters are never split again.
    pub min_split_chars: usize,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_depth: 6,
            min_split_chars: 16,
        }
    }
}
