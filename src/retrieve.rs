//! Query-time pipeline: embed, search, fan in, threshold, resolve excerpts.

use std::sync::Arc;

use serde::Serialize;

use crate::config::RetrievalConfig;
use crate::embedder::EmbeddingClient;
use crate::error::{RetrievalError, ValidationError};
use crate::index::Hit;
use crate::snapshot::Snapshot;

/// Primary query plus an optional secondary phrasing searched alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalQuery {
    /// Searched first; its hits lead the result.
    pub primary: String,
    /// Searched second; its hits follow the primary hits.
    pub secondary: Option<String>,
}

impl RetrievalQuery {
    /// Query with no secondary phrasing.
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: None,
        }
    }

    /// Adds a secondary phrasing.
    pub fn with_secondary(mut self, secondary: impl Into<String>) -> Self {
        self.secondary = Some(secondary.into());
        self
    }
}

/// Which query string produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOrigin {
    /// The primary query.
    Primary,
    /// The secondary query.
    Secondary,
}

/// A hit resolved to its stored chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Excerpt {
    /// Chunk text.
    pub text: String,
    /// Provenance of the chunk.
    pub source: String,
    /// Position of the chunk within its document.
    pub chunk_id: usize,
    /// Index ordinal.
    pub ordinal: usize,
    /// Inner-product score against the originating query.
    pub score: f32,
    /// Query that produced the hit.
    pub origin: QueryOrigin,
}

/// Result of a retrieval; an empty result is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    /// Excerpts in fan-in order (primary hits, then secondary hits).
    Excerpts(Vec<Excerpt>),
    /// Nothing scored at or above the threshold.
    NoRelevantContext,
}

impl Retrieval {
    /// Excerpts, empty for [`Retrieval::NoRelevantContext`].
    pub fn excerpts(&self) -> &[Excerpt] {
        match self {
            Retrieval::Excerpts(excerpts) => excerpts,
            Retrieval::NoRelevantContext => &[],
        }
    }

    /// `true` when nothing relevant was found.
    pub fn is_empty(&self) -> bool {
        matches!(self, Retrieval::NoRelevantContext)
    }
}

/// Serves retrievals against a read-only snapshot.
#[derive(Clone)]
pub struct Retriever {
    snapshot: Arc<Snapshot>,
    embedder: EmbeddingClient,
    config: RetrievalConfig,
}

impl Retriever {
    /// Wires a loaded snapshot to a query embedder.
    pub fn new(
        snapshot: Arc<Snapshot>,
        embedder: EmbeddingClient,
        config: RetrievalConfig,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        for dimension in [snapshot.dimension(), embedder.dimension()] {
            if dimension != config.dimension {
                return Err(ValidationError::DimensionMismatch {
                    expected: config.dimension,
                    actual: dimension,
                });
            }
        }
        Ok(Self {
            snapshot,
            embedder,
            config,
        })
    }

    /// Search settings in use.
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Snapshot being searched.
    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    /// Embeds one query string, rejecting blank input.
    pub fn embed_query(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyQuery.into());
        }
        Ok(self.embedder.embed(text)?)
    }

    /// Embeds and searches `query`.
    pub fn retrieve(&self, query: &RetrievalQuery) -> Result<Retrieval, RetrievalError> {
        let primary = self.embed_query(&query.primary)?;
        let secondary = query
            .secondary
            .as_deref()
            .map(|text| self.embed_query(text))
            .transpose()?;
        self.retrieve_vectors(&primary, secondary.as_deref())
    }

    /// Searches with pre-computed query vectors.
    pub fn retrieve_vectors(
        &self,
        primary: &[f32],
        secondary: Option<&[f32]>,
    ) -> Result<Retrieval, RetrievalError> {
        let k = self.config.top_k;
        let primary_hits = self.snapshot.search(primary, k)?;
        let secondary_hits = match secondary {
            Some(vector) => self.snapshot.search(vector, k)?,
            None => Vec::new(),
        };
        let hits = apply_threshold(
            fan_in(primary_hits, secondary_hits),
            self.config.similarity_threshold,
        );
        tracing::debug!(
            "{} hit(s) survived threshold {}",
            hits.len(),
            self.config.similarity_threshold
        );
        if hits.is_empty() {
            return Ok(Retrieval::NoRelevantContext);
        }
        Ok(Retrieval::Excerpts(self.resolve(hits)))
    }

    fn resolve(&self, hits: Vec<(QueryOrigin, Hit)>) -> Vec<Excerpt> {
        hits.into_iter()
            .filter_map(|(origin, hit)| {
                let Some(record) = self.snapshot.record(hit.ordinal) else {
                    tracing::error!("hit ordinal {} has no metadata record", hit.ordinal);
                    return None;
                };
                Some(Excerpt {
                    text: record.text.clone(),
                    source: record.source.clone(),
                    chunk_id: record.chunk_id,
                    ordinal: hit.ordinal,
                    score: hit.score,
                    origin,
                })
            })
            .collect()
    }
}

/// Primary hits followed by secondary hits; no re-sort and no de-duplication.
pub fn fan_in(primary: Vec<Hit>, secondary: Vec<Hit>) -> Vec<(QueryOrigin, Hit)> {
    primary
        .into_iter()
        .map(|hit| (QueryOrigin::Primary, hit))
        .chain(secondary.into_iter().map(|hit| (QueryOrigin::Secondary, hit)))
        .collect()
}

/// Keeps hits scoring at least `threshold`, preserving order.
pub fn apply_threshold(hits: Vec<(QueryOrigin, Hit)>, threshold: f32) -> Vec<(QueryOrigin, Hit)> {
    hits.into_iter()
        .filter(|(_, hit)| hit.score >= threshold)
        .collect()
}
