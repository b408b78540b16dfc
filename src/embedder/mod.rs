//! Embedding providers and the recovering client wrapped around them.

pub mod openai;

use std::sync::Arc;

use crate::config::RecoveryPolicy;
use crate::error::{EmbedError, ValidationError};
use crate::index::normalize;

pub use openai::OpenAiEmbedder;

/// Maps strings to vectors; implemented by network clients and test fakes.
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds every input, returning one vector per input in order.
    ///
    /// Inputs the model cannot fit must fail with [`EmbedError::ContextTooLong`].
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// Per-input results of [`EmbeddingClient::embed_batch`], in input order.
pub type BatchOutcome = Vec<Result<Vec<f32>, EmbedError>>;

/// Provider wrapper that normalizes output and recovers from over-long inputs.
#[derive(Clone)]
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    dimension: usize,
    policy: RecoveryPolicy,
}

impl EmbeddingClient {
    /// Wraps `provider`, expecting `dimension`-sized vectors from it.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        dimension: usize,
        policy: RecoveryPolicy,
    ) -> Result<Self, ValidationError> {
        if dimension == 0 {
            return Err(ValidationError::ZeroDimension);
        }
        Ok(Self {
            provider,
            dimension,
            policy,
        })
    }

    /// Dimension of every vector this client returns.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embeds one text into a unit vector.
    ///
    /// When the provider reports the text as too long, the text is split at its
    /// character midpoint, both halves are embedded recursively and the element-wise
    /// mean is re-normalized. The split may land mid-word.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let prepared = prepare(text);
        self.embed_bisecting(&prepared, 0)
    }

    /// Embeds `inputs` with one provider request, falling back to per-input calls
    /// if that request fails so a single bad input cannot sink its neighbours.
    pub fn embed_batch(&self, inputs: &[&str]) -> BatchOutcome {
        if inputs.is_empty() {
            return Vec::new();
        }
        let prepared: Vec<String> = inputs.iter().map(|text| prepare(text)).collect();
        let refs: Vec<&str> = prepared.iter().map(String::as_str).collect();
        match self.provider.embed_batch(&refs) {
            Ok(vectors) if vectors.len() == refs.len() => vectors
                .into_iter()
                .map(|vector| self.finish(vector))
                .collect(),
            Ok(vectors) => {
                tracing::warn!(
                    "provider returned {} vectors for {} inputs; embedding individually",
                    vectors.len(),
                    refs.len()
                );
                self.embed_each(&refs)
            }
            Err(err) => {
                tracing::debug!("batch of {} failed ({err}); embedding individually", refs.len());
                self.embed_each(&refs)
            }
        }
    }

    fn embed_each(&self, inputs: &[&str]) -> BatchOutcome {
        inputs
            .iter()
            .map(|text| self.embed_bisecting(text, 0))
            .collect()
    }

    fn embed_bisecting(&self, text: &str, depth: usize) -> Result<Vec<f32>, EmbedError> {
        match self.embed_one(text) {
            Err(EmbedError::ContextTooLong(reason)) => {
                let chars = text.chars().count();
                if depth >= self.policy.max_depth || chars <= self.policy.min_split_chars {
                    tracing::warn!(
                        "giving up on {chars}-character input after {depth} bisection(s): {reason}"
                    );
                    return Err(EmbedError::BisectionExhausted { depth, chars });
                }
                tracing::debug!("bisecting {chars}-character input at depth {depth}");
                let (left, right) = split_at_char_midpoint(text, chars);
                let left = self.embed_bisecting(left, depth + 1)?;
                let right = self.embed_bisecting(right, depth + 1)?;
                let mut mean: Vec<f32> = left
                    .iter()
                    .zip(&right)
                    .map(|(a, b)| (a + b) / 2.0)
                    .collect();
                normalize(&mut mean)?;
                Ok(mean)
            }
            other => other,
        }
    }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let vector = self
            .provider
            .embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Provider("provider returned no embedding".into()))?;
        self.finish(vector)
    }

    fn finish(&self, mut vector: Vec<f32>) -> Result<Vec<f32>, EmbedError> {
        if vector.len() != self.dimension {
            return Err(ValidationError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            }
            .into());
        }
        normalize(&mut vector)?;
        Ok(vector)
    }
}

fn prepare(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

fn split_at_char_midpoint(text: &str, chars: usize) -> (&str, &str) {
    let byte = text
        .char_indices()
        .nth(chars / 2)
        .map_or(text.len(), |(idx, _)| idx);
    text.split_at(byte)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::index::l2_norm;
    use std::sync::Mutex;

    /// Deterministic provider: hashes characters into a small vector and rejects
    /// inputs longer than `max_chars` as too long.
    pub(crate) struct FakeProvider {
        pub(crate) dimension: usize,
        pub(crate) max_chars: usize,
        pub(crate) fail_batches: bool,
        pub(crate) calls: Mutex<Vec<usize>>,
    }

    impl FakeProvider {
        pub(crate) fn new(dimension: usize, max_chars: usize) -> Self {
            Self {
                dimension,
                max_chars,
                fail_batches: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn vector_for(&self, text: &str) -> Vec<f32> {
            let mut vector = vec![0.0f32; self.dimension];
            for ch in text.chars() {
                vector[ch as usize % self.dimension] += 1.0;
            }
            vector[0] += 0.5;
            vector
        }
    }

    impl EmbeddingProvider for FakeProvider {
        fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
            self.calls.lock().unwrap().push(inputs.len());
            if self.fail_batches && inputs.len() > 1 {
                return Err(EmbedError::Provider("batch endpoint unavailable".into()));
            }
            inputs
                .iter()
                .map(|text| {
                    let chars = text.chars().count();
                    if chars > self.max_chars {
                        Err(EmbedError::ContextTooLong(format!(
                            "{chars} characters exceeds {}",
                            self.max_chars
                        )))
                    } else {
                        Ok(self.vector_for(text))
                    }
                })
                .collect()
        }
    }

    fn client(provider: FakeProvider) -> EmbeddingClient {
        let dimension = provider.dimension;
        EmbeddingClient::new(Arc::new(provider), dimension, RecoveryPolicy::default()).unwrap()
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn outputs_are_unit_length() {
        let client = client(FakeProvider::new(8, 100));
        let vector = client.embed("what is the deadline for GA2?").unwrap();
        assert_eq!(vector.len(), 8);
        assert!((l2_norm(&vector) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn too_long_input_is_bisected_and_averaged() {
        let provider = FakeProvider::new(16, 6_000);
        let text = format!("{}{}", "a".repeat(5_000), "b".repeat(5_000));
        let left = &text[..5_000];
        let right = &text[5_000..];
        let mut left_vec = provider.vector_for(left);
        let mut right_vec = provider.vector_for(right);
        normalize(&mut left_vec).unwrap();
        normalize(&mut right_vec).unwrap();

        let client = client(provider);
        let vector = client.embed(&text).unwrap();
        assert!((l2_norm(&vector) - 1.0).abs() < 1e-5);
        assert!(cosine(&vector, &left_vec) < 1.0 - 1e-6);
        assert!(cosine(&vector, &right_vec) < 1.0 - 1e-6);

        let mut expected: Vec<f32> = left_vec
            .iter()
            .zip(&right_vec)
            .map(|(a, b)| (a + b) / 2.0)
            .collect();
        normalize(&mut expected).unwrap();
        for (got, want) in vector.iter().zip(&expected) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn bisection_is_bounded() {
        let client = EmbeddingClient::new(
            Arc::new(FakeProvider::new(4, 1)),
            4,
            RecoveryPolicy {
                max_depth: 2,
                min_split_chars: 1,
            },
        )
        .unwrap();
        let err = client.embed("abcdefghijklmnop").unwrap_err();
        assert!(matches!(
            err,
            EmbedError::BisectionExhausted { depth: 2, chars: 4 }
        ));
    }

    #[test]
    fn short_fragment_is_not_split() {
        let client = client(FakeProvider::new(4, 3));
        let err = client.embed("abcdefgh").unwrap_err();
        assert!(matches!(
            err,
            EmbedError::BisectionExhausted { depth: 0, chars: 8 }
        ));
    }

    #[test]
    fn split_respects_char_boundaries() {
        let (left, right) = split_at_char_midpoint("héllo wörld", 11);
        assert_eq!(left, "héllo");
        assert_eq!(right, " wörld");
    }

    #[test]
    fn failed_batch_falls_back_per_item() {
        let mut provider = FakeProvider::new(8, 20);
        provider.fail_batches = true;
        let provider = Arc::new(provider);
        let client =
            EmbeddingClient::new(provider.clone(), 8, RecoveryPolicy::default()).unwrap();
        let outcome = client.embed_batch(&["first chunk", "second chunk", "third"]);
        assert_eq!(outcome.len(), 3);
        assert!(outcome.iter().all(Result::is_ok));
        assert_eq!(*provider.calls.lock().unwrap(), vec![3, 1, 1, 1]);
    }

    #[test]
    fn batch_reports_per_item_failures() {
        let client = client(FakeProvider::new(8, 20));
        let long = "abc".repeat(30);
        let outcome = client.embed_batch(&["short", long.as_str(), "also short"]);
        assert!(outcome[0].is_ok());
        assert!(outcome[1].is_ok(), "over-long input recovers through bisection");
        assert!(outcome[2].is_ok());

        let strict = EmbeddingClient::new(
            Arc::new(FakeProvider::new(8, 2)),
            8,
            RecoveryPolicy::default(),
        )
        .unwrap();
        let outcome = strict.embed_batch(&["ok", "much too long for this provider"]);
        assert!(outcome[0].is_ok());
        assert!(matches!(
            outcome[1],
            Err(EmbedError::BisectionExhausted { .. })
        ));
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let client = EmbeddingClient::new(
            Arc::new(FakeProvider::new(4, 100)),
            8,
            RecoveryPolicy::default(),
        )
        .unwrap();
        assert!(matches!(
            client.embed("hello"),
            Err(EmbedError::Validation(
                ValidationError::DimensionMismatch { expected: 8, actual: 4 }
            ))
        ));
    }

    #[test]
    fn newlines_are_flattened_before_embedding() {
        let client = client(FakeProvider::new(8, 100));
        assert_eq!(
            client.embed("line one\nline two").unwrap(),
            client.embed("line one line two").unwrap()
        );
    }
}
