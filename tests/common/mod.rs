//! Deterministic stand-ins for the tokenizer and embedding provider.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use virta::{
    Chunker, ChunkingConfig, EmbedError, EmbeddingClient, EmbeddingProvider, RecoveryPolicy,
    Tokenizer,
};

pub const DIM: usize = 16;

/// One token per whitespace-separated word.
#[derive(Default)]
pub struct WordTokenizer {
    vocab: Mutex<(HashMap<String, u32>, Vec<String>)>,
}

impl Tokenizer for WordTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        let mut guard = self.vocab.lock().unwrap();
        let (ids, words) = &mut *guard;
        text.split_whitespace()
            .map(|word| {
                *ids.entry(word.to_string()).or_insert_with(|| {
                    words.push(word.to_string());
                    (words.len() - 1) as u32
                })
            })
            .collect()
    }

    fn decode(&self, tokens: &[u32]) -> Option<String> {
        let guard = self.vocab.lock().unwrap();
        let words: Option<Vec<&str>> = tokens
            .iter()
            .map(|&id| guard.1.get(id as usize).map(String::as_str))
            .collect();
        words.map(|words| words.join(" "))
    }
}

/// Bag-of-words hashed into `DIM` buckets; inputs over `max_chars` overflow.
pub struct HashingProvider {
    pub max_chars: usize,
}

impl HashingProvider {
    pub fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; DIM];
        for word in text.split_whitespace() {
            let bucket = word
                .bytes()
                .fold(7u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
            vector[bucket as usize % (DIM - 1)] += 1.0;
        }
        vector[DIM - 1] += 0.1;
        vector
    }
}

impl EmbeddingProvider for HashingProvider {
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        inputs
            .iter()
            .map(|text| {
                if text.chars().count() > self.max_chars {
                    Err(EmbedError::ContextTooLong(format!(
                        "{} characters",
                        text.chars().count()
                    )))
                } else {
                    Ok(Self::vector(text))
                }
            })
            .collect()
    }
}

pub fn word_chunker(max_tokens: usize, overlap_tokens: usize) -> Chunker {
    Chunker::new(
        Arc::new(WordTokenizer::default()),
        ChunkingConfig {
            max_tokens,
            overlap_tokens,
        },
    )
    .unwrap()
}

pub fn hashing_client(max_chars: usize) -> EmbeddingClient {
    EmbeddingClient::new(
        Arc::new(HashingProvider { max_chars }),
        DIM,
        RecoveryPolicy::default(),
    )
    .unwrap()
}
