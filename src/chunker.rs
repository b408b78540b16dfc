//! Token-window chunking aligned with the embedding model's tokenizer.

use std::ops::Range;
use std::sync::Arc;

use tiktoken_rs::CoreBPE;

use crate::config::ChunkingConfig;
use crate::error::{IngestError, ValidationError};

/// Encoder/decoder pair used to bound chunk sizes.
///
/// Must match the tokenizer of the embedding provider, otherwise `max_tokens` no
/// longer bounds what the provider sees.
pub trait Tokenizer: Send + Sync {
    /// Encodes text into token ids.
    fn encode(&self, text: &str) -> Vec<u32>;
    /// Decodes token ids; `None` when the ids do not form valid UTF-8.
    fn decode(&self, tokens: &[u32]) -> Option<String>;
}

/// `cl100k_base`, the encoding used by the OpenAI `text-embedding-3-*` models.
pub struct Cl100kTokenizer {
    bpe: CoreBPE,
}

impl Cl100kTokenizer {
    /// Loads the bundled BPE ranks.
    pub fn new() -> Result<Self, IngestError> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|err| IngestError::Tokenizer(err.to_string()))?;
        Ok(Self { bpe })
    }
}

impl Tokenizer for Cl100kTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        self.bpe.encode_with_special_tokens(text)
    }

    fn decode(&self, tokens: &[u32]) -> Option<String> {
        self.bpe.decode(tokens.to_vec()).ok()
    }
}

/// Splits text into overlapping token windows.
#[derive(Clone)]
pub struct Chunker {
    tokenizer: Arc<dyn Tokenizer>,
    config: ChunkingConfig,
}

impl Chunker {
    /// Builds a chunker, rejecting windows that would never advance.
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        config: ChunkingConfig,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self { tokenizer, config })
    }

    /// Chunker backed by `cl100k_base`.
    pub fn cl100k(config: ChunkingConfig) -> Result<Self, IngestError> {
        let tokenizer = Arc::new(Cl100kTokenizer::new()?);
        Ok(Self::new(tokenizer, config)?)
    }

    /// Window configuration in use.
    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Tokens the embedding model would see for `text`.
    pub fn token_count(&self, text: &str) -> usize {
        self.tokenizer.encode(text).len()
    }

    /// Splits `text` into windows of at most `max_tokens` tokens, each sharing
    /// `overlap_tokens` with its predecessor. Line breaks count as spaces.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let flattened = flatten_newlines(text);
        let tokens = self.tokenizer.encode(&flattened);
        let mut chunks = Vec::new();
        for range in token_windows(tokens.len(), &self.config) {
            match self.decode_window(&tokens, range.clone()) {
                Some(text) => chunks.push(text),
                None => tracing::warn!(
                    "dropping undecodable token window {}..{}",
                    range.start,
                    range.end
                ),
            }
        }
        chunks
    }

    /// Decodes `tokens[range]`, widening the range when an edge splits a
    /// multi-byte character across byte-level tokens. Widened neighbours repeat
    /// the split character rather than losing it.
    fn decode_window(&self, tokens: &[u32], range: Range<usize>) -> Option<String> {
        const MAX_WIDEN: usize = 8;
        for widen in 0..=2 * MAX_WIDEN {
            for left in 0..=widen.min(MAX_WIDEN) {
                let right = widen - left;
                if right > MAX_WIDEN || left > range.start || range.end + right > tokens.len() {
                    continue;
                }
                let window = &tokens[range.start - left..range.end + right];
                if let Some(text) = self.tokenizer.decode(window) {
                    return Some(text);
                }
            }
        }
        None
    }
}

/// Token ranges covered by each window over a sequence of `len` tokens.
///
/// The last window may be shorter than `max_tokens`; iteration stops once the
/// start reaches the end of the sequence. `config` must already be validated.
pub fn token_windows(len: usize, config: &ChunkingConfig) -> Vec<Range<usize>> {
    let stride = config.stride().max(1);
    let mut windows = Vec::with_capacity(len.div_ceil(stride));
    let mut start = 0usize;
    while start < len {
        let end = (start + config.max_tokens).min(len);
        windows.push(start..end);
        start += stride;
    }
    windows
}

fn flatten_newlines(text: &str) -> String {
    text.chars()
        .map(|ch| if ch == '\n' || ch == '\r' { ' ' } else { ch })
        .collect()
}
