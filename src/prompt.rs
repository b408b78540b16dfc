//! Prompt assembly for answer generation.

use std::fmt::Write;

use crate::retrieve::Excerpt;

const PREAMBLE: &str =
    "Always cite sources in links only.\n\nAnswer based solely on the following excerpts:\n\n";

/// Renders numbered excerpts followed by the question.
///
/// Excerpts keep retrieval order, duplicates included, so the numbering matches
/// what the retriever returned.
pub fn build_prompt(excerpts: &[Excerpt], query: &str) -> String {
    let body: usize = excerpts.iter().map(|e| e.text.len() + e.source.len() + 48).sum();
    let mut prompt = String::with_capacity(PREAMBLE.len() + body + query.len() + 20);
    prompt.push_str(PREAMBLE);
    for (i, excerpt) in excerpts.iter().enumerate() {
        let _ = write!(
            prompt,
            "Excerpt [{}] (source: {} | chunk_id: {}):\n{}\n\n",
            i + 1,
            excerpt.source,
            excerpt.chunk_id,
            excerpt.text
        );
    }
    let _ = write!(prompt, "QUESTION: {query}\nANSWER:");
    prompt
}
