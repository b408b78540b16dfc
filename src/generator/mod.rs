//! Answer generation from a retrieval-grounded prompt.

pub mod openai;

use serde::{Deserialize, Serialize};

use crate::error::GenerationError;

pub use openai::OpenAiChatGenerator;

/// Reply used whenever there is nothing to ground an answer on.
pub const APOLOGY: &str = "I'm sorry, I don't have enough context to answer that question.";

/// A cited source in an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Source URL.
    pub url: String,
    /// Short description of what the source contributed.
    pub text: String,
}

/// Structured answer returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    /// Answer text.
    pub answer: String,
    /// Sources referenced by the answer.
    pub links: Vec<Link>,
}

impl Answer {
    /// The fixed no-context reply with no links.
    pub fn apology() -> Self {
        Self {
            answer: APOLOGY.to_string(),
            links: Vec::new(),
        }
    }
}

/// Turns a prompt into a structured answer.
pub trait AnswerGenerator: Send + Sync {
    /// Returns `Ok(None)` when the model declines to answer.
    fn generate(&self, prompt: &str) -> Result<Option<Answer>, GenerationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apology_has_no_links() {
        let answer = Answer::apology();
        assert_eq!(answer.answer, APOLOGY);
        assert!(answer.links.is_empty());
        assert_eq!(
            serde_json::to_value(&answer).unwrap(),
            serde_json::json!({"answer": APOLOGY, "links": []})
        );
    }
}
