//! OpenAI chat-completions answer generator with a strict JSON response schema.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Answer, AnswerGenerator};
use crate::error::GenerationError;

/// Default chat model.
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

const SYSTEM_PROMPT: &str = "You are a teaching assistant. Answer only from the supplied \
excerpts and list every source you relied on as a link. Never invent references.";

/// Blocking chat client that asks for `{answer, links}` JSON.
pub struct OpenAiChatGenerator {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
}

impl OpenAiChatGenerator {
    /// Builds a client against `{base_url}/chat/completions`.
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: String,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        if api_key.trim().is_empty() {
            return Err(GenerationError::Provider("missing OpenAI API key".into()));
        }
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| GenerationError::Provider("invalid OpenAI API key".into()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| {
                GenerationError::Provider(format!("failed to build OpenAI HTTP client: {err}"))
            })?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model,
            temperature: 0.2,
        })
    }

    /// Overrides the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

impl AnswerGenerator for OpenAiChatGenerator {
    fn generate(&self, prompt: &str) -> Result<Option<Answer>, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            response_format: response_format(),
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .map_err(|err| {
                GenerationError::Provider(format!("failed to call OpenAI chat completions: {err}"))
            })?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(GenerationError::Provider(format!(
                "OpenAI returned {status}: {text}"
            )));
        }
        let parsed: ChatResponse = resp.json().map_err(|err| {
            GenerationError::Malformed(format!("failed to parse OpenAI response: {err}"))
        })?;
        parse_completion(parsed)
    }
}

fn parse_completion(response: ChatResponse) -> Result<Option<Answer>, GenerationError> {
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| GenerationError::Malformed("response has no choices".into()))?;
    if let Some(refusal) = message.refusal {
        tracing::info!("model refused to answer: {refusal}");
        return Ok(None);
    }
    let content = message
        .content
        .ok_or_else(|| GenerationError::Malformed("response has no content".into()))?;
    serde_json::from_str(content.trim())
        .map(Some)
        .map_err(|err| GenerationError::Malformed(format!("answer is not valid JSON: {err}")))
}

fn response_format() -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "ChatResponse",
            "strict": true,
            "description": "Answer to a course question with the sources it cites.",
            "schema": {
                "type": "object",
                "properties": {
                    "answer": {
                        "type": "string",
                        "description": "The assistant's answer to the user's question."
                    },
                    "links": {
                        "type": "array",
                        "description": "Source links referenced in the answer.",
                        "items": {
                            "type": "object",
                            "properties": {
                                "url": {
                                    "type": "string",
                                    "description": "The URL of the source."
                                },
                                "text": {
                                    "type": "string",
                                    "description": "What the source contributed."
                                }
                            },
                            "required": ["url", "text"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["answer", "links"],
                "additionalProperties": false
            }
        }
    })
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
    response_format: Value,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}
