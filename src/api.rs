//! HTTP surface: question answering and raw retrieval over an injected snapshot.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::error::{GenerationError, RetrievalError};
use crate::generator::{Answer, AnswerGenerator};
use crate::prompt::build_prompt;
use crate::retrieve::{Excerpt, Retrieval, RetrievalQuery, Retriever};

/// Request-handling limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Cached query embeddings (0 disables caching).
    pub embedding_cache_size: usize,
    /// Sustained requests per minute (0 disables rate limiting).
    pub max_requests_per_minute: u32,
    /// Requests available instantly.
    pub rate_limit_burst: u32,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            embedding_cache_size: 1024,
            max_requests_per_minute: 120,
            rate_limit_burst: 12,
        }
    }
}

/// Shared handler state; cloned per request.
#[derive(Clone)]
pub struct AppState {
    retriever: Retriever,
    generator: Arc<dyn AnswerGenerator>,
    query_cache: Option<QueryCache>,
    budget: Option<RequestBudget>,
}

impl AppState {
    /// Bundles the retrieval pipeline and answer generator.
    pub fn new(
        retriever: Retriever,
        generator: Arc<dyn AnswerGenerator>,
        options: ServiceOptions,
    ) -> Self {
        Self {
            retriever,
            generator,
            query_cache: QueryCache::with_capacity(options.embedding_cache_size),
            budget: RequestBudget::from_options(&options),
        }
    }
}

/// Builds the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(healthz))
        .route("/healthz", get(healthz))
        .route("/api", post(answer_handler))
        .route("/v1/retrieve", post(retrieve_handler))
        .with_state(state)
}

/// Question, optionally with text extracted from an attached image.
#[derive(Debug, Deserialize)]
pub struct AskRequest {
    /// User question.
    pub question: String,
    /// OCR output for an attached image, if any.
    #[serde(default)]
    pub image_text: Option<String>,
}

impl AskRequest {
    /// The image-augmented question leads; the bare question is searched second.
    fn to_query(&self) -> RetrievalQuery {
        match self.image_text.as_deref().map(str::trim) {
            Some(ocr) if !ocr.is_empty() => RetrievalQuery::new(format!(
                "{}\n\nOCR result:\n{}",
                self.question, ocr
            ))
            .with_secondary(self.question.clone()),
            _ => RetrievalQuery::new(self.question.clone()),
        }
    }
}

#[derive(Debug, Serialize)]
struct RetrieveResponse {
    excerpts: Vec<Excerpt>,
    meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
struct ResponseMeta {
    top_k: usize,
    threshold: f32,
    latency_ms: f64,
    no_relevant_context: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

type HandlerError = (StatusCode, Json<ErrorBody>);

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn answer_handler(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<Answer>, HandlerError> {
    let query = admit(&state, &request).await?;
    let retrieval = retrieve(&state, &query).await?;
    let Retrieval::Excerpts(excerpts) = retrieval else {
        return Ok(Json(Answer::apology()));
    };
    let prompt = build_prompt(&excerpts, &query.primary);
    let generator = state.generator.clone();
    let answer = tokio::task::spawn_blocking(move || generator.generate(&prompt))
        .await
        .map_err(|err| internal_error(format!("generation task join error: {err}")))?
        .map_err(generation_error)?;
    Ok(Json(answer.unwrap_or_else(Answer::apology)))
}

async fn retrieve_handler(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<RetrieveResponse>, HandlerError> {
    let query = admit(&state, &request).await?;
    let start = Instant::now();
    let retrieval = retrieve(&state, &query).await?;
    let config = state.retriever.config();
    let no_relevant_context = retrieval.is_empty();
    let excerpts = match retrieval {
        Retrieval::Excerpts(excerpts) => excerpts,
        Retrieval::NoRelevantContext => Vec::new(),
    };
    Ok(Json(RetrieveResponse {
        excerpts,
        meta: ResponseMeta {
            top_k: config.top_k,
            threshold: config.similarity_threshold,
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            no_relevant_context,
        },
    }))
}

async fn admit(state: &AppState, request: &AskRequest) -> Result<RetrievalQuery, HandlerError> {
    if request.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    if let Some(budget) = &state.budget {
        if let Err(wait) = budget.admit().await {
            return Err(too_many_requests(format!(
                "rate limit exceeded; retry in {:.1}s",
                wait.as_secs_f64()
            )));
        }
    }
    Ok(request.to_query())
}

async fn retrieve(state: &AppState, query: &RetrievalQuery) -> Result<Retrieval, HandlerError> {
    let primary = embed_query(state, query.primary.clone()).await?;
    let secondary = match &query.secondary {
        Some(text) => Some(embed_query(state, text.clone()).await?),
        None => None,
    };
    state
        .retriever
        .retrieve_vectors(&primary, secondary.as_deref())
        .map_err(retrieval_error)
}

async fn embed_query(state: &AppState, query: String) -> Result<Vec<f32>, HandlerError> {
    let cached = match &state.query_cache {
        Some(cache) => cache.lookup(&query).await,
        None => None,
    };
    if let Some(embedding) = cached {
        return Ok(embedding);
    }

    let retriever = state.retriever.clone();
    let text = query.clone();
    let embedding = tokio::task::spawn_blocking(move || retriever.embed_query(&text))
        .await
        .map_err(|err| internal_error(format!("embedding task join error: {err}")))?
        .map_err(retrieval_error)?;

    if let Some(cache) = &state.query_cache {
        cache.remember(query, embedding.clone()).await;
    }
    Ok(embedding)
}

fn error_body(status: StatusCode, message: impl Into<String>) -> HandlerError {
    (
        status,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn bad_request(message: impl Into<String>) -> HandlerError {
    error_body(StatusCode::BAD_REQUEST, message)
}

fn too_many_requests(message: impl Into<String>) -> HandlerError {
    error_body(StatusCode::TOO_MANY_REQUESTS, message)
}

fn internal_error(message: impl Into<String>) -> HandlerError {
    error_body(StatusCode::INTERNAL_SERVER_ERROR, message)
}

fn retrieval_error(err: RetrievalError) -> HandlerError {
    match err {
        RetrievalError::Validation(err) => bad_request(err.to_string()),
        RetrievalError::Embedding(err) => {
            tracing::warn!("query embedding failed: {err}");
            error_body(StatusCode::BAD_GATEWAY, err.to_string())
        }
    }
}

fn generation_error(err: GenerationError) -> HandlerError {
    tracing::error!("answer generation failed: {err}");
    internal_error(err.to_string())
}

/// Unit query vectors keyed by the exact query string (OCR-augmented queries included).
#[derive(Clone)]
struct QueryCache {
    entries: Arc<Mutex<LruCache<String, Vec<f32>>>>,
}

impl QueryCache {
    /// `None` when `size` is zero.
    fn with_capacity(size: usize) -> Option<Self> {
        let capacity = NonZeroUsize::new(size)?;
        Some(Self {
            entries: Arc::new(Mutex::new(LruCache::new(capacity))),
        })
    }

    async fn lookup(&self, query: &str) -> Option<Vec<f32>> {
        let hit = self.entries.lock().await.get(query).cloned();
        if hit.is_some() {
            tracing::debug!("query embedding cache hit ({} chars)", query.len());
        }
        hit
    }

    async fn remember(&self, query: String, embedding: Vec<f32>) {
        self.entries.lock().await.put(query, embedding);
    }
}

/// Token bucket sized by [`ServiceOptions`]; one token per admitted request.
#[derive(Clone)]
struct RequestBudget {
    bucket: Arc<Mutex<Bucket>>,
    burst: f64,
    per_second: f64,
}

struct Bucket {
    available: f64,
    updated: Instant,
}

impl RequestBudget {
    /// `None` when either limit is zero (limiting disabled).
    fn from_options(options: &ServiceOptions) -> Option<Self> {
        if options.max_requests_per_minute == 0 || options.rate_limit_burst == 0 {
            return None;
        }
        let burst = f64::from(options.rate_limit_burst);
        Some(Self {
            bucket: Arc::new(Mutex::new(Bucket {
                available: burst,
                updated: Instant::now(),
            })),
            burst,
            per_second: f64::from(options.max_requests_per_minute) / 60.0,
        })
    }

    /// Takes a token, or reports how long until one is available.
    async fn admit(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock().await;
        let now = Instant::now();
        let refill = now.duration_since(bucket.updated).as_secs_f64() * self.per_second;
        bucket.available = (bucket.available + refill).min(self.burst);
        bucket.updated = now;
        if bucket.available >= 1.0 {
            bucket.available -= 1.0;
            return Ok(());
        }
        let shortfall = 1.0 - bucket.available;
        Err(Duration::from_secs_f64(shortfall / self.per_second))
    }
}
