//! HTTP server: router, auth middleware, and request handlers.
//!
//! Routes mirror the service surface: memory create/read/delete, ranked
//! search, retrieval-augmented chat, and bulk import. Everything except
//! `/health` sits behind the `X-API-Key` shared-secret check, which runs
//! before any handler logic. Handlers validate input before touching the
//! store or a provider, run blocking SQLite work on the blocking pool, and
//! map failures onto the [`ApiError`] taxonomy.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use axum::extract::{Path, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::completion::CompletionClient;
use crate::config::CairnConfig;
use crate::db;
use crate::embedding::EmbeddingClient;
use crate::error::ApiError;
use crate::memory::bulk;
use crate::memory::consolidate::{consolidate, delete_memory, NewMemory};
use crate::memory::reinforce::read_and_reinforce;
use crate::memory::search::{search_memories, RankParams, SearchFilter, SearchResult};
use crate::memory::types::{Memory, MemoryType};

/// Shared per-process state, constructed once at startup and cloned into
/// every handler.
#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<rusqlite::Connection>>,
    embedding: Arc<EmbeddingClient>,
    completion: Arc<CompletionClient>,
    config: Arc<CairnConfig>,
}

/// Open the database, build the provider clients, and check the embedding
/// fingerprint against what the store was created with.
pub fn setup_shared_state(config: CairnConfig) -> Result<AppState> {
    let db_path = config.resolved_db_path();
    let conn = db::open_database(&db_path, config.embedding.dimensions)?;

    let embedding = EmbeddingClient::new(&config.embedding)?;
    let fingerprint = embedding.fingerprint();
    match db::migrations::get_embedding_fingerprint(&conn)? {
        Some(stored) if stored != fingerprint => {
            tracing::warn!(
                stored = %stored,
                configured = %fingerprint,
                "embedding model changed — existing vectors were produced by a different model"
            );
        }
        None => db::migrations::set_embedding_fingerprint(&conn, &fingerprint)?,
        _ => {}
    }

    let completion = CompletionClient::new(&config.completion)?;

    Ok(AppState {
        db: Arc::new(Mutex::new(conn)),
        embedding: Arc::new(embedding),
        completion: Arc::new(completion),
        config: Arc::new(config),
    })
}

/// Start the HTTP server and run until ctrl-c.
pub async fn serve(config: CairnConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let state = setup_shared_state(config)?;
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "cairn listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to listen for ctrl-c");
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}

/// Build the full router: `/health` public, everything else behind auth.
pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .with_state(state.clone());

    let protected = Router::new()
        .route("/memories", post(create_memory))
        .route("/memories/bulk", post(bulk_import))
        .route("/memories/{id}", get(get_memory).delete(delete_memory_handler))
        .route("/search", post(search))
        .route("/chat", post(chat))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ))
        .with_state(state);

    Router::new().merge(public).merge(protected)
}

// ── Auth ──────────────────────────────────────────────────────────────────────

/// Reject any request whose `X-API-Key` header doesn't match the configured
/// shared secret. Runs before handlers, so no logic executes unauthenticated.
async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(key) if constant_time_eq(key, &state.config.server.api_key) => {
            next.run(request).await
        }
        _ => ApiError::Auth.into_response(),
    }
}

/// Constant-time comparison. Leaks only the length difference, which is not
/// secret for API keys.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let mut diff = (a.len() ^ b.len()) as u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

// ── Request types ─────────────────────────────────────────────────────────────

const MAX_CONTENT_CHARS: usize = 50_000;
const MAX_AGENT_ID_CHARS: usize = 64;

fn default_memory_type() -> MemoryType {
    MemoryType::Fact
}

fn default_metadata() -> serde_json::Value {
    json!({})
}

fn default_confidence() -> f64 {
    1.0
}

fn default_limit() -> usize {
    10
}

fn default_min_confidence() -> f64 {
    0.0
}

fn default_context_limit() -> usize {
    10
}

fn default_split_on() -> String {
    "\n\n".to_string()
}

#[derive(Debug, Deserialize)]
pub struct CreateMemoryRequest {
    pub content: String,
    #[serde(default = "default_memory_type")]
    pub memory_type: MemoryType,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default = "default_metadata")]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

impl CreateMemoryRequest {
    fn validate(&self) -> Result<(), ApiError> {
        let chars = self.content.chars().count();
        if chars == 0 || chars > MAX_CONTENT_CHARS {
            return Err(ApiError::Validation(format!(
                "content must be 1 to {MAX_CONTENT_CHARS} characters"
            )));
        }
        validate_agent_id(self.agent_id.as_deref())?;
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ApiError::Validation(
                "confidence must be between 0 and 1".into(),
            ));
        }
        if !self.metadata.is_object() {
            return Err(ApiError::Validation("metadata must be an object".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub memory_type: Option<MemoryType>,
    /// Falls back to the configured default when absent.
    #[serde(default)]
    pub temporal_weight: Option<f64>,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl SearchRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.query.trim().is_empty() {
            return Err(ApiError::Validation("query must not be empty".into()));
        }
        if !(1..=100).contains(&self.limit) {
            return Err(ApiError::Validation("limit must be 1 to 100".into()));
        }
        if let Some(w) = self.temporal_weight {
            if !(0.0..=1.0).contains(&w) {
                return Err(ApiError::Validation(
                    "temporal_weight must be between 0 and 1".into(),
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ApiError::Validation(
                "min_confidence must be between 0 and 1".into(),
            ));
        }
        validate_agent_id(self.agent_id.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,
}

impl ChatRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.question.trim().is_empty() {
            return Err(ApiError::Validation("question must not be empty".into()));
        }
        if !(1..=50).contains(&self.context_limit) {
            return Err(ApiError::Validation("context_limit must be 1 to 50".into()));
        }
        validate_agent_id(self.agent_id.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub struct BulkImportRequest {
    pub content: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default = "default_memory_type")]
    pub memory_type: MemoryType,
    #[serde(default = "default_split_on")]
    pub split_on: String,
}

impl BulkImportRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.split_on.is_empty() {
            return Err(ApiError::Validation("split_on must not be empty".into()));
        }
        validate_agent_id(self.agent_id.as_deref())
    }
}

fn validate_agent_id(agent_id: Option<&str>) -> Result<(), ApiError> {
    if let Some(agent_id) = agent_id {
        if agent_id.chars().count() > MAX_AGENT_ID_CHARS {
            return Err(ApiError::Validation(format!(
                "agent_id must be at most {MAX_AGENT_ID_CHARS} characters"
            )));
        }
    }
    Ok(())
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// Store reachability probe. 503 when the store can't answer `SELECT 1`.
async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let db = Arc::clone(&state.db);
    tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| anyhow!("db lock poisoned: {e}"))?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(anyhow::Error::from)
    })
    .await
    .map_err(|e| ApiError::Unavailable(format!("db task failed: {e}")))?
    .map_err(|e| ApiError::Unavailable(e.to_string()))?;

    Ok(Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

/// Create-or-merge. Returns the post-mutation record either way.
async fn create_memory(
    State(state): State<AppState>,
    Json(req): Json<CreateMemoryRequest>,
) -> Result<Json<Memory>, ApiError> {
    req.validate()?;

    let embedding = state
        .embedding
        .embed(&req.content)
        .await
        .map_err(|e| ApiError::Provider(e.to_string()))?;

    let new = NewMemory {
        content: req.content,
        embedding,
        memory_type: req.memory_type,
        agent_id: req.agent_id,
        metadata: req.metadata,
        parent_id: req.parent_id,
        confidence: req.confidence,
    };

    let db = Arc::clone(&state.db);
    let threshold = state.config.retrieval.dedup_threshold;
    let result = tokio::task::spawn_blocking(move || {
        let mut conn = db
            .lock()
            .map_err(|e| anyhow!("db lock poisoned: {e}"))?;
        consolidate(&mut conn, new, threshold)
    })
    .await
    .map_err(|e| ApiError::Internal(anyhow!("db task failed: {e}")))?
    .map_err(ApiError::Internal)?;

    tracing::info!(
        id = %result.memory().id,
        merged = result.was_merged(),
        "memory consolidated"
    );
    Ok(Json(result.memory().clone()))
}

/// Read a single memory. The read itself reinforces: the returned record
/// carries the post-increment access count.
async fn get_memory(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Memory>, ApiError> {
    let db = Arc::clone(&state.db);
    let lookup_id = id.clone();
    let memory = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| anyhow!("db lock poisoned: {e}"))?;
        read_and_reinforce(&conn, &lookup_id)
    })
    .await
    .map_err(|e| ApiError::Internal(anyhow!("db task failed: {e}")))?
    .map_err(ApiError::Internal)?;

    memory.map(Json).ok_or(ApiError::NotFound(id))
}

/// Hard delete. No tombstone, no cascade to children (`parent_id` may dangle).
async fn delete_memory_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let db = Arc::clone(&state.db);
    let delete_id = id.clone();
    let deleted = tokio::task::spawn_blocking(move || {
        let mut conn = db
            .lock()
            .map_err(|e| anyhow!("db lock poisoned: {e}"))?;
        delete_memory(&mut conn, &delete_id)
    })
    .await
    .map_err(|e| ApiError::Internal(anyhow!("db task failed: {e}")))?
    .map_err(ApiError::Internal)?;

    if !deleted {
        return Err(ApiError::NotFound(id));
    }
    tracing::info!(id = %id, "memory deleted");
    Ok(Json(json!({"deleted": true})))
}

/// Ranked semantic search.
async fn search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<Vec<SearchResult>>, ApiError> {
    req.validate()?;

    let filter = SearchFilter {
        agent_id: req.agent_id.clone(),
        memory_type: req.memory_type,
        min_confidence: req.min_confidence,
    };
    let temporal_weight = req
        .temporal_weight
        .unwrap_or(state.config.retrieval.default_temporal_weight);

    let results = run_search(&state, &req.query, filter, temporal_weight, req.limit).await?;
    Ok(Json(results))
}

/// Retrieval-augmented answer: search internally, hand the hits to the
/// completion provider as context, return the answer plus its sources.
async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    req.validate()?;

    let filter = SearchFilter {
        agent_id: req.agent_id.clone(),
        memory_type: None,
        min_confidence: 0.0,
    };
    let temporal_weight = state.config.retrieval.default_temporal_weight;
    let results = run_search(&state, &req.question, filter, temporal_weight, req.context_limit)
        .await?;

    let context: String = results
        .iter()
        .map(|r| format!("[{}] {}", r.memory.memory_type, r.memory.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    let answer = state
        .completion
        .answer(&context, &req.question)
        .await
        .map_err(|e| ApiError::Provider(e.to_string()))?;

    let sources: Vec<Memory> = results.into_iter().map(|r| r.memory).collect();
    Ok(Json(json!({"answer": answer, "sources": sources})))
}

/// Chunked import with hash-only dedup. The response exposes only the
/// imported/duplicate counts; failed chunks are logged and visible to
/// library callers, not in the body.
async fn bulk_import(
    State(state): State<AppState>,
    Json(req): Json<BulkImportRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    req.validate()?;

    let embedding = Arc::clone(&state.embedding);
    let outcomes = bulk::bulk_import(
        Arc::clone(&state.db),
        &req.content,
        &req.split_on,
        req.memory_type,
        req.agent_id,
        move |chunk| {
            let embedding = Arc::clone(&embedding);
            async move { embedding.embed(&chunk).await }
        },
    )
    .await;

    let summary = bulk::summarize(&outcomes);
    if summary.failed > 0 {
        tracing::warn!(failed = summary.failed, "bulk import skipped failed chunks");
    }
    tracing::info!(
        imported = summary.imported,
        duplicates = summary.duplicates_skipped,
        "bulk import complete"
    );
    Ok(Json(json!({
        "imported": summary.imported,
        "duplicates_skipped": summary.duplicates_skipped,
    })))
}

/// Shared search path for `/search` and `/chat`: embed the query, then
/// over-fetch, rank, and reinforce on the blocking pool.
async fn run_search(
    state: &AppState,
    query: &str,
    filter: SearchFilter,
    temporal_weight: f64,
    limit: usize,
) -> Result<Vec<SearchResult>, ApiError> {
    let query_embedding = state
        .embedding
        .embed(query)
        .await
        .map_err(|e| ApiError::Provider(e.to_string()))?;

    let db = Arc::clone(&state.db);
    let rank_params = RankParams {
        temporal_weight,
        decay_rate: state.config.retrieval.decay_rate,
        min_score: state.config.retrieval.min_score,
        limit,
    };
    let overfetch_factor = state.config.retrieval.overfetch_factor;

    tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|e| anyhow!("db lock poisoned: {e}"))?;
        search_memories(&conn, &query_embedding, &filter, &rank_params, overfetch_factor)
    })
    .await
    .map_err(|e| ApiError::Internal(anyhow!("db task failed: {e}")))?
    .map_err(ApiError::Internal)
}
