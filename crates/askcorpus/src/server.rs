//! JSON HTTP API over the pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ask` | Answer a question |
//! | `POST` | `/feedback` | Record thumbs up/down on an answer |
//! | `GET`  | `/flags` | List flagged queries (`?status=`, default `pending`) |
//! | `POST` | `/flags/resolve` | Resolve or dismiss a flagged query |
//! | `GET`  | `/stats` | Learning, cache, and analytics counters |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses share one shape:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser
//! clients.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crate::analytics::QueryLogger;
use crate::cache::ResponseCache;
use crate::feedback::FeedbackLearner;
use crate::pipeline::{AskOptions, RagPipeline};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RagPipeline>,
    pub learner: Arc<FeedbackLearner>,
    pub cache: Arc<ResponseCache>,
    pub logger: Arc<QueryLogger>,
}

/// Starts the HTTP server on `bind_addr`. Runs until the process is
/// terminated.
pub async fn run_server(bind_addr: &str, state: AppState) -> anyhow::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router(state).layer(cors);

    println!("askcorpus server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/ask", post(handle_ask))
        .route("/feedback", post(handle_feedback))
        .route("/flags", get(handle_list_flags))
        .route("/flags/resolve", post(handle_resolve_flag))
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    error!(error = %err, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: err.to_string(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    top_k: Option<usize>,
    temperature: Option<f32>,
    use_expansion: Option<bool>,
    use_hybrid: Option<bool>,
    use_hyde: Option<bool>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let defaults = AskOptions::default();
    let opts = AskOptions {
        top_k: req.top_k.unwrap_or(defaults.top_k),
        temperature: req.temperature.unwrap_or(defaults.temperature),
        use_expansion: req.use_expansion.unwrap_or(defaults.use_expansion),
        use_hybrid: req.use_hybrid.unwrap_or(defaults.use_hybrid),
        use_hyde: req.use_hyde.unwrap_or(defaults.use_hyde),
    };
    if opts.top_k < 1 {
        return Err(bad_request("top_k must be >= 1"));
    }

    let response = state
        .pipeline
        .ask(req.question.trim(), opts)
        .await
        .map_err(internal)?;

    Ok(Json(serde_json::to_value(&response).map_err(|e| internal(e.into()))?))
}

// ============ POST /feedback ============

#[derive(Deserialize)]
struct FeedbackRequest {
    query: String,
    /// `positive` or `negative`.
    feedback: String,
    #[serde(default)]
    chunk_ids: Vec<String>,
    log_id: Option<i64>,
}

async fn handle_feedback(
    State(state): State<AppState>,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let is_positive = match req.feedback.as_str() {
        "positive" => true,
        "negative" => false,
        other => {
            return Err(bad_request(format!(
                "feedback must be 'positive' or 'negative', got '{}'",
                other
            )))
        }
    };

    let actions = state
        .pipeline
        .feedback(req.query.trim(), is_positive, &req.chunk_ids, req.log_id)
        .await
        .map_err(internal)?;

    Ok(Json(serde_json::json!({ "actions": actions })))
}

// ============ GET /flags ============

#[derive(Deserialize)]
struct FlagsQuery {
    status: Option<String>,
}

async fn handle_list_flags(
    State(state): State<AppState>,
    Query(params): Query<FlagsQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let status = params.status.as_deref().unwrap_or("pending");
    let flags = state
        .learner
        .get_flagged_queries(status)
        .await
        .map_err(internal)?;
    Ok(Json(serde_json::json!({ "flags": flags })))
}

// ============ POST /flags/resolve ============

#[derive(Deserialize)]
struct ResolveFlagRequest {
    query: String,
    /// Defaults to `resolved`; use `dismissed` to drop a flag without
    /// action.
    resolution: Option<String>,
}

async fn handle_resolve_flag(
    State(state): State<AppState>,
    Json(req): Json<ResolveFlagRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let resolution = req.resolution.as_deref().unwrap_or("resolved");
    let updated = state
        .learner
        .resolve_flag(&req.query, resolution)
        .await
        .map_err(internal)?;

    if !updated {
        return Err(not_found(format!("no flag found for query: {}", req.query)));
    }
    Ok(Json(serde_json::json!({ "resolved": true })))
}

// ============ GET /stats ============

async fn handle_stats(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let learning = state.learner.get_stats().await.map_err(internal)?;
    let cache = state.cache.stats().await.map_err(internal)?;
    let analytics = state.logger.get_stats().await.map_err(internal)?;

    Ok(Json(serde_json::json!({
        "learning": learning,
        "cache": cache,
        "analytics": analytics,
    })))
}
