//! HTTP search server.
//!
//! Exposes the hybrid engine over a small JSON API for dashboards and AI
//! agents:
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/search` | Run a hybrid query |
//! | `GET`  | `/health` | Engine, database, and embedding status |
//! | `GET`  | `/describe` | Machine-readable tool schema |
//!
//! # Auth
//!
//! When the environment variable named by `server.api_key_env` is set and
//! non-empty, every `/search` request must carry it in the `X-API-Key`
//! header. `/health` stays open for load balancers.
//!
//! # Backpressure
//!
//! In-flight searches are capped by `server.max_concurrent_searches`.
//! Requests beyond the cap are rejected immediately with a retryable 503
//! rather than queuing without bound.
//!
//! # Error contract
//!
//! Failures return `{"error": "...", "status": "error"}` with an HTTP
//! status matching the error kind (and `"retryable": true` where a retry
//! can succeed).

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::engine::{tool_schema, HybridQueryEngine, QueryOptions};
use crate::error::QueryError;
use crate::models::{QueryResult, Scope};

/// Shared state for all route handlers.
#[derive(Clone)]
struct AppState {
    engine: Arc<HybridQueryEngine>,
    /// Bounds concurrent searches; over-capacity requests get 503.
    search_slots: Arc<Semaphore>,
    /// Expected API key, when auth is enabled.
    api_key: Option<String>,
}

/// Start the HTTP server and run until the process exits.
pub async fn run_server(engine: Arc<HybridQueryEngine>) -> anyhow::Result<()> {
    let server_config = engine.config().server.clone();

    let api_key = std::env::var(&server_config.api_key_env)
        .ok()
        .filter(|key| !key.is_empty());
    if api_key.is_some() {
        info!("API key auth enabled via {}", server_config.api_key_env);
    }

    let state = AppState {
        engine,
        search_slots: Arc::new(Semaphore::new(server_config.max_concurrent_searches)),
        api_key,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/search", post(handle_search))
        .route("/health", get(handle_health))
        .route("/describe", get(handle_describe))
        .layer(cors)
        .with_state(state);

    info!("search server listening on http://{}", server_config.bind);
    let listener = tokio::net::TcpListener::bind(&server_config.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ errors ============

/// JSON error body: `{"error": ..., "status": "error"}`.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: &'static str,
    #[serde(skip_serializing_if = "is_false")]
    retryable: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

struct ApiError {
    http_status: StatusCode,
    message: String,
    retryable: bool,
}

impl ApiError {
    fn new(http_status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            http_status,
            message: message.into(),
            retryable: false,
        }
    }

    fn retryable(http_status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            http_status,
            message: message.into(),
            retryable: true,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            status: "error",
            retryable: self.retryable,
        };
        (self.http_status, Json(body)).into_response()
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        let message = err.to_string();
        match err {
            QueryError::NotReady { .. } => {
                ApiError::retryable(StatusCode::SERVICE_UNAVAILABLE, message)
            }
            QueryError::EmptyQuery | QueryError::FilterSyntax { .. } => {
                ApiError::new(StatusCode::BAD_REQUEST, message)
            }
            QueryError::DimensionMismatch { .. } => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, message)
            }
            QueryError::Cancelled => ApiError::retryable(StatusCode::REQUEST_TIMEOUT, message),
            QueryError::Internal(_) => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, message),
        }
    }
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    question: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
    #[serde(default = "default_scope")]
    scope: String,
    #[serde(default)]
    use_reranker: bool,
}

fn default_top_k() -> usize {
    5
}
fn default_scope() -> String {
    "engine".to_string()
}

async fn handle_search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SearchRequest>,
) -> Result<Json<QueryResult>, ApiError> {
    check_api_key(&state, &headers)?;

    if request.question.trim().is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "question must not be empty",
        ));
    }
    let scope: Scope = request
        .scope
        .parse()
        .map_err(|e: String| ApiError::new(StatusCode::BAD_REQUEST, e))?;

    // Bounded concurrency: reject rather than queue when saturated.
    let _slot = state.search_slots.clone().try_acquire_owned().map_err(|_| {
        ApiError::retryable(
            StatusCode::SERVICE_UNAVAILABLE,
            "server is at capacity; retry shortly",
        )
    })?;

    let mut options = QueryOptions::new(request.question);
    options.top_k = request.top_k;
    options.scope = scope;
    options.use_reranker = request.use_reranker;

    let result = state.engine.query(&options).await.map_err(|e| {
        error!(error = %e, "search request failed");
        ApiError::from(e)
    })?;

    Ok(Json(result))
}

fn check_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &state.api_key else {
        return Ok(());
    };
    let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if provided != Some(expected.as_str()) {
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "invalid or missing API key",
        ));
    }
    Ok(())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// `online` when every subsystem responds, else `degraded`.
    status: String,
    database: bool,
    embeddings: bool,
    gpu: bool,
    version: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = state.engine.store().ping().await;
    // The vector view is mapped at construction; its presence means the
    // semantic side can score.
    let embeddings = state.engine.vectors().rows() > 0;
    let gpu = std::env::var("UEQ_HAS_GPU").map(|v| v == "1").unwrap_or(false);

    Json(HealthResponse {
        status: if database && embeddings {
            "online".to_string()
        } else {
            "degraded".to_string()
        },
        database,
        embeddings,
        gpu,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /describe ============

async fn handle_describe() -> Json<serde_json::Value> {
    Json(tool_schema())
}
