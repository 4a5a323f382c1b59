//! HTTP API for the tab grouper.
//!
//! Browser extensions post their open tabs and get back titled groups plus
//! the tabs that did not fit anywhere.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/v1/group` | Group and title a JSON array of tabs |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/` | Welcome message |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "embedding_failed", "message": "embedding failed: ..." } }
//! ```
//!
//! Error codes: `embedding_failed` (502), `timeout` (504), `internal` (500).
//! Title generation problems are never errors; affected groups carry the
//! fallback title.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so extension popups can
//! call the API directly.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::grouper::{group_and_label, GroupError, TabGrouper};
use crate::labels::LabelGenerator;
use crate::models::{GroupingResponse, Tab};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    grouper: Arc<TabGrouper>,
    labeler: Arc<LabelGenerator>,
}

/// Starts the HTTP server described by `config`.
///
/// Loads the embedding backend once, then serves until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let grouper = Arc::new(TabGrouper::from_config(config)?);
    let labeler = Arc::new(LabelGenerator::from_config(&config.labels)?);
    run_server_with_services(&config.server.bind, grouper, labeler).await
}

/// Starts the server with prebuilt services.
///
/// Lets callers (and tests) plug in their own embedding or title providers.
pub async fn run_server_with_services(
    bind_addr: &str,
    grouper: Arc<TabGrouper>,
    labeler: Arc<LabelGenerator>,
) -> anyhow::Result<()> {
    let app = router(grouper, labeler);

    tracing::info!("tab grouper listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Builds the application router.
pub fn router(grouper: Arc<TabGrouper>, labeler: Arc<LabelGenerator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/api/v1/group", post(handle_group))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { grouper, labeler })
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
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<GroupError> for AppError {
    fn from(err: GroupError) -> Self {
        let (status, code) = match &err {
            GroupError::EmbeddingTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            GroupError::Embedding(_)
            | GroupError::EmbeddingCount { .. }
            | GroupError::EmbeddingDims => (StatusCode::BAD_GATEWAY, "embedding_failed"),
            GroupError::Clustering(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        tracing::error!(%err, "grouping request failed");
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ GET / and /health ============

#[derive(Serialize)]
struct WelcomeResponse {
    message: &'static str,
}

async fn handle_root() -> Json<WelcomeResponse> {
    Json(WelcomeResponse {
        message: "Welcome to the tab grouper API",
    })
}

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

// ============ POST /api/v1/group ============

/// Handler for `POST /api/v1/group`.
///
/// Body is a JSON array of tabs. Responds with the titled groups, the
/// unclustered tabs, and the counts.
async fn handle_group(
    State(state): State<AppState>,
    Json(tabs): Json<Vec<Tab>>,
) -> Result<Json<GroupingResponse>, AppError> {
    let response = group_and_label(&state.grouper, &state.labeler, tabs).await?;
    Ok(Json(response))
}
