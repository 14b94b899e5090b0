//! HTTP boundary of the orchestrator.
//!
//! Every adapter failure is already absorbed by the orchestrator, so handlers
//! only ever answer 200, 400 (malformed input) or 500 (internal defect).

pub mod types;

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;

use crate::config::MnemeConfig;
use crate::error::QueryError;
use crate::query::orchestrator::{HealthReport, Orchestrator, StoreOutcome};
use crate::query::types::SourceId;
use types::{ErrorBody, QueryRequest, QueryResponse, StoreRequest};

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub config: Arc<MnemeConfig>,
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_liveness))
        .route("/api/query", post(handle_query))
        .route("/api/store", post(handle_store))
        .route("/api/systems/health", get(handle_systems_health))
        .route("/api/stats", get(handle_stats))
        .route("/api/config", get(handle_config))
        .with_state(state)
}

/// Error half of every handler.
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        let (status, kind) = match &err {
            QueryError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            QueryError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        Self {
            status,
            body: ErrorBody {
                error: kind.into(),
                message: err.to_string(),
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody {
                error: "invalid_request".into(),
                message: rejection.body_text(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

async fn handle_liveness() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "mneme",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(request) = payload?;
    let query = request.into_query()?;
    let include_metadata = query.options.include_metadata;

    let response = state.orchestrator.query(query).await?;
    Ok(Json(QueryResponse::from_aggregated(response, include_metadata)))
}

async fn handle_store(
    State(state): State<AppState>,
    payload: Result<Json<StoreRequest>, JsonRejection>,
) -> Result<Json<StoreOutcome>, ApiError> {
    let Json(request) = payload?;
    let sources: Vec<SourceId> = request.sources.into_iter().map(SourceId::from).collect();

    let outcome = state
        .orchestrator
        .store(&request.content, &request.metadata, &sources)
        .await?;
    Ok(Json(outcome))
}

async fn handle_systems_health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.orchestrator.check_health().await)
}

async fn handle_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "queries": state.orchestrator.stats(),
        "cache": state.orchestrator.cache_stats(),
        "adapters": state.orchestrator.registry().ids(),
    }))
}

/// Effective configuration. API keys never serialise.
async fn handle_config(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = &state.config;
    Json(json!({
        "adapters": config.adapters,
        "orchestrator": config.orchestrator,
        "ranking": config.ranking,
        "cache": config.cache,
    }))
}
