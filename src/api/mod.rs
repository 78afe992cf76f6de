//! HTTP API server for reqchain.

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use crate::engine::ChainService;
use crate::error::Error;
use crate::metrics;

/// Render an error as `{"error": {code, message, details}}` with the status
/// that matches its kind.
///
/// Internal errors are logged in full and returned with a sanitized message.
fn error_response(e: Error) -> Response {
    let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!("API error: {:?}", e);
    } else {
        debug!("API request rejected: {}", e);
    }
    (status, Json(e.to_external_json())).into_response()
}

/// Create CORS layer based on environment configuration.
///
/// - REQCHAIN_CORS_ORIGINS: Comma-separated list of allowed origins (default: http://localhost:3000)
/// - REQCHAIN_CORS_ALLOW_ALL: Set to "true" to allow all origins (NOT recommended for production)
pub fn create_cors_layer() -> CorsLayer {
    let allow_all = std::env::var("REQCHAIN_CORS_ALLOW_ALL")
        .map(|v| v.to_lowercase() == "true")
        .unwrap_or(false);

    if allow_all {
        warn!("CORS configured to allow all origins - this is NOT secure for production!");
        return CorsLayer::very_permissive();
    }

    let origins_str = std::env::var("REQCHAIN_CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000".to_string());

    let mut origins: Vec<HeaderValue> = origins_str
        .split(',')
        .filter_map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<HeaderValue>() {
                Ok(hv) => Some(hv),
                Err(e) => {
                    warn!("Invalid CORS origin '{}': {}", trimmed, e);
                    None
                }
            }
        })
        .collect();

    if origins.is_empty() {
        warn!("No valid CORS origins configured, using localhost:3000");
        origins.push(HeaderValue::from_static("http://localhost:3000"));
    }

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Default maximum concurrent requests.
const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Get the maximum concurrent requests limit from environment.
///
/// - REQCHAIN_MAX_CONCURRENT_REQUESTS: Maximum concurrent requests (default: 100)
pub fn get_max_concurrent_requests() -> usize {
    std::env::var("REQCHAIN_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_CONCURRENT_REQUESTS)
}

/// Create a concurrency limit layer to prevent resource exhaustion.
pub fn create_concurrency_limit() -> tower::limit::ConcurrencyLimitLayer {
    tower::limit::ConcurrencyLimitLayer::new(get_max_concurrent_requests())
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: ChainService,
}

/// Create the API router (without state applied - call with_state on the result).
pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/chains", get(list_chains).post(create_chain))
        .route("/chains/{id}", get(get_chain).delete(delete_chain))
        .route("/chains/{id}/execute", post(execute_chain))
        .route("/chains/{id}/history", get(chain_history))
}

/// Create the complete API router with state.
pub fn create_router(state: AppState) -> Router {
    create_api_routes()
        .layer(create_concurrency_limit())
        .layer(TraceLayer::new_for_http())
        .layer(create_cors_layer())
        .with_state(state)
}

// ============================================================================
// Health & Metrics
// ============================================================================

async fn health_check(State(state): State<AppState>) -> Response {
    match state.service.health().await {
        Ok(health) if health.is_ok() => Json(json!({
            "status": "ok",
            "integrity_check": health.integrity_check,
            "journal_mode": health.journal_mode,
            "busy_timeout_ms": health.busy_timeout_ms,
            "chains": health.chain_count,
            "executions": health.execution_count,
        }))
        .into_response(),
        Ok(health) => {
            error!("Database integrity check failed: {}", health.integrity_check);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "degraded", "integrity_check": health.integrity_check})),
            )
                .into_response()
        }
        Err(e) => {
            error!("Health check failed: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "message": "Health check failed"})),
            )
                .into_response()
        }
    }
}

async fn metrics_handler() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
        .into_response()
}

// ============================================================================
// Chain Endpoints
// ============================================================================

async fn list_chains(State(state): State<AppState>) -> Response {
    match state.service.list().await {
        Ok(chains) => Json(json!({ "chains": chains })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_chain(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.service.get(&id).await {
        Ok(chain) => Json(chain).into_response(),
        Err(e) => error_response(e),
    }
}

/// Body is the chain definition text, YAML or JSON.
async fn create_chain(State(state): State<AppState>, body: String) -> Response {
    match state.service.create_from_text(&body).await {
        Ok(id) => (StatusCode::CREATED, Json(json!({ "id": id }))).into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_chain(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.service.delete(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ExecuteRequest {
    #[serde(default)]
    variables: HashMap<String, Value>,
}

/// Runs synchronously and answers with the full execution result. The body
/// is optional; when present it may carry variable overrides.
async fn execute_chain(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        ExecuteRequest::default()
    } else {
        match serde_json::from_slice::<ExecuteRequest>(&body) {
            Ok(request) => request,
            Err(e) => return error_response(Error::Json(e)),
        }
    };

    match state.service.execute(&id, request.variables).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn chain_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    match state.service.history(&id, query.limit.unwrap_or(0)).await {
        Ok(executions) => Json(json!({ "executions": executions })).into_response(),
        Err(e) => error_response(e),
    }
}
