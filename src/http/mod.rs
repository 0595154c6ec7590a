//! HTTP transport: envelope types, error-to-response mapping, and router
//! assembly. Request handlers themselves live in `http::api`.

pub mod api;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::cleanup::CleanupScheduler;
use crate::error::ServiceError;
use crate::manager::TaskManager;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<TaskManager>,
    pub cleanup: Arc<CleanupScheduler>,
}

/// The uniform response envelope every JSON endpoint returns.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub code: u16,
    pub msg: &'static str,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: String,
}

impl<T: Serialize> Envelope<T> {
    /// The common case: a 200 success.
    pub fn ok(data: T) -> (StatusCode, Json<Self>) {
        Self::with_status(StatusCode::OK, data)
    }

    /// `code` mirrors whatever HTTP status the caller is actually returning,
    /// e.g. a 503 from the health check when the queue is over its bound.
    pub fn with_status(status: StatusCode, data: T) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                code: status.as_u16(),
                msg: "ok",
                data: Some(data),
                error: None,
            }),
        )
    }
}

/// Wraps a `ServiceError` so it can be returned directly from a handler and
/// rendered through the same envelope shape as successes.
pub struct AppError(pub ServiceError);

impl From<ServiceError> for AppError {
    fn from(e: ServiceError) -> Self {
        Self(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Envelope::<()> {
            code: status.as_u16(),
            msg: "error",
            data: None,
            error: Some(ErrorDetail {
                kind: self.0.kind(),
                message: self.0.to_string(),
            }),
        };
        (status, Json(body)).into_response()
    }
}

/// Records per-request HTTP metrics alongside the `tower_http::trace`
/// request spans.
async fn record_request_metrics(
    State(state): State<AppState>,
    matched_path: Option<MatchedPath>,
    request: Request,
    next: Next,
) -> Response {
    let _ = matched_path;
    let started = Instant::now();
    let response = next.run(request).await;
    state
        .manager
        .metrics()
        .record_http_request(response.status().as_u16(), started.elapsed().as_secs_f64());
    response
}

/// Builds the full application router with every route from the external
/// HTTP surface wired to its handler.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::liveness))
        .route("/api/charts/generate", post(api::generate_chart))
        .route("/api/charts/status/{id}", get(api::chart_status))
        .route("/api/system/queue-status", get(api::queue_status))
        .route("/api/system/health", get(api::system_health))
        .route("/api/system/metrics", get(api::prometheus_metrics))
        .route("/api/system/performance", get(api::performance_snapshot))
        .route("/api/system/cleanup-status", get(api::cleanup_status))
        .route("/api/system/cleanup/manual", post(api::manual_cleanup))
        .layer(middleware::from_fn_with_state(state.clone(), record_request_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
