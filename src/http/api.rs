//! Route handlers for the chart-rendering HTTP surface.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::task::{ChartConfig, TaskId};

use super::{AppError, AppState, Envelope};

pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
pub struct GenerateChartBody {
    #[serde(rename = "type")]
    pub output_type: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub option: serde_json::Value,
    #[serde(default)]
    pub base64: bool,
    #[serde(default)]
    pub download: bool,
    #[serde(default)]
    pub oss_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateChartResponse {
    pub task_id: String,
    pub status: &'static str,
    pub status_url: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub async fn generate_chart(
    State(state): State<AppState>,
    Json(body): Json<GenerateChartBody>,
) -> Result<(StatusCode, Json<Envelope<GenerateChartResponse>>), AppError> {
    let config = ChartConfig {
        option: body.option,
        output_type: body.output_type,
        width: body.width,
        height: body.height,
        download: body.download,
        oss_path: body.oss_path,
    };
    let _ = body.base64;

    // `create_task` runs `ChartConfig::validate`, which checks type,
    // option shape, and dimensions together and reports every violation
    // found rather than just the first.
    let task = state.manager.create_task(config)?;

    Ok(Envelope::ok(GenerateChartResponse {
        task_id: task.id.to_string(),
        status: "pending",
        status_url: format!("/api/charts/status/{}", task.id),
        created_at: task.created_at,
    }))
}

#[derive(Debug, Serialize)]
pub struct ChartStatusResponse {
    pub task_id: String,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub image_url: Option<String>,
    pub file_name: Option<String>,
    pub error: Option<String>,
}

pub async fn chart_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<ChartStatusResponse>>, AppError> {
    let task_id: TaskId = id
        .parse()
        .map_err(|_| crate::error::ServiceError::NotFound(id.clone()))?;

    let task = state
        .manager
        .get_task(task_id)
        .ok_or_else(|| crate::error::ServiceError::NotFound(id.clone()))?;

    let (_, response) = Envelope::ok(ChartStatusResponse {
        task_id: task.id.to_string(),
        status: task.state.to_string(),
        created_at: task.created_at,
        started_at: task.started_at,
        completed_at: task.completed_at,
        image_url: task.image_url,
        file_name: task.file_name,
        error: task.error,
    });
    Ok(response)
}

pub async fn queue_status(
    State(state): State<AppState>,
) -> Json<Envelope<crate::queue::QueueStatus>> {
    let (_, response) = Envelope::ok(state.manager.queue_status());
    response
}

#[derive(Debug, Serialize)]
pub struct SystemHealthResponse {
    pub healthy: bool,
    pub pending_tasks: usize,
    pub processing_tasks: usize,
}

pub async fn system_health(
    State(state): State<AppState>,
) -> (StatusCode, Json<Envelope<SystemHealthResponse>>) {
    let status = state.manager.queue_status();
    let healthy = status.pending_count <= 1000;
    let http_status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Envelope::with_status(
        http_status,
        SystemHealthResponse {
            healthy,
            pending_tasks: status.pending_count,
            processing_tasks: status.processing_count,
        },
    )
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> ([(&'static str, &'static str); 1], String) {
    let body = state.manager.metrics().render_prometheus();
    (
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

pub async fn performance_snapshot(
    State(state): State<AppState>,
) -> Json<Envelope<crate::metrics::PerformanceSnapshot>> {
    let (_, response) = Envelope::ok(state.manager.metrics().snapshot());
    response
}

pub async fn cleanup_status(
    State(state): State<AppState>,
) -> Json<Envelope<crate::cleanup::CleanupStatus>> {
    let (_, response) = Envelope::ok(state.cleanup.status());
    response
}

#[derive(Debug, Serialize)]
pub struct ManualCleanupResponse {
    pub cleaned_tasks: usize,
    pub deleted_files: usize,
    pub errors: Vec<crate::manager::FileDeleteError>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

pub async fn manual_cleanup(
    State(state): State<AppState>,
) -> Json<Envelope<ManualCleanupResponse>> {
    let result = state.cleanup.trigger_manual().await;
    let (_, response) = Envelope::ok(ManualCleanupResponse {
        cleaned_tasks: result.cleaned_tasks,
        deleted_files: result.deleted_files,
        errors: result.errors,
        timestamp: chrono::Utc::now(),
    });
    response
}
