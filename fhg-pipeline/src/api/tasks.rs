//! Task submission and status endpoints

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use fhg_common::events::{PipelineState, TaskStatus};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{StageSummary, Task, ValidationReport};
use crate::pipeline::Submission;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SubmitParams {
    pub upload_key: Option<String>,
    pub filename: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelParams {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub task_id: Uuid,
    /// Status when cancellation was requested; the worker finalizes it
    pub status: TaskStatus,
    pub cancel_requested: bool,
}

/// Task status as seen by a poller
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: Uuid,
    pub state: PipelineState,
    pub status: TaskStatus,
    pub percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub stages: Vec<StageSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Present once the task is terminal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ValidationReport>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Task> for TaskStatusResponse {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.task_id,
            state: task.state,
            status: task.status,
            percentage: task.percentage,
            stages: task.results.iter().map(|r| r.summary()).collect(),
            upload_key: task.bundle.upload_key,
            filename: task.bundle.filename,
            reason: task.reason,
            report: task.report,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

/// POST /tasks
///
/// Body is the raw bundle (JSON bundle, single resource or NDJSON).
pub async fn submit_task(
    State(state): State<AppState>,
    Query(params): Query<SubmitParams>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let task_id = state
        .service
        .submit(Submission {
            bytes: body.to_vec(),
            upload_key: params.upload_key,
            filename: params.filename,
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            task_id,
            status: TaskStatus::Queued,
        }),
    ))
}

/// GET /tasks/:task_id
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> ApiResult<Json<TaskStatusResponse>> {
    let task = state.service.status(task_id).await?;
    debug!(task_id = %task_id, status = task.status.as_str(), "Status query");
    Ok(Json(task.into()))
}

/// GET /tasks/:task_id/report
pub async fn get_report(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> ApiResult<Json<ValidationReport>> {
    let task = state.service.status(task_id).await?;
    match task.report {
        Some(report) if task.status.is_terminal() => Ok(Json(report)),
        _ => Err(ApiError::Conflict(format!(
            "task {} is still {}; report not available yet",
            task_id,
            task.status.as_str()
        ))),
    }
}

/// POST /tasks/:task_id/cancel
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Query(params): Query<CancelParams>,
) -> ApiResult<(StatusCode, Json<CancelResponse>)> {
    let task = state
        .service
        .cancel(task_id, params.reason.as_deref())
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            task_id,
            status: task.status,
            cancel_requested: true,
        }),
    ))
}

/// DELETE /tasks/:task_id
pub async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.service.purge(task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn task_routes() -> Router<AppState> {
    Router::new()
        .route("/tasks", post(submit_task))
        .route("/tasks/:task_id", get(get_task).delete(delete_task))
        .route("/tasks/:task_id/report", get(get_report))
        .route("/tasks/:task_id/cancel", post(cancel_task))
}
