//! Worker dispatch endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use pipewright_core::ResourceId;
use serde::Serialize;
use tracing::info;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(active_jobs))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .route("/jobs/{id}/enqueue", post(enqueue_job))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActiveJobsResponse {
    active_job_count: usize,
    active_job_ids: Vec<ResourceId>,
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    cancelled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EnqueueResponse {
    message_id: String,
    job_execution_id: ResourceId,
}

async fn active_jobs(State(state): State<AppState>) -> Json<ActiveJobsResponse> {
    let active_job_ids = state.dispatcher.active_job_ids();
    Json(ActiveJobsResponse {
        active_job_count: active_job_ids.len(),
        active_job_ids,
    })
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let id = ApiError::parse_id(&id)?;
    let cancelled = state.dispatcher.cancel_job(id);
    Ok(Json(CancelResponse { cancelled }))
}

/// Publish a job execution id for the worker to pick up.
async fn enqueue_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    let id = ApiError::parse_id(&id)?;
    let message = state.messages.publish(&id.to_string()).await?;
    info!(job_execution_id = %id, message_id = %message.id, "Enqueued job");

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            message_id: message.id.to_string(),
            job_execution_id: id,
        }),
    ))
}
