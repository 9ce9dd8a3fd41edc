//! Pipeline status endpoints.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use pipewright_core::report::PipelineStatusReport;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{name}/status", get(pipeline_status))
        .route("/{name}/runs/{run_id}/status", get(run_status))
}

/// Aggregate the latest run of a pipeline.
async fn pipeline_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<PipelineStatusReport>, ApiError> {
    let report = state.aggregator.status_for_pipeline(&name).await?;
    Ok(Json(report))
}

async fn run_status(
    State(state): State<AppState>,
    Path((name, run_id)): Path<(String, String)>,
) -> Result<Json<PipelineStatusReport>, ApiError> {
    let run_id = ApiError::parse_id(&run_id)?;
    let report = state.aggregator.status_for_run(&name, run_id).await?;
    Ok(Json(report))
}
