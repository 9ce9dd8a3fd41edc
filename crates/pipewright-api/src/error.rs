//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pipewright_core::ResourceId;
use serde_json::json;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unavailable(String),
    Internal(String),
}

impl ApiError {
    /// Parse a path segment as a resource id.
    pub fn parse_id(raw: &str) -> Result<ResourceId, ApiError> {
        ResourceId::parse(raw).ok_or_else(|| ApiError::BadRequest(format!("invalid id: {}", raw)))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<pipewright_db::DbError> for ApiError {
    fn from(err: pipewright_db::DbError) -> Self {
        match err {
            pipewright_db::DbError::NotFound(msg) => ApiError::NotFound(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<pipewright_scheduler::SchedulerError> for ApiError {
    fn from(err: pipewright_scheduler::SchedulerError) -> Self {
        match err {
            pipewright_scheduler::SchedulerError::NotFound(msg) => ApiError::NotFound(msg),
            pipewright_scheduler::SchedulerError::Store(e) => e.into(),
        }
    }
}
