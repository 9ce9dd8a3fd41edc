//! Scheduler error types.

use pipewright_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(#[from] DbError),
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
