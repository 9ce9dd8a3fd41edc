//! Job runtime trait.
//!
//! A runtime executes the script of a single job (for example inside a
//! container) and reports how it ended. Runtimes never write execution
//! status themselves; the dispatcher persists whatever they report.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::execution::JobData;
use crate::{ExecutionStatus, Result};

/// How a job run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    /// Every command exited successfully.
    Succeeded,
    /// The job ran but did not succeed.
    Failed {
        exit_code: Option<i32>,
        message: String,
    },
    /// The run stopped because its cancellation token fired.
    Cancelled,
}

impl JobOutcome {
    /// Status to persist for this outcome.
    pub fn status(&self) -> ExecutionStatus {
        match self {
            JobOutcome::Succeeded => ExecutionStatus::Success,
            JobOutcome::Failed { .. } => ExecutionStatus::Failed,
            JobOutcome::Cancelled => ExecutionStatus::Canceled,
        }
    }

    /// Message to persist alongside the status.
    pub fn message(&self) -> String {
        match self {
            JobOutcome::Succeeded => "Job completed successfully".to_string(),
            JobOutcome::Failed {
                exit_code: Some(code),
                message,
            } if message.is_empty() => format!("Job failed with exit code {}", code),
            JobOutcome::Failed {
                exit_code: Some(code),
                message,
            } => format!("Job failed with exit code {}: {}", code, message),
            JobOutcome::Failed {
                exit_code: None,
                message,
            } => format!("Job failed: {}", message),
            JobOutcome::Cancelled => "Job was cancelled".to_string(),
        }
    }
}

/// Trait for job execution backends.
#[async_trait]
pub trait JobRuntime: Send + Sync {
    /// Name of this runtime.
    fn name(&self) -> &'static str;

    /// Run a job to completion.
    ///
    /// Implementations must watch `cancel` and return
    /// `Ok(JobOutcome::Cancelled)` promptly once it fires, after cleaning up
    /// whatever they started. `Err` is reserved for failures of the runtime
    /// itself (unreachable daemon, invalid job data, ...).
    async fn execute(&self, job: &JobData, cancel: CancellationToken) -> Result<JobOutcome>;
}
