//! Pipeline, stage and job definitions and their execution records.
//!
//! Definitions (`Pipeline`, `Stage`, `Job`) are created once from a pipeline
//! configuration. Execution records are created per run and only their
//! status is mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ExecutionStatus, ResourceId};

/// A named CI/CD pipeline definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: ResourceId,
    /// Unique pipeline name.
    pub name: String,
    /// Repository the pipeline builds, if any.
    pub repository_url: Option<String>,
}

/// One run of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineExecution {
    pub id: ResourceId,
    pub pipeline_id: ResourceId,
    pub status: ExecutionStatus,
    /// Commit the run was triggered for.
    pub commit_hash: Option<String>,
    /// Creation time. The latest execution of a pipeline is the one with the
    /// greatest `created_at`, ties broken by the greater id.
    pub created_at: DateTime<Utc>,
}

impl PipelineExecution {
    /// Ordering key used to pick the latest execution of a pipeline.
    pub fn recency_key(&self) -> (DateTime<Utc>, ResourceId) {
        (self.created_at, self.id)
    }
}

/// A stage in a pipeline definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: ResourceId,
    pub name: String,
    pub pipeline_id: ResourceId,
    pub execution_order: i32,
}

/// Execution record of a stage within one pipeline execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageExecution {
    pub id: ResourceId,
    pub stage_id: ResourceId,
    pub pipeline_execution_id: ResourceId,
    pub status: ExecutionStatus,
}

/// A job in a stage definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: ResourceId,
    pub name: String,
    pub stage_id: ResourceId,
}

/// The most recent execution attempt of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: ResourceId,
    pub job_id: ResourceId,
    pub status: ExecutionStatus,
    /// Human readable detail for the last status change.
    pub message: Option<String>,
}

/// Source checkout for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSource {
    pub url: String,
    pub branch: Option<String>,
    pub commit: Option<String>,
}

/// Everything a worker needs to run one job execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobData {
    pub job_execution_id: ResourceId,
    pub job_id: ResourceId,
    pub job_name: String,
    pub stage_name: String,
    pub pipeline_name: String,
    /// Container image the script runs in.
    pub image: String,
    /// Commands, run in order; the first failure stops the job.
    pub script: Vec<String>,
    pub working_dir: Option<String>,
    pub repository: Option<GitSource>,
}

impl JobData {
    /// Build a status update for this job's execution record.
    pub fn execution_with_status(
        &self,
        status: ExecutionStatus,
        message: impl Into<String>,
    ) -> JobExecution {
        JobExecution {
            id: self.job_execution_id,
            job_id: self.job_id,
            status,
            message: Some(message.into()),
        }
    }
}
