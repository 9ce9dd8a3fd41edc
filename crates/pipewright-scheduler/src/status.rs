//! Pipeline status aggregation.
//!
//! Recomputes stage and pipeline status bottom-up from the latest job
//! executions and writes back whatever disagrees with the computed values.
//! Aggregation is not transactional: when a lookup fails part way through,
//! stage rows corrected before the failure stay corrected.

use pipewright_core::execution::{Pipeline, PipelineExecution, Stage};
use pipewright_core::report::{JobStatusReport, PipelineStatusReport, StageStatusReport};
use pipewright_core::status::fold_statuses;
use pipewright_core::ResourceId;
use pipewright_db::ExecutionStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{SchedulerError, SchedulerResult};

/// Computes and persists rollup status for pipeline runs.
pub struct StatusAggregator {
    store: Arc<dyn ExecutionStore>,
}

fn missing(what: String) -> SchedulerError {
    warn!(missing = %what, "Status aggregation aborted");
    SchedulerError::NotFound(what)
}

impl StatusAggregator {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self { store }
    }

    /// Aggregate the latest execution of the named pipeline.
    pub async fn status_for_pipeline(
        &self,
        pipeline_name: &str,
    ) -> SchedulerResult<PipelineStatusReport> {
        let pipeline = self.find_pipeline(pipeline_name).await?;
        let execution = self
            .store
            .find_latest_execution(pipeline.id)
            .await?
            .ok_or_else(|| missing(format!("pipeline execution for {}", pipeline_name)))?;

        self.aggregate(&pipeline, execution).await
    }

    /// Aggregate a specific execution of the named pipeline.
    pub async fn status_for_run(
        &self,
        pipeline_name: &str,
        pipeline_execution_id: ResourceId,
    ) -> SchedulerResult<PipelineStatusReport> {
        let pipeline = self.find_pipeline(pipeline_name).await?;
        let execution = self
            .store
            .find_pipeline_execution(pipeline_execution_id)
            .await?
            .filter(|e| e.pipeline_id == pipeline.id)
            .ok_or_else(|| {
                missing(format!(
                    "pipeline execution {} of {}",
                    pipeline_execution_id, pipeline_name
                ))
            })?;

        self.aggregate(&pipeline, execution).await
    }

    async fn find_pipeline(&self, pipeline_name: &str) -> SchedulerResult<Pipeline> {
        self.store
            .find_pipeline_by_name(pipeline_name)
            .await?
            .ok_or_else(|| missing(format!("pipeline {}", pipeline_name)))
    }

    async fn aggregate(
        &self,
        pipeline: &Pipeline,
        mut execution: PipelineExecution,
    ) -> SchedulerResult<PipelineStatusReport> {
        let stages = self.store.list_stages(pipeline.id).await?;

        let mut stage_reports = Vec::with_capacity(stages.len());
        for stage in &stages {
            stage_reports.push(self.aggregate_stage(pipeline, stage, execution.id).await?);
        }

        let pipeline_status = fold_statuses(stage_reports.iter().map(|s| s.stage_status));

        // Always written, even when unchanged.
        execution.status = pipeline_status;
        self.store.save_pipeline_execution(&execution).await?;

        info!(
            pipeline = %pipeline.name,
            pipeline_execution_id = %execution.id,
            status = %pipeline_status,
            stages = stage_reports.len(),
            "Aggregated pipeline status"
        );

        Ok(PipelineStatusReport {
            pipeline_name: pipeline.name.clone(),
            pipeline_execution_id: execution.id,
            pipeline_status,
            stages: stage_reports,
        })
    }

    async fn aggregate_stage(
        &self,
        pipeline: &Pipeline,
        stage: &Stage,
        pipeline_execution_id: ResourceId,
    ) -> SchedulerResult<StageStatusReport> {
        let mut stage_execution = self
            .store
            .find_stage_execution(stage.id, pipeline_execution_id)
            .await?
            .ok_or_else(|| {
                missing(format!(
                    "stage execution for {}/{} in run {}",
                    pipeline.name, stage.name, pipeline_execution_id
                ))
            })?;

        let jobs = self.store.list_jobs(stage.id).await?;
        let mut job_reports = Vec::with_capacity(jobs.len());
        for job in jobs {
            let job_execution = self
                .store
                .find_job_execution(job.id)
                .await?
                .ok_or_else(|| {
                    missing(format!(
                        "job execution for {}/{}/{}",
                        pipeline.name, stage.name, job.name
                    ))
                })?;

            job_reports.push(JobStatusReport {
                job_name: job.name,
                job_execution_id: job_execution.id,
                job_status: job_execution.status,
            });
        }

        let stage_status = fold_statuses(job_reports.iter().map(|j| j.job_status));
        debug!(
            pipeline = %pipeline.name,
            stage = %stage.name,
            status = %stage_status,
            jobs = job_reports.len(),
            "Aggregated stage status"
        );

        if stage_status != stage_execution.status {
            info!(
                pipeline = %pipeline.name,
                stage = %stage.name,
                from = %stage_execution.status,
                to = %stage_status,
                "Correcting stage execution status"
            );
            stage_execution.status = stage_status;
            self.store.save_stage_execution(&stage_execution).await?;
        }

        Ok(StageStatusReport {
            stage_name: stage.name.clone(),
            stage_execution_id: stage_execution.id,
            stage_status,
            jobs: job_reports,
        })
    }
}
