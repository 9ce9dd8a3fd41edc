//! In-memory execution store.
//!
//! Used by embedded setups and tests. Listings keep insertion order within
//! the same `execution_order`, matching the PostgreSQL ordering.

use async_trait::async_trait;
use pipewright_core::execution::{
    Job, JobData, JobExecution, Pipeline, PipelineExecution, Stage, StageExecution,
};
use pipewright_core::{ExecutionStatus, ResourceId};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::{DbError, DbResult, ExecutionStore};

/// Number of save calls received per record kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub stage_executions: usize,
    pub pipeline_executions: usize,
    pub job_executions: usize,
}

#[derive(Default)]
struct Inner {
    pipelines: Vec<Pipeline>,
    pipeline_executions: Vec<PipelineExecution>,
    stages: Vec<Stage>,
    stage_executions: Vec<StageExecution>,
    jobs: Vec<Job>,
    job_executions: Vec<JobExecution>,
    job_data: HashMap<ResourceId, JobData>,
    job_status_history: HashMap<ResourceId, Vec<ExecutionStatus>>,
    writes: WriteCounts,
}

/// ExecutionStore kept entirely in memory.
#[derive(Default)]
pub struct MemoryExecutionStore {
    inner: RwLock<Inner>,
}

fn upsert<T, F>(rows: &mut Vec<T>, row: T, same: F)
where
    F: Fn(&T) -> bool,
{
    match rows.iter_mut().find(|existing| same(existing)) {
        Some(existing) => *existing = row,
        None => rows.push(row),
    }
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_pipeline(&self, pipeline: Pipeline) -> DbResult<()> {
        let mut inner = self.inner.write().await;
        if inner.pipelines.iter().any(|p| p.name == pipeline.name) {
            return Err(DbError::Duplicate(format!("pipeline {}", pipeline.name)));
        }
        inner.pipelines.push(pipeline);
        Ok(())
    }

    pub async fn insert_pipeline_execution(&self, execution: PipelineExecution) {
        let mut inner = self.inner.write().await;
        let id = execution.id;
        upsert(&mut inner.pipeline_executions, execution, |e| e.id == id);
    }

    pub async fn insert_stage(&self, stage: Stage) {
        let mut inner = self.inner.write().await;
        inner.stages.push(stage);
    }

    pub async fn insert_stage_execution(&self, execution: StageExecution) {
        let mut inner = self.inner.write().await;
        let id = execution.id;
        upsert(&mut inner.stage_executions, execution, |e| e.id == id);
    }

    pub async fn insert_job(&self, job: Job) {
        let mut inner = self.inner.write().await;
        inner.jobs.push(job);
    }

    pub async fn insert_job_execution(&self, execution: JobExecution) {
        let mut inner = self.inner.write().await;
        let id = execution.id;
        upsert(&mut inner.job_executions, execution, |e| e.id == id);
    }

    /// Register the runnable description of a job execution.
    pub async fn insert_job_data(&self, data: JobData) {
        let mut inner = self.inner.write().await;
        inner.job_data.insert(data.job_execution_id, data);
    }

    pub async fn write_counts(&self) -> WriteCounts {
        self.inner.read().await.writes
    }

    /// Every status saved for a job execution, oldest first.
    pub async fn job_status_history(&self, job_execution_id: ResourceId) -> Vec<ExecutionStatus> {
        self.inner
            .read()
            .await
            .job_status_history
            .get(&job_execution_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn job_execution(&self, id: ResourceId) -> Option<JobExecution> {
        let inner = self.inner.read().await;
        inner.job_executions.iter().find(|e| e.id == id).cloned()
    }

    pub async fn stage_execution(&self, id: ResourceId) -> Option<StageExecution> {
        let inner = self.inner.read().await;
        inner.stage_executions.iter().find(|e| e.id == id).cloned()
    }

    pub async fn pipeline_execution(&self, id: ResourceId) -> Option<PipelineExecution> {
        let inner = self.inner.read().await;
        inner.pipeline_executions.iter().find(|e| e.id == id).cloned()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn find_pipeline_by_name(&self, name: &str) -> DbResult<Option<Pipeline>> {
        let inner = self.inner.read().await;
        Ok(inner.pipelines.iter().find(|p| p.name == name).cloned())
    }

    async fn find_latest_execution(
        &self,
        pipeline_id: ResourceId,
    ) -> DbResult<Option<PipelineExecution>> {
        let inner = self.inner.read().await;
        Ok(inner
            .pipeline_executions
            .iter()
            .filter(|e| e.pipeline_id == pipeline_id)
            .max_by_key(|e| e.recency_key())
            .cloned())
    }

    async fn find_pipeline_execution(
        &self,
        id: ResourceId,
    ) -> DbResult<Option<PipelineExecution>> {
        Ok(self.pipeline_execution(id).await)
    }

    async fn list_stages(&self, pipeline_id: ResourceId) -> DbResult<Vec<Stage>> {
        let inner = self.inner.read().await;
        let mut stages: Vec<Stage> = inner
            .stages
            .iter()
            .filter(|s| s.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order among equal execution orders.
        stages.sort_by_key(|s| s.execution_order);
        Ok(stages)
    }

    async fn find_stage_execution(
        &self,
        stage_id: ResourceId,
        pipeline_execution_id: ResourceId,
    ) -> DbResult<Option<StageExecution>> {
        let inner = self.inner.read().await;
        Ok(inner
            .stage_executions
            .iter()
            .find(|e| e.stage_id == stage_id && e.pipeline_execution_id == pipeline_execution_id)
            .cloned())
    }

    async fn list_jobs(&self, stage_id: ResourceId) -> DbResult<Vec<Job>> {
        let inner = self.inner.read().await;
        Ok(inner
            .jobs
            .iter()
            .filter(|j| j.stage_id == stage_id)
            .cloned()
            .collect())
    }

    async fn find_job_execution(&self, job_id: ResourceId) -> DbResult<Option<JobExecution>> {
        let inner = self.inner.read().await;
        Ok(inner
            .job_executions
            .iter()
            .rev()
            .find(|e| e.job_id == job_id)
            .cloned())
    }

    async fn find_job_data(&self, job_execution_id: ResourceId) -> DbResult<Option<JobData>> {
        let inner = self.inner.read().await;
        Ok(inner.job_data.get(&job_execution_id).cloned())
    }

    async fn save_stage_execution(&self, execution: &StageExecution) -> DbResult<()> {
        let mut inner = self.inner.write().await;
        inner.writes.stage_executions += 1;
        let id = execution.id;
        upsert(&mut inner.stage_executions, execution.clone(), |e| e.id == id);
        Ok(())
    }

    async fn save_pipeline_execution(&self, execution: &PipelineExecution) -> DbResult<()> {
        let mut inner = self.inner.write().await;
        inner.writes.pipeline_executions += 1;
        let id = execution.id;
        upsert(&mut inner.pipeline_executions, execution.clone(), |e| e.id == id);
        Ok(())
    }

    async fn save_job_execution(&self, execution: &JobExecution) -> DbResult<()> {
        let mut inner = self.inner.write().await;
        inner.writes.job_executions += 1;
        inner
            .job_status_history
            .entry(execution.id)
            .or_default()
            .push(execution.status);
        let id = execution.id;
        upsert(&mut inner.job_executions, execution.clone(), |e| e.id == id);
        Ok(())
    }
}
