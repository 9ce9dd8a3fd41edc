//! Execution store: pipelines, stages, jobs and their execution records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipewright_core::execution::{
    GitSource, Job, JobData, JobExecution, Pipeline, PipelineExecution, Stage, StageExecution,
};
use pipewright_core::{ExecutionStatus, ResourceId};
use sqlx::PgPool;

use crate::{DbError, DbResult};

/// Storage for definitions and execution records.
///
/// Lookups return `Ok(None)` for missing rows; callers decide whether that
/// is an error. Listings are returned in a stable order that callers must
/// not re-sort. Saves are upserts keyed by id.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn find_pipeline_by_name(&self, name: &str) -> DbResult<Option<Pipeline>>;

    /// Latest execution of a pipeline: greatest `created_at`, ties broken by
    /// the greater id.
    async fn find_latest_execution(
        &self,
        pipeline_id: ResourceId,
    ) -> DbResult<Option<PipelineExecution>>;

    async fn find_pipeline_execution(&self, id: ResourceId)
    -> DbResult<Option<PipelineExecution>>;

    /// Stages of a pipeline ordered by `execution_order`.
    async fn list_stages(&self, pipeline_id: ResourceId) -> DbResult<Vec<Stage>>;

    async fn find_stage_execution(
        &self,
        stage_id: ResourceId,
        pipeline_execution_id: ResourceId,
    ) -> DbResult<Option<StageExecution>>;

    /// Jobs of a stage in creation order.
    async fn list_jobs(&self, stage_id: ResourceId) -> DbResult<Vec<Job>>;

    /// Most recent execution of a job.
    async fn find_job_execution(&self, job_id: ResourceId) -> DbResult<Option<JobExecution>>;

    /// Everything needed to run the job execution with the given id.
    async fn find_job_data(&self, job_execution_id: ResourceId) -> DbResult<Option<JobData>>;

    async fn save_stage_execution(&self, execution: &StageExecution) -> DbResult<()>;

    async fn save_pipeline_execution(&self, execution: &PipelineExecution) -> DbResult<()>;

    async fn save_job_execution(&self, execution: &JobExecution) -> DbResult<()>;
}

fn parse_status(raw: &str) -> DbResult<ExecutionStatus> {
    raw.parse()
        .map_err(|e: pipewright_core::Error| DbError::InvalidData(e.to_string()))
}

#[derive(Debug, sqlx::FromRow)]
struct PipelineRecord {
    id: uuid::Uuid,
    name: String,
    repository_url: Option<String>,
}

impl From<PipelineRecord> for Pipeline {
    fn from(r: PipelineRecord) -> Self {
        Pipeline {
            id: r.id.into(),
            name: r.name,
            repository_url: r.repository_url,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PipelineExecutionRecord {
    id: uuid::Uuid,
    pipeline_id: uuid::Uuid,
    status: String,
    commit_hash: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PipelineExecutionRecord> for PipelineExecution {
    type Error = DbError;

    fn try_from(r: PipelineExecutionRecord) -> DbResult<Self> {
        Ok(PipelineExecution {
            id: r.id.into(),
            pipeline_id: r.pipeline_id.into(),
            status: parse_status(&r.status)?,
            commit_hash: r.commit_hash,
            created_at: r.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StageRecord {
    id: uuid::Uuid,
    name: String,
    pipeline_id: uuid::Uuid,
    execution_order: i32,
}

impl From<StageRecord> for Stage {
    fn from(r: StageRecord) -> Self {
        Stage {
            id: r.id.into(),
            name: r.name,
            pipeline_id: r.pipeline_id.into(),
            execution_order: r.execution_order,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StageExecutionRecord {
    id: uuid::Uuid,
    stage_id: uuid::Uuid,
    pipeline_execution_id: uuid::Uuid,
    status: String,
}

impl TryFrom<StageExecutionRecord> for StageExecution {
    type Error = DbError;

    fn try_from(r: StageExecutionRecord) -> DbResult<Self> {
        Ok(StageExecution {
            id: r.id.into(),
            stage_id: r.stage_id.into(),
            pipeline_execution_id: r.pipeline_execution_id.into(),
            status: parse_status(&r.status)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JobRecord {
    id: uuid::Uuid,
    name: String,
    stage_id: uuid::Uuid,
}

impl From<JobRecord> for Job {
    fn from(r: JobRecord) -> Self {
        Job {
            id: r.id.into(),
            name: r.name,
            stage_id: r.stage_id.into(),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JobExecutionRecord {
    id: uuid::Uuid,
    job_id: uuid::Uuid,
    status: String,
    message: Option<String>,
}

impl TryFrom<JobExecutionRecord> for JobExecution {
    type Error = DbError;

    fn try_from(r: JobExecutionRecord) -> DbResult<Self> {
        Ok(JobExecution {
            id: r.id.into(),
            job_id: r.job_id.into(),
            status: parse_status(&r.status)?,
            message: r.message,
        })
    }
}

/// Joined row backing `find_job_data`.
#[derive(Debug, sqlx::FromRow)]
struct JobDataRecord {
    job_execution_id: uuid::Uuid,
    job_id: uuid::Uuid,
    job_name: String,
    stage_name: String,
    pipeline_name: String,
    image: String,
    script: Vec<String>,
    working_dir: Option<String>,
    repository_url: Option<String>,
    branch: Option<String>,
    commit_hash: Option<String>,
}

impl From<JobDataRecord> for JobData {
    fn from(r: JobDataRecord) -> Self {
        let repository = r.repository_url.map(|url| GitSource {
            url,
            branch: r.branch,
            commit: r.commit_hash,
        });
        JobData {
            job_execution_id: r.job_execution_id.into(),
            job_id: r.job_id.into(),
            job_name: r.job_name,
            stage_name: r.stage_name,
            pipeline_name: r.pipeline_name,
            image: r.image,
            script: r.script,
            working_dir: r.working_dir,
            repository,
        }
    }
}

/// PostgreSQL implementation of ExecutionStore.
pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn find_pipeline_by_name(&self, name: &str) -> DbResult<Option<Pipeline>> {
        let record = sqlx::query_as::<_, PipelineRecord>(
            "SELECT id, name, repository_url FROM pipelines WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record.map(Pipeline::from))
    }

    async fn find_latest_execution(
        &self,
        pipeline_id: ResourceId,
    ) -> DbResult<Option<PipelineExecution>> {
        let record = sqlx::query_as::<_, PipelineExecutionRecord>(
            r#"
            SELECT id, pipeline_id, status, commit_hash, created_at
            FROM pipeline_executions
            WHERE pipeline_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(pipeline_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        record.map(PipelineExecution::try_from).transpose()
    }

    async fn find_pipeline_execution(
        &self,
        id: ResourceId,
    ) -> DbResult<Option<PipelineExecution>> {
        let record = sqlx::query_as::<_, PipelineExecutionRecord>(
            r#"
            SELECT id, pipeline_id, status, commit_hash, created_at
            FROM pipeline_executions
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        record.map(PipelineExecution::try_from).transpose()
    }

    async fn list_stages(&self, pipeline_id: ResourceId) -> DbResult<Vec<Stage>> {
        let records = sqlx::query_as::<_, StageRecord>(
            r#"
            SELECT id, name, pipeline_id, execution_order
            FROM stages
            WHERE pipeline_id = $1
            ORDER BY execution_order ASC, created_at ASC, id ASC
            "#,
        )
        .bind(pipeline_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(records.into_iter().map(Stage::from).collect())
    }

    async fn find_stage_execution(
        &self,
        stage_id: ResourceId,
        pipeline_execution_id: ResourceId,
    ) -> DbResult<Option<StageExecution>> {
        let record = sqlx::query_as::<_, StageExecutionRecord>(
            r#"
            SELECT id, stage_id, pipeline_execution_id, status
            FROM stage_executions
            WHERE stage_id = $1 AND pipeline_execution_id = $2
            "#,
        )
        .bind(stage_id.as_uuid())
        .bind(pipeline_execution_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        record.map(StageExecution::try_from).transpose()
    }

    async fn list_jobs(&self, stage_id: ResourceId) -> DbResult<Vec<Job>> {
        let records = sqlx::query_as::<_, JobRecord>(
            "SELECT id, name, stage_id FROM jobs WHERE stage_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(stage_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(records.into_iter().map(Job::from).collect())
    }

    async fn find_job_execution(&self, job_id: ResourceId) -> DbResult<Option<JobExecution>> {
        let record = sqlx::query_as::<_, JobExecutionRecord>(
            r#"
            SELECT id, job_id, status, message
            FROM job_executions
            WHERE job_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(job_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        record.map(JobExecution::try_from).transpose()
    }

    async fn find_job_data(&self, job_execution_id: ResourceId) -> DbResult<Option<JobData>> {
        let record = sqlx::query_as::<_, JobDataRecord>(
            r#"
            SELECT je.id AS job_execution_id,
                   j.id AS job_id,
                   j.name AS job_name,
                   s.name AS stage_name,
                   p.name AS pipeline_name,
                   j.image,
                   j.script,
                   j.working_dir,
                   p.repository_url,
                   pe.branch,
                   pe.commit_hash
            FROM job_executions je
            JOIN jobs j ON j.id = je.job_id
            JOIN stages s ON s.id = j.stage_id
            JOIN pipelines p ON p.id = s.pipeline_id
            LEFT JOIN pipeline_executions pe ON pe.id = je.pipeline_execution_id
            WHERE je.id = $1
            "#,
        )
        .bind(job_execution_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(record.map(JobData::from))
    }

    async fn save_stage_execution(&self, execution: &StageExecution) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stage_executions (id, stage_id, pipeline_execution_id, status, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, updated_at = NOW()
            "#,
        )
        .bind(execution.id.as_uuid())
        .bind(execution.stage_id.as_uuid())
        .bind(execution.pipeline_execution_id.as_uuid())
        .bind(execution.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_pipeline_execution(&self, execution: &PipelineExecution) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_executions (id, pipeline_id, status, commit_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status, commit_hash = EXCLUDED.commit_hash, updated_at = NOW()
            "#,
        )
        .bind(execution.id.as_uuid())
        .bind(execution.pipeline_id.as_uuid())
        .bind(execution.status.as_str())
        .bind(execution.commit_hash.as_deref())
        .bind(execution.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_job_execution(&self, execution: &JobExecution) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO job_executions (id, job_id, status, message, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status, message = EXCLUDED.message, updated_at = NOW()
            "#,
        )
        .bind(execution.id.as_uuid())
        .bind(execution.job_id.as_uuid())
        .bind(execution.status.as_str())
        .bind(execution.message.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(repository_url: Option<&str>) -> JobDataRecord {
        JobDataRecord {
            job_execution_id: uuid::Uuid::now_v7(),
            job_id: uuid::Uuid::now_v7(),
            job_name: "test".to_string(),
            stage_name: "compile".to_string(),
            pipeline_name: "build".to_string(),
            image: "alpine".to_string(),
            script: vec!["make".to_string()],
            working_dir: None,
            repository_url: repository_url.map(String::from),
            branch: Some("main".to_string()),
            commit_hash: Some("abc123".to_string()),
        }
    }

    #[test]
    fn test_job_data_carries_run_branch_and_commit() {
        let data = JobData::from(record(Some("https://example.com/app.git")));
        assert_eq!(
            data.repository,
            Some(GitSource {
                url: "https://example.com/app.git".to_string(),
                branch: Some("main".to_string()),
                commit: Some("abc123".to_string()),
            })
        );
    }

    #[test]
    fn test_job_data_without_repository() {
        let data = JobData::from(record(None));
        assert_eq!(data.repository, None);
    }
}

/// Tests against a live database.
/// Run with: DATABASE_URL=... cargo test -- --ignored
#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::{create_pool, run_migrations};

    #[tokio::test]
    #[ignore]
    async fn test_job_data_and_status_round_trip() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = create_pool(&url, 2).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store = PgExecutionStore::new(pool.clone());

        let pipeline_id = uuid::Uuid::now_v7();
        let run_id = uuid::Uuid::now_v7();
        let stage_id = uuid::Uuid::now_v7();
        let job_id = uuid::Uuid::now_v7();
        let job_execution_id = uuid::Uuid::now_v7();
        let name = format!("it-{}", pipeline_id);

        sqlx::query("INSERT INTO pipelines (id, name, repository_url) VALUES ($1, $2, $3)")
            .bind(pipeline_id)
            .bind(&name)
            .bind("https://example.com/repo.git")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO pipeline_executions (id, pipeline_id, branch, commit_hash) VALUES ($1, $2, 'release/1.x', 'abc123')",
        )
        .bind(run_id)
        .bind(pipeline_id)
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO stages (id, pipeline_id, name) VALUES ($1, $2, 'compile')")
            .bind(stage_id)
            .bind(pipeline_id)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO jobs (id, stage_id, name, image, script) VALUES ($1, $2, 'test', 'alpine', $3)",
        )
        .bind(job_id)
        .bind(stage_id)
        .bind(vec!["echo hi".to_string()])
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO job_executions (id, job_id, pipeline_execution_id) VALUES ($1, $2, $3)",
        )
        .bind(job_execution_id)
        .bind(job_id)
        .bind(run_id)
        .execute(&pool)
        .await
        .unwrap();

        let data = store
            .find_job_data(job_execution_id.into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(data.pipeline_name, name);
        assert_eq!(data.stage_name, "compile");
        assert_eq!(data.script, vec!["echo hi"]);
        let repository = data.repository.clone().unwrap();
        assert_eq!(repository.branch.as_deref(), Some("release/1.x"));
        assert_eq!(repository.commit.as_deref(), Some("abc123"));

        store
            .save_job_execution(&data.execution_with_status(ExecutionStatus::Running, "started"))
            .await
            .unwrap();
        let execution = store.find_job_execution(job_id.into()).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert_eq!(execution.message.as_deref(), Some("started"));
    }
}
