//! API routes.

pub mod health;
pub mod pipelines;
pub mod worker;

use crate::AppState;
use axum::Router;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_router())
        .merge(health::router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/pipelines", pipelines::router())
        .nest("/worker", worker::router())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use chrono::Utc;
    use pipewright_core::execution::{
        Job, JobData, JobExecution, Pipeline, PipelineExecution, Stage, StageExecution,
    };
    use pipewright_core::runtime::{JobOutcome, JobRuntime};
    use pipewright_core::{ExecutionStatus, ResourceId};
    use pipewright_db::{DbResult, MemoryExecutionStore, MessageQueueRepo, QueuedMessage};
    use pipewright_scheduler::{DispatchConfig, JobDispatchQueue};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    struct Succeed;

    #[async_trait]
    impl JobRuntime for Succeed {
        fn name(&self) -> &'static str {
            "succeed"
        }

        async fn execute(
            &self,
            _job: &JobData,
            _cancel: CancellationToken,
        ) -> pipewright_core::Result<JobOutcome> {
            Ok(JobOutcome::Succeeded)
        }
    }

    #[derive(Default)]
    struct RecordingQueue {
        published: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageQueueRepo for RecordingQueue {
        async fn publish(&self, payload: &str) -> DbResult<QueuedMessage> {
            self.published.lock().unwrap().push(payload.to_string());
            Ok(QueuedMessage {
                id: uuid::Uuid::now_v7(),
                payload: payload.to_string(),
                status: "pending".to_string(),
                claimed_by: None,
                claimed_at: None,
                created_at: Utc::now(),
            })
        }

        async fn claim(&self, _worker_id: &str) -> DbResult<Option<QueuedMessage>> {
            Ok(None)
        }

        async fn ack(&self, _message_id: uuid::Uuid) -> DbResult<()> {
            Ok(())
        }

        async fn release(&self, _message_id: uuid::Uuid) -> DbResult<()> {
            Ok(())
        }
    }

    struct TestApp {
        store: Arc<MemoryExecutionStore>,
        messages: Arc<RecordingQueue>,
        router: Router,
    }

    fn app() -> TestApp {
        let store = Arc::new(MemoryExecutionStore::new());
        let messages = Arc::new(RecordingQueue::default());
        let dispatcher = Arc::new(JobDispatchQueue::new(
            store.clone(),
            Arc::new(Succeed),
            DispatchConfig::default(),
        ));
        let state = AppState::new(store.clone(), dispatcher, messages.clone());
        TestApp {
            store,
            messages,
            router: router(state),
        }
    }

    /// Seed pipeline "build" with stage "compile" holding jobs "lint"
    /// (SUCCESS) and "test" (FAILED).
    async fn seed_build(store: &MemoryExecutionStore) -> ResourceId {
        let pipeline = Pipeline {
            id: ResourceId::new(),
            name: "build".to_string(),
            repository_url: None,
        };
        let run = PipelineExecution {
            id: ResourceId::new(),
            pipeline_id: pipeline.id,
            status: ExecutionStatus::Running,
            commit_hash: None,
            created_at: Utc::now(),
        };
        let stage = Stage {
            id: ResourceId::new(),
            name: "compile".to_string(),
            pipeline_id: pipeline.id,
            execution_order: 0,
        };
        store.insert_pipeline(pipeline).await.unwrap();
        store.insert_pipeline_execution(run.clone()).await;
        store.insert_stage(stage.clone()).await;
        store
            .insert_stage_execution(StageExecution {
                id: ResourceId::new(),
                stage_id: stage.id,
                pipeline_execution_id: run.id,
                status: ExecutionStatus::Running,
            })
            .await;
        for (name, status) in [("lint", ExecutionStatus::Success), ("test", ExecutionStatus::Failed)] {
            let job = Job {
                id: ResourceId::new(),
                name: name.to_string(),
                stage_id: stage.id,
            };
            store.insert_job(job.clone()).await;
            store
                .insert_job_execution(JobExecution {
                    id: ResourceId::new(),
                    job_id: job.id,
                    status,
                    message: None,
                })
                .await;
        }
        run.id
    }

    async fn send(router: &Router, method: &str, uri: &str) -> Response {
        router
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = app();
        let response = send(&app.router, "GET", "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["status"], "ok");

        let response = send(&app.router, "GET", "/health/ready").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_pipeline_status() {
        let app = app();
        let run_id = seed_build(&app.store).await;

        let response = send(&app.router, "GET", "/api/v1/pipelines/build/status").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json(response).await;
        assert_eq!(body["pipelineName"], "build");
        assert_eq!(body["pipelineExecutionId"], run_id.to_string());
        assert_eq!(body["pipelineStatus"], "FAILED");
        assert_eq!(body["stages"][0]["stageStatus"], "FAILED");
        assert_eq!(body["stages"][0]["jobs"][1]["jobName"], "test");
    }

    #[tokio::test]
    async fn test_run_status() {
        let app = app();
        let run_id = seed_build(&app.store).await;

        let uri = format!("/api/v1/pipelines/build/runs/{}/status", run_id);
        let response = send(&app.router, "GET", &uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["pipelineStatus"], "FAILED");
    }

    #[tokio::test]
    async fn test_unknown_pipeline_is_404() {
        let app = app();
        let response = send(&app.router, "GET", "/api/v1/pipelines/missing/status").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(json(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_invalid_run_id_is_400() {
        let app = app();
        let response = send(
            &app.router,
            "GET",
            "/api/v1/pipelines/build/runs/not-an-id/status",
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_active_jobs_when_idle() {
        let app = app();
        let response = send(&app.router, "GET", "/api/v1/worker/jobs").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json(response).await;
        assert_eq!(body["activeJobCount"], 0);
        assert_eq!(body["activeJobIds"], Value::Array(Vec::new()));
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let app = app();
        let uri = format!("/api/v1/worker/jobs/{}/cancel", ResourceId::new());
        let response = send(&app.router, "POST", &uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["cancelled"], false);
    }

    #[tokio::test]
    async fn test_enqueue_publishes_job_id() {
        let app = app();
        let id = ResourceId::new();
        let uri = format!("/api/v1/worker/jobs/{}/enqueue", id);

        let response = send(&app.router, "POST", &uri).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(json(response).await["jobExecutionId"], id.to_string());
        assert_eq!(*app.messages.published.lock().unwrap(), vec![id.to_string()]);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_invalid_id() {
        let app = app();
        let response = send(&app.router, "POST", "/api/v1/worker/jobs/nope/enqueue").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(app.messages.published.lock().unwrap().is_empty());
    }
}
