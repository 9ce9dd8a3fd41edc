//! Worker that drains a message feed into the dispatch queue.

use crate::dispatch::{DispatchOutcome, JobDispatchQueue};
use crate::feed::MessageFeed;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delay before polling again after a feed or store error.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// A single consumer feeding messages to a [`JobDispatchQueue`].
pub struct Worker {
    id: String,
    feed: Arc<dyn MessageFeed>,
    queue: Arc<JobDispatchQueue>,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        feed: Arc<dyn MessageFeed>,
        queue: Arc<JobDispatchQueue>,
    ) -> Self {
        Self {
            id: id.into(),
            feed,
            queue,
        }
    }

    /// Run the worker loop until `shutdown` fires or the feed closes, then
    /// cancel whatever is still in flight.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(worker_id = %self.id, "Starting worker");

        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.feed.recv() => received,
            };

            match received {
                Ok(Some(delivery)) => {
                    let outcome = self.queue.on_message(&delivery.payload).await;
                    debug!(worker_id = %self.id, outcome = ?outcome, "Handled message");

                    if let DispatchOutcome::StoreError(id) = outcome {
                        warn!(worker_id = %self.id, job_execution_id = %id, "Releasing message after store error");
                        if let Err(e) = self.feed.release(&delivery).await {
                            warn!(worker_id = %self.id, error = %e, "Failed to release message");
                        }
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = sleep(ERROR_BACKOFF) => {}
                        }
                        continue;
                    }

                    // Malformed and unknown messages are acked too; redelivery
                    // would not make them valid.
                    if let Err(e) = self.feed.ack(&delivery).await {
                        warn!(worker_id = %self.id, error = %e, "Failed to ack message");
                    }
                }
                Ok(None) => {
                    info!(worker_id = %self.id, "Message feed closed");
                    break;
                }
                Err(e) => {
                    warn!(worker_id = %self.id, error = %e, "Failed to receive message");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        info!(worker_id = %self.id, "Stopping worker");
        self.queue.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SchedulerResult;
    use crate::dispatch::DispatchConfig;
    use crate::feed::{ChannelFeed, Delivery};
    use async_trait::async_trait;
    use pipewright_core::execution::{
        Job, JobData, JobExecution, Pipeline, PipelineExecution, Stage, StageExecution,
    };
    use pipewright_core::runtime::{JobOutcome, JobRuntime};
    use pipewright_core::{ExecutionStatus, ResourceId, Result};
    use pipewright_db::{DbError, DbResult, ExecutionStore, MemoryExecutionStore};
    use std::sync::Mutex;

    struct WaitForCancel;

    #[async_trait]
    impl JobRuntime for WaitForCancel {
        fn name(&self) -> &'static str {
            "wait-for-cancel"
        }

        async fn execute(&self, _job: &JobData, cancel: CancellationToken) -> Result<JobOutcome> {
            cancel.cancelled().await;
            Ok(JobOutcome::Cancelled)
        }
    }

    fn job() -> JobData {
        JobData {
            job_execution_id: ResourceId::new(),
            job_id: ResourceId::new(),
            job_name: "test".to_string(),
            stage_name: "compile".to_string(),
            pipeline_name: "build".to_string(),
            image: "alpine:latest".to_string(),
            script: vec!["sleep 300".to_string()],
            working_dir: None,
            repository: None,
        }
    }

    /// Store whose every call fails, as when the database is down.
    struct UnavailableStore;

    fn unavailable<T>() -> DbResult<T> {
        Err(DbError::InvalidData("connection refused".to_string()))
    }

    #[async_trait]
    impl ExecutionStore for UnavailableStore {
        async fn find_pipeline_by_name(&self, _name: &str) -> DbResult<Option<Pipeline>> {
            unavailable()
        }

        async fn find_latest_execution(
            &self,
            _pipeline_id: ResourceId,
        ) -> DbResult<Option<PipelineExecution>> {
            unavailable()
        }

        async fn find_pipeline_execution(
            &self,
            _id: ResourceId,
        ) -> DbResult<Option<PipelineExecution>> {
            unavailable()
        }

        async fn list_stages(&self, _pipeline_id: ResourceId) -> DbResult<Vec<Stage>> {
            unavailable()
        }

        async fn find_stage_execution(
            &self,
            _stage_id: ResourceId,
            _pipeline_execution_id: ResourceId,
        ) -> DbResult<Option<StageExecution>> {
            unavailable()
        }

        async fn list_jobs(&self, _stage_id: ResourceId) -> DbResult<Vec<Job>> {
            unavailable()
        }

        async fn find_job_execution(&self, _job_id: ResourceId) -> DbResult<Option<JobExecution>> {
            unavailable()
        }

        async fn find_job_data(&self, _job_execution_id: ResourceId) -> DbResult<Option<JobData>> {
            unavailable()
        }

        async fn save_stage_execution(&self, _execution: &StageExecution) -> DbResult<()> {
            unavailable()
        }

        async fn save_pipeline_execution(&self, _execution: &PipelineExecution) -> DbResult<()> {
            unavailable()
        }

        async fn save_job_execution(&self, _execution: &JobExecution) -> DbResult<()> {
            unavailable()
        }
    }

    /// Channel feed that records what was acked and released.
    struct RecordingFeed {
        inner: ChannelFeed,
        acked: Mutex<Vec<String>>,
        released: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageFeed for RecordingFeed {
        async fn recv(&self) -> SchedulerResult<Option<Delivery>> {
            self.inner.recv().await
        }

        async fn ack(&self, delivery: &Delivery) -> SchedulerResult<()> {
            self.acked.lock().unwrap().push(delivery.payload.clone());
            self.inner.ack(delivery).await
        }

        async fn release(&self, delivery: &Delivery) -> SchedulerResult<()> {
            self.released.lock().unwrap().push(delivery.payload.clone());
            self.inner.release(delivery).await
        }
    }

    #[tokio::test]
    async fn test_worker_releases_message_after_store_error() {
        let queue = Arc::new(JobDispatchQueue::new(
            Arc::new(UnavailableStore),
            Arc::new(WaitForCancel),
            DispatchConfig::default(),
        ));
        let (tx, inner) = ChannelFeed::new(8);
        let feed = Arc::new(RecordingFeed {
            inner,
            acked: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
        });
        let worker = Worker::new("worker-test", feed.clone(), queue.clone());
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { worker.run(shutdown).await }
        });

        let id = ResourceId::new();
        tx.send(id.to_string()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while feed.released.lock().unwrap().is_empty() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // Stops during the backoff instead of waiting it out.
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(*feed.released.lock().unwrap(), vec![id.to_string()]);
        assert!(feed.acked.lock().unwrap().is_empty());
        assert_eq!(queue.active_job_count(), 0);

        // The released message is still there for the next worker.
        let redelivered = feed.inner.recv().await.unwrap().unwrap();
        assert_eq!(redelivered.payload, id.to_string());
    }

    #[tokio::test]
    async fn test_worker_dispatches_and_cancels_on_shutdown() {
        let store = Arc::new(MemoryExecutionStore::new());
        let data = job();
        let id = data.job_execution_id;
        store.insert_job_data(data).await;

        let queue = Arc::new(JobDispatchQueue::new(
            store.clone(),
            Arc::new(WaitForCancel),
            DispatchConfig::default(),
        ));
        let (tx, feed) = ChannelFeed::new(8);
        let worker = Worker::new("worker-test", Arc::new(feed), queue.clone());
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { worker.run(shutdown).await }
        });

        tx.send("garbage".to_string()).await.unwrap();
        tx.send(id.to_string()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.active_job_ids() != vec![id] {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(queue.active_job_count(), 0);
        assert_eq!(
            store.job_status_history(id).await.last(),
            Some(&ExecutionStatus::Canceled)
        );
    }

    #[tokio::test]
    async fn test_worker_stops_when_feed_closes() {
        let store = Arc::new(MemoryExecutionStore::new());
        let queue = Arc::new(JobDispatchQueue::new(
            store,
            Arc::new(WaitForCancel),
            DispatchConfig::default(),
        ));
        let (tx, feed) = ChannelFeed::new(1);
        drop(tx);

        let worker = Worker::new("worker-test", Arc::new(feed), queue);
        tokio::time::timeout(Duration::from_secs(5), worker.run(CancellationToken::new()))
            .await
            .unwrap();
    }
}
