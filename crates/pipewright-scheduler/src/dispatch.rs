//! Job dispatch queue.
//!
//! Receives job-execution ids from the message feed and runs each one on the
//! configured [`JobRuntime`]. At most one attempt per execution id is in
//! flight at a time; the in-flight map is the single source of truth for
//! [`JobDispatchQueue::active_job_count`] and for cancellation.
//!
//! A cancelled attempt keeps its entry until its final status is written.
//! A redelivery of the same id waits for that, so the records and the
//! runtime resources of two attempts never overlap.

use pipewright_core::execution::JobData;
use pipewright_core::runtime::JobRuntime;
use pipewright_core::{ExecutionStatus, ResourceId};
use pipewright_db::ExecutionStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Dispatch settings.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of jobs allowed to run at once.
    pub concurrency: usize,
    /// Upper bound on a single run. `None` waits forever.
    pub job_timeout: Option<Duration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            job_timeout: None,
        }
    }
}

/// What `on_message` did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A task was started for the execution.
    Dispatched(ResourceId),
    /// The payload was not a job-execution id.
    Malformed,
    /// The execution already has an attempt in flight.
    Duplicate(ResourceId),
    /// The store has no job execution with this id.
    NotFound(ResourceId),
    /// The store could not be queried. The message should be redelivered.
    StoreError(ResourceId),
}

struct InFlight {
    token: CancellationToken,
    attempt: u64,
    cancelled: bool,
    /// Fires once the task has written its final status.
    done: CancellationToken,
}

/// State of an execution id in the in-flight map.
enum Occupancy {
    Free,
    Running,
    /// Cancelled but not finished yet.
    Draining(CancellationToken),
}

struct Shared {
    store: Arc<dyn ExecutionStore>,
    runtime: Arc<dyn JobRuntime>,
    in_flight: Mutex<HashMap<ResourceId, InFlight>>,
    next_attempt: AtomicU64,
    slots: Arc<Semaphore>,
    job_timeout: Option<Duration>,
}

/// Runs job executions handed over by the message feed.
pub struct JobDispatchQueue {
    shared: Arc<Shared>,
    tasks: TaskTracker,
}

impl JobDispatchQueue {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        runtime: Arc<dyn JobRuntime>,
        config: DispatchConfig,
    ) -> Self {
        let concurrency = config.concurrency.max(1);
        info!(
            runtime = runtime.name(),
            concurrency,
            job_timeout = ?config.job_timeout,
            "Creating job dispatch queue"
        );

        Self {
            shared: Arc::new(Shared {
                store,
                runtime,
                in_flight: Mutex::new(HashMap::new()),
                next_attempt: AtomicU64::new(1),
                slots: Arc::new(Semaphore::new(concurrency)),
                job_timeout: config.job_timeout,
            }),
            tasks: TaskTracker::new(),
        }
    }

    /// Handle one raw message from the feed.
    ///
    /// Never fails: every message is either dispatched or logged and
    /// dropped, and the outcome says which. A message for an id whose
    /// cancelled attempt is still stopping waits for it to finish.
    pub async fn on_message(&self, raw: &str) -> DispatchOutcome {
        let Some(id) = ResourceId::parse(raw) else {
            error!(payload = %raw, "Dropping malformed job message");
            return DispatchOutcome::Malformed;
        };

        if !self.wait_for_cancelled(id).await {
            warn!(job_execution_id = %id, "Job execution already in flight");
            return DispatchOutcome::Duplicate(id);
        }

        let job = match self.shared.store.find_job_data(id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                error!(job_execution_id = %id, "Job execution not found");
                return DispatchOutcome::NotFound(id);
            }
            Err(e) => {
                error!(job_execution_id = %id, error = %e, "Failed to load job execution");
                return DispatchOutcome::StoreError(id);
            }
        };

        // Another delivery may have claimed the id during the lookup.
        let (token, attempt) = loop {
            match self.shared.claim(id) {
                Ok(claimed) => break claimed,
                Err(Occupancy::Draining(done)) => done.cancelled().await,
                Err(_) => {
                    warn!(job_execution_id = %id, "Job execution already in flight");
                    return DispatchOutcome::Duplicate(id);
                }
            }
        };

        info!(
            job_execution_id = %id,
            pipeline = %job.pipeline_name,
            stage = %job.stage_name,
            job = %job.job_name,
            attempt,
            "Dispatching job"
        );

        let shared = self.shared.clone();
        self.tasks
            .spawn(async move { shared.run(job, token, attempt).await });

        DispatchOutcome::Dispatched(id)
    }

    /// Number of job executions currently in flight and not cancelled.
    pub fn active_job_count(&self) -> usize {
        self.shared
            .lock_in_flight()
            .values()
            .filter(|entry| !entry.cancelled)
            .count()
    }

    /// Ids of the job executions currently in flight and not cancelled,
    /// sorted.
    pub fn active_job_ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self
            .shared
            .lock_in_flight()
            .iter()
            .filter(|(_, entry)| !entry.cancelled)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Signal the in-flight attempt of `id` to stop.
    ///
    /// Returns false when nothing is in flight for `id` or it was already
    /// cancelled. The id stops counting as active right away; the task
    /// records `CANCELED` once the runtime has stopped.
    pub fn cancel_job(&self, id: ResourceId) -> bool {
        let mut in_flight = self.shared.lock_in_flight();
        match in_flight.get_mut(&id) {
            Some(entry) if !entry.cancelled => {
                entry.cancelled = true;
                entry.token.cancel();
                info!(job_execution_id = %id, attempt = entry.attempt, "Cancelled job");
                true
            }
            _ => {
                debug!(job_execution_id = %id, "No in-flight job to cancel");
                false
            }
        }
    }

    /// Cancel every in-flight job and wait for their tasks to finish.
    pub async fn shutdown(&self) {
        {
            let mut in_flight = self.shared.lock_in_flight();
            info!(in_flight = in_flight.len(), "Shutting down job dispatch queue");
            for entry in in_flight.values_mut() {
                entry.cancelled = true;
                entry.token.cancel();
            }
        }

        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Returns false when a live attempt holds `id`.
    async fn wait_for_cancelled(&self, id: ResourceId) -> bool {
        loop {
            match self.shared.occupancy(id) {
                Occupancy::Free => return true,
                Occupancy::Running => return false,
                Occupancy::Draining(done) => {
                    info!(job_execution_id = %id, "Waiting for cancelled attempt to finish");
                    done.cancelled().await;
                }
            }
        }
    }
}

impl Shared {
    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<ResourceId, InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn occupancy_of(in_flight: &HashMap<ResourceId, InFlight>, id: ResourceId) -> Occupancy {
        match in_flight.get(&id) {
            None => Occupancy::Free,
            Some(entry) if entry.cancelled => Occupancy::Draining(entry.done.clone()),
            Some(_) => Occupancy::Running,
        }
    }

    fn occupancy(&self, id: ResourceId) -> Occupancy {
        Self::occupancy_of(&self.lock_in_flight(), id)
    }

    /// Insert `id` unless it is already present.
    fn claim(&self, id: ResourceId) -> Result<(CancellationToken, u64), Occupancy> {
        let mut in_flight = self.lock_in_flight();
        match Self::occupancy_of(&in_flight, id) {
            Occupancy::Free => {}
            occupied => return Err(occupied),
        }
        let token = CancellationToken::new();
        let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
        in_flight.insert(
            id,
            InFlight {
                token: token.clone(),
                attempt,
                cancelled: false,
                done: CancellationToken::new(),
            },
        );
        Ok((token, attempt))
    }

    /// Drop the entry for `id` if it still belongs to `attempt` and wake
    /// deliveries waiting on it.
    fn release(&self, id: ResourceId, attempt: u64) {
        let entry = {
            let mut in_flight = self.lock_in_flight();
            if in_flight.get(&id).is_some_and(|e| e.attempt == attempt) {
                in_flight.remove(&id)
            } else {
                None
            }
        };
        if let Some(entry) = entry {
            entry.done.cancel();
        }
    }

    async fn run(&self, job: JobData, token: CancellationToken, attempt: u64) {
        let id = job.job_execution_id;

        // Held until the final status is written.
        let slot = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            slot = self.slots.clone().acquire_owned() => slot.ok(),
        };

        let (status, message) = match &slot {
            Some(_) => self.execute(&job, &token).await,
            None => (
                ExecutionStatus::Canceled,
                "Job was cancelled before it started".to_string(),
            ),
        };

        match status {
            ExecutionStatus::Success => info!(job_execution_id = %id, "{}", message),
            ExecutionStatus::Canceled => info!(job_execution_id = %id, "{}", message),
            _ => warn!(job_execution_id = %id, status = %status, "{}", message),
        }
        self.save_status(&job, status, message).await;
        self.release(id, attempt);
        drop(slot);
    }

    async fn execute(&self, job: &JobData, token: &CancellationToken) -> (ExecutionStatus, String) {
        self.save_status(job, ExecutionStatus::Running, "Job execution started".to_string())
            .await;

        let run_token = token.child_token();
        let execution = self.runtime.execute(job, run_token.clone());
        tokio::pin!(execution);

        let result = match self.job_timeout {
            None => execution.await,
            Some(limit) => tokio::select! {
                result = &mut execution => result,
                _ = tokio::time::sleep(limit) => {
                    run_token.cancel();
                    // Let the runtime clean up before reporting.
                    if let Err(e) = execution.await {
                        warn!(job_execution_id = %job.job_execution_id, error = %e, "Runtime failed while stopping timed out job");
                    }
                    return (
                        ExecutionStatus::Failed,
                        format!("Job timed out after {:?}", limit),
                    );
                }
            },
        };

        match result {
            Ok(outcome) => (outcome.status(), outcome.message()),
            Err(e) => (
                ExecutionStatus::Failed,
                format!("Job execution failed with error: {}", e),
            ),
        }
    }

    async fn save_status(&self, job: &JobData, status: ExecutionStatus, message: String) {
        let execution = job.execution_with_status(status, message);
        if let Err(e) = self.store.save_job_execution(&execution).await {
            error!(
                job_execution_id = %job.job_execution_id,
                status = %status,
                error = %e,
                "Failed to save job execution status"
            );
        }
    }
}
