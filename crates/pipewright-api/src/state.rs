//! Application state.

use pipewright_db::{ExecutionStore, MessageQueueRepo};
use pipewright_scheduler::{JobDispatchQueue, StatusAggregator};
use sqlx::PgPool;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<StatusAggregator>,
    pub dispatcher: Arc<JobDispatchQueue>,
    pub messages: Arc<dyn MessageQueueRepo>,
    /// Checked by the readiness probe when present.
    pub pool: Option<PgPool>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        dispatcher: Arc<JobDispatchQueue>,
        messages: Arc<dyn MessageQueueRepo>,
    ) -> Self {
        Self {
            aggregator: Arc::new(StatusAggregator::new(store)),
            dispatcher,
            messages,
            pool: None,
        }
    }

    pub fn with_pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }
}
