//! Message feeds delivering job-execution ids to a worker.

use async_trait::async_trait;
use pipewright_db::MessageQueueRepo;
use std::collections::VecDeque;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::SchedulerResult;

/// One message taken from a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker handle used to acknowledge the message, if the feed has one.
    pub tag: Option<uuid::Uuid>,
    pub payload: String,
}

/// Source of raw job messages.
#[async_trait]
pub trait MessageFeed: Send + Sync {
    /// Wait for the next message. `None` means the feed is closed.
    async fn recv(&self) -> SchedulerResult<Option<Delivery>>;

    /// Mark a delivery as handled so it is not redelivered.
    async fn ack(&self, delivery: &Delivery) -> SchedulerResult<()>;

    /// Hand a delivery back so it is received again later.
    async fn release(&self, delivery: &Delivery) -> SchedulerResult<()>;
}

/// In-process feed backed by a tokio channel.
pub struct ChannelFeed {
    rx: Mutex<mpsc::Receiver<String>>,
    requeued: std::sync::Mutex<VecDeque<String>>,
}

impl ChannelFeed {
    /// Create a feed and the sender that publishes into it. The feed closes
    /// once every sender is dropped.
    pub fn new(buffer: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        let feed = Self {
            rx: Mutex::new(rx),
            requeued: std::sync::Mutex::new(VecDeque::new()),
        };
        (tx, feed)
    }
}

#[async_trait]
impl MessageFeed for ChannelFeed {
    async fn recv(&self) -> SchedulerResult<Option<Delivery>> {
        let requeued = self
            .requeued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let payload = match requeued {
            Some(payload) => Some(payload),
            None => self.rx.lock().await.recv().await,
        };
        Ok(payload.map(|payload| Delivery { tag: None, payload }))
    }

    async fn ack(&self, _delivery: &Delivery) -> SchedulerResult<()> {
        Ok(())
    }

    async fn release(&self, delivery: &Delivery) -> SchedulerResult<()> {
        self.requeued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(delivery.payload.clone());
        Ok(())
    }
}

/// Feed polling the PostgreSQL message queue.
pub struct PgMessageFeed {
    repo: Arc<dyn MessageQueueRepo>,
    worker_id: String,
    poll_interval: Duration,
}

impl PgMessageFeed {
    pub fn new(
        repo: Arc<dyn MessageQueueRepo>,
        worker_id: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            repo,
            worker_id: worker_id.into(),
            poll_interval,
        }
    }
}

#[async_trait]
impl MessageFeed for PgMessageFeed {
    async fn recv(&self) -> SchedulerResult<Option<Delivery>> {
        loop {
            if let Some(message) = self.repo.claim(&self.worker_id).await? {
                debug!(message_id = %message.id, worker_id = %self.worker_id, "Claimed message");
                return Ok(Some(Delivery {
                    tag: Some(message.id),
                    payload: message.payload,
                }));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> SchedulerResult<()> {
        if let Some(id) = delivery.tag {
            self.repo.ack(id).await?;
        }
        Ok(())
    }

    async fn release(&self, delivery: &Delivery) -> SchedulerResult<()> {
        if let Some(id) = delivery.tag {
            debug!(message_id = %id, worker_id = %self.worker_id, "Releasing message");
            self.repo.release(id).await?;
        }
        Ok(())
    }
}
