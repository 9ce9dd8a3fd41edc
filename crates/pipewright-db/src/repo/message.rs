//! Message queue carrying job-execution ids to workers, backed by PostgreSQL.
//!
//! Uses SKIP LOCKED so several workers can claim from the same table without
//! contention. Payloads are stored as raw text and validated by the consumer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::DbResult;

/// A message claimed from the queue.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueuedMessage {
    pub id: uuid::Uuid,
    pub payload: String,
    pub status: String,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait MessageQueueRepo: Send + Sync {
    /// Append a message for any worker to pick up.
    async fn publish(&self, payload: &str) -> DbResult<QueuedMessage>;

    /// Claim the oldest pending message, if any.
    async fn claim(&self, worker_id: &str) -> DbResult<Option<QueuedMessage>>;

    /// Remove a handled message.
    async fn ack(&self, message_id: uuid::Uuid) -> DbResult<()>;

    /// Return a claimed message to pending (e.g., when the worker stops
    /// before handling it).
    async fn release(&self, message_id: uuid::Uuid) -> DbResult<()>;
}

/// PostgreSQL implementation of MessageQueueRepo.
pub struct PgMessageQueue {
    pool: PgPool,
}

impl PgMessageQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageQueueRepo for PgMessageQueue {
    async fn publish(&self, payload: &str) -> DbResult<QueuedMessage> {
        let message = sqlx::query_as::<_, QueuedMessage>(
            r#"
            INSERT INTO job_messages (id, payload, status, created_at)
            VALUES ($1, $2, 'pending', NOW())
            RETURNING id, payload, status, claimed_by, claimed_at, created_at
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;
        Ok(message)
    }

    async fn claim(&self, worker_id: &str) -> DbResult<Option<QueuedMessage>> {
        let message = sqlx::query_as::<_, QueuedMessage>(
            r#"
            UPDATE job_messages
            SET status = 'claimed', claimed_by = $1, claimed_at = NOW()
            WHERE id = (
                SELECT id FROM job_messages
                WHERE status = 'pending'
                ORDER BY created_at ASC, id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, payload, status, claimed_by, claimed_at, created_at
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(message)
    }

    async fn ack(&self, message_id: uuid::Uuid) -> DbResult<()> {
        sqlx::query("DELETE FROM job_messages WHERE id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn release(&self, message_id: uuid::Uuid) -> DbResult<()> {
        sqlx::query(
            "UPDATE job_messages SET status = 'pending', claimed_by = NULL, claimed_at = NULL WHERE id = $1",
        )
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
