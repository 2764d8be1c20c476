//! # PostgreSQL Message Queue Adapter
//!
//! [`TaskQueue`] over the pgmq extension, using the pgmq-rs crate. Delayed
//! entries use pgmq's visibility delay; recurring entries carry their
//! interval in the payload and are re-armed by the consumer on read.
//! Cancellation filters pending messages directly in the queue table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgmq::PGMQueue;
use serde_json::Value;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, info};

use super::{QueueEntry, QueueError, QueueResult, TaskQueue};

/// pgmq-backed task queue.
#[derive(Debug, Clone)]
pub struct PgmqQueue {
    pgmq: PGMQueue,
    pool: PgPool,
    queue_name: String,
}

impl PgmqQueue {
    /// Connect the adapter. The pgmq client manages its own connections;
    /// `pool` is the application's pool, used for the filtered cancel path.
    pub async fn connect(
        database_url: &str,
        pool: PgPool,
        queue_name: impl Into<String>,
    ) -> QueueResult<Self> {
        let pgmq = PGMQueue::new(database_url.to_string())
            .await
            .map_err(|e| QueueError::Unavailable(format!("Failed to connect to pgmq: {e}")))?;
        Ok(Self {
            pgmq,
            pool,
            queue_name: queue_name.into(),
        })
    }

    /// Create the underlying pgmq queue if it does not exist.
    pub async fn ensure_queue(&self) -> QueueResult<()> {
        self.pgmq
            .create(&self.queue_name)
            .await
            .map_err(|e| QueueError::Unavailable(format!("Failed to create queue: {e}")))?;
        info!(queue = %self.queue_name, "✅ Queue ready");
        Ok(())
    }

    /// Read up to `limit` due entries with a visibility timeout. Recurring
    /// entries are re-armed before being handed to the caller, so a consumer
    /// crash after this call cannot lose the recurrence.
    pub async fn fetch(&self, vt_secs: i32, limit: i32) -> QueueResult<Vec<(i64, QueueEntry)>> {
        let messages = self
            .pgmq
            .read_batch::<Value>(&self.queue_name, Some(vt_secs), limit)
            .await
            .map_err(|e| QueueError::Unavailable(format!("Failed to read queue: {e}")))?
            .unwrap_or_default();

        let mut due = Vec::with_capacity(messages.len());
        for message in messages {
            let entry: QueueEntry = serde_json::from_value(message.message)
                .map_err(|e| QueueError::InvalidEntry(format!("msg {}: {e}", message.msg_id)))?;

            if let Some(interval_secs) = entry.interval_secs {
                let mut next = entry.clone();
                next.run_at = Utc::now() + chrono::Duration::seconds(interval_secs as i64);
                self.send_entry(&next, interval_secs).await?;
            }

            due.push((message.msg_id, entry));
        }
        Ok(due)
    }

    /// Acknowledge a consumed message.
    pub async fn ack(&self, msg_id: i64) -> QueueResult<()> {
        self.pgmq
            .delete(&self.queue_name, msg_id)
            .await
            .map_err(|e| QueueError::Unavailable(format!("Failed to delete msg {msg_id}: {e}")))?;
        Ok(())
    }

    fn delay_until(run_at: DateTime<Utc>) -> u64 {
        (run_at - Utc::now()).num_seconds().max(0) as u64
    }

    async fn send_entry(&self, entry: &QueueEntry, delay_secs: u64) -> QueueResult<()> {
        debug!(
            queue = %self.queue_name,
            hook = %entry.hook,
            delay_secs,
            "📤 Enqueueing entry"
        );

        let msg_id = if delay_secs == 0 {
            self.pgmq.send(&self.queue_name, entry).await
        } else {
            self.pgmq
                .send_delay(&self.queue_name, entry, delay_secs)
                .await
        }
        .map_err(|e| QueueError::Unavailable(format!("Failed to send to queue: {e}")))?;

        debug!(msg_id, hook = %entry.hook, "✅ Entry enqueued");
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for PgmqQueue {
    async fn enqueue_now(&self, hook: &str, args: Value) -> QueueResult<()> {
        let entry = QueueEntry {
            hook: hook.to_string(),
            args,
            run_at: Utc::now(),
            interval_secs: None,
        };
        self.send_entry(&entry, 0).await
    }

    async fn enqueue_at(&self, run_at: DateTime<Utc>, hook: &str, args: Value) -> QueueResult<()> {
        let entry = QueueEntry {
            hook: hook.to_string(),
            args,
            run_at,
            interval_secs: None,
        };
        self.send_entry(&entry, Self::delay_until(run_at)).await
    }

    async fn enqueue_recurring(
        &self,
        first_run: DateTime<Utc>,
        interval: Duration,
        hook: &str,
        args: Value,
    ) -> QueueResult<()> {
        let entry = QueueEntry {
            hook: hook.to_string(),
            args,
            run_at: first_run,
            interval_secs: Some(interval.as_secs().max(1)),
        };
        self.send_entry(&entry, Self::delay_until(first_run)).await
    }

    async fn cancel_all(&self, hook: &str, args_filter: Value) -> QueueResult<u64> {
        // pgmq stores pending messages in pgmq.q_<name>; filter on the
        // serialized entry payload. Identifier comes from config, values are
        // bound.
        let query = format!(
            "DELETE FROM pgmq.q_{} WHERE message->>'hook' = $1 AND message->'args' @> $2",
            self.queue_name
        );

        let result = sqlx::query(&query)
            .bind(hook)
            .bind(&args_filter)
            .execute(&self.pool)
            .await
            .map_err(|e| QueueError::Unavailable(format!("Failed to cancel entries: {e}")))?;

        debug!(
            queue = %self.queue_name,
            hook,
            removed = result.rows_affected(),
            "🗑️ Cancelled pending entries"
        );
        Ok(result.rows_affected())
    }
}
