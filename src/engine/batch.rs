//! # Batch Scheduler
//!
//! Chunked admission control for large fan-out workloads. A batch of `N`
//! independent items is never dumped on the shared task queue at once:
//! items are parked in a side store and a recurring chunk callback
//! drip-feeds up to `chunk_size` child jobs per run, so other pending work
//! interleaves between chunks. Small sets (`N ≤ chunk_size`) skip the batch
//! machinery entirely.
//!
//! Cancellation is cooperative: the flag is checked once per chunk
//! boundary; already-dispatched children are not retroactively cancelled.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::context::{read_u64, EngineContextStore};
use super::router::{RouterError, StepRouter};
use crate::config::BatchConfig;
use crate::constants::{context_keys, hooks};
use crate::ledger::{JobLedger, LedgerError};
use crate::models::{JobSource, NewJob};
use crate::queue::{QueueError, TaskQueue};
use crate::state_machine::JobState;
use crate::storage::{BatchItemStore, JobFilter, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Router(#[from] RouterError),
}

pub type BatchResult<T> = Result<T, BatchError>;

/// How a batch request was admitted.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// Few enough items: every one was scheduled as an individual job.
    Immediate { job_ids: Vec<i64> },
    /// A batch parent was created; chunks will be drip-fed.
    Chunked { batch_job_id: i64 },
}

/// Result of one chunk-processing run.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    /// Children dispatched; more chunks remain.
    Dispatched { created: usize, offset: u64 },
    /// Final chunk dispatched; the batch parent completed.
    Completed { offset: u64 },
    /// The cancellation flag was set; the batch was wound down.
    Cancelled,
    /// The batch was already settled, or its side store went missing.
    Skipped,
}

/// Aggregate view of a batch for status queries.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchProgress {
    pub batch_job_id: i64,
    pub status: JobState,
    pub total: u64,
    pub offset: u64,
    pub tasks_scheduled: u64,
    pub cancelled: bool,
    /// Child job counts keyed by status string.
    pub children: HashMap<String, usize>,
}

/// Splits independent work items into fixed-size chunks and drip-feeds them
/// into the task queue.
pub struct BatchScheduler {
    ledger: JobLedger,
    context: EngineContextStore,
    items: Arc<dyn BatchItemStore>,
    queue: Arc<dyn TaskQueue>,
    router: Arc<StepRouter>,
    config: BatchConfig,
}

impl BatchScheduler {
    pub fn new(
        ledger: JobLedger,
        context: EngineContextStore,
        items: Arc<dyn BatchItemStore>,
        queue: Arc<dyn TaskQueue>,
        router: Arc<StepRouter>,
        config: BatchConfig,
    ) -> Self {
        Self {
            ledger,
            context,
            items,
            queue,
            router,
            config,
        }
    }

    /// Admit `items` for pipeline `owner_ref`. Small sets are scheduled
    /// immediately; larger ones go through chunked admission.
    pub async fn schedule(
        &self,
        owner_ref: &str,
        items: Vec<Value>,
        chunk_size: Option<usize>,
    ) -> BatchResult<BatchOutcome> {
        let chunk_size = chunk_size.unwrap_or(self.config.chunk_size).max(1);

        if items.len() <= chunk_size {
            let mut job_ids = Vec::with_capacity(items.len());
            for item in items {
                let job = self
                    .ledger
                    .create(
                        NewJob::new(owner_ref, JobSource::Pipeline)
                            .with_context(json!({(context_keys::BATCH_ITEM): item})),
                    )
                    .await?;
                self.router.dispatch_first_step(&job).await?;
                job_ids.push(job.job_id);
            }
            debug!(owner_ref, count = job_ids.len(), "Scheduled items without batch overhead");
            return Ok(BatchOutcome::Immediate { job_ids });
        }

        let total = items.len() as u64;
        let parent = self
            .ledger
            .create(
                NewJob::new(owner_ref, JobSource::BatchParent).with_context(json!({
                    (context_keys::BATCH_TOTAL): total,
                    (context_keys::BATCH_CHUNK_SIZE): chunk_size as u64,
                    (context_keys::BATCH_OFFSET): 0,
                    (context_keys::BATCH_TASKS_SCHEDULED): 0,
                    (context_keys::BATCH_CANCELLED): false,
                })),
            )
            .await?;
        self.ledger.start(parent.job_id).await?;
        self.items.put_items(parent.job_id, items).await?;

        if let Err(e) = self
            .queue
            .enqueue_now(
                hooks::PROCESS_BATCH_CHUNK,
                json!({"batch_job_id": parent.job_id}),
            )
            .await
        {
            self.ledger
                .fail(parent.job_id, format!("Queue refused batch chunk: {e}"))
                .await?;
            self.items.release(parent.job_id).await?;
            return Err(e.into());
        }

        info!(
            batch_job_id = parent.job_id,
            owner_ref, total, chunk_size, "📦 Batch admitted for chunked scheduling"
        );
        Ok(BatchOutcome::Chunked {
            batch_job_id: parent.job_id,
        })
    }

    /// Process one chunk: the recurring callback the queue invokes. Checks
    /// the cancellation flag before doing any work.
    pub async fn process_chunk(&self, batch_job_id: i64) -> BatchResult<ChunkOutcome> {
        let parent = self.ledger.get(batch_job_id).await?;
        if parent.status.is_terminal() {
            debug!(batch_job_id, status = %parent.status, "Chunk run for settled batch skipped");
            return Ok(ChunkOutcome::Skipped);
        }

        let context = self.context.get(batch_job_id).await?;

        if context
            .get(context_keys::BATCH_CANCELLED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            info!(batch_job_id, "🛑 Batch cancelled; winding down");
            self.ledger
                .complete(batch_job_id, JobState::Cancelled, Some("Batch cancelled".into()))
                .await?;
            self.items.release(batch_job_id).await?;
            self.cancel_pending_chunks(batch_job_id).await;
            return Ok(ChunkOutcome::Cancelled);
        }

        let (Some(total), Some(chunk_size), Some(offset)) = (
            read_u64(&context, context_keys::BATCH_TOTAL),
            read_u64(&context, context_keys::BATCH_CHUNK_SIZE),
            read_u64(&context, context_keys::BATCH_OFFSET),
        ) else {
            self.ledger
                .fail(batch_job_id, "Batch context is missing its counters")
                .await?;
            self.items.release(batch_job_id).await?;
            return Ok(ChunkOutcome::Skipped);
        };

        let chunk = self
            .items
            .read_chunk(batch_job_id, offset as usize, chunk_size as usize)
            .await?;

        if chunk.is_empty() && offset < total {
            self.ledger
                .fail(batch_job_id, "Batch side store lost its items")
                .await?;
            return Ok(ChunkOutcome::Skipped);
        }

        let mut created = 0usize;
        for (idx, item) in chunk.iter().enumerate() {
            let child = self
                .ledger
                .create(
                    NewJob::new(parent.owner_ref.clone(), JobSource::BatchChild).with_context(
                        json!({
                            (context_keys::BATCH_JOB_ID): batch_job_id,
                            (context_keys::BATCH_ITEM): item,
                            "batch_position": offset + idx as u64,
                        }),
                    ),
                )
                .await?;

            // A replayed chunk run re-reads the same slice; children that
            // already advanced past pending are left alone.
            if child.status == JobState::Pending {
                self.router.dispatch_first_step(&child).await?;
                created += 1;
            }
        }

        let new_offset = (offset + chunk_size).min(total);
        let scheduled = read_u64(&context, context_keys::BATCH_TASKS_SCHEDULED).unwrap_or(0)
            + created as u64;
        self.context
            .merge(
                batch_job_id,
                json!({
                    (context_keys::BATCH_OFFSET): new_offset,
                    (context_keys::BATCH_TASKS_SCHEDULED): scheduled,
                }),
            )
            .await?;

        if new_offset < total {
            let run_at = chrono::Utc::now()
                + chrono::Duration::seconds(self.config.chunk_delay_secs as i64);
            if let Err(e) = self
                .queue
                .enqueue_at(
                    run_at,
                    hooks::PROCESS_BATCH_CHUNK,
                    json!({"batch_job_id": batch_job_id}),
                )
                .await
            {
                self.ledger
                    .fail(batch_job_id, format!("Queue refused batch chunk: {e}"))
                    .await?;
                return Err(e.into());
            }
            debug!(batch_job_id, created, offset = new_offset, total, "Chunk dispatched");
            Ok(ChunkOutcome::Dispatched {
                created,
                offset: new_offset,
            })
        } else {
            self.ledger
                .complete(batch_job_id, JobState::Completed, None)
                .await?;
            self.items.release(batch_job_id).await?;
            info!(batch_job_id, offset = new_offset, "✅ Batch fully dispatched");
            Ok(ChunkOutcome::Completed { offset: new_offset })
        }
    }

    /// Request cooperative cancellation. Takes effect at the next chunk
    /// boundary; already-dispatched children keep running.
    pub async fn cancel(&self, batch_job_id: i64) -> BatchResult<()> {
        let parent = self.ledger.get(batch_job_id).await?;
        if parent.status.is_terminal() {
            return Ok(());
        }
        self.context
            .merge(batch_job_id, json!({(context_keys::BATCH_CANCELLED): true}))
            .await?;
        info!(batch_job_id, "Batch cancellation requested");
        Ok(())
    }

    /// Aggregate progress for status queries.
    pub async fn progress(&self, batch_job_id: i64) -> BatchResult<BatchProgress> {
        let parent = self.ledger.get(batch_job_id).await?;
        let context = &parent.engine_context;

        let children = self
            .ledger
            .list(&JobFilter::by_batch(batch_job_id))
            .await?;
        let mut by_status: HashMap<String, usize> = HashMap::new();
        for child in &children {
            *by_status.entry(child.status.to_string()).or_default() += 1;
        }

        Ok(BatchProgress {
            batch_job_id,
            status: parent.status,
            total: read_u64(context, context_keys::BATCH_TOTAL).unwrap_or(0),
            offset: read_u64(context, context_keys::BATCH_OFFSET).unwrap_or(0),
            tasks_scheduled: read_u64(context, context_keys::BATCH_TASKS_SCHEDULED).unwrap_or(0),
            cancelled: context
                .get(context_keys::BATCH_CANCELLED)
                .and_then(Value::as_bool)
                .unwrap_or(false),
            children: by_status,
        })
    }

    async fn cancel_pending_chunks(&self, batch_job_id: i64) {
        if let Err(e) = self
            .queue
            .cancel_all(
                hooks::PROCESS_BATCH_CHUNK,
                json!({"batch_job_id": batch_job_id}),
            )
            .await
        {
            warn!(batch_job_id, error = %e, "Failed to cancel pending chunk entries");
        }
    }
}
