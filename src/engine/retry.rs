//! # Retry/Poll Helper
//!
//! Steps that wait on a slow external operation never block a worker: they
//! check status once per invocation and, when the external side is still
//! running, ask this helper to reschedule the same step after a delay. The
//! attempt counter lives in the engine context, the ceiling is set once on
//! the first reschedule, and exceeding it fails the job — the bound that
//! prevents retry storms.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::context::{read_u64, EngineContextStore};
use crate::config::PollConfig;
use crate::constants::{context_keys, hooks};
use crate::ledger::{JobLedger, LedgerError};
use crate::queue::{QueueError, TaskQueue};
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Result of a reschedule request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RescheduleOutcome {
    /// The step was re-enqueued; this is attempt number `attempt`.
    Rescheduled { attempt: u64 },
    /// The attempt ceiling was exceeded; the job is now failed.
    Exhausted { max_attempts: u64 },
}

/// Reschedule-with-backoff bounded by a per-job attempt counter.
#[derive(Clone)]
pub struct RetryPoller {
    ledger: JobLedger,
    context: EngineContextStore,
    queue: Arc<dyn TaskQueue>,
    config: PollConfig,
}

impl RetryPoller {
    pub fn new(
        ledger: JobLedger,
        context: EngineContextStore,
        queue: Arc<dyn TaskQueue>,
        config: PollConfig,
    ) -> Self {
        Self {
            ledger,
            context,
            queue,
            config,
        }
    }

    /// Re-enqueue `step_id` after `delay`, or fail the job once the attempt
    /// ceiling is exceeded. `max_attempts` is only honored on the first
    /// reschedule of a job; later values never change the stored ceiling.
    pub async fn reschedule(
        &self,
        job_id: i64,
        step_id: &str,
        delay: Option<Duration>,
        max_attempts: Option<u32>,
    ) -> Result<RescheduleOutcome, RetryError> {
        let context = self.context.get(job_id).await?;

        let attempt = read_u64(&context, context_keys::ATTEMPTS).unwrap_or(0) + 1;
        let ceiling = match read_u64(&context, context_keys::MAX_ATTEMPTS) {
            Some(stored) => stored,
            None => {
                let ceiling = u64::from(max_attempts.unwrap_or(self.config.max_attempts));
                self.context
                    .merge(job_id, json!({(context_keys::MAX_ATTEMPTS): ceiling}))
                    .await?;
                ceiling
            }
        };

        if attempt > ceiling {
            warn!(job_id, step_id, attempt, ceiling, "Poll attempts exhausted");
            self.ledger
                .fail(
                    job_id,
                    format!("Step '{step_id}' exceeded maximum poll attempts ({ceiling})"),
                )
                .await?;
            return Ok(RescheduleOutcome::Exhausted {
                max_attempts: ceiling,
            });
        }

        self.context
            .merge(
                job_id,
                json!({
                    (context_keys::ATTEMPTS): attempt,
                    (context_keys::POLL_RESCHEDULED): true,
                }),
            )
            .await?;

        let delay = delay.unwrap_or(Duration::from_secs(self.config.delay_secs));
        let run_at = chrono::Utc::now() + chrono::Duration::seconds(delay.as_secs() as i64);

        if let Err(e) = self
            .queue
            .enqueue_at(
                run_at,
                hooks::RUN_STEP,
                json!({"job_id": job_id, "step_id": step_id}),
            )
            .await
        {
            self.ledger
                .fail(job_id, format!("Queue refused poll reschedule: {e}"))
                .await?;
            return Err(e.into());
        }

        debug!(job_id, step_id, attempt, ceiling, delay_secs = delay.as_secs(), "Step rescheduled");
        Ok(RescheduleOutcome::Rescheduled { attempt })
    }
}
