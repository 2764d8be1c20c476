//! # Queue Hook Dispatcher
//!
//! Routes consumed queue entries to the engine callback registered for their
//! hook name. Handler faults are contained here: a fault becomes a failed
//! job inside the callback, never an error thrown back into the queue (the
//! queue would redeliver it and could duplicate side effects). Only
//! infrastructure faults ask for redelivery.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::batch::BatchScheduler;
use super::router::StepRouter;
use crate::constants::hooks;
use crate::queue::QueueEntry;

/// What the consumer should do with the entry after dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The entry was processed; acknowledge it.
    Handled,
    /// Malformed or unknown; acknowledge and drop it.
    Skipped,
    /// Infrastructure fault; leave the entry for redelivery.
    Retry,
}

/// Explicit hook-name → engine-callback dispatch table.
pub struct HookDispatcher {
    router: Arc<StepRouter>,
    batch: Arc<BatchScheduler>,
}

impl HookDispatcher {
    pub fn new(router: Arc<StepRouter>, batch: Arc<BatchScheduler>) -> Self {
        Self { router, batch }
    }

    pub async fn dispatch(&self, entry: &QueueEntry) -> DispatchOutcome {
        match entry.hook.as_str() {
            hooks::RUN_STEP => {
                let (Some(job_id), Some(step_id)) = (
                    entry.args.get("job_id").and_then(Value::as_i64),
                    entry.args.get("step_id").and_then(Value::as_str),
                ) else {
                    warn!(args = %entry.args, "Malformed run_step entry dropped");
                    return DispatchOutcome::Skipped;
                };

                match self.router.run_step(job_id, step_id).await {
                    Ok(outcome) => {
                        debug!(job_id, step_id, ?outcome, "Step routed");
                        DispatchOutcome::Handled
                    }
                    Err(e) => {
                        error!(job_id, step_id, error = %e, "Step routing hit infrastructure fault");
                        DispatchOutcome::Retry
                    }
                }
            }

            hooks::PROCESS_BATCH_CHUNK => {
                let Some(batch_job_id) = entry.args.get("batch_job_id").and_then(Value::as_i64)
                else {
                    warn!(args = %entry.args, "Malformed batch chunk entry dropped");
                    return DispatchOutcome::Skipped;
                };

                match self.batch.process_chunk(batch_job_id).await {
                    Ok(outcome) => {
                        debug!(batch_job_id, ?outcome, "Batch chunk processed");
                        DispatchOutcome::Handled
                    }
                    Err(e) => {
                        error!(batch_job_id, error = %e, "Batch chunk hit infrastructure fault");
                        DispatchOutcome::Retry
                    }
                }
            }

            unknown => {
                warn!(hook = %unknown, "No handler for queue hook; entry dropped");
                DispatchOutcome::Skipped
            }
        }
    }
}
