//! # Step Router
//!
//! The engine's decision point. Given a job and a step id it resolves the
//! step's configuration and handler, invokes the step, re-reads the engine
//! context (a step may have mutated it as a side effect), and decides what
//! happens next: advance, complete, park, or fail.
//!
//! Step faults never propagate into the task queue's own retry machinery —
//! an uncaught fault there would be redelivered and could duplicate side
//! effects. Every fault is converted into a failed job with the fault
//! message as its recorded reason.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::context::EngineContextStore;
use super::pipeline::PipelineDefinition;
use super::registry::StepRegistry;
use super::step_handler::ResultPacket;
use crate::constants::{context_keys, hooks};
use crate::ledger::{JobLedger, LedgerError};
use crate::models::Job;
use crate::queue::{QueueError, TaskQueue};
use crate::state_machine::JobState;
use crate::storage::{JobStore, StorageError};

/// Errors the router cannot resolve into a job status by itself (storage or
/// ledger faults). The queue's at-least-once delivery retries these.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Job {job_id} is not parked (status {status})")]
    NotParked { job_id: i64, status: JobState },
}

pub type RouterResult<T> = Result<T, RouterError>;

/// What the router decided after a step invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum RouterOutcome {
    /// The next step was enqueued.
    Advanced { next_step: String },
    /// The job reached a terminal status.
    Completed(JobState),
    /// The job was parked at a gate.
    Parked,
    /// The step rescheduled itself to poll a slow external operation; the
    /// job stays in processing until a later invocation settles it.
    Polling,
    /// Duplicate or stale invocation; nothing to do.
    Skipped,
}

/// Routes step execution and owns all post-step decisions.
pub struct StepRouter {
    ledger: JobLedger,
    context: EngineContextStore,
    queue: Arc<dyn TaskQueue>,
    registry: Arc<StepRegistry>,
    pipelines: Arc<dyn PipelineDefinition>,
}

impl StepRouter {
    pub fn new(
        ledger: JobLedger,
        context: EngineContextStore,
        queue: Arc<dyn TaskQueue>,
        registry: Arc<StepRegistry>,
        pipelines: Arc<dyn PipelineDefinition>,
    ) -> Self {
        Self {
            ledger,
            context,
            queue,
            registry,
            pipelines,
        }
    }

    /// Enqueue the first step of a freshly created job. A queue refusal
    /// marks the job failed instead of leaving it pending forever.
    pub async fn dispatch_first_step(&self, job: &Job) -> RouterResult<()> {
        let Some(spec) = self.pipelines.first_step(&job.owner_ref) else {
            self.ledger
                .fail(
                    job.job_id,
                    format!("Pipeline '{}' defines no steps", job.owner_ref),
                )
                .await?;
            return Ok(());
        };

        if let Err(e) = self
            .queue
            .enqueue_now(
                hooks::RUN_STEP,
                json!({"job_id": job.job_id, "step_id": spec.step_id}),
            )
            .await
        {
            self.ledger
                .fail(job.job_id, format!("Queue refused initial step: {e}"))
                .await?;
            return Err(e.into());
        }
        Ok(())
    }

    /// Run one step of a job and route its result. This is the callback the
    /// task queue invokes, possibly more than once per logical step.
    pub async fn run_step(&self, job_id: i64, step_id: &str) -> RouterResult<RouterOutcome> {
        let job = self.ledger.get(job_id).await?;

        if job.status.is_terminal() {
            debug!(job_id, step_id, status = %job.status, "Step invocation for settled job skipped");
            return Ok(RouterOutcome::Skipped);
        }
        if job.status.is_parked() {
            debug!(job_id, step_id, "Step invocation for parked job skipped");
            return Ok(RouterOutcome::Skipped);
        }
        if job.status == JobState::Pending {
            self.ledger.start(job_id).await?;
        }

        // Resolve configuration; a miss fails the job immediately, no retry.
        let Some(spec) = self.pipelines.step(&job.owner_ref, step_id) else {
            let reason = format!("Pipeline '{}' has no step '{step_id}'", job.owner_ref);
            let state = self.complete_with_cleanup(job_id, JobState::Failed, Some(reason)).await?;
            return Ok(RouterOutcome::Completed(state));
        };
        let handler = match self.registry.resolve(&spec.step_type) {
            Ok(handler) => handler,
            Err(e) => {
                let state = self
                    .complete_with_cleanup(job_id, JobState::Failed, Some(e.to_string()))
                    .await?;
                return Ok(RouterOutcome::Completed(state));
            }
        };

        // The handler sees the stored context plus its resolved step config.
        let input_context = Self::with_step_config(self.context.get(job_id).await?, &spec.config);

        debug!(job_id, step_id, step_type = %spec.step_type, "Invoking step");
        let execution = handler.execute(job_id, step_id, &input_context).await;

        // Mandatory re-read: the step may have set an override or otherwise
        // mutated the stored document while it ran.
        let context = self.context.get(job_id).await?;

        let packets = match execution {
            Ok(packets) => packets,
            Err(e) => {
                warn!(job_id, step_id, error = %e, "Step fault contained at router boundary");
                let state = self
                    .complete_with_cleanup(job_id, JobState::Failed, Some(e.to_string()))
                    .await?;
                return Ok(RouterOutcome::Completed(state));
            }
        };

        // A step that rescheduled itself through the retry/poll helper needs
        // no routing action; the re-enqueued entry will run it again.
        if context
            .get(context_keys::POLL_RESCHEDULED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            self.context
                .merge(job_id, json!({(context_keys::POLL_RESCHEDULED): null}))
                .await?;
            debug!(job_id, step_id, "Step is polling; awaiting rescheduled run");
            return Ok(RouterOutcome::Polling);
        }

        match EngineContextStore::status_override(&context) {
            Some(JobState::Waiting) => {
                self.persist_results(job_id, step_id, &packets).await?;
                self.context
                    .merge(
                        job_id,
                        json!({
                            (context_keys::PAUSED_STEP): step_id,
                            (context_keys::JOB_STATUS): null,
                        }),
                    )
                    .await?;
                self.ledger.park(job_id).await?;
                info!(job_id, step_id, "⏸️ Job parked at gate");
                return Ok(RouterOutcome::Parked);
            }
            Some(state) if state.is_terminal() => {
                self.context
                    .merge(job_id, json!({(context_keys::JOB_STATUS): null}))
                    .await?;
                let state = self.complete_with_cleanup(job_id, state, None).await?;
                return Ok(RouterOutcome::Completed(state));
            }
            Some(state) => {
                warn!(job_id, step_id, state = %state, "Ignoring non-terminal status override");
            }
            None => {}
        }

        let failed = packets.is_empty() || packets.iter().any(|p| !p.success);
        if failed {
            return self
                .route_failure(&job, step_id, &packets)
                .await
                .map(RouterOutcome::Completed);
        }

        self.persist_results(job_id, step_id, &packets).await?;

        match self.pipelines.next_step(&job.owner_ref, step_id, &packets) {
            Some(next_step) => {
                if let Err(e) = self
                    .queue
                    .enqueue_now(
                        hooks::RUN_STEP,
                        json!({"job_id": job_id, "step_id": next_step}),
                    )
                    .await
                {
                    let state = self
                        .complete_with_cleanup(
                            job_id,
                            JobState::Failed,
                            Some(format!("Queue refused step '{next_step}': {e}")),
                        )
                        .await?;
                    return Ok(RouterOutcome::Completed(state));
                }
                debug!(job_id, step_id, next_step = %next_step, "Advancing pipeline");
                Ok(RouterOutcome::Advanced { next_step })
            }
            None => {
                let state = self
                    .complete_with_cleanup(job_id, JobState::Completed, None)
                    .await?;
                info!(job_id, "✅ Pipeline completed");
                Ok(RouterOutcome::Completed(state))
            }
        }
    }

    /// Release a parked job and continue from the parked step's successor.
    pub async fn resume(&self, job_id: i64) -> RouterResult<RouterOutcome> {
        let job = self.ledger.get(job_id).await?;
        if !job.status.is_parked() {
            return Err(RouterError::NotParked {
                job_id,
                status: job.status,
            });
        }

        self.ledger.resume(job_id).await?;

        let context = self.context.get(job_id).await?;
        let Some(paused_step) = context
            .get(context_keys::PAUSED_STEP)
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            let state = self
                .complete_with_cleanup(
                    job_id,
                    JobState::Failed,
                    Some("Resumed job has no recorded parked step".to_string()),
                )
                .await?;
            return Ok(RouterOutcome::Completed(state));
        };

        let packets = Self::stored_results(&context, &paused_step);
        self.context
            .merge(job_id, json!({(context_keys::PAUSED_STEP): null}))
            .await?;

        match self
            .pipelines
            .next_step(&job.owner_ref, &paused_step, &packets)
        {
            Some(next_step) => {
                if let Err(e) = self
                    .queue
                    .enqueue_now(
                        hooks::RUN_STEP,
                        json!({"job_id": job_id, "step_id": next_step}),
                    )
                    .await
                {
                    let state = self
                        .complete_with_cleanup(
                            job_id,
                            JobState::Failed,
                            Some(format!("Queue refused step '{next_step}': {e}")),
                        )
                        .await?;
                    return Ok(RouterOutcome::Completed(state));
                }
                info!(job_id, paused_step = %paused_step, next_step = %next_step, "▶️ Job resumed");
                Ok(RouterOutcome::Advanced { next_step })
            }
            None => {
                let state = self
                    .complete_with_cleanup(job_id, JobState::Completed, None)
                    .await?;
                Ok(RouterOutcome::Completed(state))
            }
        }
    }

    /// Complete the job and drop any of its still-pending step entries.
    async fn complete_with_cleanup(
        &self,
        job_id: i64,
        status: JobState,
        reason: Option<String>,
    ) -> RouterResult<JobState> {
        let state = self.ledger.complete(job_id, status, reason).await?;

        if let Err(e) = self
            .queue
            .cancel_all(hooks::RUN_STEP, json!({"job_id": job_id}))
            .await
        {
            // The entries will be skipped as stale when delivered anyway.
            warn!(job_id, error = %e, "Failed to cancel pending step entries");
        }
        Ok(state)
    }

    /// Failure branch: distinguish "fetch found nothing new" from a real
    /// failure using the processed-items history, so legitimate empty runs
    /// do not raise false alarms.
    async fn route_failure(
        &self,
        job: &Job,
        step_id: &str,
        packets: &[ResultPacket],
    ) -> RouterResult<JobState> {
        if packets.is_empty()
            && self
                .ledger
                .store()
                .has_processed_items(&job.owner_ref, step_id)
                .await?
        {
            info!(job_id = job.job_id, step_id, "Empty run with processed history; nothing new");
            return self
                .complete_with_cleanup(job.job_id, JobState::CompletedNoItems, None)
                .await;
        }

        let reason = Self::failure_reason(step_id, packets);
        self.complete_with_cleanup(job.job_id, JobState::Failed, Some(reason))
            .await
    }

    async fn persist_results(
        &self,
        job_id: i64,
        step_id: &str,
        packets: &[ResultPacket],
    ) -> RouterResult<()> {
        let context = self.context.get(job_id).await?;
        let mut results = match context.get(context_keys::STEP_RESULTS) {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        results.insert(step_id.to_string(), serde_json::to_value(packets).map_err(StorageError::from)?);
        self.context
            .merge(job_id, json!({(context_keys::STEP_RESULTS): results}))
            .await?;
        Ok(())
    }

    fn stored_results(context: &Value, step_id: &str) -> Vec<ResultPacket> {
        context
            .get(context_keys::STEP_RESULTS)
            .and_then(|r| r.get(step_id))
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    fn with_step_config(context: Value, config: &Value) -> Value {
        let mut map = match context {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if !config.is_null() {
            map.insert("step_config".to_string(), config.clone());
        }
        Value::Object(map)
    }

    fn failure_reason(step_id: &str, packets: &[ResultPacket]) -> String {
        if packets.is_empty() {
            return format!("Step '{step_id}' returned no results");
        }
        packets
            .iter()
            .filter(|p| !p.success)
            .find_map(|p| {
                p.payload
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| p.payload.as_str().map(str::to_string))
            })
            .unwrap_or_else(|| format!("Step '{step_id}' reported failure"))
    }
}
