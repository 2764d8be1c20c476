//! # Job Ledger
//!
//! Persistent record of every unit of orchestrated work and the only place
//! job status is mutated. Wraps a [`JobStore`] with the transition table from
//! [`crate::state_machine`]: every status change is validated against the
//! table, then applied as a conditional single-row write so that duplicate
//! invocations (at-least-once queue delivery) settle as no-ops instead of
//! corrupting a finished job.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::constants::context_keys;
use crate::models::{Job, NewJob};
use crate::state_machine::{JobEvent, JobState, JobStateMachine, StateMachineError, TransitionDecision};
use crate::storage::{JobFilter, JobStore, StorageError};

/// Errors surfaced by ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Job {0} not found")]
    JobNotFound(i64),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transition(#[from] StateMachineError),

    #[error("Job {job_id} cannot be retried from non-terminal status {status}")]
    RetryOfActiveJob { job_id: i64, status: JobState },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// The job ledger. Cheap to clone; shared across engine components.
#[derive(Clone)]
pub struct JobLedger {
    store: Arc<dyn JobStore>,
}

impl JobLedger {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Create a job, or return the existing row for the same logical unit of
    /// work. A storage error here means no job was created; callers must not
    /// schedule follow-up work.
    pub async fn create(&self, new_job: NewJob) -> LedgerResult<Job> {
        let identity_hash = new_job.resolve_identity_hash();

        if let Some(existing) = self.store.find_by_identity(&identity_hash).await? {
            debug!(
                job_id = existing.job_id,
                identity_hash = %identity_hash,
                "Reusing existing job for identical unit of work"
            );
            return Ok(existing);
        }

        match self.store.insert_job(&new_job, &identity_hash).await {
            Ok(job) => {
                info!(
                    job_id = job.job_id,
                    owner_ref = %job.owner_ref,
                    source = %job.source,
                    "📋 Job created"
                );
                Ok(job)
            }
            // Lost an insert race; the winner's row is the job.
            Err(StorageError::DuplicateIdentity(_)) => self
                .store
                .find_by_identity(&identity_hash)
                .await?
                .ok_or(LedgerError::Storage(StorageError::DuplicateIdentity(
                    identity_hash,
                ))),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, job_id: i64) -> LedgerResult<Job> {
        self.store
            .find_job(job_id)
            .await?
            .ok_or(LedgerError::JobNotFound(job_id))
    }

    pub async fn list(&self, filter: &JobFilter) -> LedgerResult<Vec<Job>> {
        Ok(self.store.list_jobs(filter).await?)
    }

    /// pending → processing.
    pub async fn start(&self, job_id: i64) -> LedgerResult<JobState> {
        self.apply(job_id, JobEvent::Start).await
    }

    /// Complete the job with a terminal status. Re-completing an
    /// already-terminal job is a no-op returning the settled state.
    pub async fn complete(
        &self,
        job_id: i64,
        status: JobState,
        reason: Option<String>,
    ) -> LedgerResult<JobState> {
        self.apply_with_reason(job_id, JobEvent::Complete { status }, reason)
            .await
    }

    /// Fail the job with a recorded reason. Valid from pending (queue refused
    /// the initial enqueue), processing, or waiting.
    pub async fn fail(&self, job_id: i64, reason: impl Into<String>) -> LedgerResult<JobState> {
        let reason = reason.into();
        self.apply_with_reason(job_id, JobEvent::Fail { reason: reason.clone() }, Some(reason))
            .await
    }

    /// Park the job at a gate (processing → waiting).
    pub async fn park(&self, job_id: i64) -> LedgerResult<JobState> {
        self.apply(job_id, JobEvent::Park).await
    }

    /// Release a parked job (waiting → processing).
    pub async fn resume(&self, job_id: i64) -> LedgerResult<JobState> {
        self.apply(job_id, JobEvent::Resume).await
    }

    /// Cancel a non-terminal job.
    pub async fn cancel(&self, job_id: i64, reason: Option<String>) -> LedgerResult<JobState> {
        self.apply_with_reason(job_id, JobEvent::Cancel, reason).await
    }

    /// Create a fresh job re-running a terminal one. The new row carries
    /// `retried_from` in its context, which also changes its identity hash —
    /// the record stays distinguishable from the original. Retrying the same
    /// job twice returns the already-minted retry row.
    pub async fn retry(&self, job_id: i64) -> LedgerResult<Job> {
        let original = self.get(job_id).await?;
        if !original.status.is_terminal() {
            return Err(LedgerError::RetryOfActiveJob {
                job_id,
                status: original.status,
            });
        }

        let mut context = original.engine_context.clone();
        if let Some(map) = context.as_object_mut() {
            // Carry data forward but none of the bookkeeping of the old run.
            map.remove(context_keys::JOB_STATUS);
            map.remove(context_keys::ATTEMPTS);
            map.remove(context_keys::MAX_ATTEMPTS);
            map.remove(context_keys::POLL_RESCHEDULED);
            map.remove(context_keys::STEP_RESULTS);
            map.remove(context_keys::PAUSED_STEP);
            map.remove(context_keys::UNDO);
            map.remove(context_keys::EFFECTS);
            map.insert(
                context_keys::RETRIED_FROM.to_string(),
                serde_json::json!(job_id),
            );
        }

        let retry = self
            .create(
                NewJob::new(original.owner_ref.clone(), original.source).with_context(context),
            )
            .await?;

        info!(
            job_id = retry.job_id,
            retried_from = original.job_id,
            "🔁 Retry job created"
        );
        Ok(retry)
    }

    async fn apply(&self, job_id: i64, event: JobEvent) -> LedgerResult<JobState> {
        self.apply_with_reason(job_id, event, None).await
    }

    /// Validate the event against the transition table, then apply it with a
    /// conditional write. A lost write race is re-read and re-evaluated once:
    /// if the job settled meanwhile and the event is terminal, that is the
    /// idempotent no-op case.
    async fn apply_with_reason(
        &self,
        job_id: i64,
        event: JobEvent,
        reason: Option<String>,
    ) -> LedgerResult<JobState> {
        let current = self.get(job_id).await?.status;

        match JobStateMachine::determine_target_state(current, &event)? {
            TransitionDecision::NoOp(state) => {
                debug!(job_id, state = %state, event = event.name(), "Terminal event absorbed");
                Ok(state)
            }
            TransitionDecision::Transition(target) => {
                let completed_at = target.is_terminal().then(Utc::now);
                let changed = self
                    .store
                    .update_status(job_id, &[current], target, reason.as_deref(), completed_at)
                    .await?;

                if changed {
                    info!(job_id, from = %current, to = %target, event = event.name(), "Job transition");
                    return Ok(target);
                }

                // Someone else moved the job first; settle idempotently if we can.
                let now = self.get(job_id).await?.status;
                match JobStateMachine::determine_target_state(now, &event)? {
                    TransitionDecision::NoOp(state) => Ok(state),
                    TransitionDecision::Transition(_) => {
                        warn!(job_id, from = %now, event = event.name(), "Lost transition race");
                        Err(StateMachineError::InvalidTransition {
                            from: now,
                            event: event.name().to_string(),
                        }
                        .into())
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobSource;
    use crate::storage::MemoryJobStore;
    use serde_json::json;

    fn ledger() -> JobLedger {
        JobLedger::new(Arc::new(MemoryJobStore::new()))
    }

    async fn pipeline_job(ledger: &JobLedger, seed: &str) -> Job {
        ledger
            .create(NewJob::new("news_ingest", JobSource::Pipeline).with_context(json!({"seed": seed})))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_reuses_identical_work() {
        let ledger = ledger();
        let first = pipeline_job(&ledger, "a").await;
        let second = pipeline_job(&ledger, "a").await;
        assert_eq!(first.job_id, second.job_id);

        let third = pipeline_job(&ledger, "b").await;
        assert_ne!(first.job_id, third.job_id);
    }

    #[tokio::test]
    async fn test_lifecycle_and_idempotent_complete() {
        let ledger = ledger();
        let job = pipeline_job(&ledger, "a").await;

        assert_eq!(ledger.start(job.job_id).await.unwrap(), JobState::Processing);
        assert_eq!(
            ledger
                .complete(job.job_id, JobState::Completed, None)
                .await
                .unwrap(),
            JobState::Completed
        );

        // Duplicate completion from a replayed queue message: no-op.
        assert_eq!(
            ledger
                .complete(job.job_id, JobState::Failed, Some("dup".into()))
                .await
                .unwrap(),
            JobState::Completed
        );

        let job = ledger.get(job.job_id).await.unwrap();
        assert!(job.completed_at.is_some());
        assert!(job.reason.is_none());
    }

    #[tokio::test]
    async fn test_fail_records_reason() {
        let ledger = ledger();
        let job = pipeline_job(&ledger, "a").await;
        ledger.start(job.job_id).await.unwrap();
        ledger.fail(job.job_id, "fetch exploded").await.unwrap();

        let job = ledger.get(job.job_id).await.unwrap();
        assert_eq!(job.status, JobState::Failed);
        assert_eq!(job.reason.as_deref(), Some("fetch exploded"));
    }

    #[tokio::test]
    async fn test_park_and_resume() {
        let ledger = ledger();
        let job = pipeline_job(&ledger, "a").await;
        ledger.start(job.job_id).await.unwrap();
        assert_eq!(ledger.park(job.job_id).await.unwrap(), JobState::Waiting);
        assert_eq!(ledger.resume(job.job_id).await.unwrap(), JobState::Processing);
    }

    #[tokio::test]
    async fn test_retry_requires_terminal_and_links_back() {
        let ledger = ledger();
        let job = pipeline_job(&ledger, "a").await;

        let err = ledger.retry(job.job_id).await.unwrap_err();
        assert!(matches!(err, LedgerError::RetryOfActiveJob { .. }));

        ledger.start(job.job_id).await.unwrap();
        ledger.fail(job.job_id, "boom").await.unwrap();

        let retry = ledger.retry(job.job_id).await.unwrap();
        assert_ne!(retry.job_id, job.job_id);
        assert_eq!(retry.status, JobState::Pending);
        assert_eq!(
            retry.engine_context[context_keys::RETRIED_FROM],
            json!(job.job_id)
        );

        // Retrying again reuses the already-minted retry row.
        let again = ledger.retry(job.job_id).await.unwrap();
        assert_eq!(again.job_id, retry.job_id);
    }

    #[tokio::test]
    async fn test_terminal_job_cannot_restart() {
        let ledger = ledger();
        let job = pipeline_job(&ledger, "a").await;
        ledger.start(job.job_id).await.unwrap();
        ledger
            .complete(job.job_id, JobState::Completed, None)
            .await
            .unwrap();

        assert!(ledger.start(job.job_id).await.is_err());
        assert!(ledger.resume(job.job_id).await.is_err());
    }
}
