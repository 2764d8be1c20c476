//! # Storage Layer
//!
//! Trait seams for the job ledger's persistence: [`JobStore`] for job rows,
//! engine context, and the processed-items history, and [`BatchItemStore`]
//! for the batch side-store holding items awaiting chunked dispatch.
//!
//! Two implementations ship with the crate: a Postgres store for production
//! ([`postgres::PgJobStore`]) and an in-memory store for tests and embedded
//! use ([`memory::MemoryJobStore`]). All mutation is single-row, single-field
//! writes; status changes are conditional on the expected current states so
//! that duplicate invocations cannot regress a settled job.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::{Job, JobSource, NewJob};
use crate::state_machine::JobState;

pub use self::memory::MemoryJobStore;
pub use self::postgres::PgJobStore;

/// Errors surfaced by the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Job {0} not found")]
    JobNotFound(i64),

    #[error("A job with identity hash {0} already exists")]
    DuplicateIdentity(String),

    #[error("Corrupt job row: {0}")]
    InvalidRow(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Query filter for ledger listings.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub statuses: Option<Vec<JobState>>,
    pub sources: Option<Vec<JobSource>>,
    pub owner_ref: Option<String>,
    /// Restrict to children of one batch parent.
    pub batch_job_id: Option<i64>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn by_batch(batch_job_id: i64) -> Self {
        Self {
            batch_job_id: Some(batch_job_id),
            ..Self::default()
        }
    }
}

/// Persistence contract for job rows, engine context, and processed history.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job row. Fails with [`StorageError::DuplicateIdentity`]
    /// when the identity hash is already present.
    async fn insert_job(&self, new_job: &NewJob, identity_hash: &str) -> StorageResult<Job>;

    async fn find_job(&self, job_id: i64) -> StorageResult<Option<Job>>;

    async fn find_by_identity(&self, identity_hash: &str) -> StorageResult<Option<Job>>;

    /// Conditionally set a job's status: the write only happens when the
    /// current status is one of `expected`. Returns `true` when a row
    /// changed. This is the ledger's only synchronization primitive.
    async fn update_status(
        &self,
        job_id: i64,
        expected: &[JobState],
        to: JobState,
        reason: Option<&str>,
        completed_at: Option<DateTime<Utc>>,
    ) -> StorageResult<bool>;

    async fn get_context(&self, job_id: i64) -> StorageResult<Value>;

    /// Replace the whole engine-context document.
    async fn put_context(&self, job_id: i64, context: &Value) -> StorageResult<()>;

    async fn list_jobs(&self, filter: &JobFilter) -> StorageResult<Vec<Job>>;

    /// Whether `(owner_ref, step_id)` has ever recorded a processed item.
    /// Used to distinguish "nothing new" from a genuinely failed fetch.
    async fn has_processed_items(&self, owner_ref: &str, step_id: &str) -> StorageResult<bool>;

    /// Record an item as processed by `(owner_ref, step_id)`.
    async fn record_processed_item(
        &self,
        owner_ref: &str,
        step_id: &str,
        item_key: &str,
    ) -> StorageResult<()>;
}

/// Side store for batch items awaiting chunked dispatch.
///
/// Items are stored once at batch creation and read back as stable,
/// offset-addressed chunks, so re-running a chunk callback after a crash
/// re-reads exactly the same slice (child-job identity dedup absorbs the
/// duplicates).
#[async_trait]
pub trait BatchItemStore: Send + Sync {
    async fn put_items(&self, batch_job_id: i64, items: Vec<Value>) -> StorageResult<()>;

    /// Read up to `limit` items starting at `offset`.
    async fn read_chunk(
        &self,
        batch_job_id: i64,
        offset: usize,
        limit: usize,
    ) -> StorageResult<Vec<Value>>;

    /// Drop the side-store entry once the batch settles.
    async fn release(&self, batch_job_id: i64) -> StorageResult<()>;
}
