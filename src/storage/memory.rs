//! # In-Memory Store
//!
//! Ledger and batch side-store backed by process memory. Used by the test
//! suites and by embedded deployments that do not need restart durability.
//! Implements the same conditional-write semantics as the Postgres store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};

use super::{BatchItemStore, JobFilter, JobStore, StorageError, StorageResult};
use crate::models::{Job, NewJob};
use crate::state_machine::JobState;

/// In-memory [`JobStore`] + [`BatchItemStore`].
#[derive(Debug)]
pub struct MemoryJobStore {
    next_id: AtomicI64,
    jobs: DashMap<i64, Job>,
    identities: DashMap<String, i64>,
    processed: Mutex<HashSet<(String, String, String)>>,
    batch_items: DashMap<i64, Vec<Value>>,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            jobs: DashMap::new(),
            identities: DashMap::new(),
            processed: Mutex::new(HashSet::new()),
            batch_items: DashMap::new(),
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_job(&self, new_job: &NewJob, identity_hash: &str) -> StorageResult<Job> {
        let job_id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // entry() keeps the identity check and the claim atomic.
        match self.identities.entry(identity_hash.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(StorageError::DuplicateIdentity(identity_hash.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(job_id);
            }
        }

        let job = Job {
            job_id,
            status: JobState::Pending,
            source: new_job.source,
            owner_ref: new_job.owner_ref.clone(),
            engine_context: new_job.engine_context.clone(),
            reason: None,
            identity_hash: identity_hash.to_string(),
            created_at: Utc::now(),
            completed_at: None,
        };
        self.jobs.insert(job_id, job.clone());
        Ok(job)
    }

    async fn find_job(&self, job_id: i64) -> StorageResult<Option<Job>> {
        Ok(self.jobs.get(&job_id).map(|j| j.value().clone()))
    }

    async fn find_by_identity(&self, identity_hash: &str) -> StorageResult<Option<Job>> {
        match self.identities.get(identity_hash) {
            Some(id) => self.find_job(*id).await,
            None => Ok(None),
        }
    }

    async fn update_status(
        &self,
        job_id: i64,
        expected: &[JobState],
        to: JobState,
        reason: Option<&str>,
        completed_at: Option<DateTime<Utc>>,
    ) -> StorageResult<bool> {
        let mut job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(StorageError::JobNotFound(job_id))?;

        if !expected.contains(&job.status) {
            return Ok(false);
        }

        job.status = to;
        if let Some(reason) = reason {
            job.reason = Some(reason.to_string());
        }
        if completed_at.is_some() {
            job.completed_at = completed_at;
        }
        Ok(true)
    }

    async fn get_context(&self, job_id: i64) -> StorageResult<Value> {
        self.jobs
            .get(&job_id)
            .map(|j| j.engine_context.clone())
            .ok_or(StorageError::JobNotFound(job_id))
    }

    async fn put_context(&self, job_id: i64, context: &Value) -> StorageResult<()> {
        let mut job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(StorageError::JobNotFound(job_id))?;
        job.engine_context = context.clone();
        Ok(())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> StorageResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|job| {
                if let Some(statuses) = &filter.statuses {
                    if !statuses.contains(&job.status) {
                        return false;
                    }
                }
                if let Some(sources) = &filter.sources {
                    if !sources.contains(&job.source) {
                        return false;
                    }
                }
                if let Some(owner_ref) = &filter.owner_ref {
                    if &job.owner_ref != owner_ref {
                        return false;
                    }
                }
                if let Some(batch_job_id) = filter.batch_job_id {
                    let linked = job
                        .engine_context
                        .get(crate::constants::context_keys::BATCH_JOB_ID)
                        .and_then(Value::as_i64);
                    if linked != Some(batch_job_id) {
                        return false;
                    }
                }
                true
            })
            .collect();

        jobs.sort_by_key(|j| j.job_id);
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    async fn has_processed_items(&self, owner_ref: &str, step_id: &str) -> StorageResult<bool> {
        let processed = self.processed.lock();
        Ok(processed
            .iter()
            .any(|(o, s, _)| o == owner_ref && s == step_id))
    }

    async fn record_processed_item(
        &self,
        owner_ref: &str,
        step_id: &str,
        item_key: &str,
    ) -> StorageResult<()> {
        self.processed.lock().insert((
            owner_ref.to_string(),
            step_id.to_string(),
            item_key.to_string(),
        ));
        Ok(())
    }
}

#[async_trait]
impl BatchItemStore for MemoryJobStore {
    async fn put_items(&self, batch_job_id: i64, items: Vec<Value>) -> StorageResult<()> {
        self.batch_items.insert(batch_job_id, items);
        Ok(())
    }

    async fn read_chunk(
        &self,
        batch_job_id: i64,
        offset: usize,
        limit: usize,
    ) -> StorageResult<Vec<Value>> {
        let items = self
            .batch_items
            .get(&batch_job_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        Ok(items.into_iter().skip(offset).take(limit).collect())
    }

    async fn release(&self, batch_job_id: i64) -> StorageResult<()> {
        self.batch_items.remove(&batch_job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobSource;
    use serde_json::json;

    fn new_job(owner: &str) -> NewJob {
        NewJob::new(owner, JobSource::Pipeline).with_context(json!({"seed": owner}))
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = MemoryJobStore::new();
        let job = store.insert_job(&new_job("a"), "hash-a").await.unwrap();
        assert_eq!(job.status, JobState::Pending);

        let found = store.find_job(job.job_id).await.unwrap().unwrap();
        assert_eq!(found, job);
        assert!(store.find_job(9999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_identity_rejected() {
        let store = MemoryJobStore::new();
        store.insert_job(&new_job("a"), "same-hash").await.unwrap();
        let err = store.insert_job(&new_job("b"), "same-hash").await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateIdentity(_)));
    }

    #[tokio::test]
    async fn test_conditional_status_write() {
        let store = MemoryJobStore::new();
        let job = store.insert_job(&new_job("a"), "h1").await.unwrap();

        let changed = store
            .update_status(job.job_id, &[JobState::Pending], JobState::Processing, None, None)
            .await
            .unwrap();
        assert!(changed);

        // Wrong expectation leaves the row untouched.
        let changed = store
            .update_status(job.job_id, &[JobState::Pending], JobState::Failed, None, None)
            .await
            .unwrap();
        assert!(!changed);
        let job = store.find_job(job.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobState::Processing);
    }

    #[tokio::test]
    async fn test_batch_chunk_reads_are_stable() {
        let store = MemoryJobStore::new();
        let items: Vec<Value> = (0..25).map(|i| json!({"n": i})).collect();
        store.put_items(7, items).await.unwrap();

        let first = store.read_chunk(7, 0, 10).await.unwrap();
        let again = store.read_chunk(7, 0, 10).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(first.len(), 10);

        let tail = store.read_chunk(7, 20, 10).await.unwrap();
        assert_eq!(tail.len(), 5);

        store.release(7).await.unwrap();
        assert!(store.read_chunk(7, 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_processed_history() {
        let store = MemoryJobStore::new();
        assert!(!store.has_processed_items("feed", "fetch").await.unwrap());
        store
            .record_processed_item("feed", "fetch", "item-1")
            .await
            .unwrap();
        assert!(store.has_processed_items("feed", "fetch").await.unwrap());
        assert!(!store.has_processed_items("feed", "publish").await.unwrap());
    }
}
