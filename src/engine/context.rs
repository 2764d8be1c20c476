//! # Engine Context Store
//!
//! The per-job mutable key-value document carried between steps. Steps and
//! the router communicate exclusively through this document; the router
//! re-reads it after every step invocation because a step may have mutated
//! it as a side effect (the `job_status` override is how a step forces a
//! gate or a specific terminal status).
//!
//! `merge` is a shallow key-level merge, last write wins per key; merging a
//! `null` value removes the key, which is how honored overrides get cleared.

use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;

use crate::constants::context_keys;
use crate::state_machine::JobState;
use crate::storage::{JobStore, StorageError, StorageResult};

/// Merge-on-write context document store scoped to one job at a time.
#[derive(Clone)]
pub struct EngineContextStore {
    store: Arc<dyn JobStore>,
}

impl EngineContextStore {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Read the current context document.
    pub async fn get(&self, job_id: i64) -> StorageResult<Value> {
        self.store.get_context(job_id).await
    }

    /// Replace the whole document.
    pub async fn store(&self, job_id: i64, context: Value) -> StorageResult<()> {
        self.store.put_context(job_id, &context).await
    }

    /// Shallow key-level merge; `null` values remove their key. Returns the
    /// merged document.
    pub async fn merge(&self, job_id: i64, partial: Value) -> StorageResult<Value> {
        let partial = match partial {
            Value::Object(map) => map,
            other => {
                return Err(StorageError::InvalidRow(format!(
                    "context merge requires an object, got {other}"
                )))
            }
        };

        let mut document = match self.store.get_context(job_id).await? {
            Value::Object(map) => map,
            // A non-object document is replaced outright.
            _ => Map::new(),
        };

        for (key, value) in partial {
            if value.is_null() {
                document.remove(&key);
            } else {
                document.insert(key, value);
            }
        }

        let merged = Value::Object(document);
        self.store.put_context(job_id, &merged).await?;
        Ok(merged)
    }

    /// Parse the reserved status-override key out of a context document.
    pub fn status_override(context: &Value) -> Option<JobState> {
        context
            .get(context_keys::JOB_STATUS)
            .and_then(Value::as_str)
            .and_then(|s| JobState::from_str(s).ok())
    }
}

/// Read a context counter, treating anything non-numeric as absent.
pub fn read_u64(context: &Value, key: &str) -> Option<u64> {
    context.get(key).and_then(Value::as_u64)
}
