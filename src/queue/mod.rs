//! # Task Queue Adapter
//!
//! The engine never owns a timer or a queue; it talks to an external durable
//! delayed-task queue through four primitives. Delivery is at-least-once —
//! every consumer of these entries must tolerate duplicates.
//!
//! Two implementations ship with the crate: [`pgmq::PgmqQueue`] for
//! production (PostgreSQL message queue, the same transport the rest of the
//! storage layer lives on) and [`memory::InProcessQueue`] with a
//! deterministic pump for tests and embedded runs.

pub mod memory;
pub mod pgmq;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub use self::memory::InProcessQueue;
pub use self::pgmq::PgmqQueue;

/// Errors surfaced by queue operations. The engine surfaces these
/// synchronously to whoever attempted to schedule work; a job whose enqueue
/// failed is marked failed rather than left pending forever.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid queue entry: {0}")]
    InvalidEntry(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

/// One queued invocation: a hook name plus its JSON args.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub hook: String,
    pub args: Value,
    /// Earliest time the entry should run.
    pub run_at: DateTime<Utc>,
    /// Re-arm interval for recurring entries; consumers re-enqueue on pop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
}

impl QueueEntry {
    /// Whether `args` contains every key/value pair of `filter`.
    /// Non-object filters match nothing; an empty object matches everything.
    pub fn matches_filter(&self, filter: &Value) -> bool {
        match (self.args.as_object(), filter.as_object()) {
            (Some(args), Some(filter)) => filter
                .iter()
                .all(|(key, value)| args.get(key) == Some(value)),
            _ => false,
        }
    }
}

/// Narrow contract over the external durable task queue.
///
/// "Accepted for later execution" is the only guarantee an `Ok` return
/// carries; the queue may deliver the entry more than once.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue an invocation to run as soon as a worker picks it up.
    async fn enqueue_now(&self, hook: &str, args: Value) -> QueueResult<()>;

    /// Enqueue an invocation to run no earlier than `run_at`.
    async fn enqueue_at(&self, run_at: DateTime<Utc>, hook: &str, args: Value) -> QueueResult<()>;

    /// Enqueue a recurring invocation, first run no earlier than `first_run`.
    async fn enqueue_recurring(
        &self,
        first_run: DateTime<Utc>,
        interval: Duration,
        hook: &str,
        args: Value,
    ) -> QueueResult<()>;

    /// Remove every pending entry for `hook` whose args contain all pairs of
    /// `args_filter`. Returns the number of entries removed.
    async fn cancel_all(&self, hook: &str, args_filter: Value) -> QueueResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(args: Value) -> QueueEntry {
        QueueEntry {
            hook: "engine.run_step".to_string(),
            args,
            run_at: Utc::now(),
            interval_secs: None,
        }
    }

    #[test]
    fn test_filter_matches_subset_of_args() {
        let e = entry(json!({"job_id": 7, "step_id": "fetch"}));
        assert!(e.matches_filter(&json!({"job_id": 7})));
        assert!(e.matches_filter(&json!({"job_id": 7, "step_id": "fetch"})));
        assert!(e.matches_filter(&json!({})));
        assert!(!e.matches_filter(&json!({"job_id": 8})));
        assert!(!e.matches_filter(&json!({"missing": true})));
    }

    #[test]
    fn test_non_object_filter_matches_nothing() {
        let e = entry(json!({"job_id": 7}));
        assert!(!e.matches_filter(&json!(7)));
        assert!(!e.matches_filter(&json!(null)));
    }
}
