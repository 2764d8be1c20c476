//! # In-Process Queue
//!
//! Deterministic [`TaskQueue`] used by the test suites and embedded runs.
//! Nothing fires on its own: a pump (test harness or embedded worker loop)
//! calls [`InProcessQueue::pop_due`] with an explicit clock and dispatches
//! what it gets back. Recurring entries re-arm themselves on pop.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::time::Duration;

use super::{QueueEntry, QueueResult, TaskQueue};

/// In-memory delayed-task queue with a manual pump.
#[derive(Debug, Default)]
pub struct InProcessQueue {
    entries: Mutex<Vec<QueueEntry>>,
}

impl InProcessQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop the earliest entry due at `now`, re-arming it first if recurring.
    pub fn pop_due(&self, now: DateTime<Utc>) -> Option<QueueEntry> {
        let mut entries = self.entries.lock();
        let idx = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.run_at <= now)
            .min_by_key(|(_, e)| e.run_at)
            .map(|(i, _)| i)?;

        let entry = entries.remove(idx);
        if let Some(interval_secs) = entry.interval_secs {
            let mut next = entry.clone();
            next.run_at = entry.run_at + chrono::Duration::seconds(interval_secs as i64);
            entries.push(next);
        }
        Some(entry)
    }

    /// Number of pending entries (including not-yet-due ones).
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Pending entries for one hook, in insertion order. Test visibility.
    pub fn entries_for(&self, hook: &str) -> Vec<QueueEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.hook == hook)
            .cloned()
            .collect()
    }

    /// The earliest scheduled run time among pending entries.
    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        self.entries.lock().iter().map(|e| e.run_at).min()
    }

    fn push(&self, entry: QueueEntry) {
        self.entries.lock().push(entry);
    }
}

#[async_trait]
impl TaskQueue for InProcessQueue {
    async fn enqueue_now(&self, hook: &str, args: Value) -> QueueResult<()> {
        self.push(QueueEntry {
            hook: hook.to_string(),
            args,
            run_at: Utc::now(),
            interval_secs: None,
        });
        Ok(())
    }

    async fn enqueue_at(&self, run_at: DateTime<Utc>, hook: &str, args: Value) -> QueueResult<()> {
        self.push(QueueEntry {
            hook: hook.to_string(),
            args,
            run_at,
            interval_secs: None,
        });
        Ok(())
    }

    async fn enqueue_recurring(
        &self,
        first_run: DateTime<Utc>,
        interval: Duration,
        hook: &str,
        args: Value,
    ) -> QueueResult<()> {
        self.push(QueueEntry {
            hook: hook.to_string(),
            args,
            run_at: first_run,
            interval_secs: Some(interval.as_secs().max(1)),
        });
        Ok(())
    }

    async fn cancel_all(&self, hook: &str, args_filter: Value) -> QueueResult<u64> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| !(e.hook == hook && e.matches_filter(&args_filter)));
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_pop_due_respects_run_at_ordering() {
        let queue = InProcessQueue::new();
        let now = Utc::now();

        queue
            .enqueue_at(now + chrono::Duration::seconds(60), "late", json!({}))
            .await
            .unwrap();
        queue.enqueue_now("early", json!({})).await.unwrap();

        let popped = queue.pop_due(now + chrono::Duration::seconds(1)).unwrap();
        assert_eq!(popped.hook, "early");

        // The delayed entry is not due yet.
        assert!(queue.pop_due(now + chrono::Duration::seconds(1)).is_none());
        assert!(queue.pop_due(now + chrono::Duration::seconds(61)).is_some());
    }

    #[tokio::test]
    async fn test_recurring_entries_rearm_on_pop() {
        let queue = InProcessQueue::new();
        let now = Utc::now();

        queue
            .enqueue_recurring(now, Duration::from_secs(30), "tick", json!({}))
            .await
            .unwrap();

        assert!(queue.pop_due(now).is_some());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_run_at(), Some(now + chrono::Duration::seconds(30)));
    }

    #[tokio::test]
    async fn test_cancel_all_with_filter() {
        let queue = InProcessQueue::new();
        queue
            .enqueue_now("engine.run_step", json!({"job_id": 1}))
            .await
            .unwrap();
        queue
            .enqueue_now("engine.run_step", json!({"job_id": 2}))
            .await
            .unwrap();
        queue
            .enqueue_now("other.hook", json!({"job_id": 1}))
            .await
            .unwrap();

        let removed = queue
            .cancel_all("engine.run_step", json!({"job_id": 1}))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(queue.len(), 2);
    }
}
