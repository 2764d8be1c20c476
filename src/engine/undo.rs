//! # Effects / Undo
//!
//! Steps that mutate durable state record reversible effects as they go;
//! undo replays a job's effect list in reverse, dispatching each entry to a
//! type-specific reversal handler. Unknown or irreversible effect types are
//! reported as skipped rather than failing the whole undo. The dispatcher
//! refuses to run twice against the same job: the first run leaves an
//! `undone` marker in the job's context.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::context::EngineContextStore;
use crate::constants::context_keys;
use crate::models::{Effect, UndoReport};
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum UndoError {
    #[error("Job {0} was already undone")]
    AlreadyUndone(i64),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Corrupt effects list: {0}")]
    CorruptEffects(String),
}

/// Type-specific reversal of one recorded effect.
#[async_trait]
pub trait UndoHandler: Send + Sync {
    async fn revert(&self, job_id: i64, effect: &Effect) -> anyhow::Result<()>;
}

/// Appends effects to a job's recorded effect list, in execution order.
#[derive(Clone)]
pub struct EffectRecorder {
    context: EngineContextStore,
}

impl EffectRecorder {
    pub fn new(context: EngineContextStore) -> Self {
        Self { context }
    }

    pub async fn record(&self, job_id: i64, effect: Effect) -> Result<(), StorageError> {
        let context = self.context.get(job_id).await?;
        let mut effects = match context.get(context_keys::EFFECTS) {
            Some(Value::Array(list)) => list.clone(),
            _ => Vec::new(),
        };
        effects.push(serde_json::to_value(&effect)?);
        self.context
            .merge(job_id, json!({(context_keys::EFFECTS): effects}))
            .await?;
        Ok(())
    }
}

/// Replays recorded effects in last-in-first-out order.
pub struct UndoDispatcher {
    context: EngineContextStore,
    handlers: HashMap<String, Arc<dyn UndoHandler>>,
}

impl UndoDispatcher {
    pub fn new(context: EngineContextStore) -> Self {
        Self {
            context,
            handlers: HashMap::new(),
        }
    }

    /// Register a reversal handler for an effect type.
    pub fn register(mut self, effect_type: impl Into<String>, handler: Arc<dyn UndoHandler>) -> Self {
        self.handlers.insert(effect_type.into(), handler);
        self
    }

    /// Whether this job has already been undone.
    pub async fn already_undone(&self, job_id: i64) -> Result<bool, StorageError> {
        let context = self.context.get(job_id).await?;
        Ok(context
            .get(context_keys::UNDO)
            .and_then(|u| u.get("undone"))
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    /// Undo every recorded effect of a job, newest first. The report is
    /// merged back into the job's context along with the `undone` marker.
    pub async fn undo(&self, job_id: i64) -> Result<UndoReport, UndoError> {
        if self.already_undone(job_id).await? {
            return Err(UndoError::AlreadyUndone(job_id));
        }

        let context = self.context.get(job_id).await?;
        let effects: Vec<Effect> = match context.get(context_keys::EFFECTS) {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| UndoError::CorruptEffects(e.to_string()))?,
            None => Vec::new(),
        };

        let mut report = UndoReport::default();
        for effect in effects.iter().rev() {
            match self.handlers.get(&effect.effect_type) {
                None => {
                    warn!(
                        job_id,
                        effect_type = %effect.effect_type,
                        effect_id = %effect.effect_id,
                        "No undo handler; effect skipped"
                    );
                    report.skipped.push(effect.effect_id);
                }
                Some(handler) => match handler.revert(job_id, effect).await {
                    Ok(()) => report.reverted.push(effect.effect_id),
                    Err(e) => {
                        warn!(
                            job_id,
                            effect_id = %effect.effect_id,
                            error = %e,
                            "Effect reversal failed"
                        );
                        report.failed.push((effect.effect_id, e.to_string()));
                    }
                },
            }
        }
        report.undone_at = Some(Utc::now());

        let mut undo_value =
            serde_json::to_value(&report).map_err(|e| UndoError::CorruptEffects(e.to_string()))?;
        if let Some(map) = undo_value.as_object_mut() {
            map.insert("undone".to_string(), json!(true));
        }
        self.context
            .merge(job_id, json!({(context_keys::UNDO): undo_value}))
            .await
            .map_err(UndoError::from)?;

        info!(
            job_id,
            reverted = report.reverted.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "↩️ Undo finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobSource, NewJob};
    use crate::storage::{JobStore, MemoryJobStore};
    use parking_lot::Mutex;

    struct RecordingUndo {
        reverted_targets: Arc<Mutex<Vec<String>>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl UndoHandler for RecordingUndo {
        async fn revert(&self, _job_id: i64, effect: &Effect) -> anyhow::Result<()> {
            if self.fail_on.as_deref() == Some(effect.target.as_str()) {
                anyhow::bail!("refusing to revert {}", effect.target);
            }
            self.reverted_targets.lock().push(effect.target.clone());
            Ok(())
        }
    }

    async fn setup() -> (EngineContextStore, EffectRecorder, i64) {
        let store = Arc::new(MemoryJobStore::new());
        let job = store
            .insert_job(&NewJob::new("news_ingest", JobSource::Pipeline), "undo-hash")
            .await
            .unwrap();
        let context = EngineContextStore::new(store);
        let recorder = EffectRecorder::new(context.clone());
        (context, recorder, job.job_id)
    }

    #[tokio::test]
    async fn test_undo_reverts_in_reverse_order() {
        let (context, recorder, job_id) = setup().await;
        for target in ["rev:1", "rev:2", "rev:3"] {
            recorder
                .record(job_id, Effect::new("content_edit", target))
                .await
                .unwrap();
        }

        let reverted = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = UndoDispatcher::new(context).register(
            "content_edit",
            Arc::new(RecordingUndo {
                reverted_targets: reverted.clone(),
                fail_on: None,
            }),
        );

        let report = dispatcher.undo(job_id).await.unwrap();
        assert_eq!(report.reverted.len(), 3);
        assert!(report.failed.is_empty());
        assert!(report.skipped.is_empty());
        assert_eq!(*reverted.lock(), vec!["rev:3", "rev:2", "rev:1"]);
    }

    #[tokio::test]
    async fn test_unknown_types_are_skipped_not_failed() {
        let (context, recorder, job_id) = setup().await;
        recorder
            .record(job_id, Effect::new("content_edit", "rev:1"))
            .await
            .unwrap();
        recorder
            .record(job_id, Effect::new("exotic_effect", "thing:2"))
            .await
            .unwrap();

        let reverted = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = UndoDispatcher::new(context).register(
            "content_edit",
            Arc::new(RecordingUndo {
                reverted_targets: reverted.clone(),
                fail_on: None,
            }),
        );

        let report = dispatcher.undo(job_id).await.unwrap();
        assert_eq!(report.reverted.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_handler_failure_recorded_and_continues() {
        let (context, recorder, job_id) = setup().await;
        for target in ["rev:1", "rev:2"] {
            recorder
                .record(job_id, Effect::new("content_edit", target))
                .await
                .unwrap();
        }

        let reverted = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = UndoDispatcher::new(context).register(
            "content_edit",
            Arc::new(RecordingUndo {
                reverted_targets: reverted.clone(),
                fail_on: Some("rev:2".to_string()),
            }),
        );

        let report = dispatcher.undo(job_id).await.unwrap();
        // rev:2 (undone first) failed; rev:1 still reverted.
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.reverted.len(), 1);
        assert_eq!(*reverted.lock(), vec!["rev:1"]);
    }

    #[tokio::test]
    async fn test_second_undo_refused() {
        let (context, recorder, job_id) = setup().await;
        recorder
            .record(job_id, Effect::new("content_edit", "rev:1"))
            .await
            .unwrap();

        let dispatcher = UndoDispatcher::new(context).register(
            "content_edit",
            Arc::new(RecordingUndo {
                reverted_targets: Arc::new(Mutex::new(Vec::new())),
                fail_on: None,
            }),
        );

        dispatcher.undo(job_id).await.unwrap();
        assert!(dispatcher.already_undone(job_id).await.unwrap());
        let err = dispatcher.undo(job_id).await.unwrap_err();
        assert!(matches!(err, UndoError::AlreadyUndone(_)));
    }

    #[tokio::test]
    async fn test_undo_with_no_effects_is_clean() {
        let (context, _recorder, job_id) = setup().await;
        let dispatcher = UndoDispatcher::new(context);
        let report = dispatcher.undo(job_id).await.unwrap();
        assert!(report.is_clean());
        assert!(report.reverted.is_empty());
    }
}
