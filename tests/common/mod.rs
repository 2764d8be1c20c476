//! Shared test harness: an engine over the in-memory store and the
//! in-process queue, plus scripted step handlers. The queue never fires on
//! its own; tests pump it explicitly, so every scenario is deterministic.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flowline_core::config::EngineConfig;
use flowline_core::engine::{
    ConfiguredPipeline, DispatchOutcome, Engine, EngineContextStore, ResultPacket, RetryPoller,
    StepError, StepHandler, StepRegistry, UndoHandler,
};
use flowline_core::models::Effect;
use flowline_core::queue::InProcessQueue;
use flowline_core::storage::MemoryJobStore;

pub struct TestHarness {
    pub engine: Arc<Engine>,
    pub store: Arc<MemoryJobStore>,
    pub queue: Arc<InProcessQueue>,
    pub registry: Arc<StepRegistry>,
    pub invocations: Arc<Mutex<Vec<(i64, String)>>>,
}

impl TestHarness {
    pub fn new(pipeline_yaml: &str, config: EngineConfig) -> Self {
        Self::with_undo_handlers(pipeline_yaml, config, Vec::new())
    }

    pub fn with_undo_handlers(
        pipeline_yaml: &str,
        config: EngineConfig,
        undo_handlers: Vec<(String, Arc<dyn UndoHandler>)>,
    ) -> Self {
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(InProcessQueue::new());
        let registry = Arc::new(StepRegistry::new());
        let pipelines = Arc::new(ConfiguredPipeline::from_yaml(pipeline_yaml).unwrap());

        let engine = Arc::new(Engine::new(
            store.clone(),
            store.clone(),
            queue.clone(),
            registry.clone(),
            pipelines,
            undo_handlers,
            config,
        ));

        Self {
            engine,
            store,
            queue,
            registry,
            invocations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Dispatch the single earliest due entry, treating every delay as
    /// elapsed.
    pub async fn pump_one(&self) -> Option<DispatchOutcome> {
        let far_future = Utc::now() + chrono::Duration::days(365);
        let entry = self.queue.pop_due(far_future)?;
        Some(self.engine.dispatcher().dispatch(&entry).await)
    }

    /// Pump until the queue drains. Returns the number of entries processed.
    pub async fn run_until_idle(&self) -> usize {
        let mut processed = 0;
        while self.pump_one().await.is_some() {
            processed += 1;
            assert!(processed < 10_000, "queue did not drain");
        }
        processed
    }

    /// Pump only entries already due, leaving delayed entries in place.
    pub async fn run_due_now(&self) -> usize {
        let mut processed = 0;
        while let Some(entry) = self.queue.pop_due(Utc::now()) {
            self.engine.dispatcher().dispatch(&entry).await;
            processed += 1;
            assert!(processed < 10_000, "queue did not drain");
        }
        processed
    }

    pub fn context_store(&self) -> EngineContextStore {
        self.engine.context().clone()
    }

    pub fn poller(&self) -> RetryPoller {
        self.engine.poller().clone()
    }
}

/// Succeeds with a fixed payload, recording every invocation.
pub struct OkStep {
    pub invocations: Arc<Mutex<Vec<(i64, String)>>>,
    pub payload: Value,
}

#[async_trait]
impl StepHandler for OkStep {
    async fn execute(
        &self,
        job_id: i64,
        step_id: &str,
        _context: &Value,
    ) -> Result<Vec<ResultPacket>, StepError> {
        self.invocations.lock().push((job_id, step_id.to_string()));
        Ok(vec![ResultPacket::ok(self.payload.clone())])
    }
}

/// Reports an expected failure through a `success: false` packet.
pub struct FailStep {
    pub error: String,
}

#[async_trait]
impl StepHandler for FailStep {
    async fn execute(
        &self,
        _job_id: i64,
        _step_id: &str,
        _context: &Value,
    ) -> Result<Vec<ResultPacket>, StepError> {
        Ok(vec![ResultPacket::failed(json!({"error": self.error}))])
    }
}

/// Returns no packets at all (a fetch that found nothing).
pub struct EmptyStep;

#[async_trait]
impl StepHandler for EmptyStep {
    async fn execute(
        &self,
        _job_id: i64,
        _step_id: &str,
        _context: &Value,
    ) -> Result<Vec<ResultPacket>, StepError> {
        Ok(vec![])
    }
}

/// Raises an unexpected fault the router must contain.
pub struct FaultStep;

#[async_trait]
impl StepHandler for FaultStep {
    async fn execute(
        &self,
        _job_id: i64,
        _step_id: &str,
        _context: &Value,
    ) -> Result<Vec<ResultPacket>, StepError> {
        Err(StepError::Failed("external service imploded".to_string()))
    }
}

/// Sets the `waiting` status override: the gate/pause mechanism.
pub struct GateStep {
    pub context: EngineContextStore,
}

#[async_trait]
impl StepHandler for GateStep {
    async fn execute(
        &self,
        job_id: i64,
        _step_id: &str,
        _context: &Value,
    ) -> Result<Vec<ResultPacket>, StepError> {
        self.context
            .merge(job_id, json!({"job_status": "waiting"}))
            .await
            .map_err(|e| StepError::Failed(e.to_string()))?;
        Ok(vec![ResultPacket::ok(json!({"gate": "armed"}))])
    }
}

/// Polls a fake external operation: reschedules itself until the external
/// side reports done.
pub struct PollStep {
    pub poller: RetryPoller,
    pub remaining: Arc<AtomicU32>,
    pub max_attempts: Option<u32>,
}

#[async_trait]
impl StepHandler for PollStep {
    async fn execute(
        &self,
        job_id: i64,
        step_id: &str,
        _context: &Value,
    ) -> Result<Vec<ResultPacket>, StepError> {
        let remaining = self.remaining.load(Ordering::SeqCst);
        if remaining == 0 {
            return Ok(vec![ResultPacket::ok(json!({"external": "done"}))]);
        }
        self.remaining.store(remaining - 1, Ordering::SeqCst);

        self.poller
            .reschedule(job_id, step_id, Some(Duration::from_secs(1)), self.max_attempts)
            .await
            .map_err(|e| StepError::Failed(e.to_string()))?;
        Ok(vec![])
    }
}

/// Records reversible effects as it mutates fake durable state.
pub struct EffectStep {
    pub recorder: flowline_core::engine::EffectRecorder,
    pub targets: Vec<String>,
}

#[async_trait]
impl StepHandler for EffectStep {
    async fn execute(
        &self,
        job_id: i64,
        _step_id: &str,
        _context: &Value,
    ) -> Result<Vec<ResultPacket>, StepError> {
        for target in &self.targets {
            self.recorder
                .record(
                    job_id,
                    Effect::new("content_edit", target).with_previous_value(json!("before")),
                )
                .await
                .map_err(|e| StepError::Failed(e.to_string()))?;
        }
        Ok(vec![ResultPacket::ok(json!({"edited": self.targets.len()}))])
    }
}

/// Undo handler recording reverted targets in order.
pub struct RecordingUndoHandler {
    pub reverted: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl UndoHandler for RecordingUndoHandler {
    async fn revert(&self, _job_id: i64, effect: &Effect) -> anyhow::Result<()> {
        self.reverted.lock().push(effect.target.clone());
        Ok(())
    }
}
