//! # Engine Assembly
//!
//! Wires the ledger, context store, router, batch scheduler, retry poller,
//! undo dispatcher, and hook dispatcher over one storage and queue pair.
//! Built once at process start; components are shared by `Arc` from here —
//! nothing in the engine is ambient global state.

use std::sync::Arc;

use super::batch::BatchScheduler;
use super::context::EngineContextStore;
use super::dispatcher::HookDispatcher;
use super::pipeline::PipelineDefinition;
use super::registry::StepRegistry;
use super::retry::RetryPoller;
use super::router::{RouterError, StepRouter};
use super::undo::{EffectRecorder, UndoDispatcher, UndoHandler};
use crate::config::EngineConfig;
use crate::ledger::JobLedger;
use crate::models::{Job, JobSource, NewJob};
use crate::queue::TaskQueue;
use crate::storage::{BatchItemStore, JobStore};

/// One assembled orchestration engine.
pub struct Engine {
    config: EngineConfig,
    ledger: JobLedger,
    context: EngineContextStore,
    router: Arc<StepRouter>,
    batch: Arc<BatchScheduler>,
    poller: RetryPoller,
    undo: UndoDispatcher,
    recorder: EffectRecorder,
    dispatcher: HookDispatcher,
}

impl Engine {
    pub fn new(
        store: Arc<dyn JobStore>,
        batch_items: Arc<dyn BatchItemStore>,
        queue: Arc<dyn TaskQueue>,
        registry: Arc<StepRegistry>,
        pipelines: Arc<dyn PipelineDefinition>,
        undo_handlers: Vec<(String, Arc<dyn UndoHandler>)>,
        config: EngineConfig,
    ) -> Self {
        let ledger = JobLedger::new(store.clone());
        let context = EngineContextStore::new(store);

        let router = Arc::new(StepRouter::new(
            ledger.clone(),
            context.clone(),
            queue.clone(),
            registry,
            pipelines,
        ));
        let batch = Arc::new(BatchScheduler::new(
            ledger.clone(),
            context.clone(),
            batch_items,
            queue.clone(),
            router.clone(),
            config.batch.clone(),
        ));
        let poller = RetryPoller::new(
            ledger.clone(),
            context.clone(),
            queue,
            config.poll.clone(),
        );

        let mut undo = UndoDispatcher::new(context.clone());
        for (effect_type, handler) in undo_handlers {
            undo = undo.register(effect_type, handler);
        }

        Self {
            dispatcher: HookDispatcher::new(router.clone(), batch.clone()),
            recorder: EffectRecorder::new(context.clone()),
            config,
            ledger,
            context,
            router,
            batch,
            poller,
            undo,
        }
    }

    /// Create a pipeline job and enqueue its first step.
    pub async fn trigger_pipeline(
        &self,
        owner_ref: &str,
        seed_context: serde_json::Value,
    ) -> Result<Job, RouterError> {
        let job = self
            .ledger
            .create(NewJob::new(owner_ref, JobSource::Pipeline).with_context(seed_context))
            .await?;
        self.router.dispatch_first_step(&job).await?;
        Ok(job)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &JobLedger {
        &self.ledger
    }

    pub fn context(&self) -> &EngineContextStore {
        &self.context
    }

    pub fn router(&self) -> &Arc<StepRouter> {
        &self.router
    }

    pub fn batch(&self) -> &Arc<BatchScheduler> {
        &self.batch
    }

    pub fn poller(&self) -> &RetryPoller {
        &self.poller
    }

    pub fn undo(&self) -> &UndoDispatcher {
        &self.undo
    }

    pub fn effect_recorder(&self) -> &EffectRecorder {
        &self.recorder
    }

    pub fn dispatcher(&self) -> &HookDispatcher {
        &self.dispatcher
    }
}
