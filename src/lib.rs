#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Flowline Core
//!
//! Orchestration engine for durable multi-step processing pipelines.
//!
//! ## Overview
//!
//! Flowline runs pipelines that must execute to completion over seconds to
//! hours, survive process restarts, run many instances concurrently, and
//! recover from partial failure without operator intervention. Steps are
//! heterogeneous (fetch, transform, publish, gate-and-wait, notify) and may
//! depend on slow external services.
//!
//! The crate is the decision layer only: ordering, idempotency, partial
//! failure, and backpressure. The durable delayed-task queue, the concrete
//! step implementations, and the content store are external collaborators
//! behind narrow contracts.
//!
//! ## Key Guarantees
//!
//! - **Monotonic job lifecycle**: `pending → processing → {completed,
//!   completed_no_items, failed, cancelled, waiting}`; terminal states
//!   absorb duplicate events idempotently
//! - **At-least-once tolerant**: every step invocation may race a duplicate
//!   of itself; status transitions are conditional single-row writes
//! - **Bounded polling**: waiting on a slow external process is always
//!   reschedule-and-return with a hard attempt ceiling, never blocking
//! - **Backpressure**: a 10,000-item batch never places more than one chunk
//!   of new entries on the shared queue at once
//! - **Reversibility**: steps record effects; undo replays them newest-first
//!
//! ## Module Organization
//!
//! - [`models`] - Job, job source, and recorded-effect data types
//! - [`state_machine`] - Job states, events, and the pure transition table
//! - [`ledger`] - Job ledger: create/start/complete/park/resume/retry
//! - [`storage`] - `JobStore`/`BatchItemStore` traits, memory + Postgres
//! - [`queue`] - Task-queue adapter trait, in-process + pgmq implementations
//! - [`engine`] - Context store, step router, retry poller, batch scheduler,
//!   effects/undo, hook dispatcher, and the assembled [`engine::Engine`]
//! - [`web`] - Webhook trigger surface and thin job/batch handlers
//! - [`config`] - Engine configuration (defaults, YAML, env overrides)
//! - [`error`] - Crate-level error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flowline_core::config::EngineConfig;
//! use flowline_core::engine::{ConfiguredPipeline, Engine, StepRegistry};
//! use flowline_core::queue::InProcessQueue;
//! use flowline_core::storage::MemoryJobStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryJobStore::new());
//! let queue = Arc::new(InProcessQueue::new());
//! let registry = Arc::new(StepRegistry::new());
//! let pipelines = Arc::new(ConfiguredPipeline::from_yaml(
//!     "news_ingest:\n  - step_id: fetch\n    step_type: http_fetch\n",
//! )?);
//!
//! let engine = Engine::new(
//!     store.clone(),
//!     store,
//!     queue,
//!     registry,
//!     pipelines,
//!     Vec::new(),
//!     EngineConfig::default(),
//! );
//!
//! let job = engine.trigger_pipeline("news_ingest", serde_json::json!({})).await?;
//! println!("scheduled job {}", job.job_id);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod models;
pub mod queue;
pub mod state_machine;
pub mod storage;
pub mod web;

pub use config::EngineConfig;
pub use engine::{
    BatchOutcome, BatchScheduler, ChunkOutcome, ConfiguredPipeline, Engine, EngineContextStore,
    HookDispatcher, PipelineDefinition, RescheduleOutcome, ResultPacket, RetryPoller,
    RouterOutcome, StepHandler, StepRegistry, StepRouter, StepSpec, UndoDispatcher, UndoHandler,
};
pub use error::{EngineError, Result};
pub use ledger::JobLedger;
pub use models::{Effect, Job, JobSource, NewJob, UndoReport};
pub use queue::{InProcessQueue, PgmqQueue, TaskQueue};
pub use state_machine::{JobEvent, JobState};
pub use storage::{BatchItemStore, JobFilter, JobStore, MemoryJobStore, PgJobStore};
