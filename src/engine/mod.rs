//! # Orchestration Engine
//!
//! The layer where ordering, idempotency, partial failure, and backpressure
//! are decided.
//!
//! ## Core Components
//!
//! - **EngineContextStore**: per-job key-value document carried between steps
//! - **StepRouter**: invokes steps, interprets their results, and decides the
//!   next action (advance, complete, park, fail)
//! - **RetryPoller**: bounded reschedule-with-backoff for steps waiting on
//!   slow external operations
//! - **BatchScheduler**: chunked admission control for large fan-out work
//! - **EffectRecorder / UndoDispatcher**: reversible-effect ledger and its
//!   last-in-first-out replay
//! - **StepRegistry**: explicit step-type → handler map, built at startup
//! - **HookDispatcher**: queue-entry → engine-callback routing
//! - **Engine**: one assembled instance of all of the above
//!
//! Concurrency comes entirely from the external task queue invoking the
//! dispatcher, possibly from several worker processes with at-least-once
//! delivery; there is no in-memory shared mutable state between invocations.

pub mod batch;
pub mod context;
pub mod core;
pub mod dispatcher;
pub mod pipeline;
pub mod registry;
pub mod retry;
pub mod router;
pub mod step_handler;
pub mod undo;
pub mod worker;

pub use self::batch::{BatchError, BatchOutcome, BatchProgress, BatchScheduler, ChunkOutcome};
pub use self::context::EngineContextStore;
pub use self::core::Engine;
pub use self::dispatcher::{DispatchOutcome, HookDispatcher};
pub use self::pipeline::{ConfiguredPipeline, PipelineDefinition, StepSpec};
pub use self::registry::{RegistryError, StepRegistry};
pub use self::retry::{RescheduleOutcome, RetryError, RetryPoller};
pub use self::router::{RouterError, RouterOutcome, RouterResult, StepRouter};
pub use self::step_handler::{ResultPacket, StepError, StepHandler};
pub use self::undo::{EffectRecorder, UndoDispatcher, UndoError, UndoHandler};
pub use self::worker::{QueueWorker, WorkerConfig};
