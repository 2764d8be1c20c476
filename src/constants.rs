//! # System Constants
//!
//! Reserved engine-context keys, queue hook names, and operational defaults
//! that define the boundaries of the orchestration engine.
//!
//! Reserved keys are the only context keys the engine itself reads or writes;
//! everything else in the engine-context document belongs to the steps.

/// Reserved keys inside a job's engine-context document.
pub mod context_keys {
    /// Status override a step may set to force a terminal or parked status
    /// instead of the router's default success/failure inference.
    pub const JOB_STATUS: &str = "job_status";

    /// Poll attempt counter maintained by the retry/poll helper.
    pub const ATTEMPTS: &str = "attempts";
    /// Poll attempt ceiling, set once on the first reschedule.
    pub const MAX_ATTEMPTS: &str = "max_attempts";
    /// Transient marker the retry/poll helper sets when it re-enqueues a
    /// step; tells the router the invocation needs no routing action.
    pub const POLL_RESCHEDULED: &str = "poll_rescheduled";

    /// Recorded reversible effects, in execution order.
    pub const EFFECTS: &str = "effects";
    /// Undo report merged in after an undo run (carries the `undone` marker).
    pub const UNDO: &str = "undo";

    /// Persisted result packets keyed by step id.
    pub const STEP_RESULTS: &str = "step_results";
    /// Step id the router parked the job at when honoring a `waiting` override.
    pub const PAUSED_STEP: &str = "paused_step";

    /// Back-reference from a batch child job to its batch parent.
    pub const BATCH_JOB_ID: &str = "batch_job_id";
    /// Batch parent bookkeeping.
    pub const BATCH_TOTAL: &str = "total";
    pub const BATCH_CHUNK_SIZE: &str = "chunk_size";
    pub const BATCH_OFFSET: &str = "offset";
    pub const BATCH_TASKS_SCHEDULED: &str = "tasks_scheduled";
    pub const BATCH_CANCELLED: &str = "cancelled";
    /// Per-item payload handed to a batch child job.
    pub const BATCH_ITEM: &str = "item";

    /// Link from a retried job back to the job it was retried from.
    pub const RETRIED_FROM: &str = "retried_from";
}

/// Queue hook names the engine registers with the task queue. The queue
/// invokes these with a JSON args document; the dispatcher routes them.
pub mod hooks {
    /// Run one step of a job: args `{ "job_id": i64, "step_id": string }`.
    pub const RUN_STEP: &str = "engine.run_step";
    /// Process the next chunk of a batch: args `{ "batch_job_id": i64 }`.
    pub const PROCESS_BATCH_CHUNK: &str = "engine.process_batch_chunk";
}

/// Operational defaults. All of these are overridable through `EngineConfig`.
pub mod defaults {
    /// Items per batch chunk when the caller does not specify one.
    pub const BATCH_CHUNK_SIZE: usize = 100;
    /// Seconds between batch chunk runs.
    pub const BATCH_CHUNK_DELAY_SECS: u64 = 30;
    /// Poll attempt ceiling when the rescheduling step supplies none.
    pub const MAX_POLL_ATTEMPTS: u32 = 20;
    /// Seconds between poll attempts when the step supplies no delay.
    pub const POLL_DELAY_SECS: u64 = 60;
    /// Webhook fixed-window rate limit: requests per window.
    pub const WEBHOOK_RATE_MAX: u32 = 60;
    /// Webhook fixed-window rate limit: window length in seconds.
    pub const WEBHOOK_RATE_WINDOW_SECS: u64 = 60;
    /// Queue name the pgmq adapter uses unless configured otherwise.
    pub const QUEUE_NAME: &str = "flowline_engine";
}
