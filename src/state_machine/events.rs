use serde::{Deserialize, Serialize};

use super::states::JobState;

/// Lifecycle events that drive job state transitions.
///
/// Only the step router (through the ledger) emits these; no other component
/// may mutate a job's status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// Begin processing a pending job.
    Start,
    /// Finish the job with a specific terminal status.
    Complete { status: JobState },
    /// Fail the job, recording a human-readable reason.
    Fail { reason: String },
    /// Park the job at a gate awaiting external resumption.
    Park,
    /// Resume a parked job.
    Resume,
    /// Cancel the job.
    Cancel,
}

impl JobEvent {
    /// Event name used in transition logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete { .. } => "complete",
            Self::Fail { .. } => "fail",
            Self::Park => "park",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
        }
    }
}
