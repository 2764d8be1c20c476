use serde::{Deserialize, Serialize};
use std::fmt;

/// Job state definitions for the orchestration ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Initial state when the job is created
    Pending,
    /// The job is advancing through its steps
    Processing,
    /// The job ran to the end of its pipeline successfully
    Completed,
    /// A fetch-like step legitimately found nothing new to process
    CompletedNoItems,
    /// The job failed; the reason is recorded on the job
    Failed,
    /// The job was cancelled
    Cancelled,
    /// Parked at a gate, awaiting external resumption
    Waiting,
}

impl JobState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedNoItems | Self::Failed | Self::Cancelled
        )
    }

    /// Check if this is an active state (the job is being processed)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Processing)
    }

    /// Check if this is the parked gate state
    pub fn is_parked(&self) -> bool {
        matches!(self, Self::Waiting)
    }

    /// The terminal states a step override or a completion call may target.
    pub fn terminal_states() -> &'static [JobState] {
        &[
            Self::Completed,
            Self::CompletedNoItems,
            Self::Failed,
            Self::Cancelled,
        ]
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::CompletedNoItems => write!(f, "completed_no_items"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Waiting => write!(f, "waiting"),
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "completed_no_items" => Ok(Self::CompletedNoItems),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "waiting" => Ok(Self::Waiting),
            _ => Err(format!("Invalid job state: {s}")),
        }
    }
}

/// Default state for new jobs
impl Default for JobState {
    fn default() -> Self {
        Self::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_check() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::CompletedNoItems.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Processing.is_terminal());
        assert!(!JobState::Waiting.is_terminal());
    }

    #[test]
    fn test_waiting_is_parked_not_active() {
        assert!(JobState::Waiting.is_parked());
        assert!(!JobState::Waiting.is_active());
        assert!(JobState::Processing.is_active());
    }

    #[test]
    fn test_state_string_conversion() {
        assert_eq!(JobState::CompletedNoItems.to_string(), "completed_no_items");
        assert_eq!("waiting".parse::<JobState>().unwrap(), JobState::Waiting);
        assert!("bogus".parse::<JobState>().is_err());
    }

    #[test]
    fn test_state_serde() {
        let state = JobState::CompletedNoItems;
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, "\"completed_no_items\"");

        let parsed: JobState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }
}
