use super::{events::JobEvent, states::JobState};

/// Errors raised when an illegal transition is requested.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum StateMachineError {
    #[error("Invalid transition from {from} on {event}")]
    InvalidTransition { from: JobState, event: String },

    #[error("Completion status {0} is not terminal")]
    NonTerminalCompletion(JobState),
}

/// Outcome of evaluating an event against the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionDecision {
    /// Move to the new state.
    Transition(JobState),
    /// Already settled; re-applying a terminal event is a no-op, not an error.
    NoOp(JobState),
}

impl TransitionDecision {
    /// The state the job is in after applying this decision.
    pub fn resulting_state(&self) -> JobState {
        match self {
            Self::Transition(state) | Self::NoOp(state) => *state,
        }
    }
}

/// Pure transition table for the job lifecycle.
///
/// `pending → processing → {completed, completed_no_items, failed,
/// cancelled, waiting}`, with `waiting` the only non-terminal parked state.
/// Terminal states absorb further terminal events so that duplicate step
/// invocations (at-least-once queue delivery) cannot corrupt a settled job.
pub struct JobStateMachine;

impl JobStateMachine {
    /// Determine the target state for an event, or reject the transition.
    pub fn determine_target_state(
        current: JobState,
        event: &JobEvent,
    ) -> Result<TransitionDecision, StateMachineError> {
        use TransitionDecision::{NoOp, Transition};

        // A settled job absorbs terminal events idempotently.
        if current.is_terminal() {
            return match event {
                JobEvent::Complete { .. } | JobEvent::Fail { .. } | JobEvent::Cancel => {
                    Ok(NoOp(current))
                }
                _ => Err(StateMachineError::InvalidTransition {
                    from: current,
                    event: event.name().to_string(),
                }),
            };
        }

        let target = match (current, event) {
            (JobState::Pending, JobEvent::Start) => JobState::Processing,

            (JobState::Processing, JobEvent::Complete { status }) => {
                if !status.is_terminal() {
                    return Err(StateMachineError::NonTerminalCompletion(*status));
                }
                *status
            }

            // A job may fail before its first step ever runs (for example
            // when the queue refuses the initial enqueue) or while parked.
            (
                JobState::Pending | JobState::Processing | JobState::Waiting,
                JobEvent::Fail { .. },
            ) => JobState::Failed,

            (JobState::Processing, JobEvent::Park) => JobState::Waiting,
            (JobState::Waiting, JobEvent::Resume) => JobState::Processing,

            (
                JobState::Pending | JobState::Processing | JobState::Waiting,
                JobEvent::Cancel,
            ) => JobState::Cancelled,

            (from, event) => {
                return Err(StateMachineError::InvalidTransition {
                    from,
                    event: event.name().to_string(),
                })
            }
        };

        Ok(Transition(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decide(current: JobState, event: JobEvent) -> Result<TransitionDecision, StateMachineError> {
        JobStateMachine::determine_target_state(current, &event)
    }

    #[test]
    fn test_happy_path_transitions() {
        assert_eq!(
            decide(JobState::Pending, JobEvent::Start).unwrap(),
            TransitionDecision::Transition(JobState::Processing)
        );
        assert_eq!(
            decide(
                JobState::Processing,
                JobEvent::Complete {
                    status: JobState::Completed
                }
            )
            .unwrap(),
            TransitionDecision::Transition(JobState::Completed)
        );
    }

    #[test]
    fn test_gate_park_and_resume() {
        assert_eq!(
            decide(JobState::Processing, JobEvent::Park).unwrap(),
            TransitionDecision::Transition(JobState::Waiting)
        );
        assert_eq!(
            decide(JobState::Waiting, JobEvent::Resume).unwrap(),
            TransitionDecision::Transition(JobState::Processing)
        );
    }

    #[test]
    fn test_terminal_events_are_idempotent() {
        let decision = decide(
            JobState::Completed,
            JobEvent::Complete {
                status: JobState::Failed,
            },
        )
        .unwrap();
        assert_eq!(decision, TransitionDecision::NoOp(JobState::Completed));

        let decision = decide(
            JobState::Failed,
            JobEvent::Fail {
                reason: "again".to_string(),
            },
        )
        .unwrap();
        assert_eq!(decision, TransitionDecision::NoOp(JobState::Failed));
    }

    #[test]
    fn test_terminal_jobs_cannot_restart() {
        assert!(decide(JobState::Completed, JobEvent::Start).is_err());
        assert!(decide(JobState::Failed, JobEvent::Resume).is_err());
        assert!(decide(JobState::Cancelled, JobEvent::Park).is_err());
    }

    #[test]
    fn test_completion_must_target_terminal_state() {
        let err = decide(
            JobState::Processing,
            JobEvent::Complete {
                status: JobState::Waiting,
            },
        )
        .unwrap_err();
        assert_eq!(err, StateMachineError::NonTerminalCompletion(JobState::Waiting));
    }

    #[test]
    fn test_pending_job_can_fail() {
        // Queue unavailability marks the job failed instead of leaving it
        // pending forever.
        assert_eq!(
            decide(
                JobState::Pending,
                JobEvent::Fail {
                    reason: "queue unavailable".to_string()
                }
            )
            .unwrap(),
            TransitionDecision::Transition(JobState::Failed)
        );
    }

    #[test]
    fn test_resume_only_from_waiting() {
        assert!(decide(JobState::Pending, JobEvent::Resume).is_err());
        assert!(decide(JobState::Processing, JobEvent::Resume).is_err());
    }
}
