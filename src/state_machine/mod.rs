//! # Job State Machine
//!
//! State definitions, lifecycle events, and the pure transition table for
//! jobs. Persistence of transitions happens in the ledger; this module only
//! decides which transitions are legal.

pub mod events;
pub mod job_state_machine;
pub mod states;

pub use events::JobEvent;
pub use job_state_machine::{JobStateMachine, StateMachineError, TransitionDecision};
pub use states::JobState;
