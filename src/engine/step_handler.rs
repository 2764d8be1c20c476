//! # Step Contract
//!
//! A step is one typed unit of pipeline logic, a black box to the engine.
//! The router invokes it with `(job_id, step_id, context)` and interprets
//! the returned result packets; everything else (content-store access,
//! context writes, effect recording) happens inside the handler with the
//! collaborators it was constructed with.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One result item a step produced, with its success metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPacket {
    pub payload: Value,
    pub success: bool,
}

impl ResultPacket {
    pub fn ok(payload: Value) -> Self {
        Self {
            payload,
            success: true,
        }
    }

    pub fn failed(payload: Value) -> Self {
        Self {
            payload,
            success: false,
        }
    }
}

/// Unexpected step faults. Expected failure modes must come back as
/// `success: false` packets instead; anything surfacing here fails the job
/// with the message as its recorded reason.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("{0}")]
    Failed(String),

    #[error("Step configuration invalid: {0}")]
    Configuration(String),
}

/// Contract every step implementation satisfies.
///
/// Implementations must be idempotent under at-least-once invocation:
/// re-running the same `(job_id, step_id)` against the same stored context
/// must not duplicate externally visible side effects, or must be safe to
/// duplicate.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn execute(
        &self,
        job_id: i64,
        step_id: &str,
        context: &Value,
    ) -> Result<Vec<ResultPacket>, StepError>;
}
