//! # Recorded Effects
//!
//! A step that mutates durable state may append an [`Effect`] after each
//! mutation with enough information to reverse it later. Effect types are an
//! open enumeration: the undo dispatcher reverses the types it has handlers
//! for and reports the rest as skipped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One reversible side effect of a step's execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    pub effect_id: Uuid,
    /// Open enumeration, e.g. `content_edit`, `attachment_created`,
    /// `field_overwrite`. Matched against the undo handler registry.
    pub effect_type: String,
    /// What the effect touched: a revision id, an attachment id, a field path.
    pub target: String,
    /// Value to restore for overwrite-style effects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<Value>,
    /// Type-specific payload.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl Effect {
    pub fn new(effect_type: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            effect_id: Uuid::new_v4(),
            effect_type: effect_type.into(),
            target: target.into(),
            previous_value: None,
            data: Map::new(),
        }
    }

    pub fn with_previous_value(mut self, value: Value) -> Self {
        self.previous_value = Some(value);
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

/// Outcome of replaying a job's effect list in reverse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UndoReport {
    /// Effect ids reverted, in undo (reverse-execution) order.
    pub reverted: Vec<Uuid>,
    /// Effects whose handler returned an error, with the reason.
    pub failed: Vec<(Uuid, String)>,
    /// Effects with no registered handler.
    pub skipped: Vec<Uuid>,
    pub undone_at: Option<DateTime<Utc>>,
}

impl UndoReport {
    /// True when every known effect reverted cleanly.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}
