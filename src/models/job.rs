//! # Job Model
//!
//! The unit of orchestrated work tracked by the ledger.
//!
//! ## Overview
//!
//! A `Job` is one pipeline run, one system maintenance run, or one batch
//! member. The engine and the steps share exactly one mutable field, the
//! `engine_context` document; everything else is owned by the ledger.
//!
//! ## Identity Deduplication
//!
//! Jobs carry a SHA-256 `identity_hash` over `(owner_ref, source, seed
//! context)`. Creating a job whose identity already exists returns the
//! existing row instead of a duplicate; only an explicit retry mints a new
//! row (linked back through the `retried_from` context key).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::state_machine::JobState;

/// Classification tag determining which ledger queries include a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSource {
    /// Created by a pipeline trigger (schedule, webhook, manual run).
    Pipeline,
    /// Created by internal maintenance work.
    System,
    /// Child of a batch parent.
    BatchChild,
    /// Parent of a chunked batch.
    BatchParent,
}

impl fmt::Display for JobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipeline => write!(f, "pipeline"),
            Self::System => write!(f, "system"),
            Self::BatchChild => write!(f, "batch_child"),
            Self::BatchParent => write!(f, "batch_parent"),
        }
    }
}

impl std::str::FromStr for JobSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pipeline" => Ok(Self::Pipeline),
            "system" => Ok(Self::System),
            "batch_child" => Ok(Self::BatchChild),
            "batch_parent" => Ok(Self::BatchParent),
            _ => Err(format!("Invalid job source: {s}")),
        }
    }
}

/// A persisted unit of orchestrated work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: i64,
    pub status: JobState,
    pub source: JobSource,
    /// Opaque reference to the pipeline/flow that created this job. The
    /// engine never interprets it beyond passing it to the pipeline lookup.
    pub owner_ref: String,
    pub engine_context: serde_json::Value,
    /// Human-readable reason recorded with a terminal status.
    pub reason: Option<String>,
    pub identity_hash: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Whether this job has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Job creation parameters (without generated fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub source: JobSource,
    pub owner_ref: String,
    pub engine_context: serde_json::Value,
    /// Pre-computed identity; derived from the other fields when absent.
    pub identity_hash: Option<String>,
}

impl NewJob {
    pub fn new(owner_ref: impl Into<String>, source: JobSource) -> Self {
        Self {
            source,
            owner_ref: owner_ref.into(),
            engine_context: serde_json::json!({}),
            identity_hash: None,
        }
    }

    /// Seed the engine context carried into the first step.
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.engine_context = context;
        self
    }

    /// Force a specific identity hash (retry paths use this to mint a
    /// distinguishable row for otherwise-identical work).
    pub fn with_identity_hash(mut self, hash: impl Into<String>) -> Self {
        self.identity_hash = Some(hash.into());
        self
    }

    /// Identity hash for deduplication: SHA-256 over owner, source, and the
    /// seed context document.
    pub fn resolve_identity_hash(&self) -> String {
        match &self.identity_hash {
            Some(hash) => hash.clone(),
            None => generate_identity_hash(&self.owner_ref, self.source, &self.engine_context),
        }
    }
}

/// SHA-256 identity over the logical unit of work.
pub fn generate_identity_hash(
    owner_ref: &str,
    source: JobSource,
    context: &serde_json::Value,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(owner_ref.as_bytes());
    hasher.update(source.to_string().as_bytes());
    hasher.update(context.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_string_conversion() {
        assert_eq!(JobSource::BatchChild.to_string(), "batch_child");
        assert_eq!("pipeline".parse::<JobSource>().unwrap(), JobSource::Pipeline);
        assert!("bogus".parse::<JobSource>().is_err());
    }

    #[test]
    fn test_identity_hash_is_stable() {
        let a = NewJob::new("news_ingest", JobSource::Pipeline)
            .with_context(serde_json::json!({"feed": "politics"}));
        let b = NewJob::new("news_ingest", JobSource::Pipeline)
            .with_context(serde_json::json!({"feed": "politics"}));
        assert_eq!(a.resolve_identity_hash(), b.resolve_identity_hash());
    }

    #[test]
    fn test_identity_hash_varies_with_inputs() {
        let base = NewJob::new("news_ingest", JobSource::Pipeline);
        let other_owner = NewJob::new("image_resize", JobSource::Pipeline);
        let other_source = NewJob::new("news_ingest", JobSource::System);
        assert_ne!(
            base.resolve_identity_hash(),
            other_owner.resolve_identity_hash()
        );
        assert_ne!(
            base.resolve_identity_hash(),
            other_source.resolve_identity_hash()
        );
    }

    #[test]
    fn test_explicit_identity_hash_wins() {
        let new_job =
            NewJob::new("news_ingest", JobSource::Pipeline).with_identity_hash("retry-1-abc");
        assert_eq!(new_job.resolve_identity_hash(), "retry-1-abc");
    }
}
