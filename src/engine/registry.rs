//! # Step Registry
//!
//! Explicit mapping from a step type string to its handler implementation.
//! Built once at process start and passed by reference into the router —
//! never ambient global state. Resolution failures are configuration
//! errors: the affected job fails immediately, with no retry.

use dashmap::DashMap;
use std::sync::Arc;

use super::step_handler::StepHandler;

/// Errors raised during handler resolution.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("No handler registered for step type '{0}'")]
    UnknownStepType(String),
}

/// Step-type → handler registry.
#[derive(Default)]
pub struct StepRegistry {
    handlers: DashMap<String, Arc<dyn StepHandler>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a step type, replacing any previous one.
    pub fn register(&self, step_type: impl Into<String>, handler: Arc<dyn StepHandler>) {
        let step_type = step_type.into();
        tracing::debug!(step_type = %step_type, "Registered step handler");
        self.handlers.insert(step_type, handler);
    }

    /// Resolve the handler for a step type.
    pub fn resolve(&self, step_type: &str) -> Result<Arc<dyn StepHandler>, RegistryError> {
        self.handlers
            .get(step_type)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RegistryError::UnknownStepType(step_type.to_string()))
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.handlers.iter().map(|e| e.key().clone()).collect()
    }
}
