//! # Pipeline Definition Lookup
//!
//! The engine asks an external definition which step starts a pipeline and
//! which step follows the one that just ran. [`ConfiguredPipeline`] is the
//! YAML-loadable implementation shipped with the crate: linear step chains
//! keyed by owner_ref. Branching definitions implement
//! [`PipelineDefinition`] themselves and may inspect the result packets.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

use super::step_handler::ResultPacket;
use crate::error::{EngineError, Result};

/// Resolved configuration for one step of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub step_id: String,
    /// Step type resolved against the [`super::registry::StepRegistry`].
    pub step_type: String,
    /// Step-specific configuration, handed to the handler via context.
    #[serde(default)]
    pub config: Value,
}

/// Lookup contract supplied by configuration outside the engine core.
pub trait PipelineDefinition: Send + Sync {
    /// The step a fresh job of this pipeline starts with.
    fn first_step(&self, owner_ref: &str) -> Option<StepSpec>;

    /// The step following `current_step`, given its result packets.
    /// `None` means the pipeline is finished.
    fn next_step(&self, owner_ref: &str, current_step: &str, results: &[ResultPacket])
        -> Option<String>;

    /// Resolve one step's spec. `None` is a configuration error the router
    /// turns into an immediate job failure.
    fn step(&self, owner_ref: &str, step_id: &str) -> Option<StepSpec>;
}

/// Linear pipelines loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredPipeline {
    pipelines: HashMap<String, Vec<StepSpec>>,
}

impl ConfiguredPipeline {
    pub fn new(pipelines: HashMap<String, Vec<StepSpec>>) -> Self {
        Self { pipelines }
    }

    /// Load pipeline definitions from a YAML document of the form:
    ///
    /// ```yaml
    /// news_ingest:
    ///   - step_id: fetch
    ///     step_type: http_fetch
    ///   - step_id: transform
    ///     step_type: article_transform
    ///   - step_id: publish
    ///     step_type: content_publish
    /// ```
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let pipelines: HashMap<String, Vec<StepSpec>> = serde_yaml::from_str(raw)
            .map_err(|e| EngineError::ConfigurationError(format!("Invalid pipeline YAML: {e}")))?;
        Ok(Self { pipelines })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            EngineError::ConfigurationError(format!(
                "Failed to read pipeline file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_yaml(&raw)
    }

    pub fn pipeline_names(&self) -> Vec<String> {
        self.pipelines.keys().cloned().collect()
    }
}

impl PipelineDefinition for ConfiguredPipeline {
    fn first_step(&self, owner_ref: &str) -> Option<StepSpec> {
        self.pipelines.get(owner_ref)?.first().cloned()
    }

    fn next_step(
        &self,
        owner_ref: &str,
        current_step: &str,
        _results: &[ResultPacket],
    ) -> Option<String> {
        let steps = self.pipelines.get(owner_ref)?;
        let position = steps.iter().position(|s| s.step_id == current_step)?;
        steps.get(position + 1).map(|s| s.step_id.clone())
    }

    fn step(&self, owner_ref: &str, step_id: &str) -> Option<StepSpec> {
        self.pipelines
            .get(owner_ref)?
            .iter()
            .find(|s| s.step_id == step_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ConfiguredPipeline {
        ConfiguredPipeline::from_yaml(
            "news_ingest:\n\
             \x20 - step_id: fetch\n\
             \x20   step_type: http_fetch\n\
             \x20 - step_id: transform\n\
             \x20   step_type: article_transform\n\
             \x20 - step_id: publish\n\
             \x20   step_type: content_publish\n",
        )
        .unwrap()
    }

    #[test]
    fn test_first_and_next_step() {
        let catalog = catalog();
        assert_eq!(catalog.first_step("news_ingest").unwrap().step_id, "fetch");
        assert_eq!(
            catalog.next_step("news_ingest", "fetch", &[]),
            Some("transform".to_string())
        );
        assert_eq!(
            catalog.next_step("news_ingest", "transform", &[]),
            Some("publish".to_string())
        );
        // Last step has no successor.
        assert_eq!(catalog.next_step("news_ingest", "publish", &[]), None);
    }

    #[test]
    fn test_unknown_pipeline_and_step() {
        let catalog = catalog();
        assert!(catalog.first_step("missing").is_none());
        assert!(catalog.step("news_ingest", "missing").is_none());
        assert_eq!(catalog.next_step("missing", "fetch", &[]), None);
    }

    #[test]
    fn test_invalid_yaml_is_configuration_error() {
        let err = ConfiguredPipeline::from_yaml(": bad").unwrap_err();
        assert!(matches!(err, EngineError::ConfigurationError(_)));
    }
}
