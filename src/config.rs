//! Engine configuration
//!
//! Persisted verbatim as the `configuration` member of a saved state, so a
//! restored engine runs with the same limits it was saved with.

use serde::{Deserialize, Serialize};
use url::Url;

/// Default ceiling for the outer module loop
pub const DEFAULT_MAX_INVOKE_PASSES: u32 = 256;
/// Default ceiling for each repeat-while-flagged phase loop
pub const DEFAULT_MAX_PHASE_ITERATIONS: u32 = 128;

/// Settings for one engine instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Versions a `model/@version` list may contain
    #[serde(default = "default_versions")]
    pub accepted_versions: Vec<String>,

    /// Base for relative `src` and `resource` URIs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_uri: Option<String>,

    #[serde(default = "default_invoke_passes")]
    pub max_invoke_passes: u32,

    #[serde(default = "default_phase_iterations")]
    pub max_phase_iterations: u32,

    /// Capacity of the compiled expression cache
    #[serde(default = "default_cache_capacity")]
    pub expression_cache_capacity: usize,

    /// Whether `type` model item properties take part in validity
    #[serde(default = "default_true")]
    pub validate_types: bool,
}

fn default_versions() -> Vec<String> {
    vec!["1.0".to_string()]
}

fn default_invoke_passes() -> u32 {
    DEFAULT_MAX_INVOKE_PASSES
}

fn default_phase_iterations() -> u32 {
    DEFAULT_MAX_PHASE_ITERATIONS
}

fn default_cache_capacity() -> usize {
    crate::xpath::cache::DEFAULT_CAPACITY
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            accepted_versions: default_versions(),
            base_uri: None,
            max_invoke_passes: DEFAULT_MAX_INVOKE_PASSES,
            max_phase_iterations: DEFAULT_MAX_PHASE_ITERATIONS,
            expression_cache_capacity: default_cache_capacity(),
            validate_types: true,
        }
    }
}

impl EngineConfig {
    /// Start a fluent builder from the defaults
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder {
            config: EngineConfig::default(),
        }
    }

    /// Whether every token of a `version` attribute is accepted
    ///
    /// The attribute is a whitespace separated list; an empty list is accepted.
    #[must_use]
    pub fn accepts_version(&self, declared: &str) -> bool {
        declared
            .split_whitespace()
            .all(|v| self.accepted_versions.iter().any(|a| a == v))
    }

    /// Parse `uri`, joining relative references onto `base_uri`
    pub fn resolve_uri(&self, uri: &str) -> Result<Url, String> {
        let uri = uri.trim();
        match Url::parse(uri) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self
                    .base_uri
                    .as_deref()
                    .ok_or_else(|| format!("relative URI '{uri}' without a base URI"))?;
                Url::parse(base)
                    .and_then(|b| b.join(uri))
                    .map_err(|e| format!("cannot resolve '{uri}' against '{base}': {e}"))
            }
            Err(e) => Err(format!("malformed URI '{uri}': {e}")),
        }
    }
}

/// Fluent builder for [`EngineConfig`]
#[derive(Debug, Clone)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    #[must_use]
    pub fn accepted_versions<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.accepted_versions = versions.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn base_uri(mut self, base: impl Into<String>) -> Self {
        self.config.base_uri = Some(base.into());
        self
    }

    #[must_use]
    pub fn max_invoke_passes(mut self, passes: u32) -> Self {
        self.config.max_invoke_passes = passes;
        self
    }

    #[must_use]
    pub fn max_phase_iterations(mut self, iterations: u32) -> Self {
        self.config.max_phase_iterations = iterations;
        self
    }

    #[must_use]
    pub fn expression_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.expression_cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn validate_types(mut self, enabled: bool) -> Self {
        self.config.validate_types = enabled;
        self
    }

    #[must_use]
    pub fn build(self) -> EngineConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.accepted_versions, vec!["1.0"]);
        assert_eq!(config.max_phase_iterations, 128);
        assert!(config.validate_types);
    }

    #[test]
    fn test_version_lists() {
        let config = EngineConfig::default();
        assert!(config.accepts_version("1.0"));
        assert!(config.accepts_version(""));
        assert!(!config.accepts_version("1.0 1.1"));
        let both = EngineConfig::builder().accepted_versions(["1.0", "1.1"]).build();
        assert!(both.accepts_version("1.1 1.0"));
    }

    #[test]
    fn test_resolve_uri() {
        let config = EngineConfig::builder().base_uri("http://example.com/forms/").build();
        assert_eq!(config.resolve_uri("data.xml").unwrap().as_str(), "http://example.com/forms/data.xml");
        assert_eq!(config.resolve_uri("urn:x:y").unwrap().as_str(), "urn:x:y");
        assert!(EngineConfig::default().resolve_uri("data.xml").is_err());
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"max_invoke_passes": 8}"#).unwrap();
        assert_eq!(config.max_invoke_passes, 8);
        assert_eq!(config.expression_cache_capacity, 256);
        assert_eq!(config.accepted_versions, vec!["1.0"]);
    }
}
