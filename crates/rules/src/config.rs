//! Engine configuration.

use arbor_expression::CacheConfig;
use arbor_validator::DEFAULT_MAX_RESULTS;
use serde::{Deserialize, Serialize};

use crate::error::{RuleError, RuleResult};

/// Configuration of a [`RuleEngine`](crate::RuleEngine).
///
/// Every field has a default, so a partial JSON object is enough:
///
/// ```
/// use arbor_rules::EngineConfig;
/// use serde_json::json;
///
/// let config = EngineConfig::from_json(json!({ "max_validation_results": 50 })).unwrap();
/// assert_eq!(config.max_validation_results, 50);
/// assert!(config.extract_closures);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Results a validation result tree holds before it is exhausted.
    pub max_validation_results: usize,
    /// Maximum compiled shapes kept by the artifact cache; `None` keeps
    /// every shape for the lifetime of the engine.
    pub artifact_cache_capacity: Option<u64>,
    /// Maximum exact (constants included) artifact entries; `None` for
    /// unbounded.
    pub exact_cache_capacity: Option<u64>,
    /// Move constants into closures so procedures differing only in
    /// constants share one compiled body.
    pub extract_closures: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_validation_results: DEFAULT_MAX_RESULTS,
            artifact_cache_capacity: None,
            exact_cache_capacity: None,
            extract_closures: true,
        }
    }
}

impl EngineConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(value: serde_json::Value) -> RuleResult<Self> {
        let config: Self =
            serde_json::from_value(value).map_err(|e| RuleError::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the validation result limit
    #[must_use = "builder methods must be chained or built"]
    pub fn with_max_validation_results(mut self, limit: usize) -> Self {
        self.max_validation_results = limit;
        self
    }

    /// Bound the compiled-shape cache
    #[must_use = "builder methods must be chained or built"]
    pub fn with_artifact_cache_capacity(mut self, capacity: u64) -> Self {
        self.artifact_cache_capacity = Some(capacity);
        self
    }

    /// Bound the exact artifact cache
    #[must_use = "builder methods must be chained or built"]
    pub fn with_exact_cache_capacity(mut self, capacity: u64) -> Self {
        self.exact_cache_capacity = Some(capacity);
        self
    }

    /// Enable or disable closure extraction
    #[must_use = "builder methods must be chained or built"]
    pub fn with_extract_closures(mut self, extract: bool) -> Self {
        self.extract_closures = extract;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> RuleResult<()> {
        if self.max_validation_results == 0 {
            return Err(RuleError::invalid_config(
                "max_validation_results must be greater than zero",
            ));
        }
        if self.artifact_cache_capacity == Some(0) {
            return Err(RuleError::invalid_config(
                "artifact_cache_capacity must be greater than zero when set",
            ));
        }
        if self.exact_cache_capacity == Some(0) {
            return Err(RuleError::invalid_config(
                "exact_cache_capacity must be greater than zero when set",
            ));
        }
        Ok(())
    }

    /// Artifact cache settings derived from this configuration.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            shape_capacity: self.artifact_cache_capacity,
            exact_capacity: self.exact_cache_capacity,
            extract_closures: self.extract_closures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_validation_results, 1000);
        assert_eq!(config.artifact_cache_capacity, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .with_max_validation_results(10)
            .with_artifact_cache_capacity(64)
            .with_extract_closures(false);
        let cache = config.cache_config();
        assert_eq!(cache.shape_capacity, Some(64));
        assert_eq!(cache.exact_capacity, None);
        assert!(!cache.extract_closures);
    }

    #[rstest]
    #[case(json!({ "max_validation_results": 0 }))]
    #[case(json!({ "artifact_cache_capacity": 0 }))]
    #[case(json!({ "exact_cache_capacity": 0 }))]
    #[case(json!({ "max_validation_results": "many" }))]
    fn test_invalid_json(#[case] value: serde_json::Value) {
        let err = EngineConfig::from_json(value).unwrap_err();
        assert_eq!(err.code(), "RULES:INVALID_CONFIG");
    }

    #[test]
    fn test_json_round_trip() {
        let config = EngineConfig::new().with_exact_cache_capacity(8);
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(EngineConfig::from_json(value).unwrap(), config);
    }
}
