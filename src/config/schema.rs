//! Raw and validated shapes of the configuration document (§3, §4.1).
//!
//! The raw document is parsed permissively with `serde_yaml` so that
//! unrecognised top-level fields, and unrecognised `resource_defaults`
//! blocks, pass through untouched (Design Notes §9: "Config as passthrough
//! document"). Only the three required top-level fields and the shape of
//! `discovery` are validated eagerly; per-resource-type defaults are parsed
//! lazily by each handler the first time it needs them, so a config with an
//! unrecognised resource type in `resource_defaults` is never itself a
//! loading error.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// The raw document as deserialised straight off the wire, before
/// validation. Every field is optional here; `Config::from_raw` is where
/// required-ness is enforced.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RawConfig {
    pub version: Option<String>,
    pub environment: Option<String>,
    #[serde(default)]
    pub regions: Vec<String>,
    pub discovery: Option<RawDiscovery>,
    #[serde(default)]
    pub settings: serde_yaml::Mapping,
    #[serde(default)]
    pub resource_defaults: serde_yaml::Mapping,
    /// Anything else in the document that the schema above doesn't name,
    /// preserved so newer config schemas remain readable by older code.
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RawDiscovery {
    pub method: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub resource_types: Vec<String>,
}

/// Execution strategy selectable via `settings.execution_strategy` (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStrategy {
    Sequential,
    Parallel,
    GroupedParallel,
}

impl Default for ExecutionStrategy {
    fn default() -> Self {
        ExecutionStrategy::GroupedParallel
    }
}

impl ExecutionStrategy {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "sequential" => Some(ExecutionStrategy::Sequential),
            "parallel" => Some(ExecutionStrategy::Parallel),
            "grouped-parallel" => Some(ExecutionStrategy::GroupedParallel),
            _ => None,
        }
    }
}

/// Validated discovery scope: tag filters, resource-type filters, regions.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub method: String,
    pub tags: BTreeMap<String, String>,
    pub resource_types: Vec<String>,
}

/// The validated configuration document (§3).
///
/// `raw` retains the untouched document so that `resource_defaults` entries
/// for resource types this build doesn't know about, or settings keys this
/// build doesn't read, survive round-tripping and are available to handlers
/// that parse their own defaults block lazily.
#[derive(Debug, Clone)]
pub struct Config {
    pub version: String,
    pub environment: String,
    pub regions: Vec<String>,
    pub discovery: DiscoveryConfig,
    pub execution_strategy: ExecutionStrategy,
    pub raw: RawConfig,
}

impl Config {
    /// Validate a freshly parsed raw document into a `Config`, naming the
    /// offending field on failure (§4.1).
    pub fn from_raw(name: &str, raw: RawConfig) -> Result<Self, ConfigError> {
        let version = raw.version.clone().ok_or_else(|| ConfigError::ConfigValidationError {
            name: name.to_string(),
            field: "version".to_string(),
            reason: "missing required field".to_string(),
        })?;

        let environment = raw
            .environment
            .clone()
            .ok_or_else(|| ConfigError::ConfigValidationError {
                name: name.to_string(),
                field: "environment".to_string(),
                reason: "missing required field".to_string(),
            })?;

        let raw_discovery = raw.discovery.clone().ok_or_else(|| ConfigError::ConfigValidationError {
            name: name.to_string(),
            field: "discovery".to_string(),
            reason: "missing required field".to_string(),
        })?;

        let method = raw_discovery
            .method
            .clone()
            .ok_or_else(|| ConfigError::ConfigValidationError {
                name: name.to_string(),
                field: "discovery.method".to_string(),
                reason: "missing required field".to_string(),
            })?;

        if raw_discovery.resource_types.is_empty() {
            return Err(ConfigError::ConfigValidationError {
                name: name.to_string(),
                field: "discovery.resource_types".to_string(),
                reason: "must contain at least one resource-type filter".to_string(),
            });
        }

        let execution_strategy = match raw.settings.get("execution_strategy") {
            Some(serde_yaml::Value::String(s)) => {
                ExecutionStrategy::parse(s).ok_or_else(|| ConfigError::ConfigValidationError {
                    name: name.to_string(),
                    field: "settings.execution_strategy".to_string(),
                    reason: format!("unrecognised strategy '{s}'"),
                })?
            }
            Some(_) => {
                return Err(ConfigError::ConfigValidationError {
                    name: name.to_string(),
                    field: "settings.execution_strategy".to_string(),
                    reason: "must be a string".to_string(),
                })
            }
            None => ExecutionStrategy::default(),
        };

        Ok(Config {
            version,
            environment,
            regions: raw.regions.clone(),
            discovery: DiscoveryConfig {
                method,
                tags: raw_discovery.tags,
                resource_types: raw_discovery.resource_types,
            },
            execution_strategy,
            raw,
        })
    }

    /// Look up a resource type's raw `resource_defaults` block, if the
    /// config carries one. Returns `None` when the type has no configured
    /// defaults; handlers fall back to the type's hard-coded defaults.
    pub fn resource_defaults_for(&self, resource_type_tag: &str) -> Option<serde_yaml::Value> {
        self.raw
            .resource_defaults
            .get(serde_yaml::Value::String(resource_type_tag.to_string()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> RawConfig {
        serde_yaml::from_str(yaml).expect("valid yaml")
    }

    #[test]
    fn missing_version_is_a_validation_error() {
        let raw = parse(
            r#"
environment: prod
discovery:
  method: tag
  tags:
    lights-out:managed: "true"
  resource_types: ["ecs:service"]
"#,
        );
        let err = Config::from_raw("test", raw).unwrap_err();
        match err {
            ConfigError::ConfigValidationError { field, .. } => assert_eq!(field, "version"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_top_level_fields_survive_in_raw() {
        let raw = parse(
            r#"
version: "1"
environment: prod
future_field: something-new
discovery:
  method: tag
  tags:
    lights-out:managed: "true"
  resource_types: ["ecs:service"]
"#,
        );
        let config = Config::from_raw("test", raw).unwrap();
        assert!(config.raw.extra.contains_key(serde_yaml::Value::String("future_field".to_string())));
    }

    #[test]
    fn default_execution_strategy_is_grouped_parallel() {
        let raw = parse(
            r#"
version: "1"
environment: prod
discovery:
  method: tag
  tags:
    lights-out:managed: "true"
  resource_types: ["ecs:service"]
"#,
        );
        let config = Config::from_raw("test", raw).unwrap();
        assert_eq!(config.execution_strategy, ExecutionStrategy::GroupedParallel);
    }
}
