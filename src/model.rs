//! The uniform resource and result types that flow between discovery,
//! handlers, and the orchestrator (§3 of the design).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of resource kinds the handler factory recognises (§3, §4.3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
    EcsService,
    RdsDb,
    RdsCluster,
    AutoscalingGroup,
}

impl ResourceType {
    /// The tag value this type is written as in config and in logs.
    pub fn as_tag(&self) -> &'static str {
        match self {
            ResourceType::EcsService => "ecs-service",
            ResourceType::RdsDb => "rds-db",
            ResourceType::RdsCluster => "rds-cluster",
            ResourceType::AutoscalingGroup => "autoscaling-group",
        }
    }

    /// Parse a resource-type tag, returning `None` for anything outside the
    /// closed set (an unrecognised type is a per-resource concern, handled
    /// by the handler factory returning `None`, not a parse error here).
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "ecs-service" => Some(ResourceType::EcsService),
            "rds-db" => Some(ResourceType::RdsDb),
            "rds-cluster" => Some(ResourceType::RdsCluster),
            "autoscaling-group" => Some(ResourceType::AutoscalingGroup),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_tag())
    }
}

/// The action an invocation requests (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Start,
    Stop,
    Status,
    Discover,
}

impl Action {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "start" => Some(Action::Start),
            "stop" => Some(Action::Stop),
            "status" => Some(Action::Status),
            "discover" => Some(Action::Discover),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Status => "status",
            Action::Discover => "discover",
        };
        write!(f, "{}", s)
    }
}

/// The default priority a resource gets when `lights-out:priority` is
/// absent or not parseable as an integer (§4.2).
pub const DEFAULT_PRIORITY: u32 = 50;

/// The default group a resource gets when `lights-out:group` is absent (§4.2).
pub const DEFAULT_GROUP: &str = "default";

/// The uniform record the orchestrator consumes, produced by discovery (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredResource {
    pub resource_type: ResourceType,
    /// Canonical cloud identifier; the source of truth for region and
    /// sub-identifier.
    pub arn: String,
    /// Human-readable key derived from the ARN.
    pub resource_id: String,
    /// Lower runs earlier on start, later on stop. Default 50.
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Correlates a resource to a region-group schedule. Default "default".
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn default_priority() -> u32 {
    DEFAULT_PRIORITY
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

impl DiscoveredResource {
    /// Region, derived from segment 3 of the ARN (`arn:partition:service:region:...`).
    pub fn region(&self) -> Option<&str> {
        self.arn.split(':').nth(3).filter(|s| !s.is_empty())
    }
}

/// The uniform outcome of one operation on one resource (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerResult {
    pub success: bool,
    pub action: Action,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<serde_json::Value>,
    #[serde(default)]
    pub idempotent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl HandlerResult {
    /// Build a failure result for a per-resource condition the orchestrator
    /// detects before ever calling a handler (unknown type, invalid action).
    pub fn synthetic_failure(
        action: Action,
        resource: &DiscoveredResource,
        error: &str,
        message: impl Into<String>,
    ) -> Self {
        HandlerResult {
            success: false,
            action,
            resource_type: resource.resource_type,
            resource_id: resource.resource_id.clone(),
            message: message.into(),
            previous_state: None,
            idempotent: false,
            error: Some(error.to_string()),
            trigger_source: None,
            region: resource.region().map(|s| s.to_string()),
        }
    }
}

/// The aggregated outcome of one invocation (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<HandlerResult>,
}

impl OrchestrationResult {
    pub fn from_results(results: Vec<HandlerResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        let total = results.len();
        OrchestrationResult {
            total,
            succeeded,
            failed: total - succeeded,
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_type_round_trips_through_tag() {
        for t in [
            ResourceType::EcsService,
            ResourceType::RdsDb,
            ResourceType::RdsCluster,
            ResourceType::AutoscalingGroup,
        ] {
            assert_eq!(ResourceType::parse(t.as_tag()), Some(t));
        }
    }

    #[test]
    fn unknown_resource_type_tag_parses_to_none() {
        assert_eq!(ResourceType::parse("nat-gateway"), None);
    }

    #[test]
    fn region_is_segment_three_of_arn() {
        let r = DiscoveredResource {
            resource_type: ResourceType::RdsDb,
            arn: "arn:aws:rds:us-east-1:123456789012:db:my-db".to_string(),
            resource_id: "my-db".to_string(),
            priority: DEFAULT_PRIORITY,
            group: DEFAULT_GROUP.to_string(),
            tags: BTreeMap::new(),
            metadata: serde_json::Map::new(),
        };
        assert_eq!(r.region(), Some("us-east-1"));
    }

    #[test]
    fn orchestration_result_aggregates_totals() {
        let make = |success: bool| HandlerResult {
            success,
            action: Action::Stop,
            resource_type: ResourceType::RdsDb,
            resource_id: "x".to_string(),
            message: String::new(),
            previous_state: None,
            idempotent: false,
            error: None,
            trigger_source: None,
            region: None,
        };
        let agg = OrchestrationResult::from_results(vec![make(true), make(false), make(true)]);
        assert_eq!(agg.total, 3);
        assert_eq!(agg.succeeded, 2);
        assert_eq!(agg.failed, 1);
    }
}
