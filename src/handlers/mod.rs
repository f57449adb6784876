//! Handler contracts: a uniform capability set (§4.3) implemented once per
//! resource kind, dispatched through a compile-time-closed variant enum
//! (Design Notes §9: a tagged variant "avoids heap indirection and fits a
//! compile-time-closed resource-type set").

pub mod autoscaling;
pub mod ecs;
pub mod rds_cluster;
pub mod rds_db;

use async_trait::async_trait;

pub use autoscaling::AsgHandler;
pub use ecs::EcsHandler;
pub use rds_cluster::RdsClusterHandler;
pub use rds_db::RdsDbHandler;

use crate::config::Config;
use crate::model::{Action, DiscoveredResource, HandlerResult, ResourceType};

/// What a wait loop is polling for (§4.3, §9: "Stabilisation wait").
#[derive(Debug, Clone, Copy)]
pub enum ReadinessTarget {
    /// ECS: observed running count should equal this desired count.
    RunningCount(i32),
    /// ASG: observed in-service instance count should equal this desired capacity.
    InServiceCount(i32),
}

/// The capability set every handler implements (§4.3).
///
/// `start`/`stop` never return `Err`: every failure mode a handler can hit
/// (state gate refusal, cloud-API exception, config error) is captured into
/// the returned [`HandlerResult`] instead (§7: "always captured... never
/// propagated").
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Read current state and return it as an open JSON map, used both to
    /// answer the `status` action and internally by idempotence checks.
    async fn get_status(&self) -> anyhow::Result<serde_json::Value>;
    async fn start(&self) -> HandlerResult;
    async fn stop(&self) -> HandlerResult;
    /// True once a previously issued transition has settled, per the
    /// handler-specific readiness rule (§4.3.4 for the canonical example).
    async fn is_ready(&self, target: ReadinessTarget) -> anyhow::Result<bool>;
}

/// One concrete handler per supported resource kind.
pub enum Handler {
    Ecs(EcsHandler),
    RdsDb(RdsDbHandler),
    RdsCluster(RdsClusterHandler),
    Asg(AsgHandler),
}

impl Handler {
    pub async fn get_status(&self) -> anyhow::Result<serde_json::Value> {
        match self {
            Handler::Ecs(h) => h.get_status().await,
            Handler::RdsDb(h) => h.get_status().await,
            Handler::RdsCluster(h) => h.get_status().await,
            Handler::Asg(h) => h.get_status().await,
        }
    }

    pub async fn start(&self) -> HandlerResult {
        match self {
            Handler::Ecs(h) => h.start().await,
            Handler::RdsDb(h) => h.start().await,
            Handler::RdsCluster(h) => h.start().await,
            Handler::Asg(h) => h.start().await,
        }
    }

    pub async fn stop(&self) -> HandlerResult {
        match self {
            Handler::Ecs(h) => h.stop().await,
            Handler::RdsDb(h) => h.stop().await,
            Handler::RdsCluster(h) => h.stop().await,
            Handler::Asg(h) => h.stop().await,
        }
    }
}

/// Map a discovered resource to a concrete handler scoped to its region, or
/// `None` for a type the factory doesn't recognise (§4.3.5). The
/// orchestrator treats `None` as a per-resource `HANDLER_NOT_FOUND` failure,
/// never as a global error.
pub async fn build_handler(resource: &DiscoveredResource, config: &Config) -> Option<Handler> {
    let region = resource.region()?.to_string();
    match resource.resource_type {
        ResourceType::EcsService => Some(Handler::Ecs(EcsHandler::new(&region, resource, config).await)),
        ResourceType::RdsDb => Some(Handler::RdsDb(RdsDbHandler::new(&region, resource, config).await)),
        ResourceType::RdsCluster => {
            Some(Handler::RdsCluster(RdsClusterHandler::new(&region, resource, config).await))
        }
        ResourceType::AutoscalingGroup => Some(Handler::Asg(AsgHandler::new(&region, resource, config).await)),
    }
}

/// The uniform shape for any caught cloud-API exception (§4.3: "any caught
/// exception becomes `{success:false, message:"<Op> operation failed",
/// error:<exception message>}`").
pub(crate) fn exception_result(
    action: Action,
    resource_type: ResourceType,
    resource_id: &str,
    op_name: &str,
    err: impl std::fmt::Display,
) -> HandlerResult {
    HandlerResult {
        success: false,
        action,
        resource_type,
        resource_id: resource_id.to_string(),
        message: format!("{op_name} operation failed"),
        previous_state: None,
        idempotent: false,
        error: Some(err.to_string()),
        trigger_source: None,
        region: None,
    }
}

/// The uniform shape for a config error surfaced as an operation failure
/// rather than a load-time failure (resource_defaults blocks are parsed
/// lazily, per §9's passthrough-document design).
pub(crate) fn config_error_result(
    action: Action,
    resource_type: ResourceType,
    resource_id: &str,
    reason: impl std::fmt::Display,
) -> HandlerResult {
    HandlerResult {
        success: false,
        action,
        resource_type,
        resource_id: resource_id.to_string(),
        message: "invalid resource configuration".to_string(),
        previous_state: None,
        idempotent: false,
        error: Some(reason.to_string()),
        trigger_source: None,
        region: None,
    }
}

/// The uniform shape for a state-gate refusal (§4.3: "a handler refuses to
/// act when the resource is in a transient state the API would reject").
pub(crate) fn state_gate_result(
    action: Action,
    resource_type: ResourceType,
    resource_id: &str,
    observed_state: impl std::fmt::Display,
    previous_state: serde_json::Value,
) -> HandlerResult {
    HandlerResult {
        success: false,
        action,
        resource_type,
        resource_id: resource_id.to_string(),
        message: format!("refusing to act: resource is in state '{observed_state}'"),
        previous_state: Some(previous_state),
        idempotent: false,
        error: None,
        trigger_source: None,
        region: None,
    }
}
