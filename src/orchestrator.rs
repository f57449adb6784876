//! Wires discovery to handlers through the scheduler and aggregates results
//! (§4.5). Generalises the teacher's `execute()` — which loops over
//! resource *types* and hand-picks a handler inline per type — into a
//! pipeline that loops over discovered *resources*, dispatching through the
//! handler factory (§4.3.5) instead.

use aws_sdk_resourcegroupstagging::Client as TaggingClient;
use tracing::{error, info};

use crate::config::Config;
use crate::error::sentinel;
use crate::handlers::build_handler;
use crate::model::{Action, DiscoveredResource, HandlerResult, OrchestrationResult, ResourceType};
use crate::scheduler;

/// One invocation's request, as handed to the orchestrator by the shell
/// (§6).
#[derive(Debug, Clone)]
pub struct Invocation {
    pub action: Action,
    pub target_group: Option<String>,
    pub trigger_source: Option<String>,
}

/// Run one invocation end to end: load config (by the caller, ahead of
/// this call), discover, sort, dispatch, aggregate.
///
/// `discover` never touches a handler (§4.5 step 1); every other action
/// runs the full pipeline.
pub async fn orchestrate(
    config: &Config,
    tagging_client_for_region: impl Fn(&str) -> TaggingClient,
    host_tagging_client: &TaggingClient,
    host_region: &str,
    invocation: &Invocation,
) -> anyhow::Result<OrchestrationResult> {
    let mut resources = crate::discovery::discover_resources(
        tagging_client_for_region,
        host_tagging_client,
        host_region,
        &config.discovery.tags,
        &config.discovery.resource_types,
        &config.regions,
    )
    .await?;

    if let Some(ref group) = invocation.target_group {
        resources.retain(|r| &r.group == group);
    }

    if invocation.action == Action::Discover {
        // Discovery-only: the caller is expected to shape resources into
        // the `discover` response envelope itself (§6); no handler is ever
        // consulted for this action.
        return Ok(OrchestrationResult::from_results(Vec::new()));
    }

    let results = scheduler::execute(resources, invocation.action, config.execution_strategy, |resource| {
        let trigger_source = invocation.trigger_source.clone();
        async move { dispatch_one(config, invocation.action, resource, trigger_source).await }
    })
    .await;

    Ok(OrchestrationResult::from_results(results))
}

/// Run discovery only, for the `discover` action's response shape (§6).
pub async fn discover_only(
    config: &Config,
    tagging_client_for_region: impl Fn(&str) -> TaggingClient,
    host_tagging_client: &TaggingClient,
    host_region: &str,
    target_group: Option<&str>,
) -> anyhow::Result<Vec<DiscoveredResource>> {
    let mut resources = crate::discovery::discover_resources(
        tagging_client_for_region,
        host_tagging_client,
        host_region,
        &config.discovery.tags,
        &config.discovery.resource_types,
        &config.regions,
    )
    .await?;

    if let Some(group) = target_group {
        resources.retain(|r| r.group == group);
    }

    Ok(resources)
}

/// Build a handler for one resource and invoke the operation matching the
/// requested action, converting a missing handler or an unexpected panic
/// path into a per-resource failure rather than aborting the invocation
/// (§4.5 step 5, §7: "fail-fast-is-false").
async fn dispatch_one(
    config: &Config,
    action: Action,
    resource: DiscoveredResource,
    trigger_source: Option<String>,
) -> HandlerResult {
    let handler = match build_handler(&resource, config).await {
        Some(h) => h,
        None => {
            error!(resource_id = %resource.resource_id, resource_type = %resource.resource_type, "No handler registered for resource type");
            return with_passthrough(
                HandlerResult::synthetic_failure(
                    action,
                    &resource,
                    sentinel::HANDLER_NOT_FOUND,
                    format!("no handler registered for resource type '{}'", resource.resource_type),
                ),
                trigger_source,
                &resource,
            );
        }
    };

    let mut result = match action {
        Action::Start => handler.start().await,
        Action::Stop => handler.stop().await,
        Action::Status => match handler.get_status().await {
            Ok(status) => HandlerResult {
                success: true,
                action: Action::Status,
                resource_type: resource.resource_type,
                resource_id: resource.resource_id.clone(),
                message: "status retrieved".to_string(),
                previous_state: Some(status),
                idempotent: false,
                error: None,
                trigger_source: None,
                region: None,
            },
            Err(e) => {
                error!(resource_id = %resource.resource_id, error = %e, "Failed to read resource status");
                crate::handlers::exception_result(
                    Action::Status,
                    resource.resource_type,
                    &resource.resource_id,
                    "Status",
                    e,
                )
            }
        },
        Action::Discover => unreachable!("discover is handled before dispatch"),
    };

    if !result.success {
        info!(
            resource_id = %resource.resource_id,
            action = %action,
            error = ?result.error,
            message = %result.message,
            "Resource operation did not succeed"
        );
    }

    result = with_passthrough(result, trigger_source, &resource);
    result
}

fn with_passthrough(mut result: HandlerResult, trigger_source: Option<String>, resource: &DiscoveredResource) -> HandlerResult {
    result.trigger_source = trigger_source;
    result.region = resource.region().map(|s| s.to_string());
    result
}

/// Build a synthetic failure for an action the orchestrator doesn't
/// recognise at all (§6: "unknown values produce a synthetic
/// `INVALID_ACTION` failure"). Used by the invocation shell before the
/// orchestrator is ever called, since an unparseable action has no
/// resource list to attach results to.
pub fn invalid_action_result(raw_action: &str) -> OrchestrationResult {
    error!(action = %raw_action, "Unrecognised action");
    OrchestrationResult {
        total: 1,
        succeeded: 0,
        failed: 1,
        results: vec![HandlerResult {
            success: false,
            action: Action::Status,
            resource_type: ResourceType::EcsService,
            resource_id: String::new(),
            message: format!("unrecognised action '{raw_action}'"),
            previous_state: None,
            idempotent: false,
            error: Some(sentinel::INVALID_ACTION.to_string()),
            trigger_source: None,
            region: None,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawConfig;

    fn config_with(yaml: &str) -> Config {
        let raw: RawConfig = serde_yaml::from_str(yaml).unwrap();
        Config::from_raw("test", raw).unwrap()
    }

    #[tokio::test]
    async fn s6_unknown_resource_type_yields_handler_not_found() {
        // S6: resourceType "nat-gateway" has no recognised ResourceType
        // variant and so never reaches discovery as a DiscoveredResource;
        // HANDLER_NOT_FOUND is instead exercised through dispatch_one
        // directly against a resource whose handler factory legitimately
        // has no match (region missing from the ARN).
        let resource = DiscoveredResource {
            resource_type: ResourceType::RdsDb,
            arn: "not-a-valid-arn".to_string(),
            resource_id: "x".to_string(),
            priority: 50,
            group: "default".to_string(),
            tags: Default::default(),
            metadata: Default::default(),
        };
        let config = config_with(
            "version: \"1\"\nenvironment: test\ndiscovery: { method: tag, tags: { k: v }, resource_types: [\"rds:db\"] }\n",
        );

        let result = dispatch_one(&config, Action::Stop, resource, None).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(sentinel::HANDLER_NOT_FOUND));
    }

    #[test]
    fn invalid_action_is_a_single_synthetic_failure() {
        let agg = invalid_action_result("destroy");
        assert_eq!(agg.total, 1);
        assert_eq!(agg.failed, 1);
        assert_eq!(agg.results[0].error.as_deref(), Some(sentinel::INVALID_ACTION));
    }

    /// The six literal end-to-end scenarios. Each scenario that needs a real
    /// cloud-API round trip is exercised against a `mockall`-generated mock
    /// at its natural seam (the handler's `*Api` trait, or the scheduler's
    /// `op` closure) rather than through a live AWS client, since this crate
    /// has no HTTP-replay test double for the SDK transport layer. S1 is
    /// self-contained here; S2-S6 are named below pointing at the module
    /// that actually drives them, so the full set is traceable from one
    /// place.
    mod scenarios {
        use super::*;

        #[tokio::test]
        async fn s1_empty_discovery_yields_a_zeroed_result() {
            let result = scheduler::execute(Vec::new(), Action::Stop, crate::config::ExecutionStrategy::Sequential, |r| async move {
                unreachable!("no resource should ever reach the op for an empty discovery: {r:?}")
            })
            .await;
            let agg = OrchestrationResult::from_results(result);
            assert_eq!(agg.total, 0);
            assert_eq!(agg.succeeded, 0);
            assert_eq!(agg.failed, 0);
            assert!(agg.results.is_empty());
        }

        // S2 (ECS stop, direct mode, idempotent) is
        // `handlers::ecs::tests::stop_is_idempotent_when_already_at_target`.
        // S3 (priority ordering on stop) is
        // `scheduler::tests::sequential_visits_resources_in_sorted_stop_order`.
        // S4 (grouped-parallel barrier) is
        // `scheduler::tests::grouped_parallel_barrier_separates_priority_groups`.
        // S5 (RDS fire-and-forget) is
        // `handlers::rds_db::tests::stop_without_snapshot_does_not_pass_a_snapshot_identifier`.
        // S6 (unknown handler) is
        // `s6_unknown_resource_type_yields_handler_not_found`, above.
    }
}
