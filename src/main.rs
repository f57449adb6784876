//! Thin invocation shell.
//!
//! Unpacks an invocation's worth of environment variables into the payload
//! the engine expects (§6), loads config, calls the orchestrator, and prints
//! the JSON response envelope to stdout. A real deployment would sit behind
//! a serverless runtime that unpacks a scheduled-event payload into these
//! same variables; that outer surface is explicitly out of scope (§1), so
//! this binary reproduces only as much of it as is needed to drive the
//! engine end to end.

use std::env;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use lights_out_engine::config::ConfigLoader;
use lights_out_engine::model::{Action, DiscoveredResource, HandlerResult, OrchestrationResult};
use lights_out_engine::orchestrator::{self, Invocation};

#[derive(Debug, Serialize)]
struct InvocationResponse {
    action: String,
    total: usize,
    succeeded: usize,
    failed: usize,
    results: Vec<HandlerResult>,
    timestamp: String,
    request_id: String,
}

#[derive(Debug, Serialize)]
struct DiscoverResponse {
    action: &'static str,
    discovered_count: usize,
    resources: Vec<DiscoverResourceSummary>,
    timestamp: String,
    request_id: String,
}

#[derive(Debug, Serialize)]
struct DiscoverResourceSummary {
    resource_type: String,
    resource_id: String,
    arn: String,
    priority: u32,
    group: String,
}

impl From<&DiscoveredResource> for DiscoverResourceSummary {
    fn from(r: &DiscoveredResource) -> Self {
        DiscoverResourceSummary {
            resource_type: r.resource_type.to_string(),
            resource_id: r.resource_id.clone(),
            arn: r.arn.clone(),
            priority: r.priority,
            group: r.group.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_name = env::var("CONFIG_NAME").context("CONFIG_NAME env var is required")?;
    let raw_action = env::var("ACTION").context("ACTION env var is required")?;
    let target_group = env::var("TARGET_GROUP").ok().filter(|s| !s.is_empty());
    let trigger_source = env::var("TRIGGER_SOURCE").ok().filter(|s| !s.is_empty());
    let excluded_dates: Vec<String> = env::var("EXCLUDED_DATES")
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let request_id = Uuid::new_v4().to_string();

    info!(
        config = %config_name,
        action = %raw_action,
        target_group = ?target_group,
        request_id = %request_id,
        "Lights-out engine invocation starting"
    );

    if is_date_excluded(&excluded_dates) {
        info!(date = %Utc::now().format("%m-%d"), "Today is an excluded date, skipping execution");
        print_response(&InvocationResponse {
            action: raw_action,
            total: 0,
            succeeded: 0,
            failed: 0,
            results: Vec::new(),
            timestamp: Utc::now().to_rfc3339(),
            request_id,
        })?;
        return Ok(());
    }

    let Some(action) = Action::parse(&raw_action) else {
        let result = orchestrator::invalid_action_result(&raw_action);
        print_invocation(&raw_action, result, request_id)?;
        return Ok(());
    };

    let host_sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest()).load().await;
    let host_region = host_sdk_config
        .region()
        .map(|r| r.to_string())
        .unwrap_or_else(|| "us-east-1".to_string());

    let ssm_client = aws_sdk_ssm::Client::new(&host_sdk_config);
    let loader = ConfigLoader::new(ssm_client);

    let config = match loader.load(&config_name).await {
        Ok(c) => c,
        Err(e) => {
            error!(config = %config_name, error = %e, "Failed to load configuration; aborting invocation");
            return Err(e.into());
        }
    };

    let host_tagging_client = aws_sdk_resourcegroupstagging::Client::new(&host_sdk_config);

    // Build every region-scoped tagging client up front: `config.regions` is
    // known before discovery ever runs, so there's no need for the
    // `client_for_region` closure discovery calls to be async itself.
    let mut region_clients = std::collections::HashMap::new();
    for region in &config.regions {
        let sdk_config = lights_out_engine::aws_client::region_config(region).await;
        region_clients.insert(region.clone(), aws_sdk_resourcegroupstagging::Client::new(&sdk_config));
    }
    let fallback_tagging_client = host_tagging_client.clone();
    let tagging_client_for_region = move |region: &str| {
        region_clients
            .get(region)
            .cloned()
            .unwrap_or_else(|| fallback_tagging_client.clone())
    };

    if action == Action::Discover {
        let resources = orchestrator::discover_only(
            &config,
            tagging_client_for_region,
            &host_tagging_client,
            &host_region,
            target_group.as_deref(),
        )
        .await?;

        print_response(&DiscoverResponse {
            action: "discover",
            discovered_count: resources.len(),
            resources: resources.iter().map(DiscoverResourceSummary::from).collect(),
            timestamp: Utc::now().to_rfc3339(),
            request_id,
        })?;
        return Ok(());
    }

    let invocation = Invocation {
        action,
        target_group,
        trigger_source,
    };

    let result = orchestrator::orchestrate(
        &config,
        tagging_client_for_region,
        &host_tagging_client,
        &host_region,
        &invocation,
    )
    .await?;

    info!(
        total = result.total,
        succeeded = result.succeeded,
        failed = result.failed,
        "Invocation completed"
    );

    print_invocation(&raw_action, result, request_id)?;
    Ok(())
}

fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let log_format = env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = tracing_subscriber::EnvFilter::new(log_level);

    if log_format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn print_invocation(raw_action: &str, result: OrchestrationResult, request_id: String) -> Result<()> {
    print_response(&InvocationResponse {
        action: raw_action.to_string(),
        total: result.total,
        succeeded: result.succeeded,
        failed: result.failed,
        results: result.results,
        timestamp: Utc::now().to_rfc3339(),
        request_id,
    })
}

fn print_response<T: Serialize>(response: &T) -> Result<()> {
    println!("{}", serde_json::to_string(response)?);
    Ok(())
}

/// Check whether today's date (`MM-DD`) is in the exclusion list. Retained
/// from the teacher's own shell: a real, low-risk slice of ambient
/// behaviour with no corresponding spec Non-goal ruling it out.
fn is_date_excluded(excluded_dates: &[String]) -> bool {
    let today = Utc::now().format("%m-%d").to_string();
    excluded_dates.iter().any(|d| d == &today)
}
