//! Aurora cluster handler — same fire-and-forget pattern as the RDS
//! instance handler (§4.3.3), grounded on the teacher's `rds.rs`
//! `stop_cluster`/`start_cluster`. Differs from the instance handler in two
//! ways required by the spec: the cluster stop API never accepts a
//! snapshot parameter, and stopping a cluster implicitly stops every member
//! instance, which the success message must say explicitly.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::config::Config;
use crate::error::ConfigError;
use crate::model::{Action, DiscoveredResource, HandlerResult, ResourceType};

use super::{config_error_result, exception_result, state_gate_result, ReadinessTarget, ResourceHandler};

fn default_wait_after_command() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RdsClusterDefaults {
    #[serde(default = "default_wait_after_command")]
    pub wait_after_command: u64,
}

impl Default for RdsClusterDefaults {
    fn default() -> Self {
        Self {
            wait_after_command: default_wait_after_command(),
        }
    }
}

impl RdsClusterDefaults {
    fn parse(raw: Option<serde_yaml::Value>, resource_id: &str) -> Result<Self, ConfigError> {
        match raw {
            None => Ok(Self::default()),
            Some(v) => serde_yaml::from_value(v).map_err(|e| ConfigError::ConfigValidationError {
                name: resource_id.to_string(),
                field: "resource_defaults.rds-cluster".to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClusterState {
    pub status: String,
    pub member_count: usize,
}

/// The cloud-API surface the Aurora cluster handler needs. `stop_cluster`
/// intentionally takes no snapshot parameter — the Aurora cluster stop API
/// does not accept one (§4.3.3).
#[async_trait]
pub trait RdsClusterApi: Send + Sync {
    async fn describe_status(&self, cluster_id: &str) -> anyhow::Result<ClusterState>;
    async fn stop_cluster(&self, cluster_id: &str) -> anyhow::Result<()>;
    async fn start_cluster(&self, cluster_id: &str) -> anyhow::Result<()>;
}

pub struct AwsRdsClusterApi {
    rds: aws_sdk_rds::Client,
}

#[async_trait]
impl RdsClusterApi for AwsRdsClusterApi {
    async fn describe_status(&self, cluster_id: &str) -> anyhow::Result<ClusterState> {
        let resp = self
            .rds
            .describe_db_clusters()
            .db_cluster_identifier(cluster_id)
            .send()
            .await?;
        let cluster = resp
            .db_clusters()
            .first()
            .ok_or_else(|| anyhow::anyhow!("db cluster {cluster_id} not found"))?;

        Ok(ClusterState {
            status: cluster.status().unwrap_or("unknown").to_string(),
            member_count: cluster.db_cluster_members().len(),
        })
    }

    async fn stop_cluster(&self, cluster_id: &str) -> anyhow::Result<()> {
        self.rds.stop_db_cluster().db_cluster_identifier(cluster_id).send().await?;
        Ok(())
    }

    async fn start_cluster(&self, cluster_id: &str) -> anyhow::Result<()> {
        self.rds.start_db_cluster().db_cluster_identifier(cluster_id).send().await?;
        Ok(())
    }
}

pub struct RdsClusterHandler {
    api: Box<dyn RdsClusterApi>,
    cluster_id: String,
    raw_defaults: Option<serde_yaml::Value>,
}

impl RdsClusterHandler {
    pub async fn new(region: &str, resource: &DiscoveredResource, config: &Config) -> Self {
        let sdk_config = crate::aws_client::region_config(region).await;
        let api = Box::new(AwsRdsClusterApi {
            rds: aws_sdk_rds::Client::new(&sdk_config),
        });
        Self::with_api(api, resource, config)
    }

    fn with_api(api: Box<dyn RdsClusterApi>, resource: &DiscoveredResource, config: &Config) -> Self {
        Self {
            api,
            cluster_id: resource.resource_id.clone(),
            raw_defaults: config.resource_defaults_for(ResourceType::RdsCluster.as_tag()),
        }
    }

    fn defaults(&self) -> Result<RdsClusterDefaults, ConfigError> {
        RdsClusterDefaults::parse(self.raw_defaults.clone(), &self.cluster_id)
    }

    async fn run_transition(&self, action: Action) -> HandlerResult {
        let defaults = match self.defaults() {
            Ok(d) => d,
            Err(e) => return config_error_result(action, ResourceType::RdsCluster, &self.cluster_id, e),
        };

        let state = match self.api.describe_status(&self.cluster_id).await {
            Ok(s) => s,
            Err(e) => {
                return exception_result(action, ResourceType::RdsCluster, &self.cluster_id, &action.to_string(), e)
            }
        };
        let previous = serde_json::json!({ "status": state.status, "memberCount": state.member_count });

        let (idempotent_states, required_state, verb): (&[&str], &str, &str) = match action {
            Action::Stop => (&["stopped", "stopping"], "available", "stop"),
            Action::Start => (&["available", "starting"], "stopped", "start"),
            _ => unreachable!("run_transition only called for start/stop"),
        };

        if idempotent_states.contains(&state.status.as_str()) {
            return HandlerResult {
                success: true,
                action,
                resource_type: ResourceType::RdsCluster,
                resource_id: self.cluster_id.clone(),
                message: format!("already {}", state.status),
                previous_state: Some(previous),
                idempotent: true,
                error: None,
                trigger_source: None,
                region: None,
            };
        }

        if state.status != required_state {
            return state_gate_result(action, ResourceType::RdsCluster, &self.cluster_id, &state.status, previous);
        }

        let issue_result = match action {
            Action::Stop => self.api.stop_cluster(&self.cluster_id).await,
            Action::Start => self.api.start_cluster(&self.cluster_id).await,
            _ => unreachable!(),
        };

        if let Err(e) = issue_result {
            return exception_result(action, ResourceType::RdsCluster, &self.cluster_id, &action.to_string(), e);
        }

        if defaults.wait_after_command > 0 {
            tokio::time::sleep(std::time::Duration::from_secs(defaults.wait_after_command)).await;
        }

        let expected_transient = if action == Action::Stop { "stopping" } else { "starting" };
        match self.api.describe_status(&self.cluster_id).await {
            Ok(new_state) => {
                if new_state.status != expected_transient && !idempotent_states.contains(&new_state.status.as_str()) {
                    warn!(
                        cluster = %self.cluster_id,
                        status = %new_state.status,
                        expected = expected_transient,
                        "Aurora cluster has not yet reached the expected transient state"
                    );
                }
            }
            Err(e) => warn!(cluster = %self.cluster_id, error = %e, "Failed to re-read status after issuing command"),
        }

        let message = if action == Action::Stop {
            format!(
                "stop initiated; all {} member instance(s) will be stopped too; the full transition typically takes 5-10 minutes",
                state.member_count
            )
        } else {
            format!("{verb} initiated; the full transition typically takes 5-10 minutes to complete")
        };

        HandlerResult {
            success: true,
            action,
            resource_type: ResourceType::RdsCluster,
            resource_id: self.cluster_id.clone(),
            message,
            previous_state: Some(previous),
            idempotent: false,
            error: None,
            trigger_source: None,
            region: None,
        }
    }
}

#[async_trait]
impl ResourceHandler for RdsClusterHandler {
    async fn get_status(&self) -> anyhow::Result<serde_json::Value> {
        let state = self.api.describe_status(&self.cluster_id).await?;
        Ok(serde_json::json!({ "status": state.status, "memberCount": state.member_count }))
    }

    async fn start(&self) -> HandlerResult {
        self.run_transition(Action::Start).await
    }

    async fn stop(&self) -> HandlerResult {
        self.run_transition(Action::Stop).await
    }

    async fn is_ready(&self, _target: ReadinessTarget) -> anyhow::Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        pub Api {}

        #[async_trait]
        impl RdsClusterApi for Api {
            async fn describe_status(&self, cluster_id: &str) -> anyhow::Result<ClusterState>;
            async fn stop_cluster(&self, cluster_id: &str) -> anyhow::Result<()>;
            async fn start_cluster(&self, cluster_id: &str) -> anyhow::Result<()>;
        }
    }

    fn resource() -> DiscoveredResource {
        DiscoveredResource {
            resource_type: ResourceType::RdsCluster,
            arn: "arn:aws:rds:us-east-1:123456789012:cluster:my-cluster".to_string(),
            resource_id: "my-cluster".to_string(),
            priority: 50,
            group: "default".to_string(),
            tags: Default::default(),
            metadata: Default::default(),
        }
    }

    fn config_with(yaml: &str) -> Config {
        let raw: crate::config::RawConfig = serde_yaml::from_str(yaml).unwrap();
        Config::from_raw("test", raw).unwrap()
    }

    #[tokio::test]
    async fn stop_mentions_member_instances_in_the_success_message() {
        let mut mock = MockApi::new();
        mock.expect_describe_status().times(2).returning(|_| {
            Ok(ClusterState {
                status: "available".to_string(),
                member_count: 3,
            })
        });
        mock.expect_stop_cluster().returning(|_| Ok(()));

        let handler = RdsClusterHandler::with_api(
            Box::new(mock),
            &resource(),
            &config_with(
                "version: \"1\"\nenvironment: test\ndiscovery: { method: tag, tags: { k: v }, resource_types: [\"rds:cluster\"] }\nresource_defaults:\n  rds-cluster:\n    waitAfterCommand: 0\n",
            ),
        );

        let result = handler.stop().await;
        assert!(result.success);
        assert!(result.message.contains('3'));
        assert!(result.message.to_lowercase().contains("member"));
    }

    #[tokio::test]
    async fn stop_is_idempotent_when_already_stopping() {
        let mut mock = MockApi::new();
        mock.expect_describe_status().returning(|_| {
            Ok(ClusterState {
                status: "stopping".to_string(),
                member_count: 1,
            })
        });

        let handler = RdsClusterHandler::with_api(
            Box::new(mock),
            &resource(),
            &config_with("version: \"1\"\nenvironment: test\ndiscovery: { method: tag, tags: { k: v }, resource_types: [\"rds:cluster\"] }\n"),
        );

        let result = handler.stop().await;
        assert!(result.success);
        assert!(result.idempotent);
    }
}
