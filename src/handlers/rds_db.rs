//! RDS instance handler — fire-and-forget (§4.3.2). Grounded on the
//! teacher's `rds.rs` `stop_instance`/`start_instance`, extended with
//! idempotence, a state gate, optional snapshot-on-stop, and the bounded
//! "wait long enough to observe the transition begin" pattern the spec
//! requires in place of the teacher's unconditional fire-and-forget call.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::warn;

use crate::config::Config;
use crate::error::ConfigError;
use crate::model::{Action, DiscoveredResource, HandlerResult, ResourceType};

use super::{config_error_result, exception_result, state_gate_result, ReadinessTarget, ResourceHandler};

fn default_wait_after_command() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RdsDbDefaults {
    #[serde(default = "default_wait_after_command")]
    pub wait_after_command: u64,
    #[serde(default = "default_true")]
    pub skip_snapshot: bool,
}

impl RdsDbDefaults {
    fn parse(raw: Option<serde_yaml::Value>, resource_id: &str) -> Result<Self, ConfigError> {
        match raw {
            None => Ok(Self::default()),
            Some(v) => serde_yaml::from_value(v).map_err(|e| ConfigError::ConfigValidationError {
                name: resource_id.to_string(),
                field: "resource_defaults.rds-db".to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// The cloud-API surface the RDS instance handler needs.
#[async_trait]
pub trait RdsDbApi: Send + Sync {
    async fn describe_status(&self, instance_id: &str) -> anyhow::Result<String>;
    async fn stop_instance(&self, instance_id: &str, snapshot_id: Option<&str>) -> anyhow::Result<()>;
    async fn start_instance(&self, instance_id: &str) -> anyhow::Result<()>;
}

pub struct AwsRdsDbApi {
    rds: aws_sdk_rds::Client,
}

#[async_trait]
impl RdsDbApi for AwsRdsDbApi {
    async fn describe_status(&self, instance_id: &str) -> anyhow::Result<String> {
        let resp = self.rds.describe_db_instances().db_instance_identifier(instance_id).send().await?;
        let instance = resp
            .db_instances()
            .first()
            .ok_or_else(|| anyhow::anyhow!("db instance {instance_id} not found"))?;
        Ok(instance.db_instance_status().unwrap_or("unknown").to_string())
    }

    async fn stop_instance(&self, instance_id: &str, snapshot_id: Option<&str>) -> anyhow::Result<()> {
        let mut req = self.rds.stop_db_instance().db_instance_identifier(instance_id);
        if let Some(snapshot_id) = snapshot_id {
            req = req.db_snapshot_identifier(snapshot_id);
        }
        req.send().await?;
        Ok(())
    }

    async fn start_instance(&self, instance_id: &str) -> anyhow::Result<()> {
        self.rds.start_db_instance().db_instance_identifier(instance_id).send().await?;
        Ok(())
    }
}

pub struct RdsDbHandler {
    api: Box<dyn RdsDbApi>,
    instance_id: String,
    raw_defaults: Option<serde_yaml::Value>,
}

impl RdsDbHandler {
    pub async fn new(region: &str, resource: &DiscoveredResource, config: &Config) -> Self {
        let sdk_config = crate::aws_client::region_config(region).await;
        let api = Box::new(AwsRdsDbApi {
            rds: aws_sdk_rds::Client::new(&sdk_config),
        });
        Self::with_api(api, resource, config)
    }

    fn with_api(api: Box<dyn RdsDbApi>, resource: &DiscoveredResource, config: &Config) -> Self {
        Self {
            api,
            instance_id: resource.resource_id.clone(),
            raw_defaults: config.resource_defaults_for(ResourceType::RdsDb.as_tag()),
        }
    }

    fn defaults(&self) -> Result<RdsDbDefaults, ConfigError> {
        RdsDbDefaults::parse(self.raw_defaults.clone(), &self.instance_id)
    }

    /// `lights-out-<instanceId>-<timestamp>` with colons/dots in the
    /// truncated-to-seconds ISO8601 timestamp replaced by hyphens, per
    /// §4.3.2's snapshot-identifier rule.
    fn snapshot_identifier(&self) -> String {
        let stamp = Utc::now()
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string()
            .replace([':', '.'], "-");
        format!("lights-out-{}-{}", self.instance_id, stamp)
    }

    async fn run_transition(&self, action: Action) -> HandlerResult {
        let defaults = match self.defaults() {
            Ok(d) => d,
            Err(e) => return config_error_result(action, ResourceType::RdsDb, &self.instance_id, e),
        };

        let status = match self.api.describe_status(&self.instance_id).await {
            Ok(s) => s,
            Err(e) => return exception_result(action, ResourceType::RdsDb, &self.instance_id, &action.to_string(), e),
        };
        let previous = serde_json::json!({ "status": status });

        let (idempotent_states, required_state, verb): (&[&str], &str, &str) = match action {
            Action::Stop => (&["stopped", "stopping"], "available", "stop"),
            Action::Start => (&["available", "starting"], "stopped", "start"),
            _ => unreachable!("run_transition only called for start/stop"),
        };

        if idempotent_states.contains(&status.as_str()) {
            return HandlerResult {
                success: true,
                action,
                resource_type: ResourceType::RdsDb,
                resource_id: self.instance_id.clone(),
                message: format!("already {status}"),
                previous_state: Some(previous),
                idempotent: true,
                error: None,
                trigger_source: None,
                region: None,
            };
        }

        if status != required_state {
            return state_gate_result(action, ResourceType::RdsDb, &self.instance_id, &status, previous);
        }

        let snapshot_id = if action == Action::Stop && !defaults.skip_snapshot {
            Some(self.snapshot_identifier())
        } else {
            None
        };

        let issue_result = match action {
            Action::Stop => self.api.stop_instance(&self.instance_id, snapshot_id.as_deref()).await,
            Action::Start => self.api.start_instance(&self.instance_id).await,
            _ => unreachable!(),
        };

        if let Err(e) = issue_result {
            return exception_result(action, ResourceType::RdsDb, &self.instance_id, &action.to_string(), e);
        }

        if defaults.wait_after_command > 0 {
            tokio::time::sleep(std::time::Duration::from_secs(defaults.wait_after_command)).await;
        }

        let expected_transient = if action == Action::Stop { "stopping" } else { "starting" };
        match self.api.describe_status(&self.instance_id).await {
            Ok(new_status) => {
                if new_status != expected_transient && !idempotent_states.contains(&new_status.as_str()) {
                    warn!(
                        instance = %self.instance_id,
                        status = %new_status,
                        expected = expected_transient,
                        "RDS instance has not yet reached the expected transient state"
                    );
                }
            }
            Err(e) => warn!(instance = %self.instance_id, error = %e, "Failed to re-read status after issuing command"),
        }

        HandlerResult {
            success: true,
            action,
            resource_type: ResourceType::RdsDb,
            resource_id: self.instance_id.clone(),
            message: format!(
                "{verb} initiated; the full transition typically takes 5-10 minutes to complete"
            ),
            previous_state: Some(previous),
            idempotent: false,
            error: None,
            trigger_source: None,
            region: None,
        }
    }
}

#[async_trait]
impl ResourceHandler for RdsDbHandler {
    async fn get_status(&self) -> anyhow::Result<serde_json::Value> {
        let status = self.api.describe_status(&self.instance_id).await?;
        Ok(serde_json::json!({ "status": status }))
    }

    async fn start(&self) -> HandlerResult {
        self.run_transition(Action::Start).await
    }

    async fn stop(&self) -> HandlerResult {
        self.run_transition(Action::Stop).await
    }

    async fn is_ready(&self, _target: ReadinessTarget) -> anyhow::Result<bool> {
        // Fire-and-forget: the engine never waits for the full transition,
        // so readiness is defined by status alone, checked inline above.
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use mockall::predicate::*;

    mock! {
        pub Api {}

        #[async_trait]
        impl RdsDbApi for Api {
            async fn describe_status(&self, instance_id: &str) -> anyhow::Result<String>;
            async fn stop_instance(&self, instance_id: &str, snapshot_id: Option<&str>) -> anyhow::Result<()>;
            async fn start_instance(&self, instance_id: &str) -> anyhow::Result<()>;
        }
    }

    fn resource() -> DiscoveredResource {
        DiscoveredResource {
            resource_type: ResourceType::RdsDb,
            arn: "arn:aws:rds:us-east-1:123456789012:db:my-db".to_string(),
            resource_id: "my-db".to_string(),
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
    async fn stop_is_idempotent_when_already_stopped() {
        let mut mock = MockApi::new();
        mock.expect_describe_status().returning(|_| Ok("stopped".to_string()));

        let handler = RdsDbHandler::with_api(Box::new(mock), &resource(), &config_with("version: \"1\"\nenvironment: test\ndiscovery: { method: tag, tags: { k: v }, resource_types: [\"rds:db\"] }\n"));
        let result = handler.stop().await;
        assert!(result.success);
        assert!(result.idempotent);
    }

    #[tokio::test]
    async fn stop_refuses_when_not_available() {
        let mut mock = MockApi::new();
        mock.expect_describe_status().returning(|_| Ok("modifying".to_string()));

        let handler = RdsDbHandler::with_api(Box::new(mock), &resource(), &config_with("version: \"1\"\nenvironment: test\ndiscovery: { method: tag, tags: { k: v }, resource_types: [\"rds:db\"] }\n"));
        let result = handler.stop().await;
        assert!(!result.success);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn stop_without_snapshot_does_not_pass_a_snapshot_identifier() {
        let mut mock = MockApi::new();
        mock.expect_describe_status()
            .times(2)
            .returning(|_| Ok("available".to_string()));
        mock.expect_stop_instance()
            .with(eq("my-db"), eq(None))
            .returning(|_, _| Ok(()));

        let handler = RdsDbHandler::with_api(
            Box::new(mock),
            &resource(),
            &config_with(
                "version: \"1\"\nenvironment: test\ndiscovery: { method: tag, tags: { k: v }, resource_types: [\"rds:db\"] }\nresource_defaults:\n  rds-db:\n    waitAfterCommand: 0\n    skipSnapshot: true\n",
            ),
        );

        let result = handler.stop().await;
        assert!(result.success);
        assert!(result.message.contains("stop initiated"));
    }

    #[tokio::test]
    async fn stop_with_snapshot_requested_passes_a_snapshot_identifier() {
        let mut mock = MockApi::new();
        mock.expect_describe_status()
            .times(2)
            .returning(|_| Ok("available".to_string()));
        mock.expect_stop_instance()
            .withf(|id, snap| id == "my-db" && snap.map(|s| s.starts_with("lights-out-my-db-")).unwrap_or(false))
            .returning(|_, _| Ok(()));

        let handler = RdsDbHandler::with_api(
            Box::new(mock),
            &resource(),
            &config_with(
                "version: \"1\"\nenvironment: test\ndiscovery: { method: tag, tags: { k: v }, resource_types: [\"rds:db\"] }\nresource_defaults:\n  rds-db:\n    waitAfterCommand: 0\n    skipSnapshot: false\n",
            ),
        );

        let result = handler.stop().await;
        assert!(result.success);
    }
}
