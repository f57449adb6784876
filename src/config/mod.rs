//! Config loader: fetches a named configuration document from AWS Systems
//! Manager Parameter Store, parses it, validates it, and memoises the
//! result by name for the lifetime of the process (§4.1).

pub mod schema;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub use schema::{Config, DiscoveryConfig, ExecutionStrategy, RawConfig};

use crate::error::ConfigError;

/// The parameter-store surface the config loader needs, abstracted so tests
/// can substitute a `mockall`-generated mock instead of a real SSM client —
/// the same seam every handler's `*Api` trait provides for its cloud-API
/// calls (§4.3).
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Fetch a named parameter's raw string value, mapping
    /// `ParameterNotFound` distinctly from any other transport failure
    /// (§4.1).
    async fn get_parameter(&self, name: &str) -> Result<String, ConfigError>;
}

pub struct AwsParameterStore {
    ssm: aws_sdk_ssm::Client,
}

#[async_trait]
impl ParameterStore for AwsParameterStore {
    async fn get_parameter(&self, name: &str) -> Result<String, ConfigError> {
        let response = self
            .ssm
            .get_parameter()
            .name(name)
            .with_decryption(true)
            .send()
            .await
            .map_err(|e| {
                let service_err = e.into_service_error();
                if service_err.is_parameter_not_found() {
                    ConfigError::ParameterNotFound { name: name.to_string() }
                } else {
                    ConfigError::LoadFailed {
                        name: name.to_string(),
                        reason: service_err.to_string(),
                    }
                }
            })?;

        response
            .parameter()
            .and_then(|p| p.value())
            .map(|v| v.to_string())
            .ok_or_else(|| ConfigError::LoadFailed {
                name: name.to_string(),
                reason: "parameter has no value".to_string(),
            })
    }
}

/// Loads and memoises `Config` documents by name.
///
/// Memoisation is a simple `RwLock<HashMap>`: concurrent reads never block
/// each other, and a miss takes the write lock only long enough to insert
/// the freshly parsed config (§5: "write-once-per-key and safe under
/// concurrent reads").
pub struct ConfigLoader {
    store: Box<dyn ParameterStore>,
    cache: Arc<RwLock<HashMap<String, Config>>>,
}

impl ConfigLoader {
    pub fn new(ssm: aws_sdk_ssm::Client) -> Self {
        Self::with_store(Box::new(AwsParameterStore { ssm }))
    }

    pub fn with_store(store: Box<dyn ParameterStore>) -> Self {
        Self {
            store,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Load the named config, returning a cached copy if this process has
    /// already fetched it.
    pub async fn load(&self, name: &str) -> Result<Config, ConfigError> {
        if let Some(config) = self.cache.read().await.get(name) {
            return Ok(config.clone());
        }

        let config = self.fetch_and_validate(name).await?;

        self.cache.write().await.insert(name.to_string(), config.clone());
        info!(config = %name, version = %config.version, "Loaded and cached config");

        Ok(config)
    }

    /// Force the next `load` for every name to re-fetch. Intended for tests.
    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }

    async fn fetch_and_validate(&self, name: &str) -> Result<Config, ConfigError> {
        let value = self.store.get_parameter(name).await?;

        if value.trim().is_empty() {
            return Err(ConfigError::LoadFailed {
                name: name.to_string(),
                reason: "parameter value is empty".to_string(),
            });
        }

        let raw: RawConfig = serde_yaml::from_str(&value).map_err(|e| ConfigError::LoadFailed {
            name: name.to_string(),
            reason: format!("failed to parse config document: {e}"),
        })?;

        let config = Config::from_raw(name, raw)?;
        if config.regions.is_empty() {
            warn!(config = %name, "No regions configured; discovery will run against the host region only");
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use mockall::mock;

    use super::*;

    const SAMPLE_DOC: &str = r#"
version: "1"
environment: staging
discovery:
  method: tag
  tags:
    lights-out:managed: "true"
  resource_types: ["ecs:service"]
"#;

    mock! {
        pub Store {}

        #[async_trait]
        impl ParameterStore for Store {
            async fn get_parameter(&self, name: &str) -> Result<String, ConfigError>;
        }
    }

    #[tokio::test]
    async fn load_twice_issues_exactly_one_fetch() {
        // §8 property 7: loading the same name twice issues exactly one
        // fetch against the parameter store.
        let mut mock = MockStore::new();
        mock.expect_get_parameter()
            .times(1)
            .returning(|_| Ok(SAMPLE_DOC.to_string()));

        let loader = ConfigLoader::with_store(Box::new(mock));

        let first = loader.load("demo").await.unwrap();
        let second = loader.load("demo").await.unwrap();
        assert_eq!(first.version, "1");
        assert_eq!(second.environment, "staging");
    }

    #[tokio::test]
    async fn clear_cache_forces_a_refetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let mut mock = MockStore::new();
        mock.expect_get_parameter().returning(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(SAMPLE_DOC.to_string())
        });

        let loader = ConfigLoader::with_store(Box::new(mock));

        loader.load("demo").await.unwrap();
        loader.load("demo").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        loader.clear_cache().await;
        loader.load("demo").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn parameter_not_found_propagates_as_a_typed_error() {
        let mut mock = MockStore::new();
        mock.expect_get_parameter()
            .returning(|name| Err(ConfigError::ParameterNotFound { name: name.to_string() }));

        let loader = ConfigLoader::with_store(Box::new(mock));
        let err = loader.load("missing").await.unwrap_err();
        assert!(matches!(err, ConfigError::ParameterNotFound { .. }));
    }
}
