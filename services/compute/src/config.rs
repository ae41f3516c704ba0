//! Compute Agent Configuration
//!
//! Providers and fan-out settings are read from a JSON file. Secrets are not:
//! each identity names the environment variable holding its token.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::compute::{
    DeadlinePolicy, FanOutConfig, HttpComputeSystemProvider, Identity, StaticProviderCatalog,
    DEFAULT_CANCELLATION_GRACE, DEFAULT_ENUMERATION_DEADLINE,
};

fn default_deadline_secs() -> u64 {
    DEFAULT_ENUMERATION_DEADLINE.as_secs()
}

fn default_grace_secs() -> u64 {
    DEFAULT_CANCELLATION_GRACE.as_secs()
}

/// Upper bound accepted for `deadline_secs` and `cancellation_grace_secs`
pub const MAX_DEADLINE_SECS: u64 = 24 * 60 * 60;

fn default_request_timeout_secs() -> u64 {
    30
}

/// Top-level agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeConfig {
    /// Global enumeration deadline in seconds
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    /// Time providers get to observe cancellation before being aborted
    #[serde(default = "default_grace_secs")]
    pub cancellation_grace_secs: u64,
    #[serde(default)]
    pub deadline_policy: DeadlinePolicy,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
            cancellation_grace_secs: default_grace_secs(),
            deadline_policy: DeadlinePolicy::default(),
            providers: Vec::new(),
        }
    }
}

/// One REST-backed provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub identities: Vec<IdentityConfig>,
}

/// An identity to enumerate under, with the env var holding its token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub token_env: Option<String>,
}

impl ComputeConfig {
    /// Load and validate configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: ComputeConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.validate()?;

        info!(
            path = ?path,
            providers = config.providers.len(),
            "Loaded compute configuration"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.deadline_secs == 0 {
            anyhow::bail!("deadline_secs must be greater than zero");
        }
        if self.deadline_secs > MAX_DEADLINE_SECS {
            anyhow::bail!(
                "deadline_secs must be at most {} (got {})",
                MAX_DEADLINE_SECS,
                self.deadline_secs
            );
        }
        if self.cancellation_grace_secs > MAX_DEADLINE_SECS {
            anyhow::bail!(
                "cancellation_grace_secs must be at most {} (got {})",
                MAX_DEADLINE_SECS,
                self.cancellation_grace_secs
            );
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.id.trim().is_empty() {
                anyhow::bail!("Provider id must not be empty");
            }
            if !seen.insert(provider.id.as_str()) {
                anyhow::bail!("Duplicate provider id: {}", provider.id);
            }
            if provider.base_url.trim().is_empty() {
                anyhow::bail!("Provider {} has no base_url", provider.id);
            }
        }

        Ok(())
    }

    pub fn fan_out_config(&self) -> FanOutConfig {
        FanOutConfig::default()
            .deadline(Duration::from_secs(self.deadline_secs))
            .cancellation_grace(Duration::from_secs(self.cancellation_grace_secs))
            .deadline_policy(self.deadline_policy)
    }

    /// Build the provider catalog described by this configuration
    pub fn build_catalog(&self) -> Result<StaticProviderCatalog> {
        let mut catalog = StaticProviderCatalog::default();

        for provider in &self.providers {
            let display_name = provider.display_name.as_deref().unwrap_or(&provider.id);
            let mut http = HttpComputeSystemProvider::new(
                &provider.id,
                display_name,
                &provider.base_url,
                Duration::from_secs(provider.request_timeout_secs),
            )
            .with_context(|| format!("Failed to initialize provider {}", provider.id))?;

            let mut identities = Vec::with_capacity(provider.identities.len());
            for identity in &provider.identities {
                if let Some(var) = &identity.token_env {
                    http = http.with_token_env(&identity.id, var);
                }
                identities.push(Identity::new(
                    identity.id.as_str(),
                    identity.display_name.as_deref().unwrap_or(&identity.id),
                ));
            }

            catalog = catalog.with_provider(Arc::new(http), identities);
        }

        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::ProviderCatalog;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_applied() {
        let config: ComputeConfig = serde_json::from_str("{}").unwrap();

        assert_eq!(config.deadline_secs, 120);
        assert_eq!(config.cancellation_grace_secs, 2);
        assert_eq!(config.deadline_policy, DeadlinePolicy::FailWhenAllCancelled);
        assert!(config.providers.is_empty());

        let fan_out = config.fan_out_config();
        assert_eq!(fan_out.deadline, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_load_and_build_catalog() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("compute.json");
        fs::write(
            &path,
            r#"{
                "deadline_secs": 45,
                "deadline_policy": "best_effort",
                "providers": [
                    {
                        "id": "devbox",
                        "display_name": "Dev Box",
                        "base_url": "https://devbox.example.com/api",
                        "identities": [
                            { "id": "alice@contoso.com", "token_env": "DEVBOX_TOKEN_ALICE" },
                            { "id": "bob@contoso.com", "display_name": "Bob" }
                        ]
                    },
                    { "id": "wsl", "base_url": "http://127.0.0.1:9000" }
                ]
            }"#,
        )
        .unwrap();

        let config = ComputeConfig::load(&path).unwrap();
        assert_eq!(config.deadline_secs, 45);
        assert_eq!(config.deadline_policy, DeadlinePolicy::BestEffort);
        assert_eq!(config.providers[0].request_timeout_secs, 30);

        let entries = config.build_catalog().unwrap().get_providers().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].provider.id(), "devbox");
        assert_eq!(entries[0].provider.display_name(), "Dev Box");
        assert_eq!(entries[0].identities[0].display_name, "alice@contoso.com");
        assert_eq!(entries[0].identities[1].display_name, "Bob");
        assert_eq!(entries[1].provider.display_name(), "wsl");
        assert!(entries[1].identities.is_empty());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = ComputeConfig::default();
        config.deadline_secs = 0;
        assert!(config.validate().is_err());

        let config = ComputeConfig {
            deadline_secs: u64::MAX,
            ..ComputeConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("deadline_secs must be at most"));

        let config = ComputeConfig {
            cancellation_grace_secs: MAX_DEADLINE_SECS + 1,
            ..ComputeConfig::default()
        };
        assert!(config.validate().is_err());

        let provider = ProviderConfig {
            id: "devbox".to_string(),
            display_name: None,
            base_url: "https://devbox.example.com".to_string(),
            request_timeout_secs: 30,
            identities: Vec::new(),
        };
        let config = ComputeConfig {
            providers: vec![provider.clone(), provider],
            ..ComputeConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate provider id"));
    }

    #[test]
    fn test_load_reports_path_on_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let err = ComputeConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }
}
