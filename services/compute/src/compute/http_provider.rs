//! REST Compute System Provider
//!
//! Lists compute systems from an HTTP backend, one request per identity.
//! Tokens are never stored in configuration; each identity names the
//! environment variable its bearer token is read from at query time.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::providers::ComputeSystemProvider;
use super::types::{ComputeSystem, Identity};

#[derive(Debug, Deserialize)]
struct ComputeSystemListResponse {
    #[serde(default)]
    compute_systems: Vec<ComputeSystem>,
}

/// Provider backed by `GET {base_url}/identities/{identity}/compute-systems`
pub struct HttpComputeSystemProvider {
    id: String,
    display_name: String,
    base_url: String,
    http_client: reqwest::Client,
    /// Identity id -> environment variable holding its bearer token
    token_envs: HashMap<String, String>,
}

impl HttpComputeSystemProvider {
    pub fn new(
        id: &str,
        display_name: &str,
        base_url: &str,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        info!(provider = %id, base_url = %base_url, "HttpComputeSystemProvider initialized");

        Ok(Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            token_envs: HashMap::new(),
        })
    }

    /// Authenticate requests for `identity_id` with the token in `env_var`
    pub fn with_token_env(mut self, identity_id: &str, env_var: &str) -> Self {
        self.token_envs
            .insert(identity_id.to_string(), env_var.to_string());
        self
    }

    fn token_for(&self, identity: &Identity) -> Result<Option<String>> {
        let Some(var) = self.token_envs.get(&identity.id) else {
            return Ok(None);
        };

        let token = env::var(var)
            .with_context(|| format!("Token environment variable {} is not set", var))?;
        if token.is_empty() {
            anyhow::bail!("Token environment variable {} is empty", var);
        }
        Ok(Some(token))
    }

    async fn fetch(&self, url: &str, identity: &Identity) -> Result<Vec<ComputeSystem>> {
        let mut request = self.http_client.get(url);
        if let Some(token) = self.token_for(identity)? {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to call {}", url))?;

        if !response.status().is_success() {
            anyhow::bail!("Provider {} returned {}", self.id, response.status());
        }

        let listing: ComputeSystemListResponse = response
            .json()
            .await
            .context("Invalid compute system listing")?;

        Ok(listing.compute_systems)
    }
}

#[async_trait]
impl ComputeSystemProvider for HttpComputeSystemProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    async fn get_compute_systems(
        &self,
        identity: &Identity,
        cancel: &CancellationToken,
    ) -> Result<Vec<ComputeSystem>> {
        let url = format!(
            "{}/identities/{}/compute-systems",
            self.base_url,
            urlencoding::encode(&identity.id)
        );

        let mut systems = tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("Request to {} cancelled", url),
            result = self.fetch(&url, identity) => result?,
        };

        for system in &mut systems {
            system.provider_id = self.id.clone();
        }

        debug!(
            provider = %self.id,
            identity = %identity,
            count = systems.len(),
            "Listed compute systems"
        );
        Ok(systems)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::types::ComputeSystemState;
    use axum::{extract::Path, http::HeaderMap, http::StatusCode, routing::get, Json, Router};

    async fn list(
        Path(identity): Path<String>,
        headers: HeaderMap,
    ) -> Result<Json<serde_json::Value>, StatusCode> {
        match identity.as_str() {
            "alice@contoso.com" => {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                if auth != "Bearer alice-token" {
                    return Err(StatusCode::UNAUTHORIZED);
                }
                Ok(Json(serde_json::json!({
                    "compute_systems": [
                        { "id": "vm-1", "display_name": "Dev VM", "state": "running" },
                        { "id": "vm-2", "display_name": "Build VM", "state": "stopped",
                          "properties": { "cpu": "8" } }
                    ]
                })))
            }
            "slow" => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Json(serde_json::json!({ "compute_systems": [] })))
            }
            _ => Err(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    async fn serve() -> String {
        let app = Router::new().route("/identities/:identity/compute-systems", get(list));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    fn provider(base_url: &str) -> HttpComputeSystemProvider {
        HttpComputeSystemProvider::new("rest", "REST Provider", base_url, Duration::from_secs(10))
            .unwrap()
    }

    #[tokio::test]
    async fn test_lists_systems_with_bearer_token() {
        std::env::set_var("COMPUTE_TEST_TOKEN_ALICE", "alice-token");
        let base_url = serve().await;
        let provider = provider(&base_url).with_token_env("alice@contoso.com", "COMPUTE_TEST_TOKEN_ALICE");

        let systems = provider
            .get_compute_systems(
                &Identity::new("alice@contoso.com", "Alice"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(systems.len(), 2);
        assert!(systems.iter().all(|s| s.provider_id == "rest"));
        assert_eq!(systems[0].state, ComputeSystemState::Running);
        assert_eq!(systems[1].properties.get("cpu"), Some(&"8".to_string()));
    }

    #[tokio::test]
    async fn test_error_status_is_a_failure() {
        let base_url = serve().await;
        let err = provider(&base_url)
            .get_compute_systems(&Identity::new("bob", "Bob"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_missing_token_env_is_a_failure() {
        let base_url = serve().await;
        let provider = provider(&base_url).with_token_env("carol", "COMPUTE_TEST_TOKEN_UNSET");

        let err = provider
            .get_compute_systems(&Identity::new("carol", "Carol"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("COMPUTE_TEST_TOKEN_UNSET"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_in_flight_request() {
        let base_url = serve().await;
        let provider = provider(&base_url);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = provider
            .get_compute_systems(&Identity::new("slow", "Slow"), &cancel)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("cancelled"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
