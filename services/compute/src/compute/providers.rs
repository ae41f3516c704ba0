//! Compute System Provider Seams
//!
//! Trait-based abstractions for enumerating compute systems from an
//! arbitrary set of providers, and for the catalog that supplies them.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::types::{ComputeSystem, Identity};

/// Trait for a compute system provider (Hyper-V, Dev Box, WSL, a REST backend...)
#[async_trait]
pub trait ComputeSystemProvider: Send + Sync {
    /// Stable provider identifier
    fn id(&self) -> &str;

    /// Human readable provider name
    fn display_name(&self) -> &str {
        self.id()
    }

    /// Enumerate the compute systems visible to one identity.
    ///
    /// `cancel` fires when the enumeration deadline elapses. Implementations
    /// should return promptly once it is cancelled.
    async fn get_compute_systems(
        &self,
        identity: &Identity,
        cancel: &CancellationToken,
    ) -> Result<Vec<ComputeSystem>>;
}

/// A provider and the identities it should be queried for
#[derive(Clone)]
pub struct ProviderEntry {
    pub provider: Arc<dyn ComputeSystemProvider>,
    pub identities: Vec<Identity>,
}

impl ProviderEntry {
    pub fn new(provider: Arc<dyn ComputeSystemProvider>, identities: Vec<Identity>) -> Self {
        Self {
            provider,
            identities,
        }
    }
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("provider", &self.provider.id())
            .field("identities", &self.identities)
            .finish()
    }
}

/// Supplies the providers and identities for one enumeration pass
#[async_trait]
pub trait ProviderCatalog: Send + Sync {
    async fn get_providers(&self) -> Result<Vec<ProviderEntry>>;
}

/// Catalog backed by a fixed, in-memory list of providers
#[derive(Debug, Clone, Default)]
pub struct StaticProviderCatalog {
    entries: Vec<ProviderEntry>,
}

impl StaticProviderCatalog {
    pub fn new(entries: Vec<ProviderEntry>) -> Self {
        Self { entries }
    }

    /// Add a provider with its identities
    pub fn with_provider(
        mut self,
        provider: Arc<dyn ComputeSystemProvider>,
        identities: Vec<Identity>,
    ) -> Self {
        self.entries.push(ProviderEntry::new(provider, identities));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ProviderCatalog for StaticProviderCatalog {
    async fn get_providers(&self) -> Result<Vec<ProviderEntry>> {
        Ok(self.entries.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedProvider(&'static str);

    #[async_trait]
    impl ComputeSystemProvider for NamedProvider {
        fn id(&self) -> &str {
            self.0
        }

        async fn get_compute_systems(
            &self,
            _identity: &Identity,
            _cancel: &CancellationToken,
        ) -> Result<Vec<ComputeSystem>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_static_catalog_preserves_order() {
        let catalog = StaticProviderCatalog::default()
            .with_provider(
                Arc::new(NamedProvider("hyperv")),
                vec![Identity::new("local", "Local")],
            )
            .with_provider(Arc::new(NamedProvider("devbox")), Vec::new());

        let entries = catalog.get_providers().await.unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(entries[0].provider.id(), "hyperv");
        assert_eq!(entries[0].identities.len(), 1);
        assert_eq!(entries[1].provider.id(), "devbox");
        assert!(entries[1].identities.is_empty());
    }

    #[test]
    fn test_display_name_defaults_to_id() {
        assert_eq!(NamedProvider("wsl").display_name(), "wsl");
    }
}
