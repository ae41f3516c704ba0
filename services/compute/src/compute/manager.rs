//! Compute System Manager
//!
//! Single entry point the rest of the application uses for compute systems:
//! enumeration across providers, create-operation tracking, state change
//! broadcasts and the current setup target.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::events::{EventBroadcaster, PublishReport, StateChangeHandler, SubscriptionId};
use super::fan_out::{EnumerationError, EnumerationSummary, FanOutConfig, FanOutCoordinator};
use super::operations::{CreateComputeSystemOperation, OperationRegistry};
use super::providers::ProviderCatalog;
use super::types::{ComputeSystem, ComputeSystemState, ComputeSystemsLoadedData};

pub struct ComputeSystemManager {
    catalog: Arc<dyn ProviderCatalog>,
    coordinator: FanOutCoordinator,
    operations: OperationRegistry,
    events: EventBroadcaster,
    /// Compute system selected for a pending configuration step
    setup_target: Mutex<Option<Arc<ComputeSystem>>>,
}

impl ComputeSystemManager {
    pub fn new(catalog: Arc<dyn ProviderCatalog>, config: FanOutConfig) -> Self {
        info!(
            deadline_secs = config.deadline.as_secs(),
            "ComputeSystemManager initialized"
        );

        Self {
            catalog,
            coordinator: FanOutCoordinator::new(config),
            operations: OperationRegistry::new(),
            events: EventBroadcaster::new(),
            setup_target: Mutex::new(None),
        }
    }

    /// Enumerate compute systems from every provider in the catalog.
    ///
    /// `on_provider_complete` runs once per provider as its identities finish.
    pub async fn enumerate<F>(
        &self,
        on_provider_complete: F,
    ) -> Result<EnumerationSummary, EnumerationError>
    where
        F: FnMut(ComputeSystemsLoadedData) + Send + 'static,
    {
        let entries = self
            .catalog
            .get_providers()
            .await
            .map_err(EnumerationError::Catalog)?;

        self.coordinator
            .enumerate(entries, on_provider_complete)
            .await
    }

    pub fn notify_state_changed(
        &self,
        system: Arc<ComputeSystem>,
        state: ComputeSystemState,
    ) -> PublishReport {
        self.events.publish(system, state)
    }

    pub fn subscribe(&self, handler: impl StateChangeHandler + 'static) -> SubscriptionId {
        self.events.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn register_operation(&self, operation: Arc<CreateComputeSystemOperation>) {
        self.operations.add(operation);
    }

    pub fn unregister_operation(&self, id: Uuid) -> Option<Arc<CreateComputeSystemOperation>> {
        self.operations.remove(id)
    }

    pub fn list_operations(&self) -> Vec<Arc<CreateComputeSystemOperation>> {
        self.operations.snapshot()
    }

    pub fn find_operation(&self, id: Uuid) -> Option<Arc<CreateComputeSystemOperation>> {
        self.operations.get(id)
    }

    /// Cancel a tracked operation and stop tracking it
    pub fn cancel_operation(&self, id: Uuid) -> bool {
        match self.operations.remove(id) {
            Some(operation) => {
                operation.cancel();
                true
            }
            None => false,
        }
    }

    pub fn set_setup_target(&self, system: Arc<ComputeSystem>) {
        *self.setup_target.lock() = Some(system);
    }

    pub fn setup_target(&self) -> Option<Arc<ComputeSystem>> {
        self.setup_target.lock().clone()
    }

    pub fn clear_setup_target(&self) -> Option<Arc<ComputeSystem>> {
        self.setup_target.lock().take()
    }
}

impl std::fmt::Debug for ComputeSystemManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeSystemManager")
            .field("coordinator", &self.coordinator)
            .field("operations", &self.operations.len())
            .field("events", &self.events)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::providers::{ComputeSystemProvider, ProviderEntry, StaticProviderCatalog};
    use crate::compute::types::{Identity, StateChangeEvent};
    use anyhow::Result;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct FixedProvider;

    #[async_trait]
    impl ComputeSystemProvider for FixedProvider {
        fn id(&self) -> &str {
            "hyperv"
        }

        async fn get_compute_systems(
            &self,
            identity: &Identity,
            _cancel: &CancellationToken,
        ) -> Result<Vec<ComputeSystem>> {
            Ok(vec![ComputeSystem::new("hyperv", format!("{}-vm", identity.id), "VM")])
        }
    }

    struct BrokenCatalog;

    #[async_trait]
    impl ProviderCatalog for BrokenCatalog {
        async fn get_providers(&self) -> Result<Vec<ProviderEntry>> {
            anyhow::bail!("extension host unavailable")
        }
    }

    fn manager() -> ComputeSystemManager {
        let catalog = StaticProviderCatalog::default().with_provider(
            Arc::new(FixedProvider),
            vec![Identity::new("local", "Local"), Identity::new("work", "Work")],
        );
        ComputeSystemManager::new(Arc::new(catalog), FanOutConfig::default())
    }

    #[tokio::test]
    async fn test_enumerate_through_catalog() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = delivered.clone();

        let summary = manager()
            .enumerate(move |data| sink.lock().push(data))
            .await
            .unwrap();

        assert_eq!(summary.providers.len(), 1);
        let delivered = delivered.lock();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].system_count(), 2);
    }

    #[tokio::test]
    async fn test_catalog_failure_is_reported() {
        let manager = ComputeSystemManager::new(Arc::new(BrokenCatalog), FanOutConfig::default());
        let err = manager.enumerate(|_| {}).await.unwrap_err();

        assert!(matches!(err, EnumerationError::Catalog(_)));
        assert!(err.to_string().contains("extension host unavailable"));
    }

    #[test]
    fn test_operation_lifecycle() {
        let manager = manager();
        let op = Arc::new(CreateComputeSystemOperation::new("hyperv", "new-vm"));
        let token = op.cancellation_token();

        manager.register_operation(op.clone());
        assert_eq!(manager.list_operations().len(), 1);
        assert!(manager.find_operation(op.id()).is_some());

        assert!(manager.cancel_operation(op.id()));
        assert!(token.is_cancelled());
        assert!(manager.list_operations().is_empty());

        assert!(!manager.cancel_operation(op.id()));
        assert!(manager.unregister_operation(op.id()).is_none());
    }

    #[test]
    fn test_state_changes_reach_subscribers() {
        let manager = manager();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = manager.subscribe(move |event: &StateChangeEvent| -> Result<()> {
            sink.lock().push((event.system.id.clone(), event.state));
            Ok(())
        });

        let system = Arc::new(ComputeSystem::new("hyperv", "vm-1", "VM"));
        let report = manager.notify_state_changed(system.clone(), ComputeSystemState::Starting);
        assert_eq!(report.delivered, 1);

        assert!(manager.unsubscribe(id));
        manager.notify_state_changed(system, ComputeSystemState::Running);

        assert_eq!(
            *seen.lock(),
            vec![("vm-1".to_string(), ComputeSystemState::Starting)]
        );
    }

    #[test]
    fn test_setup_target_last_write_wins() {
        let manager = manager();
        assert!(manager.setup_target().is_none());

        manager.set_setup_target(Arc::new(ComputeSystem::new("hyperv", "vm-1", "VM 1")));
        manager.set_setup_target(Arc::new(ComputeSystem::new("hyperv", "vm-2", "VM 2")));
        assert_eq!(manager.setup_target().unwrap().id, "vm-2");

        assert_eq!(manager.clear_setup_target().unwrap().id, "vm-2");
        assert!(manager.setup_target().is_none());
    }
}
