//! Create Operation Tracking
//!
//! Keeps references to in-flight "create compute system" operations so other
//! parts of the application can list, display or cancel them. The registry
//! never runs the work itself.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Last progress reported by a create operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationProgress {
    pub status: String,
    /// Completion percentage (0-100)
    pub percent: u8,
}

/// A long-running unit of work creating a new compute system
#[derive(Debug)]
pub struct CreateComputeSystemOperation {
    id: Uuid,
    provider_id: String,
    display_name: String,
    started_at: DateTime<Utc>,
    cancellation: CancellationToken,
    progress: Mutex<Option<OperationProgress>>,
}

impl CreateComputeSystemOperation {
    /// Create an operation with a freshly generated id
    pub fn new(provider_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_id: provider_id.into(),
            display_name: display_name.into(),
            started_at: Utc::now(),
            cancellation: CancellationToken::new(),
            progress: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Token the code running the operation should watch
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Request cancellation; the code running the operation decides how to stop
    pub fn cancel(&self) {
        if !self.cancellation.is_cancelled() {
            info!(operation = %self.id, provider = %self.provider_id, "Cancelling create operation");
        }
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn report_progress(&self, status: impl Into<String>, percent: u8) {
        let progress = OperationProgress {
            status: status.into(),
            percent: percent.min(100),
        };
        debug!(
            operation = %self.id,
            status = %progress.status,
            percent = progress.percent,
            "Create operation progress"
        );
        *self.progress.lock() = Some(progress);
    }

    pub fn progress(&self) -> Option<OperationProgress> {
        self.progress.lock().clone()
    }

    /// Serializable point-in-time view for display
    pub fn view(&self) -> OperationView {
        OperationView {
            id: self.id,
            provider_id: self.provider_id.clone(),
            display_name: self.display_name.clone(),
            started_at: self.started_at,
            cancelled: self.is_cancelled(),
            progress: self.progress(),
        }
    }
}

/// Display snapshot of a create operation
#[derive(Debug, Clone, Serialize)]
pub struct OperationView {
    pub id: Uuid,
    pub provider_id: String,
    pub display_name: String,
    pub started_at: DateTime<Utc>,
    pub cancelled: bool,
    pub progress: Option<OperationProgress>,
}

/// Thread-safe registry of in-flight create operations.
///
/// Every access goes through one mutex; readers get a copy of the list.
#[derive(Debug, Default)]
pub struct OperationRegistry {
    operations: Mutex<Vec<Arc<CreateComputeSystemOperation>>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an operation. Ids are generated, so duplicates are not checked.
    pub fn add(&self, operation: Arc<CreateComputeSystemOperation>) {
        debug!(operation = %operation.id(), "Registering create operation");
        self.operations.lock().push(operation);
    }

    /// Stop tracking an operation. Removing an unknown id is a no-op.
    pub fn remove(&self, id: Uuid) -> Option<Arc<CreateComputeSystemOperation>> {
        let mut operations = self.operations.lock();
        let index = operations.iter().position(|op| op.id() == id)?;
        let removed = operations.remove(index);
        debug!(operation = %id, "Unregistered create operation");
        Some(removed)
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<CreateComputeSystemOperation>> {
        self.operations
            .lock()
            .iter()
            .find(|op| op.id() == id)
            .cloned()
    }

    /// Copy of the current operations, in registration order
    pub fn snapshot(&self) -> Vec<Arc<CreateComputeSystemOperation>> {
        self.operations.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.operations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.lock().is_empty()
    }
}
