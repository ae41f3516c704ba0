//! Compute System Types
//!
//! Core types for representing compute systems, the identities they are
//! enumerated under, and per-provider enumeration results.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::providers::ComputeSystemProvider;

/// Account/credential scope within a provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Stable identifier, unique within one provider
    pub id: String,
    /// Human readable name (e.g., the account login)
    pub display_name: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Lifecycle state reported by a provider for a compute system.
///
/// Values are provider-defined and passed through as-is; anything the
/// engine does not recognise deserializes to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComputeSystemState {
    Creating,
    Starting,
    Running,
    Stopping,
    Stopped,
    Saving,
    Saved,
    Pausing,
    Paused,
    Restarting,
    Deleting,
    Deleted,
    Failed,
    #[default]
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ComputeSystemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ComputeSystemState::Creating => "creating",
            ComputeSystemState::Starting => "starting",
            ComputeSystemState::Running => "running",
            ComputeSystemState::Stopping => "stopping",
            ComputeSystemState::Stopped => "stopped",
            ComputeSystemState::Saving => "saving",
            ComputeSystemState::Saved => "saved",
            ComputeSystemState::Pausing => "pausing",
            ComputeSystemState::Paused => "paused",
            ComputeSystemState::Restarting => "restarting",
            ComputeSystemState::Deleting => "deleting",
            ComputeSystemState::Deleted => "deleted",
            ComputeSystemState::Failed => "failed",
            ComputeSystemState::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// A manageable unit (VM, container, dev environment) exposed by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeSystem {
    /// Provider-assigned identifier
    pub id: String,
    /// Human readable name
    pub display_name: String,
    /// Provider that owns this system
    #[serde(default)]
    pub provider_id: String,
    /// State at the time the system was enumerated
    #[serde(default)]
    pub state: ComputeSystemState,
    /// Additional provider-specific properties
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl ComputeSystem {
    pub fn new(
        provider_id: impl Into<String>,
        id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            provider_id: provider_id.into(),
            state: ComputeSystemState::Unknown,
            properties: HashMap::new(),
        }
    }

    pub fn with_state(mut self, state: ComputeSystemState) -> Self {
        self.state = state;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Outcome of querying one (provider, identity) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ComputeSystemsResult {
    Success { systems: Vec<ComputeSystem> },
    Failure { reason: String },
}

impl ComputeSystemsResult {
    pub fn success(systems: Vec<ComputeSystem>) -> Self {
        ComputeSystemsResult::Success { systems }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        ComputeSystemsResult::Failure {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ComputeSystemsResult::Success { .. })
    }

    /// Systems returned by a successful query, empty on failure
    pub fn systems(&self) -> &[ComputeSystem] {
        match self {
            ComputeSystemsResult::Success { systems } => systems,
            ComputeSystemsResult::Failure { .. } => &[],
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            ComputeSystemsResult::Success { .. } => None,
            ComputeSystemsResult::Failure { reason } => Some(reason),
        }
    }
}

/// All results for one provider across its identities.
///
/// Produced once per provider per enumeration pass and handed to the
/// caller's completion callback.
#[derive(Clone)]
pub struct ComputeSystemsLoadedData {
    pub provider: Arc<dyn ComputeSystemProvider>,
    pub results: HashMap<Identity, ComputeSystemsResult>,
}

impl ComputeSystemsLoadedData {
    pub fn new(provider: Arc<dyn ComputeSystemProvider>) -> Self {
        Self {
            provider,
            results: HashMap::new(),
        }
    }

    pub fn provider_id(&self) -> &str {
        self.provider.id()
    }

    /// Identities whose query succeeded
    pub fn succeeded(&self) -> impl Iterator<Item = (&Identity, &[ComputeSystem])> {
        self.results
            .iter()
            .filter(|(_, r)| r.is_success())
            .map(|(identity, r)| (identity, r.systems()))
    }

    /// Identities whose query failed, with the failure reason
    pub fn failed(&self) -> impl Iterator<Item = (&Identity, &str)> {
        self.results
            .iter()
            .filter_map(|(identity, r)| r.failure_reason().map(|reason| (identity, reason)))
    }

    /// Total number of systems across all successful identities
    pub fn system_count(&self) -> usize {
        self.results.values().map(|r| r.systems().len()).sum()
    }
}

impl std::fmt::Debug for ComputeSystemsLoadedData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeSystemsLoadedData")
            .field("provider", &self.provider.id())
            .field("results", &self.results)
            .finish()
    }
}

/// A compute system transitioned to a new state.
///
/// Never stored; only forwarded to subscribers as it happens.
#[derive(Debug, Clone)]
pub struct StateChangeEvent {
    pub system: Arc<ComputeSystem>,
    pub state: ComputeSystemState,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
}

impl StateChangeEvent {
    pub fn new(system: Arc<ComputeSystem>, state: ComputeSystemState) -> Self {
        Self {
            system,
            state,
            occurred_at: chrono::Utc::now(),
        }
    }
}
