//! Multi-Provider Compute System Enumeration
//!
//! Discovers compute systems (VMs, containers, dev environments) across any
//! number of providers, each serving one or more user identities.
//!
//! ## Architecture
//!
//! - **Providers**: trait-based adapters, one per backend, queried per identity
//! - **Fan-Out Coordinator**: one task per provider under a global 2 minute deadline
//! - **Operation Registry**: in-flight create operations, mutex guarded
//! - **Event Broadcaster**: state transitions fanned out to subscribers
//! - **Manager**: composition root tying the above together
//!
//! ## Failure Model
//!
//! Failures stay local: a failing identity yields a failed result, a failing
//! provider yields no results, and neither stops its siblings.

mod types;
mod providers;
mod fan_out;
mod operations;
mod events;
mod manager;
pub mod http_provider;

pub use types::*;
pub use providers::{ComputeSystemProvider, ProviderCatalog, ProviderEntry, StaticProviderCatalog};
pub use fan_out::*;
pub use operations::{CreateComputeSystemOperation, OperationProgress, OperationRegistry, OperationView};
pub use events::{EventBroadcaster, PublishReport, StateChangeHandler, SubscriptionId};
pub use manager::ComputeSystemManager;
pub use http_provider::HttpComputeSystemProvider;
