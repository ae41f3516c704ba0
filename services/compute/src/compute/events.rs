//! Compute System State Broadcasts
//!
//! Fire-and-forget multicast of state transitions to any number of handlers.
//! Handlers run synchronously on the publishing thread in registration
//! order. A failing or panicking handler is logged and skipped; it never
//! stops delivery to the rest. Events are not buffered for late subscribers.

use anyhow::Result;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, trace, warn};

use super::types::{ComputeSystem, ComputeSystemState, StateChangeEvent};

/// Receives compute system state transitions
pub trait StateChangeHandler: Send + Sync {
    fn on_state_changed(&self, event: &StateChangeEvent) -> Result<()>;
}

impl<F> StateChangeHandler for F
where
    F: Fn(&StateChangeEvent) -> Result<()> + Send + Sync,
{
    fn on_state_changed(&self, event: &StateChangeEvent) -> Result<()> {
        self(event)
    }
}

/// Handle returned by [`EventBroadcaster::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Delivery counts for one publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct EventBroadcaster {
    handlers: RwLock<Vec<(SubscriptionId, Arc<dyn StateChangeHandler>)>>,
    next_id: AtomicU64,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: impl StateChangeHandler + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Returns false when the subscription was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(sub, _)| *sub != id);
        handlers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Deliver a state change to every current subscriber
    pub fn publish(&self, system: Arc<ComputeSystem>, state: ComputeSystemState) -> PublishReport {
        let event = StateChangeEvent::new(system, state);

        // Handlers are invoked outside the lock so they may (un)subscribe
        let handlers: Vec<_> = self.handlers.read().clone();
        let mut report = PublishReport::default();

        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler.on_state_changed(&event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(
                        subscription = id.0,
                        system = %event.system.id,
                        state = %event.state,
                        error = %e,
                        "State change handler failed"
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    error!(
                        subscription = id.0,
                        system = %event.system.id,
                        state = %event.state,
                        "State change handler panicked"
                    );
                }
            }
        }

        trace!(
            system = %event.system.id,
            state = %event.state,
            delivered = report.delivered,
            failed = report.failed,
            "Published state change"
        );
        report
    }
}

impl std::fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
