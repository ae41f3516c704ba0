//! Provider Fan-Out Coordinator
//!
//! Queries every (provider, identity) pair concurrently under one global
//! deadline and hands each provider's results to the caller as soon as that
//! provider finishes.
//!
//! - Different providers run concurrently, one task each.
//! - Identities of the same provider are queried one after another.
//! - A failing identity only fails its own result.
//! - When the deadline elapses the shared cancellation token fires; providers
//!   that observe it still report what they have, stragglers are aborted
//!   after a short grace window.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::providers::ProviderEntry;
use super::types::{ComputeSystemsLoadedData, ComputeSystemsResult};

/// Budget for one complete enumeration pass across all providers.
pub const DEFAULT_ENUMERATION_DEADLINE: Duration = Duration::from_secs(120);

/// How long providers get to observe cancellation before being aborted.
pub const DEFAULT_CANCELLATION_GRACE: Duration = Duration::from_secs(2);

/// Failure reason recorded for identities skipped after the deadline.
pub const CANCELLED_REASON: &str = "Enumeration deadline elapsed before this identity was queried";

/// Stand-in deadline when the configured one does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// What to report when the deadline cancels every provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeadlinePolicy {
    /// Never fail the call; the summary still records the cancellations
    BestEffort,
    /// Fail when at least one provider ran and all of them were cut off
    #[default]
    FailWhenAllCancelled,
}

/// Fan-out settings
#[derive(Debug, Clone)]
pub struct FanOutConfig {
    pub deadline: Duration,
    pub cancellation_grace: Duration,
    pub deadline_policy: DeadlinePolicy,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_ENUMERATION_DEADLINE,
            cancellation_grace: DEFAULT_CANCELLATION_GRACE,
            deadline_policy: DeadlinePolicy::default(),
        }
    }
}

impl FanOutConfig {
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn cancellation_grace(mut self, grace: Duration) -> Self {
        self.cancellation_grace = grace;
        self
    }

    pub fn deadline_policy(mut self, policy: DeadlinePolicy) -> Self {
        self.deadline_policy = policy;
        self
    }
}

/// How a single provider's task ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProviderOutcome {
    /// Every identity was queried
    Completed,
    /// The deadline fired while the provider was running; partial results were delivered
    Cancelled,
    /// Still running after the grace window; no results were delivered
    Aborted,
    /// The provider task panicked outside of an identity query
    Panicked { message: String },
}

impl ProviderOutcome {
    /// Whether the deadline cut this provider short
    pub fn is_deadline(&self) -> bool {
        matches!(self, ProviderOutcome::Cancelled | ProviderOutcome::Aborted)
    }
}

/// Per-provider diagnostics for one enumeration pass
#[derive(Debug, Clone, Serialize)]
pub struct ProviderReport {
    pub provider_id: String,
    #[serde(flatten)]
    pub outcome: ProviderOutcome,
    /// Identities with a recorded result
    pub identity_count: usize,
    /// Identities whose result is a failure
    pub failed_identities: usize,
    pub elapsed_ms: u64,
}

impl ProviderReport {
    fn without_results(provider_id: String, outcome: ProviderOutcome, elapsed: Duration) -> Self {
        Self {
            provider_id,
            outcome,
            identity_count: 0,
            failed_identities: 0,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

/// Result of one enumeration pass, in catalog order
#[derive(Debug, Clone, Serialize)]
pub struct EnumerationSummary {
    pub providers: Vec<ProviderReport>,
    pub deadline_elapsed: bool,
    pub elapsed_ms: u64,
}

impl EnumerationSummary {
    pub fn report(&self, provider_id: &str) -> Option<&ProviderReport> {
        self.providers.iter().find(|r| r.provider_id == provider_id)
    }

    /// Providers that did not finish cleanly or had failing identities
    pub fn failures(&self) -> impl Iterator<Item = &ProviderReport> {
        self.providers
            .iter()
            .filter(|r| r.outcome != ProviderOutcome::Completed || r.failed_identities > 0)
    }

    fn count(&self, pred: impl Fn(&ProviderOutcome) -> bool) -> usize {
        self.providers.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Errors surfaced by an enumeration pass
#[derive(Debug, Error)]
pub enum EnumerationError {
    /// The provider catalog could not be read
    #[error("Failed to fetch providers from catalog: {0:#}")]
    Catalog(anyhow::Error),

    /// The deadline cut off every provider
    #[error("Enumeration deadline of {deadline:?} cancelled all {providers} providers")]
    DeadlineExceeded {
        deadline: Duration,
        providers: usize,
        summary: EnumerationSummary,
    },
}

/// Runs one enumeration pass across a catalog snapshot
#[derive(Debug, Clone, Default)]
pub struct FanOutCoordinator {
    config: FanOutConfig,
}

impl FanOutCoordinator {
    pub fn new(config: FanOutConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FanOutConfig {
        &self.config
    }

    /// Query every provider in `entries` and invoke `on_provider_complete`
    /// once per provider as it finishes.
    ///
    /// Callback invocations are serialized but not ordered across providers.
    pub async fn enumerate<F>(
        &self,
        entries: Vec<ProviderEntry>,
        on_provider_complete: F,
    ) -> Result<EnumerationSummary, EnumerationError>
    where
        F: FnMut(ComputeSystemsLoadedData) + Send + 'static,
    {
        let started = Instant::now();
        let deadline = started
            .checked_add(self.config.deadline)
            .unwrap_or_else(|| started + FAR_FUTURE);
        let cancel = CancellationToken::new();
        let callback = Arc::new(Mutex::new(on_provider_complete));

        let entries = dedupe_providers(entries);
        let order: Vec<String> = entries.iter().map(|e| e.provider.id().to_string()).collect();

        info!(
            providers = entries.len(),
            deadline_secs = self.config.deadline.as_secs(),
            "Starting compute system enumeration"
        );

        let mut tasks = JoinSet::new();
        for entry in entries {
            let cancel = cancel.clone();
            let callback = callback.clone();
            let provider_id = entry.provider.id().to_string();

            tasks.spawn(async move {
                let task_started = Instant::now();
                match AssertUnwindSafe(run_provider(entry, cancel, callback))
                    .catch_unwind()
                    .await
                {
                    Ok(report) => report,
                    Err(panic) => {
                        let message = panic_message(&*panic);
                        error!(
                            provider = %provider_id,
                            panic = %message,
                            "Provider task panicked, treating provider as having no results"
                        );
                        ProviderReport::without_results(
                            provider_id,
                            ProviderOutcome::Panicked { message },
                            task_started.elapsed(),
                        )
                    }
                }
            });
        }

        let mut reports: HashMap<String, ProviderReport> = HashMap::new();

        let deadline_elapsed = tokio::time::timeout_at(deadline, drain(&mut tasks, &mut reports))
            .await
            .is_err();

        if deadline_elapsed {
            warn!(
                deadline_secs = self.config.deadline.as_secs(),
                in_flight = tasks.len(),
                "Enumeration deadline elapsed, cancelling in-flight provider queries"
            );
            cancel.cancel();

            let grace = self.config.cancellation_grace;
            if tokio::time::timeout(grace, drain(&mut tasks, &mut reports))
                .await
                .is_err()
            {
                warn!(
                    remaining = tasks.len(),
                    "Providers ignored cancellation, aborting their tasks"
                );
                tasks.abort_all();
                drain(&mut tasks, &mut reports).await;
            }
        }

        let elapsed = started.elapsed();
        let providers: Vec<ProviderReport> = order
            .into_iter()
            .map(|id| {
                reports.remove(&id).unwrap_or_else(|| {
                    warn!(provider = %id, "Provider aborted by enumeration deadline");
                    ProviderReport::without_results(id, ProviderOutcome::Aborted, elapsed)
                })
            })
            .collect();

        let summary = EnumerationSummary {
            providers,
            deadline_elapsed,
            elapsed_ms: elapsed.as_millis() as u64,
        };

        info!(
            providers = summary.providers.len(),
            completed = summary.count(|o| *o == ProviderOutcome::Completed),
            cancelled = summary.count(|o| *o == ProviderOutcome::Cancelled),
            aborted = summary.count(|o| *o == ProviderOutcome::Aborted),
            panicked = summary.count(|o| matches!(o, ProviderOutcome::Panicked { .. })),
            elapsed_ms = summary.elapsed_ms,
            "Compute system enumeration finished"
        );

        let all_cancelled = !summary.providers.is_empty()
            && summary.providers.iter().all(|r| r.outcome.is_deadline());

        if all_cancelled && self.config.deadline_policy == DeadlinePolicy::FailWhenAllCancelled {
            error!(
                providers = summary.providers.len(),
                "Enumeration deadline cancelled every provider"
            );
            return Err(EnumerationError::DeadlineExceeded {
                deadline: self.config.deadline,
                providers: summary.providers.len(),
                summary,
            });
        }

        Ok(summary)
    }
}

/// Keep the first entry for each provider id
fn dedupe_providers(entries: Vec<ProviderEntry>) -> Vec<ProviderEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|entry| {
            let fresh = seen.insert(entry.provider.id().to_string());
            if !fresh {
                warn!(
                    provider = %entry.provider.id(),
                    "Provider listed more than once in catalog, skipping duplicate"
                );
            }
            fresh
        })
        .collect()
}

/// Collect finished provider reports until the set is empty
async fn drain(tasks: &mut JoinSet<ProviderReport>, reports: &mut HashMap<String, ProviderReport>) {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(report) => {
                reports.insert(report.provider_id.clone(), report);
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => error!(error = %e, "Provider task failed to join"),
        }
    }
}

/// Query each identity of one provider in turn, then deliver the results
async fn run_provider<F>(
    entry: ProviderEntry,
    cancel: CancellationToken,
    callback: Arc<Mutex<F>>,
) -> ProviderReport
where
    F: FnMut(ComputeSystemsLoadedData) + Send,
{
    let started = Instant::now();
    let provider = entry.provider;
    let provider_id = provider.id().to_string();
    let mut data = ComputeSystemsLoadedData::new(provider.clone());
    let mut cancelled = false;

    for identity in entry.identities {
        if data.results.contains_key(&identity) {
            debug!(provider = %provider_id, identity = %identity, "Skipping duplicate identity");
            continue;
        }

        if cancel.is_cancelled() {
            cancelled = true;
            data.results
                .insert(identity, ComputeSystemsResult::failure(CANCELLED_REASON));
            continue;
        }

        let query = AssertUnwindSafe(provider.get_compute_systems(&identity, &cancel)).catch_unwind();
        let result = match query.await {
            Ok(Ok(systems)) => {
                debug!(
                    provider = %provider_id,
                    identity = %identity,
                    count = systems.len(),
                    "Loaded compute systems"
                );
                ComputeSystemsResult::success(systems)
            }
            Ok(Err(e)) => {
                if cancel.is_cancelled() {
                    cancelled = true;
                    warn!(
                        provider = %provider_id,
                        identity = %identity,
                        error = %e,
                        "Compute system query cancelled by enumeration deadline"
                    );
                } else {
                    warn!(
                        provider = %provider_id,
                        identity = %identity,
                        error = %e,
                        "Failed to get compute systems"
                    );
                }
                ComputeSystemsResult::failure(format!("{:#}", e))
            }
            Err(panic) => {
                let message = panic_message(&*panic);
                error!(
                    provider = %provider_id,
                    identity = %identity,
                    panic = %message,
                    "Compute system query panicked"
                );
                ComputeSystemsResult::failure(format!("Provider panicked: {}", message))
            }
        };

        data.results.insert(identity, result);
    }

    let identity_count = data.results.len();
    let failed_identities = data.failed().count();

    {
        let mut on_complete = callback.lock().await;
        (&mut *on_complete)(data);
    }

    ProviderReport {
        provider_id,
        outcome: if cancelled {
            ProviderOutcome::Cancelled
        } else {
            ProviderOutcome::Completed
        },
        identity_count,
        failed_identities,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
