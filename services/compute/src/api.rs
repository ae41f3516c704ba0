//! HTTP API
//!
//! Thin JSON surface over [`ComputeSystemManager`] for dashboards and tooling.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::compute::{
    ComputeSystemManager, ComputeSystemsLoadedData, ComputeSystemsResult, EnumerationError,
    Identity, OperationView,
};

/// Results of one provider in API form
#[derive(Debug, Serialize)]
pub struct ProviderSystems {
    pub provider_id: String,
    pub display_name: String,
    pub identities: Vec<IdentitySystems>,
}

#[derive(Debug, Serialize)]
pub struct IdentitySystems {
    pub identity: Identity,
    #[serde(flatten)]
    pub result: ComputeSystemsResult,
}

impl From<ComputeSystemsLoadedData> for ProviderSystems {
    fn from(data: ComputeSystemsLoadedData) -> Self {
        let mut identities: Vec<IdentitySystems> = data
            .results
            .into_iter()
            .map(|(identity, result)| IdentitySystems { identity, result })
            .collect();
        identities.sort_by(|a, b| a.identity.id.cmp(&b.identity.id));

        Self {
            provider_id: data.provider.id().to_string(),
            display_name: data.provider.display_name().to_string(),
            identities,
        }
    }
}

pub fn router(manager: Arc<ComputeSystemManager>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/compute-systems", get(list_compute_systems))
        .route("/api/operations", get(list_operations))
        .route("/api/operations/:id", delete(cancel_operation))
        .layer(CorsLayer::permissive())
        .with_state(manager)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "lornu-compute",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn list_compute_systems(
    State(manager): State<Arc<ComputeSystemManager>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink = collected.clone();

    let outcome = manager
        .enumerate(move |data| sink.lock().push(ProviderSystems::from(data)))
        .await;

    let mut providers = std::mem::take(&mut *collected.lock());
    providers.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));

    match outcome {
        Ok(summary) => {
            info!(providers = providers.len(), "Served compute system listing");
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "status": "ok",
                    "providers": providers,
                    "summary": summary
                })),
            )
        }
        Err(EnumerationError::DeadlineExceeded { summary, .. }) => {
            warn!("Compute system listing timed out for every provider");
            (
                StatusCode::GATEWAY_TIMEOUT,
                Json(serde_json::json!({
                    "status": "error",
                    "message": "Enumeration deadline cancelled every provider",
                    "providers": providers,
                    "summary": summary
                })),
            )
        }
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({
                "status": "error",
                "message": e.to_string()
            })),
        ),
    }
}

async fn list_operations(
    State(manager): State<Arc<ComputeSystemManager>>,
) -> Json<serde_json::Value> {
    let operations: Vec<OperationView> = manager
        .list_operations()
        .iter()
        .map(|op| op.view())
        .collect();

    Json(serde_json::json!({
        "status": "ok",
        "operations": operations
    }))
}

/// Cancel and forget an operation; unknown ids are not an error
async fn cancel_operation(
    State(manager): State<Arc<ComputeSystemManager>>,
    Path(id): Path<Uuid>,
) -> StatusCode {
    if manager.cancel_operation(id) {
        info!(operation = %id, "Cancelled operation via API");
    }
    StatusCode::NO_CONTENT
}
