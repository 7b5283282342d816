//! REST API Handlers
//!
//! JSON endpoints over the orchestrator operations. Backend creation takes
//! the raw driver config JSON, exactly what the orchestrator consumes.

use crate::core::Orchestrator;
use crate::error::Error;
use crate::storage::{Node, VolumeConfig};
use crate::storage_class::StorageClassConfig;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

// =============================================================================
// Request/Response Types
// =============================================================================

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
}

/// Volume resize request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeRequest {
    /// New size as a decimal string of bytes
    pub size: String,
}

/// Volume import request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub backend: String,
    #[serde(flatten)]
    pub config: VolumeConfig,
}

/// Snapshot creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRequest {
    pub name: String,
    pub volume: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

fn status_for_error(err: &Error) -> StatusCode {
    if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.is_invalid_input() {
        StatusCode::BAD_REQUEST
    } else if err.is_not_ready() {
        StatusCode::SERVICE_UNAVAILABLE
    } else if err.is_in_progress() || err.is_volume_exists() {
        StatusCode::CONFLICT
    } else if err.is_not_supported() {
        StatusCode::NOT_IMPLEMENTED
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn error_kind(err: &Error) -> &'static str {
    if err.is_not_found() {
        "not_found"
    } else if err.is_invalid_input() {
        "invalid_input"
    } else if err.is_not_ready() {
        "not_ready"
    } else if err.is_in_progress() {
        "in_progress"
    } else if err.is_volume_exists() {
        "already_exists"
    } else if err.is_not_supported() {
        "not_supported"
    } else {
        "internal"
    }
}

fn error_response(err: Error) -> Response {
    (
        status_for_error(&err),
        Json(ApiErrorResponse {
            error: error_kind(&err).to_string(),
            message: err.to_string(),
        }),
    )
        .into_response()
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    orchestrator: Arc<Orchestrator>,
}

impl RestRouter {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        Router::new()
            // Backend endpoints
            .route("/v1/backends", post(add_backend).get(list_backends))
            .route("/v1/backends/:name", get(get_backend).delete(delete_backend))
            .route("/v1/backends/:name/volumes", get(list_backend_volumes))
            // Volume endpoints
            .route("/v1/volumes", post(add_volume).get(list_volumes))
            .route("/v1/volumes/import", post(import_volume))
            .route("/v1/volumes/:name", get(get_volume).delete(delete_volume))
            .route("/v1/volumes/:name/resize", put(resize_volume))
            .route("/v1/volumes/:name/snapshots", get(list_volume_snapshots))
            // Snapshot endpoints
            .route("/v1/snapshots", post(create_snapshot).get(list_snapshots))
            .route("/v1/snapshots/:name", delete(delete_snapshot))
            // Storage class endpoints
            .route(
                "/v1/storageclasses",
                post(add_storage_class).get(list_storage_classes),
            )
            .route(
                "/v1/storageclasses/:name",
                get(get_storage_class).delete(delete_storage_class),
            )
            // Node endpoints
            .route("/v1/nodes", post(add_node).get(list_nodes))
            .route("/v1/nodes/:name", get(get_node).delete(delete_node))
            // Health and metrics
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics))
            .with_state(self.orchestrator)
    }
}

// =============================================================================
// Backend Handlers
// =============================================================================

async fn add_backend(
    State(orchestrator): State<Arc<Orchestrator>>,
    body: String,
) -> Response {
    match orchestrator.add_backend(&body).await {
        Ok(external) => (StatusCode::CREATED, Json(external)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_backend(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(name): Path<String>,
) -> Response {
    match orchestrator.get_backend(&name).await {
        Ok(external) => (StatusCode::OK, Json(external)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_backends(State(orchestrator): State<Arc<Orchestrator>>) -> Response {
    match orchestrator.list_backends().await {
        Ok(backends) => (StatusCode::OK, Json(backends)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_backend(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(name): Path<String>,
) -> Response {
    match orchestrator.delete_backend(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_backend_volumes(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(name): Path<String>,
) -> Response {
    match orchestrator.list_volumes_by_backend(&name).await {
        Ok(volumes) => (StatusCode::OK, Json(volumes)).into_response(),
        Err(e) => error_response(e),
    }
}

// =============================================================================
// Volume Handlers
// =============================================================================

async fn add_volume(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(config): Json<VolumeConfig>,
) -> Response {
    let clone = config.clone_source_volume.is_some();
    let result = if clone {
        orchestrator.clone_volume(config).await
    } else {
        orchestrator.add_volume(config).await
    };
    match result {
        Ok(external) => (StatusCode::CREATED, Json(external)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn import_volume(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<ImportRequest>,
) -> Response {
    match orchestrator
        .import_volume(request.config, &request.backend)
        .await
    {
        Ok(external) => (StatusCode::CREATED, Json(external)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_volume(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(name): Path<String>,
) -> Response {
    match orchestrator.get_volume(&name).await {
        Ok(external) => (StatusCode::OK, Json(external)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_volumes(State(orchestrator): State<Arc<Orchestrator>>) -> Response {
    match orchestrator.list_volumes().await {
        Ok(volumes) => (StatusCode::OK, Json(volumes)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_volume(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(name): Path<String>,
) -> Response {
    match orchestrator.delete_volume(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn resize_volume(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(name): Path<String>,
    Json(request): Json<ResizeRequest>,
) -> Response {
    match orchestrator.resize_volume(&name, &request.size).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

// =============================================================================
// Snapshot Handlers
// =============================================================================

async fn create_snapshot(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<SnapshotRequest>,
) -> Response {
    let config = match orchestrator.get_volume(&request.volume).await {
        Ok(external) => external.config,
        Err(e) => return error_response(e),
    };
    match orchestrator
        .create_volume_snapshot(&request.name, &config)
        .await
    {
        Ok(snapshot) => (StatusCode::CREATED, Json(snapshot)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_snapshots(State(orchestrator): State<Arc<Orchestrator>>) -> Response {
    match orchestrator.list_snapshots().await {
        Ok(snapshots) => (StatusCode::OK, Json(snapshots)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_volume_snapshots(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(name): Path<String>,
) -> Response {
    match orchestrator.list_volume_snapshots(&name).await {
        Ok(snapshots) => (StatusCode::OK, Json(snapshots)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_snapshot(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(name): Path<String>,
) -> Response {
    match orchestrator.delete_volume_snapshot(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

// =============================================================================
// Storage Class Handlers
// =============================================================================

async fn add_storage_class(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(config): Json<StorageClassConfig>,
) -> Response {
    match orchestrator.add_storage_class(config).await {
        Ok(external) => (StatusCode::CREATED, Json(external)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_storage_class(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(name): Path<String>,
) -> Response {
    match orchestrator.get_storage_class(&name).await {
        Ok(external) => (StatusCode::OK, Json(external)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_storage_classes(State(orchestrator): State<Arc<Orchestrator>>) -> Response {
    match orchestrator.list_storage_classes().await {
        Ok(classes) => (StatusCode::OK, Json(classes)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_storage_class(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(name): Path<String>,
) -> Response {
    match orchestrator.delete_storage_class(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

// =============================================================================
// Node Handlers
// =============================================================================

async fn add_node(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(node): Json<Node>,
) -> Response {
    info!(node = %node.name, "Node registration via REST");
    match orchestrator.add_node(node).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_node(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(name): Path<String>,
) -> Response {
    match orchestrator.get_node(&name).await {
        Ok(node) => (StatusCode::OK, Json(node)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_nodes(State(orchestrator): State<Arc<Orchestrator>>) -> Response {
    match orchestrator.list_nodes().await {
        Ok(nodes) => (StatusCode::OK, Json(nodes)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_node(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(name): Path<String>,
) -> Response {
    match orchestrator.delete_node(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

// =============================================================================
// Health and Metrics
// =============================================================================

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Ready once bootstrap has completed.
async fn readiness_check(State(orchestrator): State<Arc<Orchestrator>>) -> Response {
    match orchestrator.list_backends().await {
        Ok(_) => (StatusCode::OK, "ready").into_response(),
        Err(e) if e.is_not_ready() => {
            (StatusCode::SERVICE_UNAVAILABLE, "bootstrapping").into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn metrics() -> Response {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encoding failed: {}", e),
        )
            .into_response();
    }
    (
        StatusCode::OK,
        [("Content-Type", encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}
