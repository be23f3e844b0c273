//! REST API handlers.
//!
//! Each handler calls one orchestrator operation and returns its result as
//! JSON. Lifecycle errors map onto HTTP statuses in [`status_of`].

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use databox_lifecycle::LifecycleError;
use databox_manifest::{DataboxType, Sla};
use databox_network::NetworkError;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

/// HTTP status for a failed lifecycle operation.
pub fn status_of(err: &LifecycleError) -> StatusCode {
    match err {
        LifecycleError::Manifest(_) => StatusCode::BAD_REQUEST,
        LifecycleError::NotInstalled(_) => StatusCode::NOT_FOUND,
        LifecycleError::AlreadyInstalled(_)
        | LifecycleError::Busy { .. }
        | LifecycleError::Network(NetworkError::TopologyConflict { .. }) => StatusCode::CONFLICT,
        LifecycleError::Network(NetworkError::NetworkUnavailable { .. }) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        LifecycleError::Backend(e) if e.is_not_found() => StatusCode::NOT_FOUND,
        LifecycleError::Network(_) | LifecycleError::Backend(_) | LifecycleError::Credential(_) => {
            StatusCode::BAD_GATEWAY
        }
        LifecycleError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn lifecycle_error(op: &str, err: LifecycleError) -> Response {
    let status = status_of(&err);
    if status.is_server_error() {
        warn!(op, error = %err, "request failed");
    }
    error_response(&err.to_string(), status)
}

// ── Workloads ──────────────────────────────────────────────────

/// Query of `GET /api/v1/workloads`.
#[derive(Debug, Default, Deserialize)]
pub struct WorkloadQuery {
    #[serde(rename = "type")]
    pub kind: Option<DataboxType>,
}

/// GET /api/v1/workloads
pub async fn list_workloads(
    State(state): State<ApiState>,
    Query(query): Query<WorkloadQuery>,
) -> Response {
    match state.engine.list_services(query.kind).await {
        Ok(services) => ApiResponse::ok(services).into_response(),
        Err(e) => lifecycle_error("list workloads", e),
    }
}

/// POST /api/v1/workloads
pub async fn install_workload(State(state): State<ApiState>, Json(sla): Json<Sla>) -> Response {
    match state.engine.install(sla).await {
        Ok(report) => (StatusCode::CREATED, ApiResponse::ok(report)).into_response(),
        Err(e) => lifecycle_error("install", e),
    }
}

/// DELETE /api/v1/workloads/{name}
pub async fn uninstall_workload(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Response {
    match state.engine.uninstall(&name).await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => lifecycle_error("uninstall", e),
    }
}

/// POST /api/v1/workloads/{name}/restart
pub async fn restart_workload(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Response {
    match state.engine.restart(&name).await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => lifecycle_error("restart", e),
    }
}

/// GET /api/v1/workloads/{name}/tasks
pub async fn list_tasks(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.engine.list_tasks(&name).await {
        Ok(tasks) => ApiResponse::ok(tasks).into_response(),
        Err(e) => lifecycle_error("list tasks", e),
    }
}

// ── Inventory ──────────────────────────────────────────────────

/// GET /api/v1/manifests
pub async fn list_manifests(State(state): State<ApiState>) -> Response {
    match state.engine.get_active_slas() {
        Ok(slas) => ApiResponse::ok(slas).into_response(),
        Err(e) => lifecycle_error("list manifests", e),
    }
}

/// GET /api/v1/containers
pub async fn list_containers(State(state): State<ApiState>) -> Response {
    match state.engine.list_containers().await {
        Ok(containers) => ApiResponse::ok(containers).into_response(),
        Err(e) => lifecycle_error("list containers", e),
    }
}

/// GET /api/v1/phases
pub async fn list_phases(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.engine.phases()).into_response()
}
