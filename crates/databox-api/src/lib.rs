//! databox-api — REST surface of the container manager.
//!
//! Thin axum handlers over the lifecycle [`Orchestrator`]. Every response is
//! wrapped as `{ "success": bool, "data"?: …, "error"?: "…" }`.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/workloads[?type=app\|driver\|store]` | List workload services |
//! | POST | `/api/v1/workloads` | Install a workload from its manifest |
//! | DELETE | `/api/v1/workloads/{name}` | Uninstall a workload |
//! | POST | `/api/v1/workloads/{name}/restart` | Restart a workload's containers |
//! | GET | `/api/v1/workloads/{name}/tasks` | List a service's tasks |
//! | GET | `/api/v1/manifests` | Manifests of installed workloads |
//! | GET | `/api/v1/containers` | Workload containers |
//! | GET | `/api/v1/phases` | Lifecycle phase of every known workload |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use databox_lifecycle::Orchestrator;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<Orchestrator>,
}

/// Build the complete API router.
pub fn build_router(engine: Arc<Orchestrator>) -> Router {
    let state = ApiState { engine };

    let api_routes = Router::new()
        .route(
            "/workloads",
            get(handlers::list_workloads).post(handlers::install_workload),
        )
        .route("/workloads/{name}", delete(handlers::uninstall_workload))
        .route("/workloads/{name}/restart", post(handlers::restart_workload))
        .route("/workloads/{name}/tasks", get(handlers::list_tasks))
        .route("/manifests", get(handlers::list_manifests))
        .route("/containers", get(handlers::list_containers))
        .route("/phases", get(handlers::list_phases))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
