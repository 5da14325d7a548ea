//! relaygrid-api — REST API for RelayGrid.
//!
//! Provides axum route handlers for relay assignment, relay administration,
//! the agent status channel and the fleet management mode.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/zones/{zone}/assign` | Assign a relay to a workload |
//! | GET | `/api/v1/zones/{zone}/relays` | List relays in a zone |
//! | POST | `/api/v1/relays/{id}/start` | Start a relay |
//! | POST | `/api/v1/relays/{id}/stop` | Stop a relay |
//! | POST | `/api/v1/relays/{id}/reboot` | Reboot a relay |
//! | DELETE | `/api/v1/relays/{id}` | Destroy a stopped relay |
//! | POST | `/api/v1/relays/{id}/status` | Push a status report |
//! | POST | `/api/v1/relays/{id}/disconnect` | Agent channel lost |
//! | POST | `/api/v1/relays/{id}/migration/start` | Migration began |
//! | POST | `/api/v1/relays/{id}/migration/complete` | Migration finished |
//! | GET | `/api/v1/management` | Current management mode |
//! | PUT | `/api/v1/management` | Switch management mode |
//! | POST | `/api/v1/management/resume` | Restore the previous mode |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;
pub mod metrics;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};

use relaygrid_alloc::{AllocationCoordinator, StatusReportHandler};
use relaygrid_lifecycle::LifecycleController;
use relaygrid_scan::ManagementController;
use relaygrid_state::RelayRegistry;

pub use metrics::{AssignCounters, render_prometheus};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registry: RelayRegistry,
    pub lifecycle: Arc<LifecycleController>,
    pub coordinator: Arc<AllocationCoordinator>,
    pub reports: StatusReportHandler,
    pub management: ManagementController,
    pub assigns: Arc<AssignCounters>,
}

impl ApiState {
    pub fn new(
        lifecycle: Arc<LifecycleController>,
        coordinator: Arc<AllocationCoordinator>,
        management: ManagementController,
    ) -> Self {
        let registry = lifecycle.registry().clone();
        Self {
            reports: StatusReportHandler::new(registry.clone()),
            registry,
            lifecycle,
            coordinator,
            management,
            assigns: Arc::new(AssignCounters::default()),
        }
    }
}

/// Build the complete API router (REST + metrics).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/zones/{zone}/assign", post(handlers::assign_relay))
        .route("/zones/{zone}/relays", get(handlers::list_relays))
        .route("/relays/{id}", delete(handlers::destroy_relay))
        .route("/relays/{id}/start", post(handlers::start_relay))
        .route("/relays/{id}/stop", post(handlers::stop_relay))
        .route("/relays/{id}/reboot", post(handlers::reboot_relay))
        .route("/relays/{id}/status", post(handlers::report_status))
        .route("/relays/{id}/disconnect", post(handlers::agent_disconnected))
        .route("/relays/{id}/migration/start", post(handlers::migration_started))
        .route("/relays/{id}/migration/complete", post(handlers::migration_completed))
        .route(
            "/management",
            get(handlers::get_management).put(handlers::set_management),
        )
        .route("/management/resume", post(handlers::resume_management))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
}
