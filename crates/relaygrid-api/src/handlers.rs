//! REST API handlers.
//!
//! Handlers delegate to the coordinator, the lifecycle controller and the
//! management controller, and return JSON responses. Failures carry a
//! stable `code` next to the human-readable `error`.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::debug;

use relaygrid_alloc::{AllocError, ReportOutcome};
use relaygrid_lifecycle::LifecycleError;
use relaygrid_state::*;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        })
    }
}

fn error_response(msg: &str, code: &'static str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
            code: Some(code),
        }),
    )
}

fn state_error(e: &StateError) -> axum::response::Response {
    error_response(&e.to_string(), "state_error", StatusCode::INTERNAL_SERVER_ERROR).into_response()
}

fn alloc_error(e: &AllocError) -> axum::response::Response {
    let status = match e {
        AllocError::NotAssignable { .. } => StatusCode::CONFLICT,
        AllocError::LockTimeout(_) | AllocError::CapacityExhausted(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        AllocError::NoPublicAddress(_) => StatusCode::BAD_GATEWAY,
        AllocError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), e.code(), status).into_response()
}

fn lifecycle_error(e: &LifecycleError) -> axum::response::Response {
    let (code, status) = match e {
        LifecycleError::NotFound(_) => ("not_found", StatusCode::NOT_FOUND),
        LifecycleError::IllegalTransition(_) => ("illegal_transition", StatusCode::CONFLICT),
        LifecycleError::ProvisioningFailure { .. } => ("provisioning_failure", StatusCode::BAD_GATEWAY),
        LifecycleError::State(StateError::RelayNotFound(_)) => ("not_found", StatusCode::NOT_FOUND),
        LifecycleError::State(_) => ("state_error", StatusCode::INTERNAL_SERVER_ERROR),
    };
    error_response(&e.to_string(), code, status).into_response()
}

// ── Assignment ──────────────────────────────────────────────────

/// POST /api/v1/zones/:zone/assign
pub async fn assign_relay(
    State(state): State<ApiState>,
    Path(zone): Path<String>,
    Json(workload): Json<WorkloadRef>,
) -> impl IntoResponse {
    let result = state.coordinator.assign(&zone, &workload).await;
    state.assigns.record(&result);
    match result {
        Ok(endpoint) => ApiResponse::ok(endpoint).into_response(),
        Err(e) => alloc_error(&e),
    }
}

/// GET /api/v1/zones/:zone/relays
pub async fn list_relays(
    State(state): State<ApiState>,
    Path(zone): Path<String>,
) -> impl IntoResponse {
    match state.lifecycle.list(Some(&zone)) {
        Ok(relays) => ApiResponse::ok(relays).into_response(),
        Err(e) => lifecycle_error(&e),
    }
}

// ── Relay administration ───────────────────────────────────────

/// POST /api/v1/relays/:id/start
pub async fn start_relay(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.lifecycle.start(&id).await {
        Ok(relay) => ApiResponse::ok(relay).into_response(),
        Err(e) => lifecycle_error(&e),
    }
}

/// POST /api/v1/relays/:id/stop
pub async fn stop_relay(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.lifecycle.stop(&id).await {
        Ok(relay) => ApiResponse::ok(relay).into_response(),
        Err(e) => lifecycle_error(&e),
    }
}

/// POST /api/v1/relays/:id/reboot
pub async fn reboot_relay(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.lifecycle.reboot(&id).await {
        Ok(relay) => ApiResponse::ok(relay).into_response(),
        Err(e) => lifecycle_error(&e),
    }
}

/// DELETE /api/v1/relays/:id
pub async fn destroy_relay(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.lifecycle.destroy(&id).await {
        Ok(()) => ApiResponse::ok("destroyed").into_response(),
        Err(e) => lifecycle_error(&e),
    }
}

// ── Agent channel ──────────────────────────────────────────────

/// POST /api/v1/relays/:id/status
///
/// The body is the relay's raw status payload. Unusable payloads are
/// answered with 422 and leave the previous counters in place.
pub async fn report_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: String,
) -> impl IntoResponse {
    match state.reports.apply(&id, &body) {
        Ok(outcome @ ReportOutcome::Applied { .. }) => ApiResponse::ok(outcome).into_response(),
        Ok(ReportOutcome::Rejected { reason }) => {
            error_response(&reason, "malformed_status", StatusCode::UNPROCESSABLE_ENTITY)
                .into_response()
        }
        Ok(ReportOutcome::UnknownRelay) => {
            error_response("relay not found", "not_found", StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => state_error(&e),
    }
}

/// POST /api/v1/relays/:id/disconnect
pub async fn agent_disconnected(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.lifecycle.agent_disconnected(&id).await {
        Ok(relay) => ApiResponse::ok(relay).into_response(),
        Err(e) => lifecycle_error(&e),
    }
}

/// POST /api/v1/relays/:id/migration/start
pub async fn migration_started(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.lifecycle.migration_started(&id) {
        Ok(relay) => ApiResponse::ok(relay).into_response(),
        Err(e) => lifecycle_error(&e),
    }
}

/// POST /api/v1/relays/:id/migration/complete
pub async fn migration_completed(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.lifecycle.migration_completed(&id) {
        Ok(relay) => ApiResponse::ok(relay).into_response(),
        Err(e) => lifecycle_error(&e),
    }
}

// ── Management ─────────────────────────────────────────────────

/// Management mode request body.
#[derive(serde::Deserialize)]
pub struct ManagementRequest {
    pub state: ManagementState,
}

/// GET /api/v1/management
pub async fn get_management(State(state): State<ApiState>) -> impl IntoResponse {
    match state.management.get() {
        Ok(record) => ApiResponse::ok(record).into_response(),
        Err(e) => state_error(&e),
    }
}

/// PUT /api/v1/management
pub async fn set_management(
    State(state): State<ApiState>,
    Json(req): Json<ManagementRequest>,
) -> impl IntoResponse {
    match state.management.set(req.state) {
        Ok(record) => ApiResponse::ok(record).into_response(),
        Err(e) => state_error(&e),
    }
}

/// POST /api/v1/management/resume
pub async fn resume_management(State(state): State<ApiState>) -> impl IntoResponse {
    match state.management.resume() {
        Ok(record) => ApiResponse::ok(record).into_response(),
        Err(e) => state_error(&e),
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let mut zones: Vec<ZoneCapacitySnapshot> = state
        .registry
        .zone_capacity_snapshots()
        .map(|snapshots| snapshots.into_values().collect())
        .unwrap_or_else(|e| {
            debug!(error = %e, "capacity snapshot unavailable for metrics");
            Vec::new()
        });
    zones.sort_by(|a, b| a.zone_id.cmp(&b.zone_id));
    let management = state.management.get().unwrap_or_default();

    let body = crate::render_prometheus(&zones, &management, &state.assigns);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use relay_core::{AllocationLock, FleetConfig};
    use relaygrid_alloc::AllocationCoordinator;
    use relaygrid_lifecycle::{EventBus, LifecycleController, LocalProvisioner};
    use relaygrid_scan::ManagementController;

    use super::*;

    fn test_state() -> ApiState {
        let registry = RelayRegistry::open_in_memory().unwrap();
        let lifecycle = Arc::new(LifecycleController::new(
            registry.clone(),
            Arc::new(LocalProvisioner::new()),
            EventBus::default(),
        ));
        let coordinator = Arc::new(AllocationCoordinator::new(
            registry.clone(),
            AllocationLock::new(),
            &FleetConfig::default(),
        ));
        let management = ManagementController::new(registry, Arc::clone(&lifecycle));
        ApiState::new(lifecycle, coordinator, management)
    }

    fn put_relay(state: &ApiState, id: &str, relay_state: RelayState) {
        let mut relay =
            RelayInstance::new_stopped(id, "zone-a", Some("10.0.0.1".to_string()), 8080);
        relay.state = relay_state;
        state.registry.put_relay(&relay).unwrap();
    }

    fn workload(phase: WorkloadPhase) -> WorkloadRef {
        WorkloadRef {
            id: "vm-1".to_string(),
            phase,
        }
    }

    #[tokio::test]
    async fn assign_returns_endpoint() {
        let state = test_state();
        put_relay(&state, "r1", RelayState::Running);

        let resp = assign_relay(
            State(state.clone()),
            Path("zone-a".to_string()),
            Json(workload(WorkloadPhase::Running)),
        )
        .await;
        let resp = resp.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.assigns.get("ok"), 1);
    }

    #[tokio::test]
    async fn assign_non_assignable_is_conflict() {
        let state = test_state();
        put_relay(&state, "r1", RelayState::Running);

        let resp = assign_relay(
            State(state.clone()),
            Path("zone-a".to_string()),
            Json(workload(WorkloadPhase::Stopped)),
        )
        .await;
        let resp = resp.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert!(state.registry.get_binding("vm-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn assign_empty_zone_is_unavailable() {
        let state = test_state();
        let resp = assign_relay(
            State(state.clone()),
            Path("zone-a".to_string()),
            Json(workload(WorkloadPhase::Running)),
        )
        .await;
        let resp = resp.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.assigns.get("capacity_exhausted"), 1);
    }

    #[tokio::test]
    async fn list_relays_in_zone() {
        let state = test_state();
        put_relay(&state, "r1", RelayState::Stopped);
        let resp = list_relays(State(state), Path("zone-a".to_string())).await;
        let resp = resp.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn start_unknown_relay_is_not_found() {
        let state = test_state();
        let resp = start_relay(State(state), Path("ghost".to_string())).await;
        let resp = resp.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn destroy_running_relay_is_conflict() {
        let state = test_state();
        put_relay(&state, "r1", RelayState::Running);
        let resp = destroy_relay(State(state.clone()), Path("r1".to_string())).await;
        let resp = resp.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert!(state.registry.get_relay("r1").unwrap().is_some());
    }

    #[tokio::test]
    async fn start_then_stop_relay() {
        let state = test_state();
        put_relay(&state, "r1", RelayState::Stopped);

        let resp = start_relay(State(state.clone()), Path("r1".to_string())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        assert_eq!(state.registry.require_relay("r1").unwrap().state, RelayState::Running);

        let resp = stop_relay(State(state.clone()), Path("r1".to_string())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        assert_eq!(state.registry.require_relay("r1").unwrap().state, RelayState::Stopped);
    }

    #[tokio::test]
    async fn status_report_outcomes() {
        let state = test_state();
        put_relay(&state, "r1", RelayState::Running);

        let ok = report_status(
            State(state.clone()),
            Path("r1".to_string()),
            r#"{"activeConnections":[{"tag":"vm-1"}]}"#.to_string(),
        )
        .await;
        assert_eq!(ok.into_response().status(), StatusCode::OK);

        let bad = report_status(State(state.clone()), Path("r1".to_string()), "nope".to_string()).await;
        assert_eq!(bad.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);

        let unknown = report_status(
            State(state.clone()),
            Path("ghost".to_string()),
            r#"{"activeConnections":[]}"#.to_string(),
        )
        .await;
        assert_eq!(unknown.into_response().status(), StatusCode::NOT_FOUND);

        assert_eq!(state.registry.require_relay("r1").unwrap().active_sessions, 1);
    }

    #[tokio::test]
    async fn management_round_trip() {
        let state = test_state();
        let resp = set_management(
            State(state.clone()),
            Json(ManagementRequest {
                state: ManagementState::Manual,
            }),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        assert_eq!(state.management.get().unwrap().current, ManagementState::Manual);

        let resp = resume_management(State(state.clone())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        assert_eq!(state.management.get().unwrap().current, ManagementState::Auto);

        let resp = get_management(State(state)).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn migration_hooks() {
        let state = test_state();
        put_relay(&state, "r1", RelayState::Running);

        let resp = migration_started(State(state.clone()), Path("r1".to_string())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        assert_eq!(state.registry.require_relay("r1").unwrap().state, RelayState::Migrating);

        let resp = migration_completed(State(state.clone()), Path("r1".to_string())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        assert_eq!(state.registry.require_relay("r1").unwrap().state, RelayState::Running);
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let state = test_state();
        let resp = prometheus_metrics(State(state)).await;
        let resp = resp.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }
}
