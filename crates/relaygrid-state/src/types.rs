//! Domain types for the relay registry.
//!
//! These types represent the persisted state of relay instances, workload
//! bindings and the fleet management mode, plus the short-lived per-zone
//! capacity aggregate computed once per scan pass.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Unique identifier for a relay instance.
pub type RelayId = String;

/// Unique identifier for a zone.
pub type ZoneId = String;

/// Unique identifier for a guest workload.
pub type WorkloadId = String;

// ── Relay ─────────────────────────────────────────────────────────

/// A long-lived worker that terminates remote-display sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayInstance {
    pub id: RelayId,
    pub zone_id: ZoneId,
    pub state: RelayState,
    /// State held when the current migration began.
    pub pre_migration_state: Option<RelayState>,
    /// Last known session count, as reported by the relay itself.
    pub active_sessions: u32,
    /// Raw status payload from the last successfully parsed report.
    pub status_payload: Option<String>,
    /// Unix millis when `status_payload` was received.
    pub status_received_at: Option<u64>,
    pub public_address: Option<String>,
    pub port: u16,
    pub tls_enabled: bool,
    /// Unix millis of the last assignment of a workload to this relay.
    pub last_assigned_at: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Lifecycle state of a relay instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// Agent lost; the instance is being fenced before a forced restart.
    Ha,
    Migrating,
    Destroyed,
}

impl RelayState {
    pub const ALL: [RelayState; 7] = [
        RelayState::Stopped,
        RelayState::Starting,
        RelayState::Running,
        RelayState::Stopping,
        RelayState::Ha,
        RelayState::Migrating,
        RelayState::Destroyed,
    ];

    /// Only running relays accept new sessions.
    pub fn is_assignable(self) -> bool {
        self == RelayState::Running
    }

    /// Starting or stopping.
    pub fn is_transitional(self) -> bool {
        matches!(self, RelayState::Starting | RelayState::Stopping)
    }

    pub fn is_terminal(self) -> bool {
        self == RelayState::Destroyed
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelayState::Stopped => "stopped",
            RelayState::Starting => "starting",
            RelayState::Running => "running",
            RelayState::Stopping => "stopping",
            RelayState::Ha => "ha",
            RelayState::Migrating => "migrating",
            RelayState::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

impl RelayInstance {
    /// A freshly provisioned relay, not yet started.
    pub fn new_stopped(id: &str, zone_id: &str, public_address: Option<String>, port: u16) -> Self {
        let now = now_millis();
        Self {
            id: id.to_string(),
            zone_id: zone_id.to_string(),
            state: RelayState::Stopped,
            pre_migration_state: None,
            active_sessions: 0,
            status_payload: None,
            status_received_at: None,
            public_address,
            port,
            tls_enabled: false,
            last_assigned_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ── Workloads ─────────────────────────────────────────────────────

/// Lifecycle phase of a guest workload requesting a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadPhase {
    Starting,
    Running,
    Stopping,
    Stopped,
    Migrating,
    Error,
    Destroyed,
    Expunging,
}

impl WorkloadPhase {
    /// Phases in which a workload may be given a relay.
    pub fn is_assignable(self) -> bool {
        matches!(
            self,
            WorkloadPhase::Starting
                | WorkloadPhase::Running
                | WorkloadPhase::Stopping
                | WorkloadPhase::Migrating
        )
    }
}

/// The caller's view of the workload being assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadRef {
    pub id: WorkloadId,
    pub phase: WorkloadPhase,
}

/// Which relay a workload was last given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadBinding {
    pub workload_id: WorkloadId,
    pub relay_id: Option<RelayId>,
    /// Unix millis of the last (re)binding.
    pub assigned_at: u64,
}

// ── Capacity ──────────────────────────────────────────────────────

/// Per-zone capacity aggregate. Derived from the registry, never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneCapacitySnapshot {
    pub zone_id: ZoneId,
    pub running_count: u32,
    /// Sum of active sessions across running relays.
    pub active_sessions: u64,
    /// Relays currently starting or stopping.
    pub transitional_count: u32,
    /// Relays in the stopped pool.
    pub stopped_count: u32,
    /// Every relay not yet destroyed.
    pub total_count: u32,
}

impl ZoneCapacitySnapshot {
    pub fn empty(zone_id: &str) -> Self {
        Self {
            zone_id: zone_id.to_string(),
            ..Self::default()
        }
    }
}

// ── Management ────────────────────────────────────────────────────

/// Operator-controlled mode gating the capacity control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagementState {
    Auto,
    Manual,
    Suspending,
    ResetSuspending,
}

impl fmt::Display for ManagementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ManagementState::Auto => "Auto",
            ManagementState::Manual => "Manual",
            ManagementState::Suspending => "Suspending",
            ManagementState::ResetSuspending => "ResetSuspending",
        };
        f.write_str(s)
    }
}

/// Persisted management mode with the mode it replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagementRecord {
    pub current: ManagementState,
    pub previous: ManagementState,
}

impl Default for ManagementRecord {
    fn default() -> Self {
        Self {
            current: ManagementState::Auto,
            previous: ManagementState::Auto,
        }
    }
}

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
