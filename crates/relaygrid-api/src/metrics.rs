//! Prometheus text exposition format.
//!
//! Renders per-zone capacity aggregates, the management mode and the
//! assignment outcome counters for scraping by a Prometheus server or
//! compatible agent.

use std::sync::atomic::{AtomicU64, Ordering};

use relaygrid_alloc::AllocError;
use relaygrid_state::{ManagementRecord, ManagementState, ZoneCapacitySnapshot};

/// `outcome` label values for `relaygrid_assign_total`.
const OUTCOMES: [&str; 6] = [
    "ok",
    "not_assignable",
    "lock_timeout",
    "capacity_exhausted",
    "no_public_address",
    "state_error",
];

const MANAGEMENT_STATES: [ManagementState; 4] = [
    ManagementState::Auto,
    ManagementState::Manual,
    ManagementState::Suspending,
    ManagementState::ResetSuspending,
];

/// Assign outcomes since process start.
#[derive(Debug, Default)]
pub struct AssignCounters {
    counts: [AtomicU64; OUTCOMES.len()],
}

impl AssignCounters {
    pub fn record<T>(&self, result: &Result<T, AllocError>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => e.code(),
        };
        if let Some(slot) = OUTCOMES.iter().position(|o| *o == outcome) {
            self.counts[slot].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get(&self, outcome: &str) -> u64 {
        OUTCOMES
            .iter()
            .position(|o| *o == outcome)
            .map(|slot| self.counts[slot].load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

/// Render fleet metrics into Prometheus text format.
///
/// Zone gauges carry a `zone` label; snapshots are rendered in the order
/// given.
pub fn render_prometheus(
    zones: &[ZoneCapacitySnapshot],
    management: &ManagementRecord,
    assigns: &AssignCounters,
) -> String {
    let mut out = String::new();

    out.push_str("# HELP relaygrid_zone_running_relays Relays in the Running state.\n");
    out.push_str("# TYPE relaygrid_zone_running_relays gauge\n");
    for z in zones {
        out.push_str(&format!(
            "relaygrid_zone_running_relays{{zone=\"{}\"}} {}\n",
            z.zone_id, z.running_count
        ));
    }

    out.push_str("# HELP relaygrid_zone_active_sessions Sessions reported by running relays.\n");
    out.push_str("# TYPE relaygrid_zone_active_sessions gauge\n");
    for z in zones {
        out.push_str(&format!(
            "relaygrid_zone_active_sessions{{zone=\"{}\"}} {}\n",
            z.zone_id, z.active_sessions
        ));
    }

    out.push_str("# HELP relaygrid_zone_transitional_relays Relays starting or stopping.\n");
    out.push_str("# TYPE relaygrid_zone_transitional_relays gauge\n");
    for z in zones {
        out.push_str(&format!(
            "relaygrid_zone_transitional_relays{{zone=\"{}\"}} {}\n",
            z.zone_id, z.transitional_count
        ));
    }

    out.push_str("# HELP relaygrid_zone_stopped_relays Relays in the stopped pool.\n");
    out.push_str("# TYPE relaygrid_zone_stopped_relays gauge\n");
    for z in zones {
        out.push_str(&format!(
            "relaygrid_zone_stopped_relays{{zone=\"{}\"}} {}\n",
            z.zone_id, z.stopped_count
        ));
    }

    out.push_str("# HELP relaygrid_management_state Current management mode (1 = active).\n");
    out.push_str("# TYPE relaygrid_management_state gauge\n");
    for state in MANAGEMENT_STATES {
        out.push_str(&format!(
            "relaygrid_management_state{{state=\"{}\"}} {}\n",
            state,
            u8::from(management.current == state)
        ));
    }

    out.push_str("# HELP relaygrid_assign_total Relay assignment requests by outcome.\n");
    out.push_str("# TYPE relaygrid_assign_total counter\n");
    for outcome in OUTCOMES {
        out.push_str(&format!(
            "relaygrid_assign_total{{outcome=\"{}\"}} {}\n",
            outcome,
            assigns.get(outcome)
        ));
    }

    out
}
