//! Status-report handler.
//!
//! Relays push their connection list over the agent channel. Reports are
//! applied without the allocation lock: the counters are eventually
//! consistent and the coordinator tolerates a slightly stale view.

use serde::Serialize;
use tracing::{debug, warn};

use relaygrid_state::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReportOutcome {
    /// Counters updated; `released` bindings were dropped for expired tags.
    Applied { sessions: u32, released: u32 },
    /// Payload unusable; previous counters kept.
    Rejected { reason: String },
    /// The reporting relay is not in the registry.
    UnknownRelay,
}

#[derive(Clone)]
pub struct StatusReportHandler {
    registry: RelayRegistry,
}

impl StatusReportHandler {
    pub fn new(registry: RelayRegistry) -> Self {
        Self { registry }
    }

    /// Apply one raw report from `relay_id`. Last write wins.
    pub fn apply(&self, relay_id: &str, raw: &str) -> StateResult<ReportOutcome> {
        let report = match StatusReport::parse(raw) {
            Ok(report) => report,
            Err(e) => {
                warn!(relay = %relay_id, error = %e, "discarding status report");
                return Ok(ReportOutcome::Rejected {
                    reason: e.to_string(),
                });
            }
        };

        let sessions = report.connection_count();
        let received_at = now_millis();
        let updated = self.registry.update_relay(relay_id, |relay| {
            relay.active_sessions = sessions;
            relay.status_payload = Some(raw.to_string());
            relay.status_received_at = Some(received_at);
        });
        match updated {
            Ok(_) => {}
            Err(StateError::RelayNotFound(_)) => {
                debug!(relay = %relay_id, "status report from unknown relay");
                return Ok(ReportOutcome::UnknownRelay);
            }
            Err(e) => return Err(e),
        }

        let released = if report.expired_tags.is_empty() {
            0
        } else {
            self.registry.release_bindings(relay_id, &report.expired_tags)?
        };

        debug!(relay = %relay_id, sessions, released, "status report applied");
        Ok(ReportOutcome::Applied { sessions, released })
    }
}
