//! Sticky-session evaluation.
//!
//! A workload that still has (or very recently had) a session on its
//! previous relay should go back there even when that relay is at capacity,
//! otherwise the client would be bounced between relays mid-session.

use std::time::Duration;

use tracing::debug;

use relaygrid_state::{RelayInstance, StatusReport, WorkloadBinding};

#[derive(Debug, Clone, Copy)]
pub struct StickyEvaluator {
    timeout_ms: u64,
}

impl StickyEvaluator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Whether `binding`'s workload has a session on `relay` worth keeping.
    ///
    /// A connection tagged with the workload in the relay's last report is
    /// conclusive. Without a usable report the binding is trusted for the
    /// sticky window after it was made. A report received after the
    /// binding that does not list the workload means the session is gone.
    pub fn has_previous_session(&self, relay: &RelayInstance, binding: &WorkloadBinding, now_ms: u64) -> bool {
        let within_window = now_ms.saturating_sub(binding.assigned_at) < self.timeout_ms;

        let Some(raw) = relay.status_payload.as_deref() else {
            return within_window;
        };

        match StatusReport::parse(raw) {
            Ok(report) if report.has_connection_for(&binding.workload_id) => true,
            Ok(_) => match relay.status_received_at {
                Some(received_at) if received_at >= binding.assigned_at => false,
                // Report predates the binding; the client may not have connected yet.
                _ => within_window,
            },
            Err(e) => {
                debug!(relay = %relay.id, error = %e, "unusable status payload, using sticky window");
                within_window
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_000_000;

    fn evaluator() -> StickyEvaluator {
        StickyEvaluator::new(Duration::from_secs(300))
    }

    fn relay_with(payload: Option<&str>, received_at: Option<u64>) -> RelayInstance {
        let mut relay = RelayInstance::new_stopped("relay-1", "zone-a", Some("198.51.100.1".into()), 8080);
        relay.status_payload = payload.map(str::to_string);
        relay.status_received_at = received_at;
        relay
    }

    fn binding(assigned_at: u64) -> WorkloadBinding {
        WorkloadBinding {
            workload_id: "vm-7".to_string(),
            relay_id: Some("relay-1".to_string()),
            assigned_at,
        }
    }

    #[test]
    fn tagged_connection_is_conclusive() {
        let relay = relay_with(Some(r#"{"activeConnections":[{"tag":"vm-7"}]}"#), Some(NOW));
        // Even long after the window.
        assert!(evaluator().has_previous_session(&relay, &binding(0), NOW));
    }

    #[test]
    fn missing_payload_uses_window() {
        let relay = relay_with(None, None);
        assert!(evaluator().has_previous_session(&relay, &binding(NOW - 1_000), NOW));
        assert!(!evaluator().has_previous_session(&relay, &binding(NOW - 300_000), NOW));
    }

    #[test]
    fn unparsable_payload_uses_window() {
        let relay = relay_with(Some("{garbage"), Some(NOW));
        assert!(evaluator().has_previous_session(&relay, &binding(NOW - 10), NOW));
        assert!(!evaluator().has_previous_session(&relay, &binding(NOW - 400_000), NOW));
    }

    #[test]
    fn fresh_report_without_tag_means_no_session() {
        let relay = relay_with(Some(r#"{"activeConnections":[{"tag":"vm-other"}]}"#), Some(NOW - 5));
        assert!(!evaluator().has_previous_session(&relay, &binding(NOW - 10), NOW));
    }

    #[test]
    fn stale_report_without_tag_uses_window() {
        let relay = relay_with(Some(r#"{"activeConnections":[]}"#), Some(NOW - 50));
        assert!(evaluator().has_previous_session(&relay, &binding(NOW - 10), NOW));
    }
}
