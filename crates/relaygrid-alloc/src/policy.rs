//! Selection policies over a zone's running pool.

use std::sync::Arc;

use relay_core::AllocationPolicyKind;
use relaygrid_state::RelayInstance;

/// Picks one relay from candidates that are all running and below capacity.
///
/// Candidates arrive in registry order.
pub trait AllocationPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn select<'a>(&self, candidates: &'a [RelayInstance]) -> Option<&'a RelayInstance>;
}

/// First eligible relay in registry order.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstFit;

impl AllocationPolicy for FirstFit {
    fn name(&self) -> &'static str {
        "first-fit"
    }

    fn select<'a>(&self, candidates: &'a [RelayInstance]) -> Option<&'a RelayInstance> {
        candidates.first()
    }
}

/// Relay with the fewest active sessions; ties go to registry order.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastLoaded;

impl AllocationPolicy for LeastLoaded {
    fn name(&self) -> &'static str {
        "least-loaded"
    }

    fn select<'a>(&self, candidates: &'a [RelayInstance]) -> Option<&'a RelayInstance> {
        // min_by_key keeps the first of equal elements.
        candidates.iter().min_by_key(|relay| relay.active_sessions)
    }
}

pub fn from_kind(kind: AllocationPolicyKind) -> Arc<dyn AllocationPolicy> {
    match kind {
        AllocationPolicyKind::FirstFit => Arc::new(FirstFit),
        AllocationPolicyKind::LeastLoaded => Arc::new(LeastLoaded),
    }
}
