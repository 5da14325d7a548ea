//! Allocation error types.

use thiserror::Error;

use relay_core::LockTimeout;
use relaygrid_state::{RelayId, StateError, WorkloadId, WorkloadPhase, ZoneId};

#[derive(Debug, Error)]
pub enum AllocError {
    #[error("workload {workload_id} is {phase:?} and cannot be given a relay")]
    NotAssignable {
        workload_id: WorkloadId,
        phase: WorkloadPhase,
    },

    #[error("allocation lock busy: {0}")]
    LockTimeout(#[from] LockTimeout),

    #[error("no relay capacity available in zone {0}")]
    CapacityExhausted(ZoneId),

    #[error("relay {0} has no public address")]
    NoPublicAddress(RelayId),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

impl AllocError {
    /// Stable machine-readable code, used by the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            AllocError::NotAssignable { .. } => "not_assignable",
            AllocError::LockTimeout(_) => "lock_timeout",
            AllocError::CapacityExhausted(_) => "capacity_exhausted",
            AllocError::NoPublicAddress(_) => "no_public_address",
            AllocError::State(_) => "state_error",
        }
    }
}

pub type AllocResult<T> = Result<T, AllocError>;
