//! Lifecycle error types.

use thiserror::Error;

use relaygrid_state::{RelayId, StateError};

use crate::provisioner::ProvisionError;
use crate::transitions::IllegalTransition;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("relay not found: {0}")]
    NotFound(RelayId),

    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),

    #[error("provisioning failed for relay {relay_id}: {source}")]
    ProvisioningFailure {
        relay_id: RelayId,
        #[source]
        source: ProvisionError,
    },

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

impl LifecycleError {
    pub(crate) fn provisioning(relay_id: &str, source: ProvisionError) -> Self {
        LifecycleError::ProvisioningFailure {
            relay_id: relay_id.to_string(),
            source,
        }
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
