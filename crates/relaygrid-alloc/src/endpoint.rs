//! Client-facing endpoint for an assigned relay.

use serde::{Deserialize, Serialize};

use relay_core::EndpointConfig;
use relaygrid_state::{RelayId, RelayInstance};

use crate::error::{AllocError, AllocResult};

/// Where a client should connect for its remote-display session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEndpoint {
    pub relay_id: RelayId,
    pub host: String,
    /// Client-facing port.
    pub port: u16,
    /// Port of the relay's remote-display listener.
    pub console_port: u16,
    pub tls: bool,
    pub url_domain: Option<String>,
}

impl RelayEndpoint {
    /// Build the endpoint for `relay`. A relay without a public address
    /// cannot be reached and is rejected.
    pub fn for_relay(relay: &RelayInstance, config: &EndpointConfig) -> AllocResult<Self> {
        let Some(public_address) = relay.public_address.as_deref() else {
            return Err(AllocError::NoPublicAddress(relay.id.clone()));
        };

        let (host, port) = match config.static_public_address.as_deref() {
            Some(fixed) => (fixed.to_string(), config.static_port),
            None => {
                let port = if config.tls_enabled { 443 } else { 80 };
                (public_address.to_string(), port)
            }
        };

        Ok(Self {
            relay_id: relay.id.clone(),
            host,
            port,
            console_port: config.console_port,
            tls: config.tls_enabled,
            url_domain: config.url_domain.clone(),
        })
    }
}
