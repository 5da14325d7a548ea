//! The provisioning seam.
//!
//! Everything that actually touches a worker instance (network setup,
//! image selection, credential injection, the agent channel) lives behind
//! [`Provisioner`]. The controller only decides *whether* an operation may
//! run; the provisioner decides *how*.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed future returned by every provisioner operation.
pub type ProvisionFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ProvisionError>> + Send + 'a>>;

/// What to launch when a zone needs a brand-new relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub template: String,
    pub offering: String,
    pub tls_enabled: bool,
}

/// Network identity handed out for a new relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedRelay {
    pub public_address: Option<String>,
    pub port: u16,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation} failed: {reason}")]
pub struct ProvisionError {
    pub operation: &'static str,
    pub reason: String,
}

impl ProvisionError {
    pub fn new(operation: &'static str, reason: impl Into<String>) -> Self {
        Self {
            operation,
            reason: reason.into(),
        }
    }
}

/// External worker-orchestration collaborator.
pub trait Provisioner: Send + Sync {
    /// Reserve resources and a network identity for `relay_id` in `zone_id`.
    fn allocate<'a>(
        &'a self,
        relay_id: &'a str,
        zone_id: &'a str,
        spec: &'a LaunchSpec,
    ) -> ProvisionFuture<'a, AllocatedRelay>;

    /// Boot the instance. Resolves once the relay agent reports in.
    fn start<'a>(&'a self, relay_id: &'a str) -> ProvisionFuture<'a, ()>;

    fn stop<'a>(&'a self, relay_id: &'a str) -> ProvisionFuture<'a, ()>;

    /// Release the instance and its network identity.
    fn destroy<'a>(&'a self, relay_id: &'a str) -> ProvisionFuture<'a, ()>;

    /// In-place reboot through the agent channel.
    fn reboot<'a>(&'a self, relay_id: &'a str) -> ProvisionFuture<'a, ()>;
}
