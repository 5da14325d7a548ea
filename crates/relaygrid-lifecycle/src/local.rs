//! In-process provisioner for standalone mode and tests.
//!
//! Hands out addresses from `10.240.0.0/16`, optionally sleeps on start to
//! imitate boot time, and can be told to fail upcoming operations.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tracing::debug;

use crate::provisioner::{AllocatedRelay, LaunchSpec, ProvisionError, ProvisionFuture, Provisioner};

#[derive(Debug, Default)]
pub struct LocalProvisioner {
    start_delay: Duration,
    relay_port: u16,
    next_host: AtomicU32,
    pending_start_failures: AtomicU32,
    fail_allocations: AtomicBool,
    omit_public_address: AtomicBool,
    allocations: AtomicU32,
    starts: AtomicU32,
    stops: AtomicU32,
    destroys: AtomicU32,
    reboots: AtomicU32,
}

impl LocalProvisioner {
    pub fn new() -> Self {
        Self {
            relay_port: 8080,
            ..Self::default()
        }
    }

    /// Sleep for `delay` inside every `start`.
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn with_relay_port(mut self, port: u16) -> Self {
        self.relay_port = port;
        self
    }

    /// Make the next `n` starts fail.
    pub fn fail_next_starts(&self, n: u32) {
        self.pending_start_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::SeqCst);
    }

    /// Allocate relays without a public address.
    pub fn set_omit_public_address(&self, omit: bool) {
        self.omit_public_address.store(omit, Ordering::SeqCst);
    }

    pub fn allocation_count(&self) -> u32 {
        self.allocations.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn destroy_count(&self) -> u32 {
        self.destroys.load(Ordering::SeqCst)
    }

    pub fn reboot_count(&self) -> u32 {
        self.reboots.load(Ordering::SeqCst)
    }

    fn take_start_failure(&self) -> bool {
        self.pending_start_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Provisioner for LocalProvisioner {
    fn allocate<'a>(
        &'a self,
        relay_id: &'a str,
        zone_id: &'a str,
        spec: &'a LaunchSpec,
    ) -> ProvisionFuture<'a, AllocatedRelay> {
        Box::pin(async move {
            if self.fail_allocations.load(Ordering::SeqCst) {
                return Err(ProvisionError::new("allocate", "no capacity left in zone"));
            }
            self.allocations.fetch_add(1, Ordering::SeqCst);
            let host = self.next_host.fetch_add(1, Ordering::SeqCst) + 1;
            let public_address = if self.omit_public_address.load(Ordering::SeqCst) {
                None
            } else {
                Some(format!("10.240.{}.{}", host / 256, host % 256))
            };
            debug!(
                relay = %relay_id,
                zone = %zone_id,
                template = %spec.template,
                address = ?public_address,
                "local relay allocated"
            );
            Ok(AllocatedRelay {
                public_address,
                port: self.relay_port,
            })
        })
    }

    fn start<'a>(&'a self, relay_id: &'a str) -> ProvisionFuture<'a, ()> {
        Box::pin(async move {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if !self.start_delay.is_zero() {
                tokio::time::sleep(self.start_delay).await;
            }
            if self.take_start_failure() {
                return Err(ProvisionError::new("start", "relay agent never reported in"));
            }
            debug!(relay = %relay_id, "local relay started");
            Ok(())
        })
    }

    fn stop<'a>(&'a self, relay_id: &'a str) -> ProvisionFuture<'a, ()> {
        Box::pin(async move {
            self.stops.fetch_add(1, Ordering::SeqCst);
            debug!(relay = %relay_id, "local relay stopped");
            Ok(())
        })
    }

    fn destroy<'a>(&'a self, relay_id: &'a str) -> ProvisionFuture<'a, ()> {
        Box::pin(async move {
            self.destroys.fetch_add(1, Ordering::SeqCst);
            debug!(relay = %relay_id, "local relay destroyed");
            Ok(())
        })
    }

    fn reboot<'a>(&'a self, relay_id: &'a str) -> ProvisionFuture<'a, ()> {
        Box::pin(async move {
            self.reboots.fetch_add(1, Ordering::SeqCst);
            debug!(relay = %relay_id, "local relay rebooted");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> LaunchSpec {
        LaunchSpec {
            template: "t".to_string(),
            offering: "o".to_string(),
            tls_enabled: false,
        }
    }

    #[tokio::test]
    async fn allocations_get_distinct_addresses() {
        let provisioner = LocalProvisioner::new();
        let a = provisioner.allocate("r1", "z", &spec()).await.unwrap();
        let b = provisioner.allocate("r2", "z", &spec()).await.unwrap();
        assert_ne!(a.public_address, b.public_address);
        assert_eq!(a.port, 8080);
        assert_eq!(provisioner.allocation_count(), 2);
    }

    #[tokio::test]
    async fn injected_start_failures_are_consumed() {
        let provisioner = LocalProvisioner::new();
        provisioner.fail_next_starts(1);

        assert!(provisioner.start("r1").await.is_err());
        assert!(provisioner.start("r1").await.is_ok());
        assert_eq!(provisioner.start_count(), 2);
    }

    #[tokio::test]
    async fn omitted_public_address() {
        let provisioner = LocalProvisioner::new();
        provisioner.set_omit_public_address(true);
        let relay = provisioner.allocate("r1", "z", &spec()).await.unwrap();
        assert!(relay.public_address.is_none());
    }
}
