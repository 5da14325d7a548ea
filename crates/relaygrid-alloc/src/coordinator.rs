//! Allocation coordinator.
//!
//! `assign` runs entirely under the allocation lock:
//!
//! 1. reuse the workload's previous relay if it is still running in the
//!    requested zone and either has room or still carries the session;
//! 2. otherwise let the policy pick from the zone's running relays that
//!    are below capacity;
//! 3. otherwise fail with `CapacityExhausted`.
//!
//! The binding is rewritten only when the chosen relay differs from the
//! bound one.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use relay_core::{AllocationLock, EndpointConfig, FleetConfig};
use relaygrid_state::*;

use crate::endpoint::RelayEndpoint;
use crate::error::{AllocError, AllocResult};
use crate::policy::{self, AllocationPolicy};
use crate::sticky::StickyEvaluator;

pub struct AllocationCoordinator {
    registry: RelayRegistry,
    lock: AllocationLock,
    lock_timeout: Duration,
    capacity_per_instance: u32,
    sticky: StickyEvaluator,
    policy: Arc<dyn AllocationPolicy>,
    endpoint: EndpointConfig,
}

impl AllocationCoordinator {
    pub fn new(registry: RelayRegistry, lock: AllocationLock, config: &FleetConfig) -> Self {
        Self {
            registry,
            lock,
            lock_timeout: config.fleet.allocation_lock_timeout(),
            capacity_per_instance: config.fleet.capacity_per_instance,
            sticky: StickyEvaluator::new(config.fleet.session_sticky_timeout()),
            policy: policy::from_kind(config.fleet.allocation_policy),
            endpoint: config.endpoint.clone(),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn AllocationPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Find a relay for `workload` in `zone_id` and return its endpoint.
    pub async fn assign(&self, zone_id: &str, workload: &WorkloadRef) -> AllocResult<RelayEndpoint> {
        if !workload.phase.is_assignable() {
            info!(
                workload = %workload.id,
                phase = ?workload.phase,
                "workload not in an assignable phase, refusing relay assignment"
            );
            return Err(AllocError::NotAssignable {
                workload_id: workload.id.clone(),
                phase: workload.phase,
            });
        }

        let _guard = self.lock.acquire(self.lock_timeout).await.map_err(|e| {
            warn!(zone = %zone_id, workload = %workload.id, error = %e, "could not acquire allocation lock");
            AllocError::from(e)
        })?;

        let now = now_millis();
        let binding = self.registry.get_binding(&workload.id)?;

        let relay = match self.previous_relay(zone_id, binding.as_ref(), now)? {
            Some(relay) => relay,
            None => self.select_from_pool(zone_id)?,
        };

        let endpoint = RelayEndpoint::for_relay(&relay, &self.endpoint).inspect_err(|_| {
            warn!(relay = %relay.id, "assigned relay does not have a public address");
        })?;

        let bound_relay = binding.as_ref().and_then(|b| b.relay_id.as_deref());
        if bound_relay != Some(relay.id.as_str()) {
            self.registry.put_binding(&WorkloadBinding {
                workload_id: workload.id.clone(),
                relay_id: Some(relay.id.clone()),
                assigned_at: now,
            })?;
            self.registry
                .update_relay(&relay.id, |r| r.last_assigned_at = Some(now))?;
            info!(
                zone = %zone_id,
                workload = %workload.id,
                relay = %relay.id,
                previous = ?bound_relay,
                "workload bound to relay"
            );
        }

        Ok(endpoint)
    }

    /// The bound relay, if it may be reused.
    fn previous_relay(
        &self,
        zone_id: &str,
        binding: Option<&WorkloadBinding>,
        now: u64,
    ) -> AllocResult<Option<RelayInstance>> {
        let Some(binding) = binding else {
            return Ok(None);
        };
        let Some(relay_id) = binding.relay_id.as_deref() else {
            return Ok(None);
        };

        let relay = match self.registry.get_relay(relay_id)? {
            Some(relay) if relay.state.is_assignable() && relay.zone_id == zone_id => relay,
            _ => {
                debug!(workload = %binding.workload_id, relay = %relay_id, "ignoring stale binding");
                return Ok(None);
            }
        };

        if relay.active_sessions < self.capacity_per_instance {
            return Ok(Some(relay));
        }

        if self.sticky.has_previous_session(&relay, binding, now) {
            warn!(
                relay = %relay.id,
                workload = %binding.workload_id,
                sessions = relay.active_sessions,
                capacity = self.capacity_per_instance,
                "relay over capacity, keeping sticky session"
            );
            return Ok(Some(relay));
        }

        Ok(None)
    }

    fn select_from_pool(&self, zone_id: &str) -> AllocResult<RelayInstance> {
        let candidates: Vec<RelayInstance> = self
            .registry
            .list_relays_in_states(Some(zone_id), &[RelayState::Running])?
            .into_iter()
            .filter(|relay| relay.active_sessions < self.capacity_per_instance)
            .collect();

        match self.policy.select(&candidates) {
            Some(relay) => Ok(relay.clone()),
            None => {
                info!(zone = %zone_id, "no running relay with spare capacity");
                Err(AllocError::CapacityExhausted(zone_id.to_string()))
            }
        }
    }
}
