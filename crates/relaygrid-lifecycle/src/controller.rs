//! Lifecycle controller.
//!
//! Applies the transition table to registry rows and calls the provisioner
//! for the work behind each transition. Every state check happens inside a
//! single registry write transaction, so two callers racing on the same
//! relay cannot both see `Stopped` and both boot it.

use std::sync::Arc;

use tracing::{debug, info, warn};

use relaygrid_state::*;

use crate::error::{LifecycleError, LifecycleResult};
use crate::events::{EventBus, FleetEvent, FleetEventKind};
use crate::provisioner::{LaunchSpec, Provisioner};
use crate::transitions::{RelayOp, Transition, next_state};

/// Result of applying one operation to a relay row.
#[derive(Debug, Clone)]
struct Applied {
    relay: RelayInstance,
    from: RelayState,
    transition: Transition,
}

pub struct LifecycleController {
    registry: RelayRegistry,
    provisioner: Arc<dyn Provisioner>,
    events: EventBus,
}

impl LifecycleController {
    pub fn new(registry: RelayRegistry, provisioner: Arc<dyn Provisioner>, events: EventBus) -> Self {
        Self {
            registry,
            provisioner,
            events,
        }
    }

    pub fn registry(&self) -> &RelayRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Provision a brand-new relay in `zone_id`. It is stored as `Stopped`.
    pub async fn create(&self, zone_id: &str, spec: &LaunchSpec) -> LifecycleResult<RelayInstance> {
        let id = self.registry.next_relay_id()?;
        let allocated = match self.provisioner.allocate(&id, zone_id, spec).await {
            Ok(allocated) => allocated,
            Err(e) => {
                self.events.emit(FleetEvent::new(
                    FleetEventKind::CreateFailure,
                    zone_id,
                    Some(&id),
                    format!("relay allocation failed: {e}"),
                ));
                return Err(LifecycleError::provisioning(&id, e));
            }
        };

        let mut relay = RelayInstance::new_stopped(&id, zone_id, allocated.public_address, allocated.port);
        relay.tls_enabled = spec.tls_enabled;
        self.registry.put_relay(&relay)?;
        self.events.emit(FleetEvent::new(
            FleetEventKind::Created,
            zone_id,
            Some(&id),
            "relay created",
        ));
        Ok(relay)
    }

    /// Boot a stopped relay. Starting or running relays are returned as-is.
    pub async fn start(&self, id: &str) -> LifecycleResult<RelayInstance> {
        let applied = self.apply(id, RelayOp::Start)?;
        if applied.transition == Transition::Unchanged {
            debug!(relay = %id, state = %applied.relay.state, "start is a no-op");
            return Ok(applied.relay);
        }
        self.boot(applied.relay).await
    }

    /// Stop a relay. Best-effort: a provisioner failure restores the
    /// previous state and is reported.
    pub async fn stop(&self, id: &str) -> LifecycleResult<RelayInstance> {
        let applied = self.apply(id, RelayOp::Stop)?;
        if applied.transition == Transition::Unchanged {
            return Ok(applied.relay);
        }

        if let Err(e) = self.provisioner.stop(id).await {
            warn!(relay = %id, error = %e, "relay stop failed, restoring state");
            self.registry
                .update_relay(id, |relay| relay.state = applied.from)
                .map_err(not_found)?;
            return Err(LifecycleError::provisioning(id, e));
        }

        let applied = self.apply_with(id, RelayOp::StopCompleted, |relay, _| {
            relay.active_sessions = 0;
        })?;
        info!(relay = %id, zone = %applied.relay.zone_id, "relay stopped");
        Ok(applied.relay)
    }

    /// Destroy a stopped relay, releasing its network identity and removing
    /// its row.
    pub async fn destroy(&self, id: &str) -> LifecycleResult<()> {
        let applied = self.apply(id, RelayOp::Destroy)?;
        if applied.transition == Transition::Unchanged {
            return Ok(());
        }

        if let Err(e) = self.provisioner.destroy(id).await {
            warn!(relay = %id, error = %e, "relay destroy failed");
            self.registry
                .update_relay(id, |relay| relay.state = applied.from)
                .map_err(not_found)?;
            return Err(LifecycleError::provisioning(id, e));
        }

        self.registry.delete_relay(id)?;
        self.events.emit(FleetEvent::new(
            FleetEventKind::Destroyed,
            &applied.relay.zone_id,
            Some(id),
            "relay destroyed",
        ));
        Ok(())
    }

    /// Reboot in place when running, otherwise start.
    pub async fn reboot(&self, id: &str) -> LifecycleResult<RelayInstance> {
        let applied = self.apply(id, RelayOp::Reboot)?;
        match applied.transition {
            Transition::Unchanged => {
                self.provisioner
                    .reboot(id)
                    .await
                    .map_err(|e| LifecycleError::provisioning(id, e))?;
                self.events.emit(FleetEvent::new(
                    FleetEventKind::Rebooted,
                    &applied.relay.zone_id,
                    Some(id),
                    "relay rebooted",
                ));
                Ok(applied.relay)
            }
            Transition::To(_) => self.boot(applied.relay).await,
        }
    }

    /// The relay's agent went away: fence it, then force a restart.
    pub async fn agent_disconnected(&self, id: &str) -> LifecycleResult<RelayInstance> {
        let applied = self.apply(id, RelayOp::AgentDisconnected)?;
        warn!(relay = %id, zone = %applied.relay.zone_id, "relay agent disconnected, fencing");

        if let Err(e) = self.provisioner.stop(id).await {
            warn!(relay = %id, error = %e, "fencing stop failed, restarting anyway");
        }
        self.apply_with(id, RelayOp::HaFenced, |relay, _| {
            relay.active_sessions = 0;
        })?;

        let applied = self.apply(id, RelayOp::Start)?;
        self.boot(applied.relay).await
    }

    /// Record that the relay's host began migrating it.
    pub fn migration_started(&self, id: &str) -> LifecycleResult<RelayInstance> {
        let applied = self.apply_with(id, RelayOp::MigrationStarted, |relay, from| {
            relay.pre_migration_state = Some(from);
        })?;
        info!(relay = %id, from = %applied.from, "relay migrating");
        Ok(applied.relay)
    }

    /// Migration finished: resume running only if it was running before.
    pub fn migration_completed(&self, id: &str) -> LifecycleResult<RelayInstance> {
        let applied = self.transition(
            id,
            |relay| RelayOp::MigrationCompleted {
                resume_running: relay.pre_migration_state == Some(RelayState::Running),
            },
            |relay, _| relay.pre_migration_state = None,
        )?;
        info!(relay = %id, state = %applied.relay.state, "relay migration completed");
        Ok(applied.relay)
    }

    /// Relays in `zone_id`, or the whole fleet.
    pub fn list(&self, zone_id: Option<&str>) -> LifecycleResult<Vec<RelayInstance>> {
        let relays = match zone_id {
            Some(zone) => self.registry.list_relays_in_zone(zone)?,
            None => self.registry.list_relays()?,
        };
        Ok(relays)
    }

    // ── Internals ──────────────────────────────────────────────────

    /// Drive a relay already marked `Starting` to `Running` (or back).
    async fn boot(&self, relay: RelayInstance) -> LifecycleResult<RelayInstance> {
        match self.provisioner.start(&relay.id).await {
            Ok(()) => {
                let applied = self.apply(&relay.id, RelayOp::StartCompleted)?;
                self.events.emit(FleetEvent::new(
                    FleetEventKind::Up,
                    &relay.zone_id,
                    Some(&relay.id),
                    "relay up",
                ));
                Ok(applied.relay)
            }
            Err(e) => {
                warn!(relay = %relay.id, zone = %relay.zone_id, error = %e, "relay start failed");
                self.apply(&relay.id, RelayOp::StartFailed)?;
                Err(LifecycleError::provisioning(&relay.id, e))
            }
        }
    }

    fn apply(&self, id: &str, op: RelayOp) -> LifecycleResult<Applied> {
        self.transition(id, |_| op, |_, _| {})
    }

    fn apply_with<F>(&self, id: &str, op: RelayOp, on_change: F) -> LifecycleResult<Applied>
    where
        F: FnOnce(&mut RelayInstance, RelayState),
    {
        self.transition(id, |_| op, on_change)
    }

    /// Check-and-set in one registry transaction. `on_change` runs only when
    /// the state actually moves and receives the state being left.
    fn transition<O, F>(&self, id: &str, choose: O, on_change: F) -> LifecycleResult<Applied>
    where
        O: FnOnce(&RelayInstance) -> RelayOp,
        F: FnOnce(&mut RelayInstance, RelayState),
    {
        let mut outcome = None;
        let relay = self
            .registry
            .update_relay(id, |relay| {
                let from = relay.state;
                let result = next_state(from, choose(&*relay));
                if let Ok(Transition::To(to)) = result {
                    relay.state = to;
                    on_change(relay, from);
                }
                outcome = Some((from, result));
            })
            .map_err(not_found)?;

        match outcome {
            Some((from, Ok(transition))) => {
                if let Transition::To(to) = transition {
                    debug!(relay = %id, %from, %to, "relay transition");
                }
                Ok(Applied {
                    relay,
                    from,
                    transition,
                })
            }
            Some((_, Err(illegal))) => Err(illegal.into()),
            None => Err(LifecycleError::NotFound(id.to_string())),
        }
    }
}

fn not_found(e: StateError) -> LifecycleError {
    match e {
        StateError::RelayNotFound(id) => LifecycleError::NotFound(id),
        other => LifecycleError::State(other),
    }
}
