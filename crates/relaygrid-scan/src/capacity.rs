//! Capacity scanner: the relay-fleet [`ScanHandler`].
//!
//! Per ready zone, the spare session capacity is
//! `running_count * capacity_per_instance - active_sessions`. When that is
//! at or below `standby_threshold` one relay is brought online: a stopped
//! relay from the zone's pool if there is one, a freshly provisioned relay
//! otherwise. Capacity is never taken away.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};

use relay_core::{AllocationLock, FleetConfig};
use relaygrid_lifecycle::{FleetEvent, FleetEventKind, LaunchSpec, LifecycleController};
use relaygrid_state::*;

use crate::cycle::{PassReport, ScanAction, ScanHandler, StageFuture, StageOutcome};
use crate::management::ManagementController;
use crate::zones::{ZoneDirectory, ZoneStatus};

/// Expand when spare capacity is at or below the standby threshold.
///
/// Active sessions above the running capacity count as zero spare.
pub fn capacity_decision(
    snapshot: &ZoneCapacitySnapshot,
    capacity_per_instance: u32,
    standby_threshold: u32,
) -> ScanAction {
    let total = u64::from(snapshot.running_count) * u64::from(capacity_per_instance);
    let spare = total.saturating_sub(snapshot.active_sessions);
    if spare <= u64::from(standby_threshold) {
        ScanAction::Expand
    } else {
        ScanAction::NoOp
    }
}

/// Everything one pass reads up front.
#[derive(Debug, Clone)]
pub struct FleetSnapshot {
    pub zones: Vec<ZoneStatus>,
    pub capacity: HashMap<ZoneId, ZoneCapacitySnapshot>,
    pub storage_up: bool,
}

impl FleetSnapshot {
    pub fn zone_capacity(&self, zone_id: &str) -> ZoneCapacitySnapshot {
        self.capacity
            .get(zone_id)
            .cloned()
            .unwrap_or_else(|| ZoneCapacitySnapshot::empty(zone_id))
    }

    fn zone(&self, zone_id: &str) -> Option<&ZoneStatus> {
        self.zones.iter().find(|z| z.zone_id == zone_id)
    }
}

pub struct CapacityScanner {
    registry: RelayRegistry,
    lifecycle: Arc<LifecycleController>,
    management: ManagementController,
    zones: Arc<dyn ZoneDirectory>,
    lock: AllocationLock,
    lock_timeout: Duration,
    capacity_per_instance: u32,
    standby_threshold: u32,
    launch_max_per_zone: u32,
    launch: LaunchSpec,
}

impl CapacityScanner {
    pub fn new(
        lifecycle: Arc<LifecycleController>,
        management: ManagementController,
        zones: Arc<dyn ZoneDirectory>,
        lock: AllocationLock,
        config: &FleetConfig,
    ) -> Self {
        Self {
            registry: lifecycle.registry().clone(),
            lifecycle,
            management,
            zones,
            lock,
            lock_timeout: config.fleet.allocation_lock_timeout(),
            capacity_per_instance: config.fleet.capacity_per_instance,
            standby_threshold: config.fleet.standby_threshold,
            launch_max_per_zone: config.fleet.launch_max_per_zone,
            launch: LaunchSpec {
                template: config.fleet.relay_template.clone(),
                offering: config.fleet.relay_offering.clone(),
                tls_enabled: config.endpoint.tls_enabled,
            },
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Bring one relay online in `zone_id` if the zone still needs it.
    ///
    /// Every path that leaves the zone short of a new running relay, other
    /// than the re-check finding enough capacity, emits `CreateFailure`.
    async fn expand_zone(&self, zone_id: &str) -> anyhow::Result<StageOutcome> {
        let _guard = match self.lock.acquire(self.lock_timeout).await {
            Ok(guard) => guard,
            Err(e) => {
                info!(zone = %zone_id, error = %e, "allocation lock busy, wait for next scan");
                self.create_failure(zone_id, None, &e);
                return Ok(StageOutcome::Deferred);
            }
        };

        // Re-check under the lock: the pass snapshot may predate another expansion.
        let current = self.registry.zone_capacity(zone_id)?;
        if current.transitional_count > 0
            || capacity_decision(&current, self.capacity_per_instance, self.standby_threshold)
                != ScanAction::Expand
        {
            debug!(zone = %zone_id, "zone no longer needs expansion");
            return Ok(StageOutcome::Skipped);
        }

        let stopped = self
            .registry
            .list_relays_in_states(Some(zone_id), &[RelayState::Stopped])?;
        if let Some(relay) = stopped.into_iter().next() {
            info!(zone = %zone_id, relay = %relay.id, "starting relay from stopped pool");
            return match self.lifecycle.start(&relay.id).await {
                Ok(_) => Ok(StageOutcome::Applied),
                Err(e) => {
                    self.create_failure(zone_id, Some(relay.id.as_str()), &e);
                    // A stopped-pool relay that cannot boot is replaced, not retried.
                    if let Err(destroy_err) = self.lifecycle.destroy(&relay.id).await {
                        warn!(relay = %relay.id, error = %destroy_err, "failed to destroy unbootable relay");
                    }
                    Err(e).with_context(|| format!("restarting relay {} in zone {zone_id}", relay.id))
                }
            };
        }

        if current.total_count >= self.launch_max_per_zone {
            warn!(
                zone = %zone_id,
                relays = current.total_count,
                limit = self.launch_max_per_zone,
                "zone at relay launch limit, not provisioning"
            );
            self.create_failure(
                zone_id,
                None,
                &format!("zone at launch limit of {} relays", self.launch_max_per_zone),
            );
            return Ok(StageOutcome::Skipped);
        }

        info!(zone = %zone_id, "provisioning new relay");
        let relay = self
            .lifecycle
            .create(zone_id, &self.launch)
            .await
            .with_context(|| format!("provisioning relay in zone {zone_id}"))?;
        match self.lifecycle.start(&relay.id).await {
            Ok(_) => Ok(StageOutcome::Applied),
            Err(e) => {
                self.create_failure(zone_id, Some(relay.id.as_str()), &e);
                Err(e).with_context(|| format!("starting new relay {} in zone {zone_id}", relay.id))
            }
        }
    }

    fn create_failure(&self, zone_id: &str, relay_id: Option<&str>, error: &dyn std::fmt::Display) {
        self.lifecycle.events().emit(FleetEvent::new(
            FleetEventKind::CreateFailure,
            zone_id,
            relay_id,
            format!("no relay brought online: {error}"),
        ));
    }
}

impl ScanHandler for CapacityScanner {
    type Snapshot = FleetSnapshot;
    type Pool = ZoneId;

    fn name(&self) -> &'static str {
        "relay-capacity"
    }

    fn snapshot(&self) -> anyhow::Result<FleetSnapshot> {
        Ok(FleetSnapshot {
            zones: self.zones.zones(),
            capacity: self.registry.zone_capacity_snapshots()?,
            storage_up: self.zones.any_storage_pool_up(),
        })
    }

    fn admit<'a>(&'a self, snapshot: &'a FleetSnapshot) -> StageFuture<'a, bool> {
        Box::pin(async move {
            let state = match self.management.tick().await {
                Ok(state) => state,
                Err(e) => {
                    warn!(error = %e, "could not read management state, skip capacity scan");
                    return false;
                }
            };
            if state != ManagementState::Auto {
                debug!(%state, "management state is not Auto, skip capacity scan");
                return false;
            }
            if !snapshot.storage_up {
                info!("no primary storage pool is up, skip capacity scan");
                return false;
            }
            true
        })
    }

    fn pools(&self, snapshot: &FleetSnapshot) -> Vec<ZoneId> {
        snapshot
            .zones
            .iter()
            .filter(|z| z.enabled)
            .map(|z| z.zone_id.clone())
            .collect()
    }

    fn is_ready(&self, zone_id: &ZoneId, snapshot: &FleetSnapshot) -> bool {
        let Some(zone) = snapshot.zone(zone_id) else {
            return false;
        };
        let reason = if zone.hosts_up == 0 {
            Some("no hosts up")
        } else if !zone.boot_image_ready {
            Some("relay boot image not ready")
        } else if !zone.primary_storage_ready {
            Some("primary storage not ready")
        } else if !zone.relay_required {
            Some("relays not required")
        } else if snapshot.zone_capacity(zone_id).transitional_count > 0 {
            Some("relay starting or stopping")
        } else {
            None
        };
        match reason {
            Some(reason) => {
                debug!(zone = %zone_id, reason, "zone not ready for capacity scan");
                false
            }
            None => true,
        }
    }

    fn decide(&self, zone_id: &ZoneId, snapshot: &FleetSnapshot) -> ScanAction {
        let capacity = snapshot.zone_capacity(zone_id);
        let action = capacity_decision(&capacity, self.capacity_per_instance, self.standby_threshold);
        debug!(
            zone = %zone_id,
            running = capacity.running_count,
            sessions = capacity.active_sessions,
            standby = self.standby_threshold,
            ?action,
            "zone capacity evaluated"
        );
        action
    }

    fn expand<'a>(&'a self, zone_id: &'a ZoneId) -> StageFuture<'a, anyhow::Result<StageOutcome>> {
        Box::pin(self.expand_zone(zone_id))
    }

    fn shrink<'a>(&'a self, zone_id: &'a ZoneId) -> StageFuture<'a, anyhow::Result<StageOutcome>> {
        Box::pin(async move {
            debug!(zone = %zone_id, "shrink is not performed; idle relays are kept warm");
            Ok(StageOutcome::Skipped)
        })
    }

    fn finish(&self, report: &PassReport) {
        if !report.expanded.is_empty() || !report.deferred.is_empty() || !report.failures.is_empty() {
            info!(
                expanded = ?report.expanded,
                deferred = ?report.deferred,
                failures = report.failures.len(),
                "capacity scan pass finished"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use relay_core::ZoneConfig;
    use relaygrid_lifecycle::{EventBus, LocalProvisioner};

    use super::*;
    use crate::cycle::ScanLoop;
    use crate::zones::StaticZoneDirectory;

    fn snapshot(running: u32, sessions: u64) -> ZoneCapacitySnapshot {
        ZoneCapacitySnapshot {
            running_count: running,
            active_sessions: sessions,
            ..ZoneCapacitySnapshot::empty("zone-a")
        }
    }

    // ── Decision ───────────────────────────────────────────────────

    #[test]
    fn no_running_relays_always_expands() {
        for capacity in [1, 10, 50, 1000] {
            assert_eq!(capacity_decision(&snapshot(0, 0), capacity, 10), ScanAction::Expand);
        }
    }

    #[test]
    fn spare_above_standby_is_noop() {
        // 1 * 50 - 40 = 10 > 5
        assert_eq!(capacity_decision(&snapshot(1, 40), 50, 5), ScanAction::NoOp);
    }

    #[test]
    fn spare_at_standby_expands() {
        // 2 * 50 - 90 = 10 <= 10
        assert_eq!(capacity_decision(&snapshot(2, 90), 50, 10), ScanAction::Expand);
        assert_eq!(capacity_decision(&snapshot(2, 89), 50, 10), ScanAction::NoOp);
    }

    #[test]
    fn oversubscribed_zone_expands() {
        assert_eq!(capacity_decision(&snapshot(1, 75), 50, 0), ScanAction::Expand);
    }

    // ── Passes ─────────────────────────────────────────────────────

    struct Fixture {
        scan: ScanLoop<CapacityScanner>,
        lifecycle: Arc<LifecycleController>,
        management: ManagementController,
        directory: Arc<StaticZoneDirectory>,
        local: Arc<LocalProvisioner>,
        lock: AllocationLock,
    }

    fn fixture_with(config: FleetConfig) -> Fixture {
        let registry = RelayRegistry::open_in_memory().unwrap();
        let local = Arc::new(LocalProvisioner::new());
        let lifecycle = Arc::new(LifecycleController::new(
            registry.clone(),
            local.clone(),
            EventBus::default(),
        ));
        let management = ManagementController::new(registry, Arc::clone(&lifecycle));
        let directory = Arc::new(StaticZoneDirectory::new(&config.zones));
        let lock = AllocationLock::new();
        let scanner = CapacityScanner::new(
            Arc::clone(&lifecycle),
            management.clone(),
            directory.clone(),
            lock.clone(),
            &config,
        )
        .with_lock_timeout(Duration::from_millis(50));
        Fixture {
            scan: ScanLoop::new(scanner, Duration::ZERO, Duration::from_secs(30)),
            lifecycle,
            management,
            directory,
            local,
            lock,
        }
    }

    fn fixture() -> Fixture {
        let mut config = FleetConfig::default();
        config.fleet.capacity_per_instance = 10;
        config.fleet.standby_threshold = 3;
        config.fleet.launch_max_per_zone = 2;
        config.zones.push(ZoneConfig::ready("zone-a"));
        fixture_with(config)
    }

    fn drain_kinds(events: &mut tokio::sync::broadcast::Receiver<FleetEvent>) -> Vec<FleetEventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }

    fn running(f: &Fixture, zone: &str) -> Vec<RelayInstance> {
        f.lifecycle
            .registry()
            .list_relays_in_states(Some(zone), &[RelayState::Running])
            .unwrap()
    }

    #[tokio::test]
    async fn empty_zone_gets_a_relay() {
        let f = fixture();
        let report = f.scan.run_pass().await;

        assert!(report.admitted);
        assert_eq!(report.expanded, vec!["zone-a"]);
        assert_eq!(running(&f, "zone-a").len(), 1);
        assert_eq!(f.local.allocation_count(), 1);
    }

    #[tokio::test]
    async fn zone_with_spare_capacity_is_left_alone() {
        let f = fixture();
        f.scan.run_pass().await;
        let report = f.scan.run_pass().await;

        assert!(report.expanded.is_empty());
        assert_eq!(running(&f, "zone-a").len(), 1);
    }

    #[tokio::test]
    async fn stopped_relay_is_restarted_before_provisioning() {
        let f = fixture();
        f.scan.run_pass().await;
        let relay = running(&f, "zone-a").remove(0);
        f.lifecycle.stop(&relay.id).await.unwrap();

        f.scan.run_pass().await;
        assert_eq!(running(&f, "zone-a")[0].id, relay.id);
        assert_eq!(f.local.allocation_count(), 1);
    }

    #[tokio::test]
    async fn unbootable_stopped_relay_is_destroyed() {
        let f = fixture();
        let mut events = f.lifecycle.events().subscribe();
        f.scan.run_pass().await;
        let relay = running(&f, "zone-a").remove(0);
        f.lifecycle.stop(&relay.id).await.unwrap();
        f.local.fail_next_starts(1);

        let report = f.scan.run_pass().await;
        assert_eq!(report.failures.len(), 1);
        assert!(f.lifecycle.registry().get_relay(&relay.id).unwrap().is_none());

        let kinds = drain_kinds(&mut events);
        assert!(kinds.contains(&FleetEventKind::CreateFailure));
        assert!(kinds.contains(&FleetEventKind::Destroyed));
    }

    #[tokio::test]
    async fn failed_new_relay_does_not_stop_the_pass() {
        let mut config = FleetConfig::default();
        config.zones.push(ZoneConfig::ready("zone-a"));
        config.zones.push(ZoneConfig::ready("zone-b"));
        let f = fixture_with(config);
        f.local.fail_next_starts(1);

        let report = f.scan.run_pass().await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "zone-a");
        assert_eq!(report.expanded, vec!["zone-b"]);
    }

    #[tokio::test]
    async fn launch_limit_caps_new_relays() {
        let f = fixture();
        // Two relays stuck in a state the scanner neither counts as running
        // nor restarts.
        for _ in 0..2 {
            f.scan.run_pass().await;
            let relay = running(&f, "zone-a").remove(0);
            f.lifecycle.migration_started(&relay.id).unwrap();
        }

        let mut events = f.lifecycle.events().subscribe();
        let report = f.scan.run_pass().await;
        assert!(report.expanded.is_empty());
        assert_eq!(report.skipped, vec!["zone-a"]);
        assert_eq!(f.local.allocation_count(), 2);
        assert!(running(&f, "zone-a").is_empty());

        let kinds = drain_kinds(&mut events);
        assert_eq!(kinds, vec![FleetEventKind::CreateFailure]);
    }

    #[tokio::test]
    async fn unready_zones_are_skipped() {
        let f = fixture();
        let mut zone = f.directory.zones()[0].clone();
        zone.hosts_up = 0;
        f.directory.upsert(zone.clone());
        assert_eq!(f.scan.run_pass().await.pools_ready, 0);

        zone.hosts_up = 1;
        zone.relay_required = false;
        f.directory.upsert(zone);
        assert_eq!(f.scan.run_pass().await.pools_ready, 0);
        assert_eq!(f.local.allocation_count(), 0);
    }

    #[tokio::test]
    async fn transitional_relay_blocks_zone() {
        let f = fixture();
        f.scan.run_pass().await;
        let relay = running(&f, "zone-a").remove(0);
        f.lifecycle
            .registry()
            .update_relay(&relay.id, |r| r.state = RelayState::Stopping)
            .unwrap();

        let report = f.scan.run_pass().await;
        assert_eq!(report.pools_ready, 0);
    }

    #[tokio::test]
    async fn manual_mode_suppresses_scanning() {
        let f = fixture();
        f.management.set(ManagementState::Manual).unwrap();

        let report = f.scan.run_pass().await;
        assert!(!report.admitted);
        assert_eq!(f.local.allocation_count(), 0);
    }

    #[tokio::test]
    async fn storage_down_suppresses_scanning() {
        let f = fixture();
        f.directory.set_storage_up(false);
        assert!(!f.scan.run_pass().await.admitted);
    }

    #[tokio::test]
    async fn busy_lock_defers_expansion() {
        let f = fixture();
        let mut events = f.lifecycle.events().subscribe();
        let held = f.lock.acquire(Duration::from_millis(10)).await.unwrap();

        let report = f.scan.run_pass().await;
        assert!(report.failures.is_empty());
        assert!(report.expanded.is_empty());
        assert_eq!(report.deferred, vec!["zone-a"]);
        assert_eq!(f.local.allocation_count(), 0);
        assert!(running(&f, "zone-a").is_empty());
        assert_eq!(drain_kinds(&mut events), vec![FleetEventKind::CreateFailure]);
        drop(held);

        let report = f.scan.run_pass().await;
        assert_eq!(report.expanded, vec!["zone-a"]);
        assert!(report.deferred.is_empty());
        assert_eq!(running(&f, "zone-a").len(), 1);
    }

    #[tokio::test]
    async fn recheck_under_lock_skips_satisfied_zone() {
        let f = fixture();
        f.scan.run_pass().await;
        let mut events = f.lifecycle.events().subscribe();

        let outcome = f.scan.handler().expand(&"zone-a".to_string()).await.unwrap();
        assert_eq!(outcome, StageOutcome::Skipped);
        assert_eq!(f.local.allocation_count(), 1);
        assert!(drain_kinds(&mut events).is_empty());
    }

    #[tokio::test]
    async fn shrink_never_reduces_running_relays() {
        let f = fixture();
        f.scan.run_pass().await;
        let before = running(&f, "zone-a").len();

        let outcome = f.scan.handler().shrink(&"zone-a".to_string()).await.unwrap();
        assert_eq!(outcome, StageOutcome::Skipped);
        assert_eq!(running(&f, "zone-a").len(), before);
    }
}
