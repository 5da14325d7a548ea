//! Zone readiness.
//!
//! The scanner asks the zone directory once per pass for the state of every
//! zone. Real deployments back this with the control plane's inventory; the
//! standalone daemon uses [`StaticZoneDirectory`] seeded from config.

use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use relay_core::ZoneConfig;
use relaygrid_state::ZoneId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneStatus {
    pub zone_id: ZoneId,
    pub enabled: bool,
    pub hosts_up: u32,
    pub boot_image_ready: bool,
    pub primary_storage_ready: bool,
    pub relay_required: bool,
}

impl From<&ZoneConfig> for ZoneStatus {
    fn from(zone: &ZoneConfig) -> Self {
        Self {
            zone_id: zone.id.clone(),
            enabled: zone.enabled,
            hosts_up: zone.hosts_up,
            boot_image_ready: zone.boot_image_ready,
            primary_storage_ready: zone.primary_storage_ready,
            relay_required: zone.relay_required,
        }
    }
}

pub trait ZoneDirectory: Send + Sync {
    /// Every known zone, enabled or not, in one batch.
    fn zones(&self) -> Vec<ZoneStatus>;

    /// Whether at least one primary storage pool anywhere is up.
    fn any_storage_pool_up(&self) -> bool;
}

#[derive(Debug)]
pub struct StaticZoneDirectory {
    zones: RwLock<Vec<ZoneStatus>>,
    storage_up: AtomicBool,
}

impl StaticZoneDirectory {
    pub fn new(zones: &[ZoneConfig]) -> Self {
        Self {
            zones: RwLock::new(zones.iter().map(ZoneStatus::from).collect()),
            storage_up: AtomicBool::new(true),
        }
    }

    /// Insert or replace a zone.
    pub fn upsert(&self, status: ZoneStatus) {
        let mut zones = self.zones.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        match zones.iter_mut().find(|z| z.zone_id == status.zone_id) {
            Some(existing) => *existing = status,
            None => zones.push(status),
        }
    }

    pub fn set_storage_up(&self, up: bool) {
        self.storage_up.store(up, Ordering::SeqCst);
    }
}

impl ZoneDirectory for StaticZoneDirectory {
    fn zones(&self) -> Vec<ZoneStatus> {
        self.zones
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn any_storage_pool_up(&self) -> bool {
        self.storage_up.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_from_config() {
        let mut disabled = ZoneConfig::ready("zone-b");
        disabled.enabled = false;
        let directory = StaticZoneDirectory::new(&[ZoneConfig::ready("zone-a"), disabled]);

        let zones = directory.zones();
        assert_eq!(zones.len(), 2);
        assert!(zones[0].enabled);
        assert!(!zones[1].enabled);
        assert!(directory.any_storage_pool_up());
    }

    #[test]
    fn upsert_replaces_existing_zone() {
        let directory = StaticZoneDirectory::new(&[ZoneConfig::ready("zone-a")]);
        let mut status = directory.zones()[0].clone();
        status.hosts_up = 0;
        directory.upsert(status);

        assert_eq!(directory.zones().len(), 1);
        assert_eq!(directory.zones()[0].hosts_up, 0);
    }
}
