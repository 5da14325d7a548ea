//! relaygrid.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub fleet: FleetSettings,
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
}

/// Capacity and control-loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetSettings {
    /// Maximum concurrent sessions per relay (soft limit; sticky reuse may exceed it).
    pub capacity_per_instance: u32,
    /// Minimum spare session slots to keep warm in every zone.
    pub standby_threshold: u32,
    pub scan_interval_ms: u64,
    pub initial_scan_delay_ms: u64,
    pub allocation_lock_timeout_secs: u64,
    pub session_sticky_timeout_ms: u64,
    /// Upper bound on relays (in any non-destroyed state) per zone.
    pub launch_max_per_zone: u32,
    /// How the coordinator picks among relays with spare capacity.
    pub allocation_policy: AllocationPolicyKind,
    pub relay_template: String,
    pub relay_offering: String,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            capacity_per_instance: 50,
            standby_threshold: 10,
            scan_interval_ms: 30_000,
            initial_scan_delay_ms: 60_000,
            allocation_lock_timeout_secs: 180,
            session_sticky_timeout_ms: 300_000,
            launch_max_per_zone: 10,
            allocation_policy: AllocationPolicyKind::FirstFit,
            relay_template: "relay-system-template".to_string(),
            relay_offering: "relay-system-offering".to_string(),
        }
    }
}

impl FleetSettings {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn initial_scan_delay(&self) -> Duration {
        Duration::from_millis(self.initial_scan_delay_ms)
    }

    pub fn allocation_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.allocation_lock_timeout_secs)
    }

    pub fn session_sticky_timeout(&self) -> Duration {
        Duration::from_millis(self.session_sticky_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationPolicyKind {
    /// First relay below capacity, in registry order.
    #[default]
    FirstFit,
    /// Relay with the fewest active sessions.
    LeastLoaded,
}

/// How assigned relays are presented to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub tls_enabled: bool,
    pub url_domain: Option<String>,
    /// Port the relay's remote-display listener is reachable on.
    pub console_port: u16,
    /// Fixed public address that fronts every relay (e.g. a load balancer).
    pub static_public_address: Option<String>,
    pub static_port: u16,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            tls_enabled: false,
            url_domain: None,
            console_port: 8080,
            static_public_address: None,
            static_port: 8443,
        }
    }
}

/// Static description of a zone, consumed by the standalone zone directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub relay_required: bool,
    #[serde(default = "default_hosts_up")]
    pub hosts_up: u32,
    #[serde(default = "default_true")]
    pub boot_image_ready: bool,
    #[serde(default = "default_true")]
    pub primary_storage_ready: bool,
}

impl ZoneConfig {
    /// A zone that is enabled and ready in every respect.
    pub fn ready(id: &str) -> Self {
        Self {
            id: id.to_string(),
            enabled: true,
            relay_required: true,
            hosts_up: default_hosts_up(),
            boot_image_ready: true,
            primary_storage_ready: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_hosts_up() -> u32 {
    1
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let mut config: FleetConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject unusable settings and normalize inconsistent ones.
    pub fn validate(&mut self) -> anyhow::Result<()> {
        if self.fleet.capacity_per_instance == 0 {
            anyhow::bail!("fleet.capacity_per_instance must be greater than zero");
        }
        if self.fleet.scan_interval_ms == 0 {
            anyhow::bail!("fleet.scan_interval_ms must be greater than zero");
        }

        let has_domain = self
            .endpoint
            .url_domain
            .as_deref()
            .is_some_and(|d| !d.trim().is_empty());
        if self.endpoint.tls_enabled && !has_domain {
            warn!("empty relay url domain, explicitly disabling TLS");
            self.endpoint.tls_enabled = false;
        }

        let mut seen = std::collections::HashSet::new();
        for zone in &self.zones {
            if !seen.insert(zone.id.as_str()) {
                anyhow::bail!("zone {} is declared more than once", zone.id);
            }
        }
        Ok(())
    }
}
