//! Fleet events.
//!
//! Every externally visible lifecycle outcome is logged and published on a
//! broadcast channel. Subscribers that fall behind lose the oldest events;
//! publishing never blocks and never fails when nobody is listening.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use relaygrid_state::{RelayId, ZoneId, now_millis};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FleetEventKind {
    Created,
    Up,
    CreateFailure,
    Rebooted,
    Destroyed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FleetEvent {
    pub kind: FleetEventKind,
    pub zone_id: ZoneId,
    pub relay_id: Option<RelayId>,
    pub message: String,
    pub at: u64,
}

impl FleetEvent {
    pub fn new(kind: FleetEventKind, zone_id: &str, relay_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            kind,
            zone_id: zone_id.to_string(),
            relay_id: relay_id.map(str::to_string),
            message: message.into(),
            at: now_millis(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FleetEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: FleetEvent) {
        let relay = event.relay_id.as_deref().unwrap_or("-");
        match event.kind {
            FleetEventKind::CreateFailure => warn!(
                zone = %event.zone_id,
                relay,
                kind = ?event.kind,
                "{}",
                event.message
            ),
            _ => info!(
                zone = %event.zone_id,
                relay,
                kind = ?event.kind,
                "{}",
                event.message
            ),
        }
        // No receivers is not an error.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
