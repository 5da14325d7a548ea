//! RelayRegistry — redb-backed persistence for the relay fleet.
//!
//! Provides typed operations over relay instances, workload bindings and
//! the management state. All values are JSON-serialized into redb's `&[u8]`
//! value columns. The registry supports both on-disk and in-memory backends
//! (the latter for testing).
//!
//! redb serializes write transactions, so every read-modify-write below
//! (`update_relay`, `next_relay_id`, `release_bindings`) is atomic with
//! respect to other writers in the process.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Thread-safe relay registry backed by redb.
#[derive(Clone)]
pub struct RelayRegistry {
    db: Arc<Database>,
}

impl RelayRegistry {
    /// Open (or create) a persistent registry at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let registry = Self { db: Arc::new(db) };
        registry.ensure_tables()?;
        debug!(?path, "relay registry opened");
        Ok(registry)
    }

    /// Create an ephemeral in-memory registry (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let registry = Self { db: Arc::new(db) };
        registry.ensure_tables()?;
        debug!("in-memory relay registry opened");
        Ok(registry)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(RELAYS).map_err(map_err!(Table))?;
        txn.open_table(BINDINGS).map_err(map_err!(Table))?;
        txn.open_table(MANAGEMENT).map_err(map_err!(Table))?;
        txn.open_table(COUNTERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Relays ─────────────────────────────────────────────────────

    /// Reserve the next relay id (`relay-000001`, `relay-000002`, …).
    ///
    /// Zero-padded so key order matches creation order.
    pub fn next_relay_id(&self) -> StateResult<RelayId> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let next;
        {
            let mut table = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
            let current = table
                .get(RELAY_SEQUENCE_KEY)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0);
            next = current + 1;
            table
                .insert(RELAY_SEQUENCE_KEY, next)
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(format!("relay-{next:06}"))
    }

    /// Insert or replace a relay row.
    pub fn put_relay(&self, relay: &RelayInstance) -> StateResult<()> {
        let value = serde_json::to_vec(relay).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RELAYS).map_err(map_err!(Table))?;
            table
                .insert(relay.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(relay = %relay.id, state = %relay.state, "relay stored");
        Ok(())
    }

    pub fn get_relay(&self, id: &str) -> StateResult<Option<RelayInstance>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RELAYS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Like [`get_relay`](Self::get_relay) but a missing row is an error.
    pub fn require_relay(&self, id: &str) -> StateResult<RelayInstance> {
        self.get_relay(id)?
            .ok_or_else(|| StateError::RelayNotFound(id.to_string()))
    }

    /// Apply `f` to a relay inside a single write transaction.
    ///
    /// Returns the updated row. `updated_at` is bumped automatically.
    pub fn update_relay<F>(&self, id: &str, f: F) -> StateResult<RelayInstance>
    where
        F: FnOnce(&mut RelayInstance),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let relay = {
            let mut table = txn.open_table(RELAYS).map_err(map_err!(Table))?;
            let mut relay: RelayInstance = match table.get(id).map_err(map_err!(Read))? {
                Some(guard) => decode(guard.value())?,
                None => return Err(StateError::RelayNotFound(id.to_string())),
            };
            f(&mut relay);
            relay.updated_at = now_millis();
            let value = serde_json::to_vec(&relay).map_err(map_err!(Serialize))?;
            table
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
            relay
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(relay)
    }

    /// Delete a relay row. Returns true if it existed.
    pub fn delete_relay(&self, id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(RELAYS).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(relay = %id, existed, "relay deleted");
        Ok(existed)
    }

    /// List every relay, in id order.
    pub fn list_relays(&self) -> StateResult<Vec<RelayInstance>> {
        self.scan_relays(|_| true)
    }

    /// List relays in one zone, in id order.
    pub fn list_relays_in_zone(&self, zone_id: &str) -> StateResult<Vec<RelayInstance>> {
        self.scan_relays(|r| r.zone_id == zone_id)
    }

    /// List relays in any of `states`, optionally restricted to one zone.
    pub fn list_relays_in_states(
        &self,
        zone_id: Option<&str>,
        states: &[RelayState],
    ) -> StateResult<Vec<RelayInstance>> {
        self.scan_relays(|r| {
            states.contains(&r.state) && zone_id.is_none_or(|z| r.zone_id == z)
        })
    }

    fn scan_relays<P>(&self, keep: P) -> StateResult<Vec<RelayInstance>>
    where
        P: Fn(&RelayInstance) -> bool,
    {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RELAYS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let relay: RelayInstance = decode(value.value())?;
            if keep(&relay) {
                results.push(relay);
            }
        }
        Ok(results)
    }

    /// Aggregate capacity for every zone that has at least one relay.
    ///
    /// One read transaction regardless of the number of zones.
    pub fn zone_capacity_snapshots(&self) -> StateResult<HashMap<ZoneId, ZoneCapacitySnapshot>> {
        let mut zones: HashMap<ZoneId, ZoneCapacitySnapshot> = HashMap::new();
        for relay in self.list_relays()? {
            let snapshot = zones
                .entry(relay.zone_id.clone())
                .or_insert_with(|| ZoneCapacitySnapshot::empty(&relay.zone_id));
            accumulate(snapshot, &relay);
        }
        Ok(zones)
    }

    /// Capacity aggregate for a single zone (empty if it has no relays).
    pub fn zone_capacity(&self, zone_id: &str) -> StateResult<ZoneCapacitySnapshot> {
        let mut snapshot = ZoneCapacitySnapshot::empty(zone_id);
        for relay in self.list_relays_in_zone(zone_id)? {
            accumulate(&mut snapshot, &relay);
        }
        Ok(snapshot)
    }

    // ── Bindings ───────────────────────────────────────────────────

    /// Insert or overwrite the binding for a workload.
    pub fn put_binding(&self, binding: &WorkloadBinding) -> StateResult<()> {
        let value = serde_json::to_vec(binding).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(BINDINGS).map_err(map_err!(Table))?;
            table
                .insert(binding.workload_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn get_binding(&self, workload_id: &str) -> StateResult<Option<WorkloadBinding>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BINDINGS).map_err(map_err!(Table))?;
        match table.get(workload_id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Delete the binding for a workload. Returns true if it existed.
    pub fn delete_binding(&self, workload_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(BINDINGS).map_err(map_err!(Table))?;
            existed = table.remove(workload_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Drop the bindings of `workload_ids` that still point at `relay_id`.
    ///
    /// Bindings already moved to another relay are left alone. Returns the
    /// number removed.
    pub fn release_bindings(&self, relay_id: &str, workload_ids: &[String]) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut released = 0;
        {
            let mut table = txn.open_table(BINDINGS).map_err(map_err!(Table))?;
            for workload_id in workload_ids {
                let bound_here = match table.get(workload_id.as_str()).map_err(map_err!(Read))? {
                    Some(guard) => {
                        let binding: WorkloadBinding = decode(guard.value())?;
                        binding.relay_id.as_deref() == Some(relay_id)
                    }
                    None => false,
                };
                if bound_here {
                    table
                        .remove(workload_id.as_str())
                        .map_err(map_err!(Write))?;
                    released += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(released)
    }

    // ── Management state ───────────────────────────────────────────

    /// The persisted management record, `Auto`/`Auto` when never set.
    pub fn get_management(&self) -> StateResult<ManagementRecord> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MANAGEMENT).map_err(map_err!(Table))?;
        match table.get(MANAGEMENT_KEY).map_err(map_err!(Read))? {
            Some(guard) => decode(guard.value()),
            None => Ok(ManagementRecord::default()),
        }
    }

    pub fn put_management(&self, record: &ManagementRecord) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(MANAGEMENT).map_err(map_err!(Table))?;
            table
                .insert(MANAGEMENT_KEY, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(current = %record.current, previous = %record.previous, "management state stored");
        Ok(())
    }
}

fn accumulate(snapshot: &mut ZoneCapacitySnapshot, relay: &RelayInstance) {
    match relay.state {
        RelayState::Running => {
            snapshot.running_count += 1;
            snapshot.active_sessions += u64::from(relay.active_sessions);
        }
        RelayState::Stopped => snapshot.stopped_count += 1,
        state if state.is_transitional() => snapshot.transitional_count += 1,
        _ => {}
    }
    if !relay.state.is_terminal() {
        snapshot.total_count += 1;
    }
}
