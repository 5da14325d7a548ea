//! redb table definitions for the relay registry.
//!
//! Every table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types), except the counter table which stores raw `u64`s.

use redb::TableDefinition;

/// Relay instances keyed by relay id.
pub const RELAYS: TableDefinition<&str, &[u8]> = TableDefinition::new("relays");

/// Workload bindings keyed by workload id.
pub const BINDINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("bindings");

/// Single-row table holding the management state under [`MANAGEMENT_KEY`].
pub const MANAGEMENT: TableDefinition<&str, &[u8]> = TableDefinition::new("management");

/// Monotonic counters (relay id sequence).
pub const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

pub const MANAGEMENT_KEY: &str = "fleet";

pub const RELAY_SEQUENCE_KEY: &str = "relay_seq";
