//! relaygrid-state — the relay registry.
//!
//! Backed by [redb](https://docs.rs/redb), persists one row per relay
//! instance, one binding per workload, and the fleet management state.
//! Also defines the versioned status-report schema relays push over the
//! agent channel.
//!
//! # Architecture
//!
//! Domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Relays are keyed by id; zone filtering is a scan, which keeps the
//! per-pass aggregate a single read transaction.
//!
//! The `RelayRegistry` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod status;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use status::{ConnectionInfo, StatusParseError, StatusReport};
pub use store::RelayRegistry;
pub use types::*;
