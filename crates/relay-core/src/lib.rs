//! relay-core — configuration and coordination primitives shared by every
//! relaygrid crate.
//!
//! - [`FleetConfig`]: the `relaygrid.toml` schema with defaults.
//! - [`AllocationLock`]: the single process-wide lock that serializes
//!   allocation decisions and expansion decisions.

pub mod config;
pub mod lock;

pub use config::{AllocationPolicyKind, EndpointConfig, FleetConfig, FleetSettings, ZoneConfig};
pub use lock::{AllocationGuard, AllocationLock, LockTimeout};
