//! relaygrid-scan — the capacity control loop.
//!
//! [`ScanLoop`] drives any [`ScanHandler`] through typed stages on a fixed
//! delay. [`CapacityScanner`] is the relay-fleet handler: it keeps at least
//! `standby_threshold` spare session slots warm in every ready zone and never
//! takes capacity away. [`ManagementController`] gates it on the operator's
//! management mode and carries out suspend drains.

pub mod capacity;
pub mod cycle;
pub mod management;
pub mod zones;

pub use capacity::{CapacityScanner, FleetSnapshot, capacity_decision};
pub use cycle::{PassReport, ScanAction, ScanHandler, ScanLoop, StageFuture, StageOutcome};
pub use management::ManagementController;
pub use zones::{StaticZoneDirectory, ZoneDirectory, ZoneStatus};
