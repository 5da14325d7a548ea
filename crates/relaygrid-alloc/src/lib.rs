//! relaygrid-alloc — assigns workloads to relays.
//!
//! The [`AllocationCoordinator`] is the synchronous entry point for the
//! request path. It holds the process-wide allocation lock for the whole
//! decision, prefers the workload's previous relay (see [`StickyEvaluator`]),
//! and otherwise delegates to an [`AllocationPolicy`]. It never creates
//! capacity; that is the capacity scanner's job.
//!
//! [`StatusReportHandler`] applies the session counters relays push over
//! the agent channel. It runs without the lock.

pub mod coordinator;
pub mod endpoint;
pub mod error;
pub mod policy;
pub mod report;
pub mod sticky;

pub use coordinator::AllocationCoordinator;
pub use endpoint::RelayEndpoint;
pub use error::{AllocError, AllocResult};
pub use policy::{AllocationPolicy, FirstFit, LeastLoaded};
pub use report::{ReportOutcome, StatusReportHandler};
pub use sticky::StickyEvaluator;
