//! relaygrid-lifecycle — drives relay instances through their states.
//!
//! The [`transitions`] table is the single authority on which operation is
//! legal in which state. [`LifecycleController`] applies it against the
//! registry and delegates the actual work to a [`Provisioner`], emitting a
//! [`FleetEvent`] for every externally visible outcome.

pub mod controller;
pub mod error;
pub mod events;
pub mod local;
pub mod provisioner;
pub mod transitions;

pub use controller::LifecycleController;
pub use error::{LifecycleError, LifecycleResult};
pub use events::{EventBus, FleetEvent, FleetEventKind};
pub use local::LocalProvisioner;
pub use provisioner::{AllocatedRelay, LaunchSpec, ProvisionError, ProvisionFuture, Provisioner};
pub use transitions::{IllegalTransition, RelayOp, Transition, next_state};
