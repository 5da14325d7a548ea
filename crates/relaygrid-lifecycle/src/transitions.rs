//! Relay state machine.
//!
//! Every (state, operation) pair is listed in [`next_state`]. A pair that is
//! not listed is illegal. The table is the only place that encodes which
//! operation may move a relay where; the controller never compares states
//! directly.
//!
//! ```text
//! Stopped ──Start──▶ Starting ──StartCompleted──▶ Running
//!    ▲                  │                            │
//!    │             StartFailed                AgentDisconnected
//!    │                  ▼                            ▼
//!    └──────────────  Stopped  ◀────HaFenced────────  Ha
//!
//! Running/Stopped ──MigrationStarted──▶ Migrating ──MigrationCompleted──▶ Running | Stopped
//! any non-terminal ──Stop──▶ Stopping ──StopCompleted──▶ Stopped ──Destroy──▶ Destroyed
//! ```

use std::fmt;

use thiserror::Error;

use relaygrid_state::RelayState;

/// An operation that may change a relay's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOp {
    Start,
    StartCompleted,
    StartFailed,
    Stop,
    StopCompleted,
    AgentDisconnected,
    HaFenced,
    MigrationStarted,
    /// `resume_running` is whether the relay was running when migration began.
    MigrationCompleted { resume_running: bool },
    Destroy,
    Reboot,
}

impl RelayOp {
    pub const ALL: [RelayOp; 12] = [
        RelayOp::Start,
        RelayOp::StartCompleted,
        RelayOp::StartFailed,
        RelayOp::Stop,
        RelayOp::StopCompleted,
        RelayOp::AgentDisconnected,
        RelayOp::HaFenced,
        RelayOp::MigrationStarted,
        RelayOp::MigrationCompleted { resume_running: true },
        RelayOp::MigrationCompleted { resume_running: false },
        RelayOp::Destroy,
        RelayOp::Reboot,
    ];
}

impl fmt::Display for RelayOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelayOp::Start => "start",
            RelayOp::StartCompleted => "complete start of",
            RelayOp::StartFailed => "fail start of",
            RelayOp::Stop => "stop",
            RelayOp::StopCompleted => "complete stop of",
            RelayOp::AgentDisconnected => "disconnect agent of",
            RelayOp::HaFenced => "fence",
            RelayOp::MigrationStarted => "migrate",
            RelayOp::MigrationCompleted { .. } => "complete migration of",
            RelayOp::Destroy => "destroy",
            RelayOp::Reboot => "reboot",
        };
        f.write_str(s)
    }
}

/// Outcome of a legal operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    To(RelayState),
    /// Legal, but the relay is already where the operation would put it.
    Unchanged,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("cannot {op} relay in state {from}")]
pub struct IllegalTransition {
    pub from: RelayState,
    pub op: RelayOp,
}

/// Look up the transition for `op` applied to a relay in state `from`.
pub fn next_state(from: RelayState, op: RelayOp) -> Result<Transition, IllegalTransition> {
    use RelayOp as Op;
    use RelayState as S;
    use Transition::{To, Unchanged};

    let transition = match (from, op) {
        (S::Stopped, Op::Start) => To(S::Starting),
        (S::Stopped, Op::Stop) => Unchanged,
        (S::Stopped, Op::Destroy) => To(S::Destroyed),
        (S::Stopped, Op::MigrationStarted) => To(S::Migrating),
        // Reboot of a stopped relay falls back to a start.
        (S::Stopped, Op::Reboot) => To(S::Starting),

        (S::Starting, Op::Start) => Unchanged,
        (S::Starting, Op::StartCompleted) => To(S::Running),
        (S::Starting, Op::StartFailed) => To(S::Stopped),
        (S::Starting, Op::Stop) => To(S::Stopping),

        (S::Running, Op::Start) => Unchanged,
        (S::Running, Op::Stop) => To(S::Stopping),
        (S::Running, Op::AgentDisconnected) => To(S::Ha),
        (S::Running, Op::MigrationStarted) => To(S::Migrating),
        // In-place reboot through the agent channel.
        (S::Running, Op::Reboot) => Unchanged,

        (S::Stopping, Op::Stop) => Unchanged,
        (S::Stopping, Op::StopCompleted) => To(S::Stopped),

        (S::Ha, Op::HaFenced) => To(S::Stopped),
        (S::Ha, Op::Stop) => To(S::Stopping),

        (S::Migrating, Op::MigrationCompleted { resume_running: true }) => To(S::Running),
        (S::Migrating, Op::MigrationCompleted { resume_running: false }) => To(S::Stopped),
        (S::Migrating, Op::Stop) => To(S::Stopping),

        (S::Destroyed, Op::Destroy) => Unchanged,

        _ => return Err(IllegalTransition { from, op }),
    };
    Ok(transition)
}
