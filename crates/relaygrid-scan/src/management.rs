//! Management-state controller.
//!
//! Operators put the fleet in one of four modes:
//!
//! | Mode              | Scanner   | Tick behavior                                   |
//! |-------------------|-----------|-------------------------------------------------|
//! | `Auto`            | runs      | nothing                                         |
//! | `Manual`          | suppressed| nothing                                         |
//! | `Suspending`      | suppressed| stop every running relay, go to `ResetSuspending` |
//! | `ResetSuspending` | suppressed| stop stragglers; once drained, restore previous |
//!
//! Both the current and the previous mode are persisted, so a drain that
//! was interrupted by a restart picks up where it left off.

use std::sync::Arc;

use tracing::{info, warn};

use relaygrid_lifecycle::LifecycleController;
use relaygrid_state::*;

/// States that count as "still draining" for a reset-suspend.
const DRAINING: [RelayState; 3] = [RelayState::Running, RelayState::Starting, RelayState::Stopping];

#[derive(Clone)]
pub struct ManagementController {
    registry: RelayRegistry,
    lifecycle: Arc<LifecycleController>,
}

impl ManagementController {
    pub fn new(registry: RelayRegistry, lifecycle: Arc<LifecycleController>) -> Self {
        Self { registry, lifecycle }
    }

    pub fn get(&self) -> StateResult<ManagementRecord> {
        self.registry.get_management()
    }

    /// Switch to `state`, remembering the mode being left.
    pub fn set(&self, state: ManagementState) -> StateResult<ManagementRecord> {
        let record = self.registry.get_management()?;
        if record.current == state {
            return Ok(record);
        }
        let updated = ManagementRecord {
            current: state,
            previous: record.current,
        };
        self.registry.put_management(&updated)?;
        info!(from = %record.current, to = %state, "management state changed");
        Ok(updated)
    }

    /// Restore the mode that was active before the current one.
    ///
    /// A drain mode is never restored; it resumes `Auto` instead.
    pub fn resume(&self) -> StateResult<ManagementRecord> {
        let record = self.registry.get_management()?;
        let target = match record.previous {
            ManagementState::Suspending | ManagementState::ResetSuspending => ManagementState::Auto,
            previous => previous,
        };
        if record.current == target {
            return Ok(record);
        }
        let updated = ManagementRecord {
            current: target,
            previous: record.previous,
        };
        self.registry.put_management(&updated)?;
        info!(from = %record.current, to = %target, "management state resumed");
        Ok(updated)
    }

    /// Advance suspend drains. Called at the start of every scan pass and
    /// returns the mode in force afterwards.
    pub async fn tick(&self) -> StateResult<ManagementState> {
        let record = self.registry.get_management()?;
        match record.current {
            ManagementState::Auto | ManagementState::Manual => Ok(record.current),
            ManagementState::Suspending => {
                self.stop_running("suspending").await?;
                // Keep `previous`: the drain resumes whatever preceded the suspend.
                let draining = ManagementRecord {
                    current: ManagementState::ResetSuspending,
                    previous: record.previous,
                };
                self.registry.put_management(&draining)?;
                info!(resume_to = %record.previous, "relays stopped, waiting for drain");
                Ok(draining.current)
            }
            ManagementState::ResetSuspending => {
                self.stop_running("reset-suspending").await?;
                let remaining = self.registry.list_relays_in_states(None, &DRAINING)?;
                if !remaining.is_empty() {
                    info!(remaining = remaining.len(), "relays still draining");
                    return Ok(record.current);
                }
                info!("all relays drained, resuming previous management state");
                Ok(self.resume()?.current)
            }
        }
    }

    async fn stop_running(&self, mode: &'static str) -> StateResult<()> {
        for relay in self.registry.list_relays_in_states(None, &[RelayState::Running])? {
            info!(relay = %relay.id, zone = %relay.zone_id, mode, "stopping relay for management mode");
            if let Err(e) = self.lifecycle.stop(&relay.id).await {
                warn!(relay = %relay.id, error = %e, "failed to stop relay during suspend");
            }
        }
        Ok(())
    }
}
