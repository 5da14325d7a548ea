//! The allocation lock.
//!
//! One `AllocationLock` exists per process. Cloned handles share the same
//! mutex, so the allocation coordinator and the capacity scanner can each
//! hold one and still exclude each other. Acquisition is bounded: a caller
//! that cannot get the lock within its deadline gets [`LockTimeout`] instead
//! of queueing indefinitely.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Returned when the lock could not be acquired before the deadline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("timed out after {waited:?} waiting for lock {name}")]
pub struct LockTimeout {
    pub name: &'static str,
    pub waited: Duration,
}

/// Shared handle to the process-wide allocation lock.
#[derive(Clone)]
pub struct AllocationLock {
    name: &'static str,
    inner: Arc<Mutex<()>>,
}

/// Proof of lock ownership. The lock is released when the guard drops.
pub struct AllocationGuard {
    name: &'static str,
    _guard: OwnedMutexGuard<()>,
}

impl AllocationLock {
    pub fn new() -> Self {
        Self::named("relay.alloc")
    }

    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(())),
        }
    }

    /// Acquire the lock, waiting at most `timeout`.
    pub async fn acquire(&self, timeout: Duration) -> Result<AllocationGuard, LockTimeout> {
        match tokio::time::timeout(timeout, Arc::clone(&self.inner).lock_owned()).await {
            Ok(guard) => {
                trace!(lock = self.name, "lock acquired");
                Ok(AllocationGuard {
                    name: self.name,
                    _guard: guard,
                })
            }
            Err(_) => Err(LockTimeout {
                name: self.name,
                waited: timeout,
            }),
        }
    }

    /// True while some handle holds the lock.
    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

impl Default for AllocationLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AllocationGuard {
    fn drop(&mut self) {
        trace!(lock = self.name, "lock released");
    }
}
