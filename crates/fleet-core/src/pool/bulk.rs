//! Bulk-operation lock
//!
//! Only one bulk operation (start, stop, join, leave) runs on the pool at a
//! time. Acquisition never waits: a second request is refused with
//! [`FleetError::BulkOperationInProgress`].

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{FleetError, FleetResult};

#[derive(Debug, Default)]
pub struct BulkLock {
    running: Mutex<Option<&'static str>>,
}

impl BulkLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the lock for `operation`
    pub fn try_acquire(&self, operation: &'static str) -> FleetResult<BulkGuard<'_>> {
        let mut running = self.running.lock();
        if let Some(current) = *running {
            return Err(FleetError::BulkOperationInProgress {
                running: current,
                requested: operation,
            });
        }
        *running = Some(operation);
        debug!(operation, "Bulk operation started");
        Ok(BulkGuard {
            lock: self,
            operation,
        })
    }

    /// Operation currently holding the lock
    pub fn running(&self) -> Option<&'static str> {
        *self.running.lock()
    }
}

/// Releases the bulk lock when dropped
#[derive(Debug)]
pub struct BulkGuard<'a> {
    lock: &'a BulkLock,
    operation: &'static str,
}

impl BulkGuard<'_> {
    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

impl Drop for BulkGuard<'_> {
    fn drop(&mut self) {
        *self.lock.running.lock() = None;
        debug!(operation = self.operation, "Bulk operation finished");
    }
}
