//! Per-identity mutual exclusion
//!
//! Every transition on a ride runs while holding the lock of the ride's
//! identity. Waiters are served in arrival order, and locks for different
//! identities are independent. Table entries are dropped once nobody holds
//! or waits on them.

use alloc::sync::Arc;
use dashmap::DashMap;
use ridedispatch_core::RiderId;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = DashMap<RiderId, Arc<Mutex<()>>>;

/// Table of per-identity FIFO locks
#[derive(Debug, Clone, Default)]
pub struct IdentityLocks {
    table: Arc<LockTable>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `identity`
    pub async fn lock(&self, identity: &RiderId) -> IdentityGuard {
        let mutex = self
            .table
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = mutex.lock_owned().await;
        IdentityGuard {
            identity: identity.clone(),
            table: Arc::clone(&self.table),
            guard: Some(guard),
        }
    }

    /// Number of identities currently held or waited on
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Exclusive access to one identity, released on drop
#[derive(Debug)]
pub struct IdentityGuard {
    identity: RiderId,
    table: Arc<LockTable>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl IdentityGuard {
    pub fn identity(&self) -> &RiderId {
        &self.identity
    }
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table's own reference left: nobody is waiting
        self.table
            .remove_if(&self.identity, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
