//! In-memory ride store for tests and ephemeral deployments

use alloc::vec::Vec;
use async_trait::async_trait;
use dashmap::DashMap;
use ridedispatch_core::{PersistenceError, PersistenceResult, Ride, RiderId};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use super::{sort_pending, RideStore};

/// Ride store kept entirely in memory.
///
/// Writes can be made to fail on demand, which is how tests drive the
/// persistence-failure paths of the engine.
#[derive(Debug)]
pub struct MemoryRideStore {
    active: DashMap<RiderId, Ride>,
    archive: Mutex<Vec<Ride>>,
    available: AtomicBool,
    failing_writes: AtomicU32,
}

impl Default for MemoryRideStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRideStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self {
            active: DashMap::new(),
            archive: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
            failing_writes: AtomicU32::new(0),
        }
    }

    /// Make every write fail (`false`) or succeed again (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make the next `count` writes fail
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn check_write(&self) -> PersistenceResult<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(PersistenceError::unavailable("Storage not available"));
        }
        let consumed = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(PersistenceError::unavailable("Injected write failure"));
        }
        Ok(())
    }

    fn lock_archive(&self) -> std::sync::MutexGuard<'_, Vec<Ride>> {
        // A poisoned archive still holds only whole records
        self.archive
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RideStore for MemoryRideStore {
    async fn upsert(&self, identity: &RiderId, ride: Ride) -> PersistenceResult<()> {
        self.check_write()?;
        self.active.insert(identity.clone(), ride);
        Ok(())
    }

    async fn get(&self, identity: &RiderId) -> PersistenceResult<Option<Ride>> {
        Ok(self.active.get(identity).map(|entry| entry.value().clone()))
    }

    async fn remove(&self, identity: &RiderId) -> PersistenceResult<Option<Ride>> {
        self.check_write()?;
        Ok(self.active.remove(identity).map(|(_, ride)| ride))
    }

    async fn list_pending(&self) -> PersistenceResult<Vec<Ride>> {
        let mut rides: Vec<Ride> = self
            .active
            .iter()
            .filter(|entry| entry.value().is_pending())
            .map(|entry| entry.value().clone())
            .collect();
        sort_pending(&mut rides);
        Ok(rides)
    }

    async fn archive(&self, ride: Ride) -> PersistenceResult<()> {
        self.check_write()?;
        let mut archive = self.lock_archive();
        if !archive.iter().any(|record| record.same_instance(&ride)) {
            archive.push(ride);
        }
        Ok(())
    }

    async fn archived(&self) -> PersistenceResult<Vec<Ride>> {
        Ok(self.lock_archive().clone())
    }

    async fn active_count(&self) -> PersistenceResult<usize> {
        Ok(self.active.len())
    }
}
