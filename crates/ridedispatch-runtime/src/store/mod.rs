//! Durable ride storage
//!
//! The active set maps each requester identity to at most one ride; the
//! archive is an append-only sequence of terminal rides. Only the dispatch
//! engine mutates a store, always while holding the identity's lock.

use alloc::{boxed::Box, sync::Arc, vec::Vec};
use async_trait::async_trait;
use ridedispatch_core::{PersistenceResult, Ride, RiderId, StorageConfig};

mod file;
mod memory;
mod retry;

pub use file::FileRideStore;
pub use memory::MemoryRideStore;
pub use retry::with_retry;

// ----------------------------------------------------------------------------
// Storage Trait
// ----------------------------------------------------------------------------

/// Active-set and archive storage for rides
#[async_trait]
pub trait RideStore: Send + Sync {
    /// Insert or replace the active ride for `identity`; durable on return
    async fn upsert(&self, identity: &RiderId, ride: Ride) -> PersistenceResult<()>;

    /// Current active ride for `identity`
    async fn get(&self, identity: &RiderId) -> PersistenceResult<Option<Ride>>;

    /// Remove and return the active ride for `identity`, `None` if absent
    async fn remove(&self, identity: &RiderId) -> PersistenceResult<Option<Ride>>;

    /// Snapshot of every pending ride, oldest first
    async fn list_pending(&self) -> PersistenceResult<Vec<Ride>>;

    /// Append a terminal record to the archive as a single all-or-nothing write.
    /// Archiving a ride instance that is already archived is a no-op.
    async fn archive(&self, ride: Ride) -> PersistenceResult<()>;

    /// Every archived record in append order
    async fn archived(&self) -> PersistenceResult<Vec<Ride>>;

    /// Number of active rides
    async fn active_count(&self) -> PersistenceResult<usize>;
}

/// Order pending rides oldest first, ties broken by identity
pub(crate) fn sort_pending(rides: &mut [Ride]) {
    rides.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

// ----------------------------------------------------------------------------
// Factory Functions
// ----------------------------------------------------------------------------

/// Create the store selected by `config`: file-backed when a data directory
/// is configured, in-memory otherwise
pub async fn create_store(config: &StorageConfig) -> PersistenceResult<Arc<dyn RideStore>> {
    match &config.data_dir {
        Some(dir) => {
            let store = FileRideStore::open(dir, config.retry.clone()).await?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryRideStore::new())),
    }
}

/// Create a storage implementation for testing
pub fn create_test_store() -> Arc<MemoryRideStore> {
    Arc::new(MemoryRideStore::new())
}
