//! Dispatch statistics

use core::sync::atomic::{AtomicU64, Ordering};
use serde::Serialize;

/// Counters updated by the engine as transitions complete
#[derive(Debug, Default)]
pub struct DispatchStats {
    events_processed: AtomicU64,
    rides_created: AtomicU64,
    rides_rejected: AtomicU64,
    rides_accepted: AtomicU64,
    rides_expired: AtomicU64,
    rides_archived: AtomicU64,
    status_updates: AtomicU64,
    no_ops: AtomicU64,
    persistence_failures: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStatsSnapshot {
    pub events_processed: u64,
    pub rides_created: u64,
    pub rides_rejected: u64,
    pub rides_accepted: u64,
    pub rides_expired: u64,
    pub rides_archived: u64,
    pub status_updates: u64,
    pub no_ops: u64,
    pub persistence_failures: u64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            pub(crate) fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    counter! {
        record_event => events_processed,
        record_created => rides_created,
        record_rejected => rides_rejected,
        record_accepted => rides_accepted,
        record_expired => rides_expired,
        record_archived => rides_archived,
        record_status_update => status_updates,
        record_no_op => no_ops,
        record_persistence_failure => persistence_failures,
    }

    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            rides_created: self.rides_created.load(Ordering::Relaxed),
            rides_rejected: self.rides_rejected.load(Ordering::Relaxed),
            rides_accepted: self.rides_accepted.load(Ordering::Relaxed),
            rides_expired: self.rides_expired.load(Ordering::Relaxed),
            rides_archived: self.rides_archived.load(Ordering::Relaxed),
            status_updates: self.status_updates.load(Ordering::Relaxed),
            no_ops: self.no_ops.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
        }
    }
}
