//! Expiration timers for pending rides
//!
//! At most one timer is live per identity. A timer that elapses does not act
//! on its own: it reports its [`TimerHandle`] over a channel, and the engine
//! must [`claim`](TimerRegistry::claim) it while holding the identity lock.
//! Cancel and claim both remove the registry entry, so whichever runs first
//! wins and the other becomes a no-op.

use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;
use dashmap::DashMap;
use ridedispatch_core::RiderId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// Identifies one scheduled timer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    pub identity: RiderId,
    pub generation: u64,
}

pub type TimerFiredSender = mpsc::UnboundedSender<TimerHandle>;
pub type TimerFiredReceiver = mpsc::UnboundedReceiver<TimerHandle>;

/// Create the channel elapsed timers report on
pub fn create_timer_channel() -> (TimerFiredSender, TimerFiredReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug)]
struct TimerEntry {
    generation: u64,
    sleeper: JoinHandle<()>,
}

/// Registry of live expiration timers keyed by identity
#[derive(Debug)]
pub struct TimerRegistry {
    timers: DashMap<RiderId, TimerEntry>,
    next_generation: AtomicU64,
    fired: TimerFiredSender,
}

impl TimerRegistry {
    pub fn new(fired: TimerFiredSender) -> Self {
        Self {
            timers: DashMap::new(),
            next_generation: AtomicU64::new(1),
            fired,
        }
    }

    /// Start a timer for `identity`, replacing any timer it already had
    pub fn schedule(&self, identity: RiderId, delay: Duration) -> TimerHandle {
        let handle = TimerHandle {
            identity: identity.clone(),
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
        };

        let fired = self.fired.clone();
        let report = handle.clone();
        let sleeper = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The receiver is gone only during shutdown
            let _ = fired.send(report);
        });

        let entry = TimerEntry {
            generation: handle.generation,
            sleeper,
        };
        if let Some(previous) = self.timers.insert(identity, entry) {
            previous.sleeper.abort();
        }

        trace!(identity = %handle.identity, generation = handle.generation, "Timer scheduled");
        handle
    }

    /// Cancel exactly this timer. Returns `false` if it was already cancelled,
    /// claimed or replaced.
    pub fn cancel(&self, handle: &TimerHandle) -> bool {
        match self
            .timers
            .remove_if(&handle.identity, |_, entry| entry.generation == handle.generation)
        {
            Some((_, entry)) => {
                entry.sleeper.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel whatever timer `identity` has. Idempotent.
    pub fn cancel_identity(&self, identity: &RiderId) -> bool {
        match self.timers.remove(identity) {
            Some((_, entry)) => {
                entry.sleeper.abort();
                trace!(identity = %identity, generation = entry.generation, "Timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Take ownership of an elapsed timer so its expiry may run.
    ///
    /// Succeeds at most once per handle, and never after a cancel.
    pub fn claim(&self, handle: &TimerHandle) -> bool {
        self.timers
            .remove_if(&handle.identity, |_, entry| entry.generation == handle.generation)
            .is_some()
    }

    /// Whether `identity` has a timer that has been neither cancelled nor claimed
    pub fn is_live(&self, identity: &RiderId) -> bool {
        self.timers.contains_key(identity)
    }

    pub fn live_count(&self) -> usize {
        self.timers.len()
    }

    /// Abort every live timer
    pub fn cancel_all(&self) -> usize {
        let identities: Vec<RiderId> = self.timers.iter().map(|e| e.key().clone()).collect();
        identities
            .iter()
            .filter(|identity| self.cancel_identity(identity))
            .count()
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        for entry in self.timers.iter() {
            entry.value().sleeper.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn rider(id: &str) -> RiderId {
        RiderId::new(id).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_timer_reports_and_claims_once() {
        let (tx, mut rx) = create_timer_channel();
        let registry = TimerRegistry::new(tx);
        let handle = registry.schedule(rider("R1"), Duration::from_secs(60));

        let fired = timeout(Duration::from_secs(61), rx.recv())
            .await
            .expect("timer should elapse")
            .unwrap();
        assert_eq!(fired, handle);
        assert!(registry.is_live(&handle.identity));

        assert!(registry.claim(&fired));
        assert!(!registry.claim(&fired));
        assert!(!registry.is_live(&handle.identity));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_reports() {
        let (tx, mut rx) = create_timer_channel();
        let registry = TimerRegistry::new(tx);
        let handle = registry.schedule(rider("R1"), Duration::from_secs(60));

        assert!(registry.cancel(&handle));
        assert!(!registry.cancel(&handle));
        assert!(!registry.cancel_identity(&handle.identity));

        assert!(timeout(Duration::from_secs(120), rx.recv()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_elapse_wins_over_claim() {
        let (tx, mut rx) = create_timer_channel();
        let registry = TimerRegistry::new(tx);
        registry.schedule(rider("R1"), Duration::from_secs(1));

        let fired = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(registry.cancel_identity(&fired.identity));
        assert!(!registry.claim(&fired));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_invalidates_previous_handle() {
        let (tx, mut rx) = create_timer_channel();
        let registry = TimerRegistry::new(tx);
        let first = registry.schedule(rider("R1"), Duration::from_secs(10));
        let second = registry.schedule(rider("R1"), Duration::from_secs(20));

        assert_eq!(registry.live_count(), 1);
        assert!(!registry.cancel(&first));

        let fired = timeout(Duration::from_secs(30), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fired, second);
        assert!(!registry.claim(&first));
        assert!(registry.claim(&second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_stops_everything() {
        let (tx, mut rx) = create_timer_channel();
        let registry = TimerRegistry::new(tx);
        for id in ["R1", "R2", "R3"] {
            registry.schedule(rider(id), Duration::from_secs(5));
        }

        assert_eq!(registry.cancel_all(), 3);
        assert_eq!(registry.live_count(), 0);
        assert!(timeout(Duration::from_secs(10), rx.recv()).await.is_err());
    }
}
