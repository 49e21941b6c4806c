//! Dispatch Engine
//!
//! The ride state machine. Each transition runs as one critical section on
//! the ride's identity: read the store, persist, schedule or cancel timers,
//! release the lock, and only then hand the resulting deliveries to the bus.
//! A transition that fails to persist emits nothing.

use alloc::{sync::Arc, vec::Vec};
use core::future::Future;
use core::time::Duration;
use ridedispatch_core::{
    Delivery, DispatchConfig, DispatchError, DispatchResult, Event, Notification, Ride,
    RideStatus, RiderId, SystemTimeSource, TimeSource,
};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::state::DispatchStats;
use crate::bus::NotificationBus;
use crate::managers::{IdentityLocks, TimerFiredSender, TimerHandle, TimerRegistry};
use crate::store::RideStore;

// ----------------------------------------------------------------------------
// Dispatch Engine
// ----------------------------------------------------------------------------

/// Ride state machine shared by every event task
#[derive(Clone)]
pub struct DispatchEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: DispatchConfig,
    store: Arc<dyn RideStore>,
    bus: Arc<dyn NotificationBus>,
    timers: TimerRegistry,
    locks: IdentityLocks,
    clock: Arc<dyn TimeSource>,
    stats: Arc<DispatchStats>,
}

impl core::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("config", &self.inner.config)
            .field("live_timers", &self.inner.timers.live_count())
            .field("held_locks", &self.inner.locks.len())
            .finish()
    }
}

impl DispatchEngine {
    /// Create an engine; elapsed timers are reported on `timer_fired`
    pub fn new(
        config: DispatchConfig,
        store: Arc<dyn RideStore>,
        bus: Arc<dyn NotificationBus>,
        timer_fired: TimerFiredSender,
    ) -> Self {
        Self::with_time_source(config, store, bus, timer_fired, Arc::new(SystemTimeSource))
    }

    /// Create an engine that stamps rides using `clock`
    pub fn with_time_source(
        config: DispatchConfig,
        store: Arc<dyn RideStore>,
        bus: Arc<dyn NotificationBus>,
        timer_fired: TimerFiredSender,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                bus,
                timers: TimerRegistry::new(timer_fired),
                locks: IdentityLocks::new(),
                clock,
                stats: Arc::new(DispatchStats::new()),
            }),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn RideStore> {
        &self.inner.store
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.inner.stats)
    }

    /// Whether `identity` currently has a live expiration timer
    pub fn has_live_timer(&self, identity: &RiderId) -> bool {
        self.inner.timers.is_live(identity)
    }

    pub fn live_timer_count(&self) -> usize {
        self.inner.timers.live_count()
    }

    /// Arm expiry timers for pending rides loaded from a durable store,
    /// counting the time each ride has already spent pending
    pub async fn restore_timers(&self) -> DispatchResult<usize> {
        let pending = self.inner.store.list_pending().await?;
        let now = self.inner.clock.now().as_millis();
        for ride in &pending {
            let age = Duration::from_millis(now.saturating_sub(ride.created_at.as_millis()));
            let remaining = self.inner.config.pending_timeout.saturating_sub(age);
            self.inner.timers.schedule(ride.id.clone(), remaining);
        }
        if !pending.is_empty() {
            info!(count = pending.len(), "Restored expiry timers for pending rides");
        }
        Ok(pending.len())
    }

    /// Abort every live timer; used on shutdown
    pub fn cancel_all_timers(&self) -> usize {
        self.inner.timers.cancel_all()
    }

    /// Route an inbound event to its transition
    pub async fn process(&self, event: Event) -> DispatchResult<()> {
        event.validate()?;
        self.inner.stats.record_event();
        debug!(kind = event.kind(), identity = %event.ride_key(), "Processing event");

        match event {
            Event::NewRide { identity, payload } => self.handle_new_ride(identity, payload).await,
            Event::Reaction {
                target_identity,
                responder_identity,
                responder_details,
            } => {
                self.handle_reaction(target_identity, responder_identity, responder_details)
                    .await
            }
            Event::StatusUpdate {
                target_identity,
                status,
                actor_identity,
                actor_details,
            } => {
                self.handle_status_update(target_identity, status, actor_identity, actor_details)
                    .await
            }
            Event::Connected { identity } => self.handle_connected(identity).await,
            Event::Disconnect { identity } => {
                self.handle_disconnect(&identity);
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    /// Create a pending ride for `identity` and broadcast it.
    ///
    /// A requester that already has an active ride gets a `rideRejected`
    /// notice and the call returns `DuplicateActiveRide`.
    pub async fn handle_new_ride(&self, identity: RiderId, payload: Value) -> DispatchResult<()> {
        let result = self
            .run_locked(&identity, || self.apply_new_ride(&identity, payload))
            .await;

        if let Err(err @ DispatchError::DuplicateActiveRide { .. }) = &result {
            self.inner.stats.record_rejected();
            warn!(identity = %identity, "Rejected new ride: {}", err);
            self.inner.bus.deliver(Delivery::to_one(
                identity.clone(),
                Notification::RideRejected {
                    reason: err.to_string(),
                },
            ));
        }
        result
    }

    async fn apply_new_ride(
        &self,
        identity: &RiderId,
        payload: Value,
    ) -> DispatchResult<Vec<Delivery>> {
        if self.inner.store.get(identity).await?.is_some() {
            return Err(DispatchError::duplicate_active_ride(identity.as_str()));
        }

        let ride = Ride::new(identity.clone(), payload, self.inner.clock.now());
        self.inner.store.upsert(identity, ride.clone()).await?;
        self.inner
            .timers
            .schedule(identity.clone(), self.inner.config.pending_timeout);

        self.inner.stats.record_created();
        info!(identity = %identity, "Ride created");
        Ok(vec![Delivery::to_all(Notification::RideBroadcast { ride })])
    }

    /// Accept the pending ride of `target` on behalf of `responder`.
    ///
    /// The target is acknowledged when the acceptance is applied and when it
    /// has no active ride at all. A ride that is no longer pending is left
    /// alone without an acknowledgement.
    pub async fn handle_reaction(
        &self,
        target: RiderId,
        responder: RiderId,
        responder_details: Value,
    ) -> DispatchResult<()> {
        let ack = Delivery::to_one(target.clone(), Notification::ReactionAck { responder_details });
        let result = self
            .run_locked(&target, || self.apply_reaction(&target, &responder, ack.clone()))
            .await;

        match result {
            Err(DispatchError::NotFound { .. }) => {
                self.inner.bus.deliver(ack);
                Ok(())
            }
            other => other,
        }
    }

    async fn apply_reaction(
        &self,
        target: &RiderId,
        responder: &RiderId,
        ack: Delivery,
    ) -> DispatchResult<Vec<Delivery>> {
        let ride = self
            .inner
            .store
            .get(target)
            .await?
            .ok_or_else(|| DispatchError::not_found(target.as_str()))?;

        if !ride.is_pending() {
            self.inner.stats.record_no_op();
            debug!(
                identity = %target,
                responder = %responder,
                status = %ride.status,
                "Reaction ignored, ride is no longer pending"
            );
            return Ok(Vec::new());
        }

        // Persist first: if this fails the ride stays pending with its timer
        self.inner
            .store
            .upsert(target, ride.accepted(responder.clone()))
            .await?;
        self.inner.timers.cancel_identity(target);

        self.inner.stats.record_accepted();
        info!(identity = %target, responder = %responder, "Ride accepted");
        Ok(vec![ack])
    }

    /// Apply a participant-reported status to the active ride of `target`.
    ///
    /// `ended` and `cancelled` archive the ride and remove it from the
    /// active set; any other text replaces the status in place.
    pub async fn handle_status_update(
        &self,
        target: RiderId,
        status: String,
        actor: RiderId,
        actor_details: Value,
    ) -> DispatchResult<()> {
        let result = self
            .run_locked(&target, || {
                self.apply_status_update(&target, RideStatus::parse(&status), &actor, actor_details)
            })
            .await;

        match result {
            Err(DispatchError::NotFound { .. }) => Ok(()),
            other => other,
        }
    }

    async fn apply_status_update(
        &self,
        target: &RiderId,
        status: RideStatus,
        actor: &RiderId,
        actor_details: Value,
    ) -> DispatchResult<Vec<Delivery>> {
        if status.is_pending() {
            self.inner.stats.record_no_op();
            warn!(identity = %target, actor = %actor, "Status update cannot return a ride to pending");
            return Ok(Vec::new());
        }

        let ride = self
            .inner
            .store
            .get(target)
            .await?
            .ok_or_else(|| DispatchError::not_found(target.as_str()))?;

        let broadcast = Delivery::to_one(
            target.clone(),
            Notification::StatusBroadcast {
                status: status.to_string(),
                message: format!("{} updated your ride: {}", actor, status),
                actor_details,
            },
        );

        match ride.archived(status.clone(), actor.clone(), self.inner.clock.now()) {
            Some(record) => {
                self.inner.store.archive(record.clone()).await?;
                self.inner.store.remove(target).await?;
                self.inner.timers.cancel_identity(target);

                self.inner.stats.record_archived();
                info!(
                    identity = %target,
                    actor = %actor,
                    kind = ?record.archive_kind,
                    "Ride archived"
                );
                Ok(vec![
                    broadcast,
                    Delivery::to_one(
                        target.clone(),
                        Notification::ArchiveNotice {
                            archived_ride: record,
                        },
                    ),
                ])
            }
            None => {
                self.inner.store.upsert(target, ride.with_status(status.clone())).await?;
                // Any status other than pending ends the ride's expiry window
                self.inner.timers.cancel_identity(target);

                self.inner.stats.record_status_update();
                info!(identity = %target, actor = %actor, %status, "Ride status updated");
                Ok(vec![broadcast])
            }
        }
    }

    /// Expire the ride behind an elapsed timer, unless the timer was
    /// cancelled or replaced before the engine got to it.
    pub async fn handle_timer_fired(&self, handle: TimerHandle) -> DispatchResult<()> {
        let identity = handle.identity.clone();
        self.run_locked(&identity, || self.apply_expiry(handle)).await
    }

    async fn apply_expiry(&self, handle: TimerHandle) -> DispatchResult<Vec<Delivery>> {
        let identity = &handle.identity;
        if !self.inner.timers.claim(&handle) {
            debug!(identity = %identity, generation = handle.generation, "Timer fire suppressed");
            return Ok(Vec::new());
        }

        match self.inner.store.get(identity).await? {
            Some(ride) if ride.is_pending() => {}
            _ => {
                self.inner.stats.record_no_op();
                debug!(identity = %identity, "Expired timer found no pending ride");
                return Ok(Vec::new());
            }
        }

        // Read before removing so nothing can fail once the ride is gone
        let mut pending = self.inner.store.list_pending().await?;
        pending.retain(|ride| ride.id != *identity);

        if let Err(err) = self.inner.store.remove(identity).await {
            // The ride is still pending, so it needs a live timer again
            self.inner
                .timers
                .schedule(identity.clone(), self.inner.config.expiry_retry_delay);
            return Err(err.into());
        }

        self.inner.stats.record_expired();
        info!(identity = %identity, "Ride expired");
        Ok(vec![
            Delivery::to_one(
                identity.clone(),
                Notification::TimeoutNotice {
                    message: self.inner.config.timeout_message.clone(),
                },
            ),
            Delivery::to_all(Notification::PendingListBroadcast { rides: pending }),
        ])
    }

    /// Send the current pending list to a participant that just connected
    pub async fn handle_connected(&self, identity: RiderId) -> DispatchResult<()> {
        let rides = self.pending_rides().await?;
        info!(identity = %identity, pending = rides.len(), "Participant connected");
        self.inner.bus.deliver(Delivery::to_one(
            identity,
            Notification::PendingListSnapshot { rides },
        ));
        Ok(())
    }

    /// Rides outlive their connection; a disconnect is only logged
    pub fn handle_disconnect(&self, identity: &RiderId) {
        info!(identity = %identity, "Participant disconnected");
    }

    /// Re-send the pending list to every participant
    pub async fn broadcast_pending_list(&self) -> DispatchResult<()> {
        let rides = self.pending_rides().await?;
        self.inner
            .bus
            .deliver(Delivery::to_all(Notification::PendingListBroadcast { rides }));
        Ok(())
    }

    pub async fn pending_rides(&self) -> DispatchResult<Vec<Ride>> {
        Ok(self.inner.store.list_pending().await?)
    }

    // ------------------------------------------------------------------------
    // Critical Section
    // ------------------------------------------------------------------------

    /// Run `transition` under the lock of `identity`, then emit its
    /// deliveries once the lock is released
    async fn run_locked<F, Fut>(&self, identity: &RiderId, transition: F) -> DispatchResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DispatchResult<Vec<Delivery>>>,
    {
        let outcome = {
            let _guard = self.inner.locks.lock(identity).await;
            transition().await
        };

        match outcome {
            Ok(deliveries) => {
                for delivery in deliveries {
                    self.inner.bus.deliver(delivery);
                }
                Ok(())
            }
            Err(DispatchError::Persistence(err)) => {
                self.inner.stats.record_persistence_failure();
                error!(identity = %identity, "Transition aborted, nothing was emitted: {}", err);
                Err(DispatchError::Persistence(err))
            }
            Err(err @ DispatchError::NotFound { .. }) => {
                self.inner.stats.record_no_op();
                debug!(identity = %identity, "No active ride, nothing to apply");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::RecordingBus;
    use crate::managers::create_timer_channel;
    use crate::store::MemoryRideStore;
    use ridedispatch_core::{Audience, FixedTimeSource, Timestamp};
    use serde_json::json;

    fn rider(id: &str) -> RiderId {
        RiderId::new(id).unwrap()
    }

    fn engine() -> (DispatchEngine, Arc<MemoryRideStore>, RecordingBus) {
        let store = Arc::new(MemoryRideStore::new());
        let bus = RecordingBus::new();
        let (tx, _rx) = create_timer_channel();
        let engine = DispatchEngine::with_time_source(
            DispatchConfig::default(),
            store.clone(),
            Arc::new(bus.clone()),
            tx,
            Arc::new(FixedTimeSource(Timestamp::new(1_000))),
        );
        (engine, store, bus)
    }

    #[tokio::test]
    async fn test_new_ride_is_stamped_and_broadcast() {
        let (engine, store, bus) = engine();
        engine
            .handle_new_ride(rider("R1"), json!({"from": "A"}))
            .await
            .unwrap();

        let ride = store.get(&rider("R1")).await.unwrap().unwrap();
        assert_eq!(ride.created_at, Timestamp::new(1_000));
        assert!(engine.has_live_timer(&rider("R1")));

        let sent = bus.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].audience, Audience::All);
    }

    #[tokio::test]
    async fn test_failed_acceptance_keeps_ride_pending() {
        let (engine, store, bus) = engine();
        engine.handle_new_ride(rider("R1"), json!({})).await.unwrap();
        bus.take();

        store.fail_next_writes(1);
        let result = engine
            .handle_reaction(rider("R1"), rider("D1"), json!({"name": "Dana"}))
            .await;

        assert!(matches!(result, Err(DispatchError::Persistence(_))));
        assert!(bus.take().is_empty());
        assert!(store.get(&rider("R1")).await.unwrap().unwrap().is_pending());
        assert!(engine.has_live_timer(&rider("R1")));
        assert_eq!(engine.stats().snapshot().persistence_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restored_timer_counts_elapsed_time() {
        let store = Arc::new(MemoryRideStore::new());
        let r1 = rider("R1");
        store
            .upsert(&r1, Ride::new(r1.clone(), json!({}), Timestamp::new(1_000)))
            .await
            .unwrap();

        let (tx, mut rx) = create_timer_channel();
        let engine = DispatchEngine::with_time_source(
            DispatchConfig::default(),
            store,
            Arc::new(RecordingBus::new()),
            tx,
            Arc::new(FixedTimeSource(Timestamp::new(41_000))),
        );
        assert_eq!(engine.restore_timers().await.unwrap(), 1);

        let start = tokio::time::Instant::now();
        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.identity, r1);
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_pending_status_update_is_ignored() {
        let (engine, store, bus) = engine();
        engine.handle_new_ride(rider("R1"), json!({})).await.unwrap();
        engine
            .handle_reaction(rider("R1"), rider("D1"), Value::Null)
            .await
            .unwrap();
        bus.take();

        engine
            .handle_status_update(rider("R1"), "pending".to_string(), rider("D1"), Value::Null)
            .await
            .unwrap();

        assert!(bus.take().is_empty());
        let ride = store.get(&rider("R1")).await.unwrap().unwrap();
        assert_eq!(ride.status, RideStatus::Accepted);
    }

    #[tokio::test]
    async fn test_missing_ride_is_a_silent_no_op() {
        let (engine, store, bus) = engine();

        engine
            .handle_status_update(rider("R1"), "ended".to_string(), rider("D1"), Value::Null)
            .await
            .unwrap();
        assert!(bus.take().is_empty());

        engine
            .handle_reaction(rider("R1"), rider("D1"), json!({"name": "Dana"}))
            .await
            .unwrap();
        let sent = bus.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].notification,
            Notification::ReactionAck {
                responder_details: json!({"name": "Dana"})
            }
        );
        assert!(sent[0].is_for(&rider("R1")));

        assert_eq!(store.active_count().await.unwrap(), 0);
        assert_eq!(engine.stats().snapshot().no_ops, 2);
    }

    #[tokio::test]
    async fn test_expiry_broadcast_excludes_expired_ride() {
        let store = Arc::new(MemoryRideStore::new());
        let bus = RecordingBus::new();
        let (tx, mut fired) = create_timer_channel();
        let engine = DispatchEngine::with_time_source(
            DispatchConfig {
                pending_timeout: Duration::from_millis(5),
                ..DispatchConfig::default()
            },
            store.clone(),
            Arc::new(bus.clone()),
            tx,
            Arc::new(FixedTimeSource(Timestamp::new(1_000))),
        );
        engine.handle_new_ride(rider("R1"), json!({})).await.unwrap();
        engine.handle_new_ride(rider("R2"), json!({})).await.unwrap();
        bus.take();

        let handle = loop {
            let handle = fired.recv().await.unwrap();
            if handle.identity == rider("R1") {
                break handle;
            }
        };
        engine.handle_timer_fired(handle).await.unwrap();

        let sent = bus.take();
        assert_eq!(sent.len(), 2);
        match &sent[1].notification {
            Notification::PendingListBroadcast { rides } => {
                let ids: Vec<String> = rides.iter().map(|r| r.id.to_string()).collect();
                assert_eq!(ids, vec!["R2"]);
            }
            other => panic!("Expected pendingListBroadcast, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_event_is_rejected_before_any_transition() {
        let (engine, _store, bus) = engine();
        let event: Event = serde_json::from_value(json!({
            "type": "newRide",
            "identity": "",
            "payload": {}
        }))
        .unwrap();

        assert!(matches!(
            engine.process(event).await,
            Err(DispatchError::InvalidEvent { .. })
        ));
        assert!(bus.deliveries().is_empty());
        assert_eq!(engine.stats().snapshot().events_processed, 0);
    }
}
