//! Shared fixtures for dispatch integration tests

#![allow(dead_code)]

use ridedispatch_core::{
    Audience, Delivery, DispatchConfig, FixedTimeSource, Notification, RiderId, Timestamp,
};
use ridedispatch_runtime::{
    create_timer_channel, DispatchEngine, MemoryRideStore, RecordingBus, TimerFiredReceiver,
    TimerHandle,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

pub fn rider(id: &str) -> RiderId {
    RiderId::new(id).unwrap()
}

/// Engine over a memory store and a recording bus, with the timer channel
/// left in the test's hands so expiries can be driven explicitly
pub struct Harness {
    pub engine: DispatchEngine,
    pub store: Arc<MemoryRideStore>,
    pub bus: RecordingBus,
    pub fired: TimerFiredReceiver,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::default())
    }

    pub fn with_config(config: DispatchConfig) -> Self {
        let store = Arc::new(MemoryRideStore::new());
        let bus = RecordingBus::new();
        let (sender, fired) = create_timer_channel();
        let engine = DispatchEngine::with_time_source(
            config,
            store.clone(),
            Arc::new(bus.clone()),
            sender,
            Arc::new(FixedTimeSource(Timestamp::new(1_700_000_000_000))),
        );
        Self {
            engine,
            store,
            bus,
            fired,
        }
    }

    /// Wait for the next elapsed timer
    pub async fn next_fire(&mut self) -> TimerHandle {
        timeout(Duration::from_secs(600), self.fired.recv())
            .await
            .expect("no timer elapsed")
            .expect("timer channel closed")
    }

    /// Whether any timer elapses within `window`
    pub async fn fires_within(&mut self, window: Duration) -> bool {
        timeout(window, self.fired.recv()).await.is_ok()
    }
}

/// Notifications addressed to exactly `identity`
pub fn sent_to(deliveries: &[Delivery], identity: &RiderId) -> Vec<Notification> {
    deliveries
        .iter()
        .filter(|d| matches!(&d.audience, Audience::One { identity: target } if target == identity))
        .map(|d| d.notification.clone())
        .collect()
}

/// Notifications addressed to everyone
pub fn broadcasts(deliveries: &[Delivery]) -> Vec<Notification> {
    deliveries
        .iter()
        .filter(|d| d.audience == Audience::All)
        .map(|d| d.notification.clone())
        .collect()
}

pub fn count_kind(notifications: &[Notification], kind: &str) -> usize {
    notifications.iter().filter(|n| n.kind() == kind).count()
}
