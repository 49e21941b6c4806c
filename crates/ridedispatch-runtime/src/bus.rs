//! Outbound notification bus
//!
//! Delivery is fire-and-forget: the engine never waits on, or learns about,
//! a participant that is not listening.

use alloc::sync::Arc;
use ridedispatch_core::{Delivery, DeliverySender};
use std::sync::Mutex;
use tracing::{debug, trace};

/// Sink for addressed notifications
pub trait NotificationBus: Send + Sync {
    fn deliver(&self, delivery: Delivery);
}

/// Bus backed by the broadcast delivery channel; each transport subscribes
/// and filters by audience
#[derive(Debug, Clone)]
pub struct ChannelBus {
    sender: DeliverySender,
}

impl ChannelBus {
    pub fn new(sender: DeliverySender) -> Self {
        Self { sender }
    }

    pub fn sender(&self) -> &DeliverySender {
        &self.sender
    }
}

impl NotificationBus for ChannelBus {
    fn deliver(&self, delivery: Delivery) {
        let kind = delivery.notification.kind();
        let audience = delivery.audience.to_string();
        match self.sender.send(delivery) {
            Ok(receivers) => trace!(kind, %audience, receivers, "Delivered notification"),
            Err(_) => debug!(kind, %audience, "No subscribers, notification dropped"),
        }
    }
}

/// Bus that keeps every delivery in memory, in emission order
#[derive(Debug, Clone, Default)]
pub struct RecordingBus {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything delivered so far
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.lock().clone()
    }

    /// Remove and return everything delivered so far
    pub fn take(&self) -> Vec<Delivery> {
        core::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Delivery>> {
        self.deliveries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl NotificationBus for RecordingBus {
    fn deliver(&self, delivery: Delivery) {
        self.lock().push(delivery);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ridedispatch_core::{create_delivery_channel, ChannelConfig, Notification, RiderId};

    #[tokio::test]
    async fn test_channel_bus_fans_out_to_subscribers() {
        let (sender, mut first) = create_delivery_channel(&ChannelConfig::testing());
        let mut second = sender.subscribe();
        let bus = ChannelBus::new(sender);

        let delivery = Delivery::to_one(
            RiderId::new("R1").unwrap(),
            Notification::TimeoutNotice {
                message: "expired".to_string(),
            },
        );
        bus.deliver(delivery.clone());

        assert_eq!(first.recv().await.unwrap(), delivery);
        assert_eq!(second.recv().await.unwrap(), delivery);
    }

    #[test]
    fn test_channel_bus_without_subscribers_does_not_fail() {
        let (sender, receiver) = create_delivery_channel(&ChannelConfig::testing());
        drop(receiver);
        ChannelBus::new(sender).deliver(Delivery::to_all(Notification::PendingListBroadcast {
            rides: Vec::new(),
        }));
    }

    #[test]
    fn test_recording_bus_take_drains() {
        let bus = RecordingBus::new();
        bus.deliver(Delivery::to_all(Notification::PendingListBroadcast { rides: Vec::new() }));

        assert_eq!(bus.take().len(), 1);
        assert!(bus.deliveries().is_empty());
    }
}
