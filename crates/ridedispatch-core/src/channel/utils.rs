//! Channel Utilities
//!
//! Bounded mpsc channels carry events and commands into the dispatch task.
//! Deliveries leave through a broadcast channel so that emitting never waits
//! on a slow transport; a lagging receiver loses the oldest deliveries.

use core::fmt;

use crate::channel::communication::{Command, Delivery, Event};
use crate::config::ChannelConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    ChannelFull,
    ChannelClosed,
    ReceiverDropped,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::ChannelFull => write!(f, "Channel buffer is full"),
            ChannelError::ChannelClosed => write!(f, "Channel is closed"),
            ChannelError::ReceiverDropped => write!(f, "Channel receiver was dropped"),
        }
    }
}

impl std::error::Error for ChannelError {}

pub type EventSender = tokio::sync::mpsc::Sender<Event>;
pub type EventReceiver = tokio::sync::mpsc::Receiver<Event>;
pub type CommandSender = tokio::sync::mpsc::Sender<Command>;
pub type CommandReceiver = tokio::sync::mpsc::Receiver<Command>;
pub type DeliverySender = tokio::sync::broadcast::Sender<Delivery>;
pub type DeliveryReceiver = tokio::sync::broadcast::Receiver<Delivery>;

// ----------------------------------------------------------------------------
// Channel Creation Utilities
// ----------------------------------------------------------------------------

/// Create bounded event channel (Transport → Engine)
pub fn create_event_channel(config: &ChannelConfig) -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::channel(config.event_buffer_size)
}

/// Create bounded command channel (Application → Engine task)
pub fn create_command_channel(config: &ChannelConfig) -> (CommandSender, CommandReceiver) {
    tokio::sync::mpsc::channel(config.command_buffer_size)
}

/// Create broadcast delivery channel (Engine → Transports)
///
/// Additional receivers are created with `sender.subscribe()`.
pub fn create_delivery_channel(config: &ChannelConfig) -> (DeliverySender, DeliveryReceiver) {
    tokio::sync::broadcast::channel(config.delivery_buffer_size)
}

// ----------------------------------------------------------------------------
// Non-blocking Send Utilities
// ----------------------------------------------------------------------------

/// Non-blocking send for transports that must not stall on a busy engine
pub trait NonBlockingSend<T> {
    fn try_send_non_blocking(&self, message: T) -> Result<(), ChannelError>;
}

impl NonBlockingSend<Event> for EventSender {
    fn try_send_non_blocking(&self, event: Event) -> Result<(), ChannelError> {
        self.try_send(event).map_err(|e| match e {
            tokio::sync::mpsc::error::TrySendError::Full(_) => ChannelError::ChannelFull,
            tokio::sync::mpsc::error::TrySendError::Closed(_) => ChannelError::ChannelClosed,
        })
    }
}

impl NonBlockingSend<Delivery> for DeliverySender {
    fn try_send_non_blocking(&self, delivery: Delivery) -> Result<(), ChannelError> {
        self.send(delivery)
            .map(|_| ())
            .map_err(|_| ChannelError::ReceiverDropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::communication::Notification;
    use crate::types::RiderId;

    #[tokio::test]
    async fn test_event_channel_backpressure() {
        let config = ChannelConfig {
            event_buffer_size: 1,
            ..ChannelConfig::testing()
        };
        let (sender, mut receiver) = create_event_channel(&config);
        let event = Event::Disconnect {
            identity: RiderId::new("R1").unwrap(),
        };

        assert!(sender.try_send_non_blocking(event.clone()).is_ok());
        assert_eq!(
            sender.try_send_non_blocking(event.clone()),
            Err(ChannelError::ChannelFull)
        );
        assert_eq!(receiver.recv().await, Some(event));
    }

    #[tokio::test]
    async fn test_delivery_without_receivers_reports_dropped() {
        let (sender, receiver) = create_delivery_channel(&ChannelConfig::testing());
        drop(receiver);

        let delivery = Delivery::to_all(Notification::PendingListBroadcast { rides: vec![] });
        assert_eq!(
            sender.try_send_non_blocking(delivery),
            Err(ChannelError::ReceiverDropped)
        );
    }
}
