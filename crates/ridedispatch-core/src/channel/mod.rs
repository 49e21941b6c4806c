//! Channel Module
//!
//! This module contains the channel infrastructure between the transport and
//! the dispatch engine:
//! - `communication`: events, notifications, deliveries and commands
//! - `utils`: channel type aliases and constructors

pub mod communication;
pub mod utils;

// Re-export communication types
pub use communication::{Audience, Command, Delivery, Event, Notification};

// Re-export ChannelConfig from config module
pub use crate::config::ChannelConfig;

// Re-export utility types
pub use utils::{
    create_command_channel, create_delivery_channel, create_event_channel, ChannelError,
    CommandReceiver, CommandSender, DeliveryReceiver, DeliverySender, EventReceiver, EventSender,
    NonBlockingSend,
};
