//! Ride Dispatch Core
//!
//! Foundational types for the ride dispatch engine: participant identities,
//! the ride record and its lifecycle vocabulary, the inbound/outbound message
//! shapes, errors and configuration. The crate performs no I/O; the engine
//! itself lives in `ridedispatch-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod channel;
pub mod config;
pub mod errors;
pub mod ride;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use channel::{
    create_command_channel, create_delivery_channel, create_event_channel, Audience,
    ChannelError, Command, CommandReceiver, CommandSender, Delivery, DeliveryReceiver,
    DeliverySender, Event, EventReceiver, EventSender, NonBlockingSend, Notification,
};
pub use config::{ChannelConfig, DispatchConfig, RetryConfig, RideDispatchConfig, StorageConfig};
pub use errors::{DispatchError, DispatchResult, PersistenceError, PersistenceResult};
pub use ride::{ArchiveKind, Ride, RideStatus};
pub use types::{FixedTimeSource, RiderId, SystemTimeSource, TimeSource, Timestamp};
