//! Ride Dispatch Runtime
//!
//! The engine behind ride dispatch:
//! - `DispatchEngine`: the ride state machine with per-identity critical sections
//! - `DispatchTask`: the event loop feeding it
//! - `RideStore`: durable active set and archive (memory and file backed)
//! - `TimerRegistry`: one expiration timer per pending ride
//! - `NotificationBus`: where addressed notifications go
//!
//! `ridedispatch-core` holds the stable types; this crate holds behavior.

extern crate alloc;

pub mod builder;
pub mod bus;
pub mod logic;
pub mod managers;
pub mod store;

pub use builder::{create_test_runtime, RuntimeBuilder, RuntimeHandle};
pub use bus::{ChannelBus, NotificationBus, RecordingBus};
pub use logic::{DispatchEngine, DispatchStats, DispatchStatsSnapshot, DispatchTask};
pub use managers::{
    create_timer_channel, IdentityGuard, IdentityLocks, TimerFiredReceiver, TimerFiredSender,
    TimerHandle, TimerRegistry,
};
pub use store::{
    create_store, create_test_store, with_retry, FileRideStore, MemoryRideStore, RideStore,
};

// Re-export core types for convenience
pub use ridedispatch_core::{
    Audience, Command, Delivery, DeliveryReceiver, DispatchError, DispatchResult, Event,
    EventSender, Notification, PersistenceError, RideDispatchConfig, Ride, RideStatus, RiderId,
};
