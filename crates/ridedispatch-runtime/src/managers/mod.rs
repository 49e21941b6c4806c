//! Coordination primitives used by the dispatch engine

pub mod locks;
pub mod timers;

pub use locks::{IdentityGuard, IdentityLocks};
pub use timers::{
    create_timer_channel, TimerFiredReceiver, TimerFiredSender, TimerHandle, TimerRegistry,
};
