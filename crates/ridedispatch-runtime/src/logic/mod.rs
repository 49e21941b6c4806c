//! Dispatch Logic Module
//!
//! - `engine`: the ride state machine and its critical sections
//! - `state`: dispatch statistics
//! - `task`: the event loop that feeds the engine
//!
//! Unlike a single-owner state loop, transitions run concurrently. Safety
//! comes from the per-identity locks held around each transition, so a slow
//! disk write for one requester never stalls another.

pub mod engine;
pub mod state;
pub mod task;

pub use engine::DispatchEngine;
pub use state::{DispatchStats, DispatchStatsSnapshot};
pub use task::DispatchTask;
