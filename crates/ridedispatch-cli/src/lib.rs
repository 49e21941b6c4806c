//! Ride dispatch CLI library
//!
//! Hosts the dispatch engine as a process: configuration loading, the
//! JSON-lines stdio transport and a few inspection commands.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod stdio;

pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use config::{AppConfig, LoggingConfig};
pub use error::{CliError, Result};
pub use stdio::{run_bridge, BridgeSummary};
