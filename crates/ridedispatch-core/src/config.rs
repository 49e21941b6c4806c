//! Centralized Configuration Management
//!
//! All tunables of the dispatch engine live here so that embedding
//! applications load and override a single `RideDispatchConfig`.

use core::time::Duration;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{DispatchError, DispatchResult};

// ----------------------------------------------------------------------------
// Dispatch Configuration
// ----------------------------------------------------------------------------

/// Configuration for the ride state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// How long a ride may stay pending before it expires
    pub pending_timeout: Duration,
    /// Text of the notice sent to a requester whose ride expired
    pub timeout_message: String,
    /// Delay before an expiry whose removal failed to persist is tried again
    pub expiry_retry_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            pending_timeout: Duration::from_secs(60),
            timeout_message: "No driver accepted your ride in time".to_string(),
            expiry_retry_delay: Duration::from_secs(1),
        }
    }
}

impl DispatchConfig {
    /// Create configuration optimized for testing (short expiry)
    pub fn testing() -> Self {
        Self {
            pending_timeout: Duration::from_millis(200),
            expiry_retry_delay: Duration::from_millis(20),
            ..Self::default()
        }
    }
}

// ----------------------------------------------------------------------------
// Retry Configuration
// ----------------------------------------------------------------------------

/// Exponential backoff for durable writes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Exponential backoff multiplier
    pub backoff_multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create configuration optimized for testing (fast retries)
    pub fn testing() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    /// Disable retries entirely
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::testing()
        }
    }

    /// Delay before retry number `attempt` (1-based), capped at `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let factor = f64::from(self.backoff_multiplier.max(1.0)).powi(exponent);
        let nanos = (self.initial_delay.as_nanos() as f64 * factor).min(u64::MAX as f64);
        Duration::from_nanos(nanos as u64).min(self.max_delay)
    }
}

// ----------------------------------------------------------------------------
// Storage Configuration
// ----------------------------------------------------------------------------

/// Where and how ride state is persisted
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory for the file-backed store; `None` keeps state in memory
    pub data_dir: Option<PathBuf>,
    /// Retry policy for durable writes
    pub retry: RetryConfig,
}

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Configuration for channel buffer sizes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Buffer size for Event channels (Transport → Engine)
    pub event_buffer_size: usize,
    /// Buffer size for Delivery broadcast (Engine → Transports)
    pub delivery_buffer_size: usize,
    /// Buffer size for Command channels (Application → Engine task)
    pub command_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 256,     // Many connections can post at once
            delivery_buffer_size: 1024, // Broadcasts fan out to every transport
            command_buffer_size: 8,     // Lifecycle commands are rare
        }
    }
}

impl ChannelConfig {
    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            event_buffer_size: 100,
            delivery_buffer_size: 100,
            command_buffer_size: 10,
        }
    }
}

// ----------------------------------------------------------------------------
// Master Configuration
// ----------------------------------------------------------------------------

/// Master configuration consolidating every dispatch setting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RideDispatchConfig {
    pub dispatch: DispatchConfig,
    pub storage: StorageConfig,
    pub channels: ChannelConfig,
}

impl RideDispatchConfig {
    /// Create new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for tests: in-memory store, short expiry, fast retries
    pub fn testing() -> Self {
        Self {
            dispatch: DispatchConfig::testing(),
            storage: StorageConfig {
                data_dir: None,
                retry: RetryConfig::testing(),
            },
            channels: ChannelConfig::testing(),
        }
    }

    /// Persist rides under `data_dir`
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.storage.data_dir = Some(data_dir.into());
        self
    }

    /// Override the pending-ride expiry
    pub fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch.pending_timeout = timeout;
        self
    }

    /// Check the configuration for values the runtime cannot work with
    pub fn validate(&self) -> DispatchResult<()> {
        if self.dispatch.pending_timeout.is_zero() {
            return Err(DispatchError::config_error("pending_timeout must be non-zero"));
        }
        if self.storage.retry.backoff_multiplier < 1.0 {
            return Err(DispatchError::config_error(
                "retry.backoff_multiplier must be at least 1.0",
            ));
        }
        let channels = &self.channels;
        if channels.event_buffer_size == 0
            || channels.delivery_buffer_size == 0
            || channels.command_buffer_size == 0
        {
            return Err(DispatchError::config_error("channel buffer sizes must be non-zero"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
