//! Error types for the ride dispatch engine
//!
//! `PersistenceError` covers the durable store, `DispatchError` unifies
//! everything a transition can fail with.

// ----------------------------------------------------------------------------
// Persistence Errors
// ----------------------------------------------------------------------------

/// Failures writing or reading durable ride state
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Storage unavailable: {reason}")]
    Unavailable { reason: String },
}

impl PersistenceError {
    /// Create an unavailable-storage error with a reason
    pub fn unavailable<T: Into<String>>(reason: T) -> Self {
        PersistenceError::Unavailable {
            reason: reason.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Dispatch Errors
// ----------------------------------------------------------------------------

/// Core error type for dispatch transitions
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A new ride was requested while the identity already has an active one
    #[error("Rider {identity} already has an active ride")]
    DuplicateActiveRide { identity: String },

    /// No active ride exists for the targeted identity
    #[error("No active ride for {identity}")]
    NotFound { identity: String },

    #[error("Persistence failure: {0}")]
    Persistence(#[from] PersistenceError),

    /// Inbound event failed validation
    #[error("Invalid event: {reason}")]
    InvalidEvent { reason: String },

    /// Channel communication error between runtime tasks
    #[error("Channel error: {message}")]
    Channel { message: String },

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl DispatchError {
    /// Create a duplicate-ride rejection for an identity
    pub fn duplicate_active_ride<T: Into<String>>(identity: T) -> Self {
        DispatchError::DuplicateActiveRide {
            identity: identity.into(),
        }
    }

    /// Create a not-found error for an identity
    pub fn not_found<T: Into<String>>(identity: T) -> Self {
        DispatchError::NotFound {
            identity: identity.into(),
        }
    }

    /// Create an invalid event error with a reason
    pub fn invalid_event<T: Into<String>>(reason: T) -> Self {
        DispatchError::InvalidEvent {
            reason: reason.into(),
        }
    }

    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        DispatchError::Channel {
            message: message.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        DispatchError::Configuration {
            reason: reason.into(),
        }
    }

    /// Whether the event loop must stop after this error
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            DispatchError::Channel { .. } | DispatchError::Configuration { .. }
        )
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, DispatchError>;
pub type DispatchResult<T> = Result<T>;
pub type PersistenceResult<T> = core::result::Result<T, PersistenceError>;
