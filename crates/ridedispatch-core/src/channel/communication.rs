//! Dispatch Channel Communication Types
//!
//! All traffic between the transport and the dispatch engine flows through
//! these message types:
//! - `Event`: transport → engine (what participants did)
//! - `Delivery`: engine → transport (what participants should be told)
//! - `Command`: embedding application → engine task (lifecycle control)

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::errors::{DispatchError, DispatchResult};
use crate::ride::Ride;
use crate::types::RiderId;

// ----------------------------------------------------------------------------
// Event: Transport → Engine
// ----------------------------------------------------------------------------

/// Inbound events delivered by the notification transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Event {
    /// A requester asks for a ride
    NewRide {
        identity: RiderId,
        payload: serde_json::Value,
    },
    /// A responder accepts a pending ride
    Reaction {
        target_identity: RiderId,
        responder_identity: RiderId,
        #[serde(default)]
        responder_details: serde_json::Value,
    },
    /// A participant reports progress on an active ride
    StatusUpdate {
        target_identity: RiderId,
        status: String,
        actor_identity: RiderId,
        #[serde(default)]
        actor_details: serde_json::Value,
    },
    /// A participant (re)connected and needs the pending list
    Connected { identity: RiderId },
    /// A participant's connection went away
    Disconnect { identity: RiderId },
}

impl Event {
    /// Identity whose ride this event operates on
    pub fn ride_key(&self) -> &RiderId {
        match self {
            Event::NewRide { identity, .. } => identity,
            Event::Reaction {
                target_identity, ..
            } => target_identity,
            Event::StatusUpdate {
                target_identity, ..
            } => target_identity,
            Event::Connected { identity } => identity,
            Event::Disconnect { identity } => identity,
        }
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Event::NewRide { .. } => "newRide",
            Event::Reaction { .. } => "reaction",
            Event::StatusUpdate { .. } => "statusUpdate",
            Event::Connected { .. } => "connected",
            Event::Disconnect { .. } => "disconnect",
        }
    }

    /// Reject events carrying blank identities or a blank status
    pub fn validate(&self) -> DispatchResult<()> {
        let identities: Vec<&RiderId> = match self {
            Event::NewRide { identity, .. }
            | Event::Connected { identity }
            | Event::Disconnect { identity } => vec![identity],
            Event::Reaction {
                target_identity,
                responder_identity,
                ..
            } => vec![target_identity, responder_identity],
            Event::StatusUpdate {
                target_identity,
                actor_identity,
                ..
            } => vec![target_identity, actor_identity],
        };

        if identities.iter().any(|id| !id.is_valid()) {
            return Err(DispatchError::invalid_event(format!(
                "{} carries an empty identity",
                self.kind()
            )));
        }

        if let Event::StatusUpdate { status, .. } = self {
            if status.trim().is_empty() {
                return Err(DispatchError::invalid_event("statusUpdate carries an empty status"));
            }
        }

        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Notification: Engine → Participants
// ----------------------------------------------------------------------------

/// Outbound notifications produced by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Notification {
    /// A new pending ride, sent to everyone
    RideBroadcast { ride: Ride },
    /// The sender's new ride was refused
    RideRejected { reason: String },
    /// A responder accepted the requester's ride
    ReactionAck { responder_details: serde_json::Value },
    /// The requester's ride changed status
    StatusBroadcast {
        status: String,
        message: String,
        actor_details: serde_json::Value,
    },
    /// The requester's ride reached a terminal state and was archived
    ArchiveNotice { archived_ride: Ride },
    /// Nobody accepted the requester's ride in time
    TimeoutNotice { message: String },
    /// Pending rides after an expiry, sent to everyone
    PendingListBroadcast { rides: Vec<Ride> },
    /// Pending rides at connection time, sent to the new connection
    PendingListSnapshot { rides: Vec<Ride> },
}

impl Notification {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::RideBroadcast { .. } => "rideBroadcast",
            Notification::RideRejected { .. } => "rideRejected",
            Notification::ReactionAck { .. } => "reactionAck",
            Notification::StatusBroadcast { .. } => "statusBroadcast",
            Notification::ArchiveNotice { .. } => "archiveNotice",
            Notification::TimeoutNotice { .. } => "timeoutNotice",
            Notification::PendingListBroadcast { .. } => "pendingListBroadcast",
            Notification::PendingListSnapshot { .. } => "pendingListSnapshot",
        }
    }
}

// ----------------------------------------------------------------------------
// Delivery: Addressed Notification
// ----------------------------------------------------------------------------

/// Who a notification is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "to", rename_all = "camelCase")]
pub enum Audience {
    /// Every connected participant
    All,
    /// A single identified participant
    One { identity: RiderId },
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Audience::All => write!(f, "all"),
            Audience::One { identity } => write!(f, "{}", identity),
        }
    }
}

/// A notification together with its addressing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub audience: Audience,
    pub notification: Notification,
}

impl Delivery {
    /// Address a notification to everyone
    pub fn to_all(notification: Notification) -> Self {
        Self {
            audience: Audience::All,
            notification,
        }
    }

    /// Address a notification to one participant
    pub fn to_one(identity: RiderId, notification: Notification) -> Self {
        Self {
            audience: Audience::One { identity },
            notification,
        }
    }

    /// Whether `identity` should receive this delivery
    pub fn is_for(&self, identity: &RiderId) -> bool {
        match &self.audience {
            Audience::All => true,
            Audience::One { identity: target } => target == identity,
        }
    }
}

// ----------------------------------------------------------------------------
// Command: Application → Engine Task
// ----------------------------------------------------------------------------

/// Lifecycle commands for the dispatch task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Re-send the current pending list to every participant
    BroadcastPendingList,
    /// Drain in-flight events, stop all timers and exit the loop
    Shutdown,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
