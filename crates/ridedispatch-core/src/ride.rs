//! Ride record and lifecycle vocabulary
//!
//! A ride starts `pending`, becomes `accepted` when a responder reacts, may
//! carry any free-text status while active, and ends as `ended` or
//! `cancelled`. Terminal rides are archived with an [`ArchiveKind`].

use core::fmt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{RiderId, Timestamp};

// ----------------------------------------------------------------------------
// Ride Status
// ----------------------------------------------------------------------------

/// Lifecycle state of a ride
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RideStatus {
    /// Waiting for a responder; the only state with a live expiration timer
    Pending,
    /// A responder reacted to the ride
    Accepted,
    /// Any other in-progress status reported by a participant
    Active(String),
    /// Terminal: the ride completed
    Ended,
    /// Terminal: the ride was called off
    Cancelled,
}

impl RideStatus {
    pub const PENDING: &'static str = "pending";
    pub const ACCEPTED: &'static str = "accepted";
    pub const ENDED: &'static str = "ended";
    pub const CANCELLED: &'static str = "cancelled";

    /// Classify a status string. Reserved words are matched exactly; any
    /// other text is an in-progress status.
    pub fn parse(value: &str) -> Self {
        match value {
            Self::PENDING => RideStatus::Pending,
            Self::ACCEPTED => RideStatus::Accepted,
            Self::ENDED => RideStatus::Ended,
            Self::CANCELLED => RideStatus::Cancelled,
            other => RideStatus::Active(other.to_string()),
        }
    }

    /// Wire representation of this status
    pub fn as_str(&self) -> &str {
        match self {
            RideStatus::Pending => Self::PENDING,
            RideStatus::Accepted => Self::ACCEPTED,
            RideStatus::Active(text) => text,
            RideStatus::Ended => Self::ENDED,
            RideStatus::Cancelled => Self::CANCELLED,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, RideStatus::Pending)
    }

    /// `ended` and `cancelled` admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, RideStatus::Ended | RideStatus::Cancelled)
    }

    /// Archive classification for a terminal status
    pub fn archive_kind(&self) -> Option<ArchiveKind> {
        match self {
            RideStatus::Ended => Some(ArchiveKind::Completed),
            RideStatus::Cancelled => Some(ArchiveKind::Cancelled),
            _ => None,
        }
    }
}

impl From<String> for RideStatus {
    fn from(value: String) -> Self {
        RideStatus::parse(&value)
    }
}

impl From<RideStatus> for String {
    fn from(status: RideStatus) -> Self {
        match status {
            RideStatus::Active(text) => text,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Archive Kind
// ----------------------------------------------------------------------------

/// Classification of an archived ride
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    Completed,
    Cancelled,
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveKind::Completed => write!(f, "completed"),
            ArchiveKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ----------------------------------------------------------------------------
// Ride
// ----------------------------------------------------------------------------

/// A ride request, keyed by the requester's identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ride {
    /// Requester identity
    pub id: RiderId,
    /// Distinguishes successive rides of one requester
    #[serde(default = "Uuid::new_v4")]
    pub instance_id: Uuid,
    /// Requester-supplied fields, passed through untouched
    pub payload: serde_json::Value,
    pub status: RideStatus,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_by: Option<RiderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<RiderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_kind: Option<ArchiveKind>,
}

impl Ride {
    /// Create a new pending ride
    pub fn new(id: RiderId, payload: serde_json::Value, created_at: Timestamp) -> Self {
        Self {
            id,
            instance_id: Uuid::new_v4(),
            payload,
            status: RideStatus::Pending,
            created_at,
            accepted_by: None,
            completed_by: None,
            completed_at: None,
            archive_kind: None,
        }
    }

    /// Copy of this ride accepted by `responder`
    pub fn accepted(&self, responder: RiderId) -> Self {
        Self {
            status: RideStatus::Accepted,
            accepted_by: Some(responder),
            ..self.clone()
        }
    }

    /// Copy of this ride carrying a non-terminal status
    pub fn with_status(&self, status: RideStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    /// Terminal archive record for this ride.
    ///
    /// Returns `None` when `status` is not terminal.
    pub fn archived(&self, status: RideStatus, actor: RiderId, at: Timestamp) -> Option<Self> {
        let kind = status.archive_kind()?;
        Some(Self {
            status,
            completed_by: Some(actor),
            completed_at: Some(at),
            archive_kind: Some(kind),
            ..self.clone()
        })
    }

    pub fn is_pending(&self) -> bool {
        self.status.is_pending()
    }

    /// Whether `other` is a later state of this same ride request
    pub fn same_instance(&self, other: &Ride) -> bool {
        self.instance_id == other.instance_id
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
