//! Property-based tests for ride status classification
//!
//! Free-text statuses must never be mistaken for terminal ones, and the
//! reserved words must always classify the same way.

use proptest::prelude::*;
use ridedispatch_core::{ArchiveKind, Ride, RideStatus, RiderId, Timestamp};

/// Generate free-text statuses that are not reserved words
fn arb_free_text_status() -> impl Strategy<Value = String> {
    prop::string::string_regex(r"[a-zA-Z][a-zA-Z0-9 ]{0,40}")
        .unwrap()
        .prop_filter("reserved status", |s| {
            !matches!(s.as_str(), "pending" | "accepted" | "ended" | "cancelled")
        })
}

fn arb_terminal_status() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("ended"), Just("cancelled")]
}

proptest! {
    /// Property: free-text statuses are active, never terminal, never pending
    #[test]
    fn free_text_is_active(text in arb_free_text_status()) {
        let status = RideStatus::parse(&text);

        prop_assert!(!status.is_terminal());
        prop_assert!(!status.is_pending());
        prop_assert_eq!(status.archive_kind(), None);
        prop_assert_eq!(status.as_str(), text.as_str());
    }

    /// Property: terminal statuses always produce an archive record of the matching kind
    #[test]
    fn terminal_status_archives(word in arb_terminal_status(), created in 0u64..1_000_000) {
        let ride = Ride::new(
            RiderId::new("R1").unwrap(),
            serde_json::json!({"from": "A"}),
            Timestamp::new(created),
        );
        let status = RideStatus::parse(word);
        let record = ride
            .archived(status, RiderId::new("R2").unwrap(), Timestamp::new(created + 1))
            .expect("terminal status must archive");

        let expected = if word == "ended" { ArchiveKind::Completed } else { ArchiveKind::Cancelled };
        prop_assert_eq!(record.archive_kind, Some(expected));
        prop_assert!(record.status.is_terminal());
        prop_assert_eq!(&record.payload, &ride.payload);
    }

    /// Property: a status survives the JSON encoding used on disk
    #[test]
    fn status_survives_json(text in arb_free_text_status()) {
        let status = RideStatus::parse(&text);
        let encoded = serde_json::to_string(&status).unwrap();
        let decoded: RideStatus = serde_json::from_str(&encoded).unwrap();
        prop_assert_eq!(decoded, status);
    }
}
