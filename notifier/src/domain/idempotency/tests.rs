//! Guard behaviour over a mocked store plus replay and freshness checks.

use std::sync::Arc;

use chrono::TimeZone;
use mockall::predicate::eq;
use rstest::{fixture, rstest};

use super::*;
use crate::domain::ports::MockIdempotencyStore;
use crate::domain::schema::validate_event;
use crate::test_support::events::approved_event;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
        .single()
        .expect("valid instant")
}

#[fixture]
fn event() -> ValidatedEvent {
    validate_event(&approved_event("evt-1", "a@gov.uk")).expect("valid event")
}

fn record_for(
    event: &ValidatedEvent,
    outcome: TerminalOutcome,
    recorded_at: DateTime<Utc>,
) -> IdempotencyRecord {
    IdempotencyRecord {
        event_id: event.id().to_string(),
        event_type: event.kind().as_str().to_owned(),
        recipient_digest: Some(recipient_digest(event.recipient())),
        outcome,
        recorded_at,
    }
}

#[tokio::test]
async fn reserve_maps_store_outcomes() {
    let mut store = MockIdempotencyStore::new();
    let key = IdempotencyKey::for_event(&EventId::new("evt-1").expect("id"));
    store
        .expect_check_and_reserve()
        .with(eq(key), eq(now()), eq(now() + TimeDelta::seconds(10)))
        .times(1)
        .returning(|_, _, _| Ok(ReserveOutcome::InFlight));
    let guard = IdempotencyGuard::new(Arc::new(store), IdempotencyConfig::default());

    let admission = guard
        .check_and_reserve(
            &EventId::new("evt-1").expect("id"),
            now(),
            Duration::from_secs(10),
        )
        .await
        .expect("store reachable");
    assert_eq!(admission, Admission::InFlight);
}

#[tokio::test]
async fn commit_expires_after_ttl() {
    let mut store = MockIdempotencyStore::new();
    let config = IdempotencyConfig::from_replay_window_hours(1);
    let expected_expiry = now() + TimeDelta::hours(7);
    store
        .expect_commit()
        .withf(move |key, record, expires_at| {
            key.as_ref() == "lease-notifier:evt-1"
                && record.outcome == TerminalOutcome::Delivered { message_id: None }
                && *expires_at == expected_expiry
        })
        .times(1)
        .returning(|_, _, _| Ok(()));
    let guard = IdempotencyGuard::new(Arc::new(store), config);
    let event = event();

    guard
        .commit(
            event.id(),
            record_for(&event, TerminalOutcome::Delivered { message_id: None }, now()),
        )
        .await
        .expect("commit");
}

#[rstest]
#[case(TimeDelta::hours(-6), true)]
#[case(TimeDelta::hours(-8), false)]
#[case(TimeDelta::minutes(4), true)]
#[case(TimeDelta::minutes(6), false)]
fn freshness_window_bounds_event_age(#[case] age: TimeDelta, #[case] accepted: bool) {
    let config = IdempotencyConfig::from_replay_window_hours(1);
    assert_eq!(check_freshness(&config, now() + age, now()).is_ok(), accepted);
}

#[rstest]
fn matching_replay_reuses_record(event: ValidatedEvent) {
    let record = record_for(&event, TerminalOutcome::Delivered { message_id: None }, now());
    assert_eq!(verify_replay(&record, Some(&event)), Ok(()));
}

#[rstest]
fn replay_with_other_recipient_is_tampering(event: ValidatedEvent) {
    let record = record_for(&event, TerminalOutcome::Delivered { message_id: None }, now());
    let forged = validate_event(&approved_event("evt-1", "b@gov.uk")).expect("valid event");
    let err = verify_replay(&record, Some(&forged)).expect_err("tampered");
    assert_eq!(err, TamperError::RecipientMismatch);
    assert_eq!(err.class(), FailureClass::Critical);
    assert!(err.security_anomaly());
}

#[rstest]
fn invalid_replay_of_valid_original_is_tampering(event: ValidatedEvent) {
    let record = record_for(&event, TerminalOutcome::Delivered { message_id: None }, now());
    assert_eq!(verify_replay(&record, None), Err(TamperError::InvalidReplay));
}

#[test]
fn records_without_recipient_are_reused() {
    let record = IdempotencyRecord {
        event_id: "evt-9".to_owned(),
        event_type: "Mystery".to_owned(),
        recipient_digest: None,
        outcome: TerminalOutcome::Rejected {
            class: FailureClass::Permanent,
            code: "unknown_type".to_owned(),
        },
        recorded_at: now(),
    };
    assert_eq!(verify_replay(&record, None), Ok(()));
}
