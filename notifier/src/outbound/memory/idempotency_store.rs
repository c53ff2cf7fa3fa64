//! Mutex-backed `IdempotencyStore`.
//!
//! # TTL Enforcement
//!
//! Expired committed records and lapsed reservations are treated as absent by
//! `check_and_reserve`, and `cleanup_expired` removes them outright.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::lock;
use crate::domain::idempotency::{IdempotencyKey, IdempotencyRecord};
use crate::domain::ports::{IdempotencyStore, IdempotencyStoreError, ReserveOutcome};

#[derive(Debug, Clone)]
enum Entry {
    Held {
        until: DateTime<Utc>,
    },
    Done {
        record: IdempotencyRecord,
        expires_at: DateTime<Utc>,
    },
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Held { until } => *until > now,
            Self::Done { expires_at, .. } => *expires_at > now,
        }
    }
}

/// In-memory implementation of the `IdempotencyStore` port.
///
/// The reserve path runs entirely under one lock, which makes it atomic for
/// every caller sharing the instance.
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    entries: Mutex<HashMap<IdempotencyKey, Entry>>,
}

impl InMemoryIdempotencyStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, live or not.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Whether the store holds nothing.
    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn check_and_reserve(
        &self,
        key: &IdempotencyKey,
        now: DateTime<Utc>,
        hold_until: DateTime<Utc>,
    ) -> Result<ReserveOutcome, IdempotencyStoreError> {
        let mut entries = lock(&self.entries);
        match entries.get(key) {
            Some(Entry::Done { record, expires_at }) if *expires_at > now => {
                return Ok(ReserveOutcome::Committed(record.clone()));
            }
            Some(Entry::Held { until }) if *until > now => return Ok(ReserveOutcome::InFlight),
            Some(_) => debug!(key = %key, "reclaiming lapsed idempotency entry"),
            None => {}
        }
        entries.insert(key.clone(), Entry::Held { until: hold_until });
        Ok(ReserveOutcome::Reserved)
    }

    async fn renew(
        &self,
        key: &IdempotencyKey,
        hold_until: DateTime<Utc>,
    ) -> Result<(), IdempotencyStoreError> {
        let mut entries = lock(&self.entries);
        match entries.get_mut(key) {
            Some(Entry::Done { .. }) => Err(IdempotencyStoreError::conflict(format!(
                "{key} is already committed"
            ))),
            Some(Entry::Held { until }) => {
                *until = hold_until;
                Ok(())
            }
            None => {
                entries.insert(key.clone(), Entry::Held { until: hold_until });
                Ok(())
            }
        }
    }

    async fn commit(
        &self,
        key: &IdempotencyKey,
        record: IdempotencyRecord,
        expires_at: DateTime<Utc>,
    ) -> Result<(), IdempotencyStoreError> {
        lock(&self.entries).insert(key.clone(), Entry::Done { record, expires_at });
        Ok(())
    }

    async fn release(&self, key: &IdempotencyKey) -> Result<(), IdempotencyStoreError> {
        let mut entries = lock(&self.entries);
        if matches!(entries.get(key), Some(Entry::Held { .. })) {
            entries.remove(key);
        }
        Ok(())
    }

    async fn get(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyStoreError> {
        Ok(match lock(&self.entries).get(key) {
            Some(Entry::Done { record, .. }) => Some(record.clone()),
            _ => None,
        })
    }

    async fn forget(&self, key: &IdempotencyKey) -> Result<(), IdempotencyStoreError> {
        let mut entries = lock(&self.entries);
        if matches!(entries.get(key), Some(Entry::Done { .. })) {
            entries.remove(key);
        }
        Ok(())
    }

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<usize, IdempotencyStoreError> {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        let removed = before - entries.len();
        debug!(removed, "expired idempotency entries removed");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeDelta, TimeZone};
    use rstest::{fixture, rstest};

    use super::*;
    use crate::domain::EventId;
    use crate::domain::idempotency::TerminalOutcome;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
            .single()
            .expect("fixture instant")
    }

    fn key(id: &str) -> IdempotencyKey {
        IdempotencyKey::for_event(&EventId::new(id).expect("event id"))
    }

    fn record(id: &str) -> IdempotencyRecord {
        IdempotencyRecord {
            event_id: id.to_owned(),
            event_type: "LeaseApproved".to_owned(),
            recipient_digest: Some("digest".to_owned()),
            outcome: TerminalOutcome::Delivered {
                message_id: Some("msg-1".to_owned()),
            },
            recorded_at: now(),
        }
    }

    #[fixture]
    fn store() -> InMemoryIdempotencyStore {
        InMemoryIdempotencyStore::new()
    }

    #[rstest]
    #[tokio::test]
    async fn second_reservation_is_in_flight(store: InMemoryIdempotencyStore) {
        let hold = now() + TimeDelta::seconds(38);
        let first = store.check_and_reserve(&key("evt-1"), now(), hold).await;
        let second = store.check_and_reserve(&key("evt-1"), now(), hold).await;
        assert_eq!(first.expect("first"), ReserveOutcome::Reserved);
        assert_eq!(second.expect("second"), ReserveOutcome::InFlight);
    }

    #[rstest]
    #[tokio::test]
    async fn lapsed_reservation_can_be_reclaimed(store: InMemoryIdempotencyStore) {
        let hold = now() + TimeDelta::seconds(38);
        store
            .check_and_reserve(&key("evt-1"), now(), hold)
            .await
            .expect("reserve");
        let later = hold + TimeDelta::seconds(1);
        let outcome = store
            .check_and_reserve(&key("evt-1"), later, later + TimeDelta::seconds(38))
            .await
            .expect("reclaim");
        assert_eq!(outcome, ReserveOutcome::Reserved);
    }

    #[rstest]
    #[tokio::test]
    async fn committed_records_are_returned_until_expiry(store: InMemoryIdempotencyStore) {
        let expires = now() + TimeDelta::days(7);
        store
            .commit(&key("evt-1"), record("evt-1"), expires)
            .await
            .expect("commit");

        let outcome = store
            .check_and_reserve(&key("evt-1"), now(), now() + TimeDelta::seconds(38))
            .await
            .expect("check");
        assert_eq!(outcome, ReserveOutcome::Committed(record("evt-1")));

        let after = expires + TimeDelta::seconds(1);
        let outcome = store
            .check_and_reserve(&key("evt-1"), after, after + TimeDelta::seconds(38))
            .await
            .expect("check after expiry");
        assert_eq!(outcome, ReserveOutcome::Reserved);
    }

    #[rstest]
    #[tokio::test]
    async fn release_keeps_committed_records(store: InMemoryIdempotencyStore) {
        store
            .commit(&key("evt-1"), record("evt-1"), now() + TimeDelta::days(7))
            .await
            .expect("commit");
        store.release(&key("evt-1")).await.expect("release");
        assert_eq!(
            store.get(&key("evt-1")).await.expect("get"),
            Some(record("evt-1"))
        );
    }

    #[rstest]
    #[tokio::test]
    async fn renew_refuses_committed_keys(store: InMemoryIdempotencyStore) {
        store
            .commit(&key("evt-1"), record("evt-1"), now() + TimeDelta::days(7))
            .await
            .expect("commit");
        let error = store
            .renew(&key("evt-1"), now() + TimeDelta::minutes(5))
            .await
            .expect_err("renew must fail");
        assert!(matches!(error, IdempotencyStoreError::Conflict { .. }));
    }

    #[rstest]
    #[tokio::test]
    async fn renew_extends_a_reservation(store: InMemoryIdempotencyStore) {
        store
            .check_and_reserve(&key("evt-1"), now(), now() + TimeDelta::seconds(38))
            .await
            .expect("reserve");
        store
            .renew(&key("evt-1"), now() + TimeDelta::minutes(10))
            .await
            .expect("renew");
        let probe = now() + TimeDelta::minutes(5);
        let outcome = store
            .check_and_reserve(&key("evt-1"), probe, probe)
            .await
            .expect("check");
        assert_eq!(outcome, ReserveOutcome::InFlight);
    }

    #[rstest]
    #[tokio::test]
    async fn cleanup_removes_only_expired_entries(store: InMemoryIdempotencyStore) {
        store
            .commit(&key("old"), record("old"), now() + TimeDelta::hours(1))
            .await
            .expect("commit old");
        store
            .commit(&key("new"), record("new"), now() + TimeDelta::days(7))
            .await
            .expect("commit new");
        store
            .check_and_reserve(&key("held"), now(), now() + TimeDelta::seconds(38))
            .await
            .expect("reserve");

        let removed = store
            .cleanup_expired(now() + TimeDelta::hours(2))
            .await
            .expect("cleanup");
        assert_eq!(removed, 2);
        assert_eq!(store.len(), 1);
        assert!(store.get(&key("new")).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn concurrent_reservations_admit_exactly_one() {
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let attempts = (0..16).map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .check_and_reserve(&key("evt-race"), now(), now() + TimeDelta::seconds(38))
                    .await
            })
        });
        let outcomes = futures::future::join_all(attempts).await;
        let reserved = outcomes
            .into_iter()
            .map(|joined| joined.expect("task").expect("reserve"))
            .filter(|outcome| *outcome == ReserveOutcome::Reserved)
            .count();
        assert_eq!(reserved, 1);
    }
}
