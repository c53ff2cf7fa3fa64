//! Exactly-once guard keyed on the upstream event identifier.
//!
//! A record is committed only for terminal outcomes (delivered, suppressed,
//! or permanently rejected). Retriable and critical attempts release their
//! reservation so a legitimate retry is never suppressed.

mod collapse;
mod config;
mod record;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

pub use collapse::{CollapseKey, CollapseWindow};
pub use config::{
    DefaultIdempotencyEnv, IdempotencyConfig, IdempotencyEnv, REPLAY_WINDOW_HOURS_ENV,
};
pub use record::{IdempotencyKey, IdempotencyRecord, KEY_NAMESPACE, TerminalOutcome};

use crate::domain::error::{ClassifiedError, FailureClass};
use crate::domain::event::{EventId, ValidatedEvent};
use crate::domain::ports::{IdempotencyStore, IdempotencyStoreError, ReserveOutcome};
use crate::domain::redaction::recipient_digest;

/// Result of the idempotency check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Caller holds the reservation and may proceed.
    Proceed,
    /// A terminal outcome already exists.
    Duplicate(IdempotencyRecord),
    /// Another attempt is in flight.
    InFlight,
}

/// Event timestamp outside the accepted window.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FreshnessError {
    /// The event is older than the idempotency retention.
    #[error("event is older than the {max_age_hours}h freshness window")]
    Stale {
        /// Window length in hours.
        max_age_hours: u64,
    },
    /// The event claims to come from the future.
    #[error("event timestamp is in the future beyond tolerated skew")]
    FromFuture,
}

impl ClassifiedError for FreshnessError {
    fn class(&self) -> FailureClass {
        FailureClass::Permanent
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Stale { .. } => "event_stale",
            Self::FromFuture => "event_from_future",
        }
    }
}

/// Duplicate whose content does not match the committed record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TamperError {
    /// The replay names a different recipient than the original.
    #[error("replayed event names a different recipient than the committed record")]
    RecipientMismatch,
    /// The replay carries a different event type.
    #[error("replayed event carries a different type than the committed record")]
    TypeMismatch,
    /// The replay no longer passes validation.
    #[error("replayed event failed validation although the original passed")]
    InvalidReplay,
}

impl ClassifiedError for TamperError {
    fn class(&self) -> FailureClass {
        FailureClass::Critical
    }

    fn code(&self) -> &'static str {
        match self {
            Self::RecipientMismatch => "replay_recipient_mismatch",
            Self::TypeMismatch => "replay_type_mismatch",
            Self::InvalidReplay => "replay_invalid",
        }
    }

    fn security_anomaly(&self) -> bool {
        true
    }
}

impl ClassifiedError for IdempotencyStoreError {
    fn class(&self) -> FailureClass {
        FailureClass::Retriable
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "idempotency_unavailable",
            Self::Conflict { .. } => "idempotency_conflict",
        }
    }
}

/// Idempotency stage wrapper around the store.
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyStore>,
    config: IdempotencyConfig,
}

impl IdempotencyGuard {
    /// Build a guard over `store`.
    pub fn new(store: Arc<dyn IdempotencyStore>, config: IdempotencyConfig) -> Self {
        Self { store, config }
    }

    /// Check for a committed outcome and reserve the event if free.
    pub async fn check_and_reserve(
        &self,
        event_id: &EventId,
        now: DateTime<Utc>,
        hold: Duration,
    ) -> Result<Admission, IdempotencyStoreError> {
        let key = IdempotencyKey::for_event(event_id);
        let outcome = self
            .store
            .check_and_reserve(&key, now, offset(now, hold))
            .await?;
        Ok(match outcome {
            ReserveOutcome::Reserved => Admission::Proceed,
            ReserveOutcome::Committed(record) => Admission::Duplicate(record),
            ReserveOutcome::InFlight => Admission::InFlight,
        })
    }

    /// Keep a reservation alive until `hold_until`.
    pub async fn renew(
        &self,
        event_id: &EventId,
        hold_until: DateTime<Utc>,
    ) -> Result<(), IdempotencyStoreError> {
        self.store
            .renew(&IdempotencyKey::for_event(event_id), hold_until)
            .await
    }

    /// Commit a terminal outcome.
    pub async fn commit(
        &self,
        event_id: &EventId,
        record: IdempotencyRecord,
    ) -> Result<(), IdempotencyStoreError> {
        let expires_at = offset(record.recorded_at, self.config.ttl());
        self.store
            .commit(&IdempotencyKey::for_event(event_id), record, expires_at)
            .await
    }

    /// Release a reservation after a non-terminal outcome.
    pub async fn release(&self, event_id: &EventId) -> Result<(), IdempotencyStoreError> {
        self.store
            .release(&IdempotencyKey::for_event(event_id))
            .await
    }

    /// Committed record for `event_id`, if any.
    pub async fn get(
        &self,
        event_id: &EventId,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyStoreError> {
        self.store.get(&IdempotencyKey::for_event(event_id)).await
    }

    /// Drop a committed rejection so an operator can re-drive the event.
    pub async fn forget(&self, event_id: &EventId) -> Result<(), IdempotencyStoreError> {
        self.store.forget(&IdempotencyKey::for_event(event_id)).await
    }

    /// Reject events older than the retention window or too far ahead.
    pub fn check_freshness(
        &self,
        event_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), FreshnessError> {
        check_freshness(&self.config, event_time, now)
    }
}

/// Reject events older than the retention window or too far ahead.
///
/// # Examples
/// ```
/// use chrono::{TimeDelta, Utc};
/// use lease_notifier::domain::idempotency::{FreshnessError, IdempotencyConfig};
/// use lease_notifier::domain::idempotency::check_freshness;
///
/// let config = IdempotencyConfig::from_replay_window_hours(1);
/// let now = Utc::now();
/// assert!(check_freshness(&config, now - TimeDelta::hours(6), now).is_ok());
/// assert!(matches!(
///     check_freshness(&config, now - TimeDelta::hours(8), now),
///     Err(FreshnessError::Stale { .. })
/// ));
/// ```
pub fn check_freshness(
    config: &IdempotencyConfig,
    event_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), FreshnessError> {
    if event_time > offset(now, config.max_future_skew()) {
        return Err(FreshnessError::FromFuture);
    }
    if now > offset(event_time, config.ttl()) {
        return Err(FreshnessError::Stale {
            max_age_hours: config.ttl().as_secs() / 3600,
        });
    }
    Ok(())
}

/// Confirm a duplicate matches its committed record before reusing it.
///
/// `replay` is `None` when the replayed payload no longer validates.
/// Records committed before the recipient was known (schema rejections)
/// carry no digest and are reused as-is.
pub fn verify_replay(
    record: &IdempotencyRecord,
    replay: Option<&ValidatedEvent>,
) -> Result<(), TamperError> {
    let Some(expected_digest) = record.recipient_digest.as_deref() else {
        return Ok(());
    };
    let event = replay.ok_or(TamperError::InvalidReplay)?;
    if event.kind().as_str() != record.event_type {
        return Err(TamperError::TypeMismatch);
    }
    if recipient_digest(event.recipient()) != expected_digest {
        return Err(TamperError::RecipientMismatch);
    }
    Ok(())
}

fn offset(instant: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| instant.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests;
