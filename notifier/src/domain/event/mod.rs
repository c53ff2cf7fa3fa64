//! Inbound lease events and their validated, strongly typed form.
//!
//! [`InboundEvent`] is the lenient envelope read from the event source.
//! [`ValidatedEvent`] can only be produced by the schema validator and is
//! consumed, never re-validated, by every later stage.

mod detail;
mod identity;
mod kind;
mod quantity;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use detail::{COMMENT_MAX, EventDetail, FreezeReason, TerminationReason};
pub use identity::{
    AccountId, EMAIL_MAX, EVENT_ID_MAX, EventId, IdentityError, LeaseKey, LeaseUuid,
    RecipientEmail,
};
pub use kind::{EventKind, UnknownEventKind};
pub use quantity::{Hours, Money, Percentage, QuantityError};

/// Event envelope as published by the upstream event bus.
///
/// Only the four documented top-level fields are read; other envelope
/// metadata is ignored. The `detail` payload is validated strictly later.
///
/// # Examples
/// ```
/// use lease_notifier::domain::InboundEvent;
///
/// let event: InboundEvent = serde_json::from_str(
///     r#"{"id":"evt-1","detail-type":"LeaseDenied","time":"2026-03-01T09:00:00Z",
///         "source":"leases","detail":{}}"#,
/// )
/// .expect("valid envelope");
/// assert_eq!(event.event_type, "LeaseDenied");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Provider-assigned unique identifier.
    pub id: String,
    /// Event type discriminator.
    #[serde(rename = "type", alias = "detail-type")]
    pub event_type: String,
    /// ISO-8601 origin timestamp.
    pub time: String,
    /// Type-dependent payload.
    #[serde(default)]
    pub detail: Value,
}

/// An event that passed strict schema validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedEvent {
    id: EventId,
    time: DateTime<Utc>,
    lease: LeaseKey,
    user_email: Option<RecipientEmail>,
    detail: EventDetail,
}

impl ValidatedEvent {
    pub(crate) fn new(
        id: EventId,
        time: DateTime<Utc>,
        lease: LeaseKey,
        user_email: Option<RecipientEmail>,
        detail: EventDetail,
    ) -> Self {
        Self {
            id,
            time,
            lease,
            user_email,
            detail,
        }
    }

    /// Unique event identifier.
    pub fn id(&self) -> &EventId {
        &self.id
    }

    /// Event kind.
    pub fn kind(&self) -> EventKind {
        self.detail.kind()
    }

    /// Origin timestamp.
    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    /// Lease key embedded in the payload.
    pub fn lease(&self) -> &LeaseKey {
        &self.lease
    }

    /// Address the notification is for.
    pub fn recipient(&self) -> &RecipientEmail {
        self.lease.recipient()
    }

    /// Every recipient identity the payload claims.
    ///
    /// Payloads may repeat the recipient outside the lease key; each copy is
    /// checked independently during ownership verification.
    pub fn claimed_identities(&self) -> impl Iterator<Item = &RecipientEmail> {
        std::iter::once(self.lease.recipient()).chain(self.user_email.iter())
    }

    /// Kind-specific payload.
    pub fn detail(&self) -> &EventDetail {
        &self.detail
    }

    /// Account referenced by the payload, if any.
    pub fn account_id(&self) -> Option<&AccountId> {
        self.detail.account_id()
    }
}
