//! Idempotency keys and committed terminal outcomes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::FailureClass;
use crate::domain::event::EventId;

/// Namespace prefix for idempotency keys.
pub const KEY_NAMESPACE: &str = "lease-notifier";

/// Store key derived strictly from the upstream event identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Key for `event_id`.
    ///
    /// # Examples
    /// ```
    /// use lease_notifier::domain::idempotency::IdempotencyKey;
    /// use lease_notifier::domain::EventId;
    ///
    /// let key = IdempotencyKey::for_event(&EventId::new("evt-1").expect("valid id"));
    /// assert_eq!(key.as_ref(), "lease-notifier:evt-1");
    /// ```
    pub fn for_event(event_id: &EventId) -> Self {
        Self(format!("{KEY_NAMESPACE}:{event_id}"))
    }
}

impl AsRef<str> for IdempotencyKey {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal outcome recorded for an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TerminalOutcome {
    /// The provider accepted the message.
    Delivered {
        /// Provider message identifier, when returned.
        message_id: Option<String>,
    },
    /// Processing ended deliberately without a send.
    Suppressed {
        /// Suppression reason code.
        reason: String,
    },
    /// Processing failed permanently.
    Rejected {
        /// Failure class.
        class: FailureClass,
        /// Failure code.
        code: String,
    },
}

/// Committed record for one event identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Event identifier.
    pub event_id: String,
    /// Event type as received.
    pub event_type: String,
    /// SHA-256 of the canonical recipient, when the event got that far.
    pub recipient_digest: Option<String>,
    /// Terminal outcome.
    pub outcome: TerminalOutcome,
    /// When the outcome was committed.
    pub recorded_at: DateTime<Utc>,
}
