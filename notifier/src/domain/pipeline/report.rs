//! Externally visible outcome of one pipeline run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::error::PipelineFailure;
use crate::domain::event::EventKind;
use crate::domain::idempotency::TerminalOutcome;

/// State an event reached when processing stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// A terminal outcome already existed and was reused.
    Deduplicated,
    /// A duplicate did not match its committed record.
    DuplicateTampered,
    /// Another attempt holds the event, or a pre-send dependency was
    /// unavailable. Nothing was committed; the source may redeliver.
    Deferred,
    /// Schema, identifier or freshness validation failed.
    ValidationFailed,
    /// The claimed recipient could not be verified.
    OwnershipFailed,
    /// The recipient opted out.
    PreferenceSkipped,
    /// An equivalent notification was sent moments ago.
    Collapsed,
    /// Required enrichment was missing or conflicted.
    EnrichmentFailed,
    /// Held for an operator because event and store disagree.
    ManualReview,
    /// Template selection or personalisation failed.
    PersonalisationFailed,
    /// The provider accepted the message.
    Sent,
    /// The send failed and a retry is scheduled.
    Retrying,
    /// The event was moved to the dead-letter area.
    DeadLettered,
}

impl PipelineState {
    /// Stable label for logs and CLI output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deduplicated => "deduplicated",
            Self::DuplicateTampered => "duplicate_tampered",
            Self::Deferred => "deferred",
            Self::ValidationFailed => "validation_failed",
            Self::OwnershipFailed => "ownership_failed",
            Self::PreferenceSkipped => "preference_skipped",
            Self::Collapsed => "collapsed",
            Self::EnrichmentFailed => "enrichment_failed",
            Self::ManualReview => "manual_review",
            Self::PersonalisationFailed => "personalisation_failed",
            Self::Sent => "sent",
            Self::Retrying => "retrying",
            Self::DeadLettered => "dead_lettered",
        }
    }

    /// Whether the state ends processing for this event id.
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Deferred | Self::Retrying)
    }
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    /// Event identifier as received.
    pub event_id: String,
    /// Event kind, once known.
    pub event_type: Option<EventKind>,
    /// Final state.
    pub state: PipelineState,
    /// Classified failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<PipelineFailure>,
    /// Provider message id for sends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Reused outcome for duplicates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_outcome: Option<TerminalOutcome>,
    /// Send attempts made so far.
    pub attempts: u32,
    /// Dead-letter entry created by this run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_letter_id: Option<Uuid>,
    /// When the next send attempt is due.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<DateTime<Utc>>,
}

impl PipelineReport {
    pub(super) fn new(event_id: impl Into<String>, event_type: Option<EventKind>) -> Self {
        Self {
            event_id: event_id.into(),
            event_type,
            state: PipelineState::Deferred,
            failure: None,
            message_id: None,
            cached_outcome: None,
            attempts: 0,
            dead_letter_id: None,
            retry_at: None,
        }
    }

    pub(super) fn with_state(mut self, state: PipelineState) -> Self {
        self.state = state;
        self
    }

    pub(super) fn with_failure(mut self, failure: PipelineFailure) -> Self {
        self.failure = Some(failure);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(PipelineState::Sent, true)]
    #[case(PipelineState::DeadLettered, true)]
    #[case(PipelineState::Retrying, false)]
    #[case(PipelineState::Deferred, false)]
    fn terminal_states(#[case] state: PipelineState, #[case] terminal: bool) {
        assert_eq!(state.is_terminal(), terminal);
    }

    #[test]
    fn reports_serialise_without_empty_fields() {
        let report = PipelineReport::new("evt-1", Some(EventKind::LeaseApproved))
            .with_state(PipelineState::Sent);
        let json = serde_json::to_value(&report).expect("serialise");
        assert_eq!(json["state"], "sent");
        assert_eq!(json["event_type"], "LeaseApproved");
        assert!(json.get("failure").is_none());
    }
}
