//! Inbound event builders.

use serde_json::{Value, json};

use crate::domain::InboundEvent;
use crate::domain::ValidatedEvent;
use crate::domain::schema::validate_event;

/// Lease used by every builder.
pub const LEASE_UUID: &str = "11111111-1111-1111-1111-111111111111";
/// Account assigned to the lease.
pub const ACCOUNT_ID: &str = "123456789012";
/// Origin time of every built event.
pub const EVENT_TIME: &str = "2026-03-01T09:00:00Z";

/// Event of `event_type` whose detail is `fields` plus the lease key.
pub fn lease_event(id: &str, event_type: &str, recipient: &str, fields: Value) -> InboundEvent {
    let mut detail = match fields {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    detail.insert(
        "leaseId".to_owned(),
        json!({"userEmail": recipient, "uuid": LEASE_UUID}),
    );
    InboundEvent {
        id: id.to_owned(),
        event_type: event_type.to_owned(),
        time: EVENT_TIME.to_owned(),
        detail: Value::Object(detail),
    }
}

/// `LeaseApproved` without an expiry, so enrichment must supply it.
pub fn approved_event(id: &str, recipient: &str) -> InboundEvent {
    lease_event(
        id,
        "LeaseApproved",
        recipient,
        json!({"accountId": ACCOUNT_ID, "approvedBy": "AUTO"}),
    )
}

/// `LeaseDenied`.
pub fn denied_event(id: &str, recipient: &str) -> InboundEvent {
    lease_event(
        id,
        "LeaseDenied",
        recipient,
        json!({"deniedBy": "approver@gov.uk"}),
    )
}

/// `LeaseBudgetThresholdAlert` with the given figures.
pub fn budget_alert_event(
    id: &str,
    recipient: &str,
    current_spend: f64,
    budget_limit: f64,
    percent_used: f64,
) -> InboundEvent {
    lease_event(
        id,
        "LeaseBudgetThresholdAlert",
        recipient,
        json!({
            "accountId": ACCOUNT_ID,
            "currentSpend": current_spend,
            "budgetLimit": budget_limit,
            "percentUsed": percent_used,
        }),
    )
}

/// `LeaseTerminated` with a manual-termination comment.
pub fn terminated_event(id: &str, recipient: &str, comment: &str) -> InboundEvent {
    lease_event(
        id,
        "LeaseTerminated",
        recipient,
        json!({
            "accountId": ACCOUNT_ID,
            "reason": {"type": "ManuallyTerminated", "comment": comment},
        }),
    )
}

/// Validate a built event, panicking on schema failure.
pub fn validated(event: &InboundEvent) -> ValidatedEvent {
    validate_event(event).unwrap_or_else(|err| panic!("test event should validate: {err}"))
}
