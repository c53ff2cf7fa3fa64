//! Strict structural validation of inbound lease events.
//!
//! Every event kind has exactly one payload shape. Unknown event types,
//! undeclared fields, missing required fields, and malformed identifiers all
//! fail validation. Errors carry field paths and rule names only; raw payload
//! values are never copied into them.

mod reader;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::domain::error::{ClassifiedError, FailureClass};
use crate::domain::event::{
    COMMENT_MAX, EMAIL_MAX, EventDetail, EventId, EventKind, FreezeReason, InboundEvent,
    LeaseKey, QuantityError, RecipientEmail, TerminationReason, ValidatedEvent,
};
use crate::domain::ports::NotificationMetrics;

use reader::Fields;

/// Category of a schema failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaErrorKind {
    /// The event type is not in the closed registry.
    UnknownType,
    /// The payload carried an undeclared field.
    UnexpectedField,
    /// A required field was absent.
    MissingField,
    /// A field was present but failed its rule.
    InvalidField,
    /// The envelope itself (id, time, detail) was malformed.
    InvalidEnvelope,
}

impl SchemaErrorKind {
    /// Stable label for logs and metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownType => "unknown_type",
            Self::UnexpectedField => "unexpected_field",
            Self::MissingField => "missing_field",
            Self::InvalidField => "invalid_field",
            Self::InvalidEnvelope => "invalid_envelope",
        }
    }
}

/// Rule a field failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationRule {
    /// The field is not declared for this event type.
    UnexpectedField,
    /// The field is required but absent or null.
    MissingField,
    /// The JSON type was wrong.
    WrongType {
        /// Expected JSON type.
        expected: &'static str,
    },
    /// The value did not match the field grammar.
    InvalidFormat,
    /// The value exceeded its maximum length.
    TooLong {
        /// Maximum accepted length.
        max: usize,
    },
    /// A numeric value was out of range.
    OutOfRange(QuantityError),
    /// A discriminator tag named an unknown variant.
    UnknownVariant,
    /// Two copies of the same value disagreed.
    Inconsistent,
}

impl fmt::Display for ViolationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedField => f.write_str("field is not declared"),
            Self::MissingField => f.write_str("field is required"),
            Self::WrongType { expected } => write!(f, "expected {expected}"),
            Self::InvalidFormat => f.write_str("invalid format"),
            Self::TooLong { max } => write!(f, "longer than {max} characters"),
            Self::OutOfRange(error) => write!(f, "{error}"),
            Self::UnknownVariant => f.write_str("unknown variant"),
            Self::Inconsistent => f.write_str("disagrees with another field"),
        }
    }
}

/// One failing field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    /// Dotted path from the payload root.
    pub path: String,
    /// Failed rule.
    pub rule: ViolationRule,
}

/// Structured validation failure. Always permanent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaError {
    kind: SchemaErrorKind,
    violations: Vec<FieldViolation>,
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "schema validation failed ({})", self.kind.as_str())?;
        for (index, violation) in self.violations.iter().enumerate() {
            let separator = if index == 0 { ": " } else { "; " };
            write!(f, "{separator}{} {}", violation.path, violation.rule)?;
        }
        Ok(())
    }
}

impl std::error::Error for SchemaError {}

impl SchemaError {
    fn unknown_type() -> Self {
        Self {
            kind: SchemaErrorKind::UnknownType,
            violations: vec![FieldViolation {
                path: "type".to_owned(),
                rule: ViolationRule::UnknownVariant,
            }],
        }
    }

    pub(crate) fn envelope(path: &str, rule: ViolationRule) -> Self {
        Self {
            kind: SchemaErrorKind::InvalidEnvelope,
            violations: vec![FieldViolation {
                path: path.to_owned(),
                rule,
            }],
        }
    }

    fn from_violations(violations: Vec<FieldViolation>) -> Self {
        let has = |wanted: ViolationRule| violations.iter().any(|v| v.rule == wanted);
        let kind = if has(ViolationRule::UnexpectedField) {
            SchemaErrorKind::UnexpectedField
        } else if has(ViolationRule::MissingField) {
            SchemaErrorKind::MissingField
        } else {
            SchemaErrorKind::InvalidField
        };
        Self { kind, violations }
    }

    /// Failure category.
    pub fn kind(&self) -> SchemaErrorKind {
        self.kind
    }

    /// Failing fields.
    pub fn violations(&self) -> &[FieldViolation] {
        &self.violations
    }
}

impl ClassifiedError for SchemaError {
    fn class(&self) -> FailureClass {
        FailureClass::Permanent
    }

    fn code(&self) -> &'static str {
        self.kind.as_str()
    }
}

/// Validated payload without envelope metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedDetail {
    /// Lease key.
    pub lease: LeaseKey,
    /// Recipient repeated outside the lease key, when present.
    pub user_email: Option<RecipientEmail>,
    /// Typed payload.
    pub detail: EventDetail,
}

/// Validate a raw detail payload for `event_type`.
///
/// Pure and free of I/O.
///
/// # Examples
/// ```
/// use lease_notifier::domain::schema::{validate_detail, SchemaErrorKind};
/// use serde_json::json;
///
/// let detail = json!({
///     "leaseId": {"userEmail": "a@gov.uk", "uuid": "11111111-1111-1111-1111-111111111111"},
///     "accountId": "123456789012",
/// });
/// assert!(validate_detail("LeaseApproved", &detail).is_ok());
///
/// let err = validate_detail("LeaseExploded", &detail).expect_err("unknown type");
/// assert_eq!(err.kind(), SchemaErrorKind::UnknownType);
/// ```
pub fn validate_detail(event_type: &str, raw: &Value) -> Result<ValidatedDetail, SchemaError> {
    let kind: EventKind = event_type.parse().map_err(|_| SchemaError::unknown_type())?;
    let Value::Object(object) = raw else {
        return Err(SchemaError::envelope(
            "detail",
            ViolationRule::WrongType { expected: "object" },
        ));
    };

    let mut fields = Fields::new(object, "");
    let lease = fields.nested("leaseId", |lease| {
        let recipient = lease.required("userEmail", reader::email);
        let uuid = lease.required("uuid", reader::lease_uuid);
        Some(LeaseKey::new(recipient?, uuid?))
    });
    let user_email = fields.optional("userEmail", reader::email);
    let detail = read_detail(kind, &mut fields);
    let mut violations = fields.finish();

    match (lease, detail) {
        (Some(lease), Some(detail)) if violations.is_empty() => Ok(ValidatedDetail {
            lease,
            user_email,
            detail,
        }),
        _ => {
            if violations.is_empty() {
                violations.push(FieldViolation {
                    path: "detail".to_owned(),
                    rule: ViolationRule::InvalidFormat,
                });
            }
            Err(SchemaError::from_violations(violations))
        }
    }
}

fn read_detail(kind: EventKind, fields: &mut Fields<'_>) -> Option<EventDetail> {
    match kind {
        EventKind::LeaseRequested => {
            let comments = fields.optional("comments", reader::text(COMMENT_MAX));
            let requires_manual_approval =
                fields.required("requiresManualApproval", reader::boolean);
            Some(EventDetail::LeaseRequested {
                comments,
                requires_manual_approval: requires_manual_approval?,
            })
        }
        EventKind::LeaseApproved => {
            let account_id = fields.required("accountId", reader::account_id);
            let approved_by = fields.optional("approvedBy", reader::text(EMAIL_MAX));
            let expiration_date = fields.optional("expirationDate", reader::timestamp);
            Some(EventDetail::LeaseApproved {
                account_id: account_id?,
                approved_by,
                expiration_date,
            })
        }
        EventKind::LeaseDenied => {
            let denied_by = fields.optional("deniedBy", reader::text(EMAIL_MAX));
            Some(EventDetail::LeaseDenied { denied_by })
        }
        EventKind::LeaseTerminated => {
            let account_id = fields.required("accountId", reader::account_id);
            let reason = fields.nested("reason", read_termination_reason);
            Some(EventDetail::LeaseTerminated {
                account_id: account_id?,
                reason: reason?,
            })
        }
        EventKind::LeaseFrozen => {
            let account_id = fields.required("accountId", reader::account_id);
            let reason = fields.nested("reason", read_freeze_reason);
            Some(EventDetail::LeaseFrozen {
                account_id: account_id?,
                reason: reason?,
            })
        }
        EventKind::LeaseBudgetThresholdAlert => {
            let account_id = fields.required("accountId", reader::account_id);
            let current_spend = fields.required("currentSpend", reader::money);
            let budget_limit = fields.required("budgetLimit", reader::money);
            let percent_used = fields.required("percentUsed", reader::percentage);
            Some(EventDetail::LeaseBudgetThresholdAlert {
                account_id: account_id?,
                current_spend: current_spend?,
                budget_limit: budget_limit?,
                percent_used: percent_used?,
            })
        }
        EventKind::LeaseDurationThresholdAlert => {
            let account_id = fields.required("accountId", reader::account_id);
            let hours_remaining = fields.required("hoursRemaining", reader::hours);
            let lease_duration_hours = fields.required("leaseDurationInHours", reader::hours);
            Some(EventDetail::LeaseDurationThresholdAlert {
                account_id: account_id?,
                hours_remaining: hours_remaining?,
                lease_duration_hours: lease_duration_hours?,
            })
        }
        EventKind::LeaseFreezingThresholdAlert => {
            let account_id = fields.required("accountId", reader::account_id);
            let freezes_at = fields.required("freezesAt", reader::timestamp);
            Some(EventDetail::LeaseFreezingThresholdAlert {
                account_id: account_id?,
                freezes_at: freezes_at?,
            })
        }
        EventKind::LeaseBudgetExceeded => {
            let account_id = fields.required("accountId", reader::account_id);
            let budget_limit = fields.required("budgetLimit", reader::money);
            let total_spend = fields.required("totalSpend", reader::money);
            Some(EventDetail::LeaseBudgetExceeded {
                account_id: account_id?,
                budget_limit: budget_limit?,
                total_spend: total_spend?,
            })
        }
        EventKind::LeaseExpired => {
            let account_id = fields.required("accountId", reader::account_id);
            let expired_at = fields.required("expiredAt", reader::timestamp);
            Some(EventDetail::LeaseExpired {
                account_id: account_id?,
                expired_at: expired_at?,
            })
        }
    }
}

fn read_termination_reason(reason: &mut Fields<'_>) -> Option<TerminationReason> {
    let Some(tag) = reason.required("type", reader::string) else {
        reason.ignore_remaining();
        return None;
    };
    match tag {
        "Expired" => Some(TerminationReason::Expired),
        "AccountQuarantined" => Some(TerminationReason::AccountQuarantined),
        "Ejected" => Some(TerminationReason::Ejected),
        "BudgetExceeded" => {
            let total_spend = reason.required("totalSpend", reader::money)?;
            Some(TerminationReason::BudgetExceeded { total_spend })
        }
        "ManuallyTerminated" => {
            let comment = reason.required("comment", reader::text(COMMENT_MAX))?;
            Some(TerminationReason::ManuallyTerminated { comment })
        }
        _ => {
            reason.reject("type", ViolationRule::UnknownVariant);
            reason.ignore_remaining();
            None
        }
    }
}

fn read_freeze_reason(reason: &mut Fields<'_>) -> Option<FreezeReason> {
    let Some(tag) = reason.required("type", reader::string) else {
        reason.ignore_remaining();
        return None;
    };
    match tag {
        "Expired" => {
            let threshold = reason.required("triggeredDurationThreshold", reader::hours);
            let duration = reason.required("leaseDurationInHours", reader::hours);
            Some(FreezeReason::Expired {
                triggered_duration_threshold: threshold?,
                lease_duration_hours: duration?,
            })
        }
        "BudgetExceeded" => {
            let threshold = reason.required("triggeredBudgetThreshold", reader::money);
            let total_spend = reason.required("totalSpend", reader::money);
            Some(FreezeReason::BudgetExceeded {
                triggered_budget_threshold: threshold?,
                total_spend: total_spend?,
            })
        }
        "ManuallyFrozen" => {
            let comment = reason.required("comment", reader::text(COMMENT_MAX))?;
            Some(FreezeReason::ManuallyFrozen { comment })
        }
        _ => {
            reason.reject("type", ViolationRule::UnknownVariant);
            reason.ignore_remaining();
            None
        }
    }
}

/// Validate a full envelope into a [`ValidatedEvent`].
///
/// Envelope checks run first (identifier grammar, timestamp) followed by
/// [`validate_detail`].
pub fn validate_event(event: &InboundEvent) -> Result<ValidatedEvent, SchemaError> {
    let id = EventId::new(event.id.as_str())
        .map_err(|_| SchemaError::envelope("id", ViolationRule::InvalidFormat))?;
    let time = reader::parse_timestamp(&event.time)
        .map_err(|rule| SchemaError::envelope("time", rule))?;
    let validated = validate_detail(&event.event_type, &event.detail)?;
    Ok(ValidatedEvent::new(
        id,
        time,
        validated.lease,
        validated.user_email,
        validated.detail,
    ))
}

/// Schema stage: validation plus failure counting.
#[derive(Clone)]
pub struct SchemaValidator {
    metrics: Arc<dyn NotificationMetrics>,
}

impl SchemaValidator {
    /// Build a validator reporting failures to `metrics`.
    pub fn new(metrics: Arc<dyn NotificationMetrics>) -> Self {
        Self { metrics }
    }

    /// Validate `event`, counting and logging any failure by type and kind.
    pub async fn validate(&self, event: &InboundEvent) -> Result<ValidatedEvent, SchemaError> {
        let result = validate_event(event);
        if let Err(error) = &result {
            let label = metric_type_label(&event.event_type);
            let paths: Vec<&str> = error.violations().iter().map(|v| v.path.as_str()).collect();
            warn!(
                event_type = label,
                schema_error = error.kind().as_str(),
                fields = ?paths,
                "event failed schema validation"
            );
            // Metrics exporter errors never block event handling.
            let _ = self
                .metrics
                .record_schema_failure(label, error.kind().as_str())
                .await;
        }
        result
    }
}

/// Bounded label for an arbitrary inbound type string.
pub(crate) fn metric_type_label(event_type: &str) -> &'static str {
    event_type
        .parse::<EventKind>()
        .map_or("unknown", EventKind::as_str)
}
