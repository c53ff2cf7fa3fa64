//! Typed detail payloads, one shape per event kind.

use chrono::{DateTime, Utc};

use super::{AccountId, EventKind, Hours, Money, Percentage};

/// Maximum length of operator-supplied free text such as freeze comments.
pub const COMMENT_MAX: usize = 1000;

/// Why a lease was terminated.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationReason {
    /// The lease ran past its expiry date.
    Expired,
    /// Spend exceeded the budget.
    BudgetExceeded {
        /// Spend at termination.
        total_spend: Money,
    },
    /// An operator terminated the lease.
    ManuallyTerminated {
        /// Operator comment.
        comment: String,
    },
    /// The account was quarantined.
    AccountQuarantined,
    /// The account was ejected from the pool.
    Ejected,
}

impl TerminationReason {
    /// Wire tag of the reason.
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Expired => "Expired",
            Self::BudgetExceeded { .. } => "BudgetExceeded",
            Self::ManuallyTerminated { .. } => "ManuallyTerminated",
            Self::AccountQuarantined => "AccountQuarantined",
            Self::Ejected => "Ejected",
        }
    }
}

/// Why a lease was frozen.
#[derive(Debug, Clone, PartialEq)]
pub enum FreezeReason {
    /// A duration threshold was reached.
    Expired {
        /// Threshold, in hours, that triggered the freeze.
        triggered_duration_threshold: Hours,
        /// Total lease duration.
        lease_duration_hours: Hours,
    },
    /// A budget threshold was reached.
    BudgetExceeded {
        /// Threshold amount that triggered the freeze.
        triggered_budget_threshold: Money,
        /// Spend when the freeze happened.
        total_spend: Money,
    },
    /// An operator froze the lease.
    ManuallyFrozen {
        /// Operator comment, at most [`COMMENT_MAX`] characters.
        comment: String,
    },
}

impl FreezeReason {
    /// Wire tag of the reason.
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Expired { .. } => "Expired",
            Self::BudgetExceeded { .. } => "BudgetExceeded",
            Self::ManuallyFrozen { .. } => "ManuallyFrozen",
        }
    }
}

/// Kind-specific payload of a validated event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventDetail {
    /// See [`EventKind::LeaseRequested`].
    LeaseRequested {
        /// Free-text justification from the requester.
        comments: Option<String>,
        /// Whether an approver must act on the request.
        requires_manual_approval: bool,
    },
    /// See [`EventKind::LeaseApproved`].
    LeaseApproved {
        /// Assigned account.
        account_id: AccountId,
        /// Approver identity or automation marker. Never rendered.
        approved_by: Option<String>,
        /// Expiry carried on the event, when present.
        expiration_date: Option<DateTime<Utc>>,
    },
    /// See [`EventKind::LeaseDenied`].
    LeaseDenied {
        /// Approver identity. Never rendered.
        denied_by: Option<String>,
    },
    /// See [`EventKind::LeaseTerminated`].
    LeaseTerminated {
        /// Reclaimed account.
        account_id: AccountId,
        /// Termination reason.
        reason: TerminationReason,
    },
    /// See [`EventKind::LeaseFrozen`].
    LeaseFrozen {
        /// Frozen account.
        account_id: AccountId,
        /// Freeze reason.
        reason: FreezeReason,
    },
    /// See [`EventKind::LeaseBudgetThresholdAlert`].
    LeaseBudgetThresholdAlert {
        /// Leased account.
        account_id: AccountId,
        /// Spend so far.
        current_spend: Money,
        /// Budget at the time of the alert.
        budget_limit: Money,
        /// Share of the budget used.
        percent_used: Percentage,
    },
    /// See [`EventKind::LeaseDurationThresholdAlert`].
    LeaseDurationThresholdAlert {
        /// Leased account.
        account_id: AccountId,
        /// Hours left before expiry.
        hours_remaining: Hours,
        /// Total lease duration.
        lease_duration_hours: Hours,
    },
    /// See [`EventKind::LeaseFreezingThresholdAlert`].
    LeaseFreezingThresholdAlert {
        /// Leased account.
        account_id: AccountId,
        /// When the freeze takes effect.
        freezes_at: DateTime<Utc>,
    },
    /// See [`EventKind::LeaseBudgetExceeded`].
    LeaseBudgetExceeded {
        /// Leased account.
        account_id: AccountId,
        /// Budget at the time of the alert.
        budget_limit: Money,
        /// Spend so far.
        total_spend: Money,
    },
    /// See [`EventKind::LeaseExpired`].
    LeaseExpired {
        /// Leased account.
        account_id: AccountId,
        /// When the lease expired.
        expired_at: DateTime<Utc>,
    },
}

impl EventDetail {
    /// Event kind this payload belongs to.
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::LeaseRequested { .. } => EventKind::LeaseRequested,
            Self::LeaseApproved { .. } => EventKind::LeaseApproved,
            Self::LeaseDenied { .. } => EventKind::LeaseDenied,
            Self::LeaseTerminated { .. } => EventKind::LeaseTerminated,
            Self::LeaseFrozen { .. } => EventKind::LeaseFrozen,
            Self::LeaseBudgetThresholdAlert { .. } => EventKind::LeaseBudgetThresholdAlert,
            Self::LeaseDurationThresholdAlert { .. } => EventKind::LeaseDurationThresholdAlert,
            Self::LeaseFreezingThresholdAlert { .. } => EventKind::LeaseFreezingThresholdAlert,
            Self::LeaseBudgetExceeded { .. } => EventKind::LeaseBudgetExceeded,
            Self::LeaseExpired { .. } => EventKind::LeaseExpired,
        }
    }

    /// Account referenced by the payload, if the kind carries one.
    pub fn account_id(&self) -> Option<&AccountId> {
        match self {
            Self::LeaseRequested { .. } | Self::LeaseDenied { .. } => None,
            Self::LeaseApproved { account_id, .. }
            | Self::LeaseTerminated { account_id, .. }
            | Self::LeaseFrozen { account_id, .. }
            | Self::LeaseBudgetThresholdAlert { account_id, .. }
            | Self::LeaseDurationThresholdAlert { account_id, .. }
            | Self::LeaseFreezingThresholdAlert { account_id, .. }
            | Self::LeaseBudgetExceeded { account_id, .. }
            | Self::LeaseExpired { account_id, .. } => Some(account_id),
        }
    }

    /// Budget figure carried on the event itself.
    pub fn budget_limit(&self) -> Option<Money> {
        match self {
            Self::LeaseBudgetThresholdAlert { budget_limit, .. }
            | Self::LeaseBudgetExceeded { budget_limit, .. } => Some(*budget_limit),
            _ => None,
        }
    }

    /// Total spend carried on the event itself.
    pub fn total_spend(&self) -> Option<Money> {
        match self {
            Self::LeaseBudgetExceeded { total_spend, .. }
            | Self::LeaseTerminated {
                reason: TerminationReason::BudgetExceeded { total_spend },
                ..
            }
            | Self::LeaseFrozen {
                reason: FreezeReason::BudgetExceeded { total_spend, .. },
                ..
            } => Some(*total_spend),
            _ => None,
        }
    }

    /// Expiry date carried on the event itself.
    pub fn expiration_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::LeaseApproved {
                expiration_date, ..
            } => *expiration_date,
            _ => None,
        }
    }

    /// Lease duration carried on the event itself.
    pub fn lease_duration_hours(&self) -> Option<Hours> {
        match self {
            Self::LeaseDurationThresholdAlert {
                lease_duration_hours,
                ..
            }
            | Self::LeaseFrozen {
                reason:
                    FreezeReason::Expired {
                        lease_duration_hours,
                        ..
                    },
                ..
            } => Some(*lease_duration_hours),
            _ => None,
        }
    }

    /// Operator or requester free text, when the payload carries any.
    pub fn comment(&self) -> Option<&str> {
        match self {
            Self::LeaseRequested { comments, .. } => comments.as_deref(),
            Self::LeaseTerminated {
                reason: TerminationReason::ManuallyTerminated { comment },
                ..
            }
            | Self::LeaseFrozen {
                reason: FreezeReason::ManuallyFrozen { comment },
                ..
            } => Some(comment.as_str()),
            _ => None,
        }
    }
}
