//! Closed registry of lease event kinds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::ports::LeaseStatus;

/// Every event type the pipeline accepts.
///
/// Adding a variant forces every exhaustive `match` over event kinds (schema,
/// template fields, status expectations) to be extended at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    /// A recipient asked for a new lease.
    LeaseRequested,
    /// A lease request was approved and an account assigned.
    LeaseApproved,
    /// A lease request was denied.
    LeaseDenied,
    /// A lease ended and its account was reclaimed.
    LeaseTerminated,
    /// A lease was frozen; access is suspended.
    LeaseFrozen,
    /// Spend crossed a configured budget threshold.
    LeaseBudgetThresholdAlert,
    /// Remaining duration crossed a configured threshold.
    LeaseDurationThresholdAlert,
    /// The lease is about to be frozen.
    LeaseFreezingThresholdAlert,
    /// Spend exceeded the lease budget.
    LeaseBudgetExceeded,
    /// The lease reached its expiry date.
    LeaseExpired,
}

impl EventKind {
    /// All accepted kinds, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::LeaseRequested,
        Self::LeaseApproved,
        Self::LeaseDenied,
        Self::LeaseTerminated,
        Self::LeaseFrozen,
        Self::LeaseBudgetThresholdAlert,
        Self::LeaseDurationThresholdAlert,
        Self::LeaseFreezingThresholdAlert,
        Self::LeaseBudgetExceeded,
        Self::LeaseExpired,
    ];

    /// Wire name of the event type.
    ///
    /// # Examples
    /// ```
    /// use lease_notifier::domain::EventKind;
    ///
    /// assert_eq!(EventKind::LeaseApproved.as_str(), "LeaseApproved");
    /// assert_eq!("LeaseApproved".parse::<EventKind>(), Ok(EventKind::LeaseApproved));
    /// ```
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LeaseRequested => "LeaseRequested",
            Self::LeaseApproved => "LeaseApproved",
            Self::LeaseDenied => "LeaseDenied",
            Self::LeaseTerminated => "LeaseTerminated",
            Self::LeaseFrozen => "LeaseFrozen",
            Self::LeaseBudgetThresholdAlert => "LeaseBudgetThresholdAlert",
            Self::LeaseDurationThresholdAlert => "LeaseDurationThresholdAlert",
            Self::LeaseFreezingThresholdAlert => "LeaseFreezingThresholdAlert",
            Self::LeaseBudgetExceeded => "LeaseBudgetExceeded",
            Self::LeaseExpired => "LeaseExpired",
        }
    }

    /// Snake-case suffix used for per-kind configuration keys.
    pub const fn config_key(self) -> &'static str {
        match self {
            Self::LeaseRequested => "lease_requested",
            Self::LeaseApproved => "lease_approved",
            Self::LeaseDenied => "lease_denied",
            Self::LeaseTerminated => "lease_terminated",
            Self::LeaseFrozen => "lease_frozen",
            Self::LeaseBudgetThresholdAlert => "lease_budget_threshold_alert",
            Self::LeaseDurationThresholdAlert => "lease_duration_threshold_alert",
            Self::LeaseFreezingThresholdAlert => "lease_freezing_threshold_alert",
            Self::LeaseBudgetExceeded => "lease_budget_exceeded",
            Self::LeaseExpired => "lease_expired",
        }
    }

    /// Lease statuses in the system of record that are consistent with this
    /// event having happened.
    ///
    /// A store status outside this set is treated as an integrity conflict.
    pub const fn expected_statuses(self) -> &'static [LeaseStatus] {
        match self {
            Self::LeaseRequested => &[LeaseStatus::PendingApproval],
            Self::LeaseApproved => &[LeaseStatus::Active],
            Self::LeaseDenied => &[LeaseStatus::ApprovalDenied],
            Self::LeaseTerminated => &[
                LeaseStatus::Expired,
                LeaseStatus::BudgetExceeded,
                LeaseStatus::ManuallyTerminated,
                LeaseStatus::AccountQuarantined,
                LeaseStatus::Ejected,
            ],
            Self::LeaseFrozen => &[LeaseStatus::Frozen],
            Self::LeaseBudgetThresholdAlert | Self::LeaseDurationThresholdAlert => {
                &[LeaseStatus::Active, LeaseStatus::Frozen]
            }
            Self::LeaseFreezingThresholdAlert => &[LeaseStatus::Active],
            Self::LeaseBudgetExceeded => &[
                LeaseStatus::Active,
                LeaseStatus::Frozen,
                LeaseStatus::BudgetExceeded,
            ],
            Self::LeaseExpired => &[LeaseStatus::Active, LeaseStatus::Frozen, LeaseStatus::Expired],
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when an event type is not in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventKind;

impl fmt::Display for UnknownEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unknown event type")
    }
}

impl std::error::Error for UnknownEventKind {}

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or(UnknownEventKind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip_for_every_kind() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>(), Ok(kind));
        }
    }

    #[test]
    fn parsing_is_case_sensitive_and_closed() {
        assert!("leaseapproved".parse::<EventKind>().is_err());
        assert!("LeaseExploded".parse::<EventKind>().is_err());
    }

    #[test]
    fn every_kind_expects_at_least_one_status() {
        for kind in EventKind::ALL {
            assert!(!kind.expected_statuses().is_empty(), "{kind} has no statuses");
        }
    }
}
