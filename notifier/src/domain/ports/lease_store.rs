//! Driven port for the authoritative, read-only lease store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::define_port_error;
use crate::domain::event::LeaseUuid;

/// Lease status recorded by the system of record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeaseStatus {
    /// Awaiting an approver.
    PendingApproval,
    /// Request denied.
    ApprovalDenied,
    /// Lease is live.
    Active,
    /// Access suspended.
    Frozen,
    /// Lease ended at its expiry date.
    Expired,
    /// Lease ended on budget.
    BudgetExceeded,
    /// Lease ended by an operator.
    ManuallyTerminated,
    /// Account quarantined.
    AccountQuarantined,
    /// Account ejected.
    Ejected,
    /// Any status this build does not recognise.
    #[serde(other)]
    Unknown,
}

/// Read consistency requested from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadConsistency {
    /// Read-after-write consistent. Required for ownership decisions.
    Strong,
    /// May lag recent writes. Acceptable for display data.
    Eventual,
}

/// Lease row as exposed by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRecord {
    /// Recorded owner identity.
    pub user_email: String,
    /// Lease identifier.
    pub uuid: Uuid,
    /// Assigned account, once approved.
    #[serde(default)]
    pub aws_account_id: Option<String>,
    /// Lease template the request was made against.
    #[serde(default)]
    pub original_lease_template_uuid: Option<String>,
    /// Display name of the lease template at request time.
    #[serde(default)]
    pub original_lease_template_name: Option<String>,
    /// Spend so far, in pounds.
    #[serde(default)]
    pub total_cost_accrued: Option<f64>,
    /// Budget, in pounds.
    #[serde(default)]
    pub max_spend: Option<f64>,
    /// Expiry instant.
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
    /// Lease duration, in hours.
    #[serde(default)]
    pub lease_duration_in_hours: Option<f64>,
    /// Current status.
    pub status: LeaseStatus,
    /// When spend figures were last refreshed.
    #[serde(default)]
    pub last_checked_date: Option<DateTime<Utc>>,
}

define_port_error! {
    /// Errors raised by lease store adapters.
    pub enum LeaseStoreError {
        /// The store could not be reached or failed the read.
        Unavailable { message: String } => "lease store unavailable: {message}",
        /// The read exceeded its timeout.
        Timeout { message: String } => "lease store timed out: {message}",
        /// The stored row could not be decoded.
        Decode { message: String } => "lease store row invalid: {message}",
    }
}

/// Port for keyed lease lookups.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Fetch one lease by identifier.
    async fn find_lease(
        &self,
        uuid: &LeaseUuid,
        consistency: ReadConsistency,
    ) -> Result<Option<LeaseRecord>, LeaseStoreError>;
}

/// Fixture implementation that knows no leases.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixtureLeaseStore;

#[async_trait]
impl LeaseStore for FixtureLeaseStore {
    async fn find_lease(
        &self,
        _uuid: &LeaseUuid,
        _consistency: ReadConsistency,
    ) -> Result<Option<LeaseRecord>, LeaseStoreError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognised_statuses_decode_as_unknown() {
        let status: LeaseStatus = serde_json::from_str("\"Hibernating\"").expect("decode");
        assert_eq!(status, LeaseStatus::Unknown);
    }

    #[tokio::test]
    async fn fixture_store_returns_none() {
        let uuid = LeaseUuid::new("11111111-1111-1111-1111-111111111111").expect("uuid");
        let found = FixtureLeaseStore
            .find_lease(&uuid, ReadConsistency::Strong)
            .await
            .expect("fixture read");
        assert!(found.is_none());
    }
}
