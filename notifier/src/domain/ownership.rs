//! Ownership verification against the authoritative stores.
//!
//! There is no configuration that skips this stage. A [`VerifiedRecipient`]
//! can only be minted here, and the delivery sender requires one, so a send
//! without verification does not type-check.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::error;

use crate::domain::error::{ClassifiedError, FailureClass};
use crate::domain::event::{LeaseUuid, RecipientEmail, ValidatedEvent};
use crate::domain::ports::{AccountStore, LeaseRecord, LeaseStore, ReadConsistency};
use crate::domain::redaction::recipient_fingerprint;

/// Proof that a recipient owns the lease named by an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedRecipient {
    email: RecipientEmail,
    lease: LeaseUuid,
}

impl VerifiedRecipient {
    #[cfg(test)]
    pub(crate) fn assume_verified(email: RecipientEmail, lease: LeaseUuid) -> Self {
        Self { email, lease }
    }

    /// Verified address.
    pub fn email(&self) -> &RecipientEmail {
        &self.email
    }

    /// Lease the address was verified against.
    pub fn lease(&self) -> &LeaseUuid {
        &self.lease
    }

    /// Whether `address` is the verified identity.
    pub fn matches(&self, address: &RecipientEmail) -> bool {
        self.email.same_identity(address.as_ref())
    }
}

/// Outcome of a successful verification.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedOwnership {
    /// Recipient capability required by the delivery sender.
    pub recipient: VerifiedRecipient,
    /// Lease row from the strongly consistent read.
    pub lease: LeaseRecord,
}

/// Ownership verification failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecurityError {
    /// The claimed recipient is not the recorded lease owner.
    #[error("claimed recipient does not own the lease")]
    OwnershipMismatch,
    /// The lease does not exist.
    #[error("lease not found in the authoritative store")]
    LeaseNotFound,
    /// The event names an account the lease is not assigned to.
    #[error("event account does not match the lease account")]
    AccountMismatch,
    /// The event names an account the registry does not know.
    #[error("event account not found in the account registry")]
    AccountNotFound,
    /// Lease and account stores disagree about the holder.
    #[error("lease and account stores disagree about the lease holder")]
    StoreDisagreement,
    /// The recipient's domain is not allow-listed.
    #[error("recipient domain is not on the approved list")]
    DomainNotAllowed,
    /// A store read failed or timed out.
    #[error("ownership store unavailable: {message}")]
    StoreUnavailable {
        /// Redacted failure detail.
        message: String,
    },
}

impl ClassifiedError for SecurityError {
    fn class(&self) -> FailureClass {
        match self {
            Self::StoreUnavailable { .. } => FailureClass::Retriable,
            _ => FailureClass::Permanent,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::OwnershipMismatch => "ownership_mismatch",
            Self::LeaseNotFound => "lease_not_found",
            Self::AccountMismatch => "account_mismatch",
            Self::AccountNotFound => "account_not_found",
            Self::StoreDisagreement => "store_disagreement",
            Self::DomainNotAllowed => "domain_not_allowed",
            Self::StoreUnavailable { .. } => "ownership_store_unavailable",
        }
    }

    fn security_anomaly(&self) -> bool {
        matches!(
            self,
            Self::OwnershipMismatch
                | Self::AccountMismatch
                | Self::StoreDisagreement
                | Self::DomainNotAllowed
        )
    }
}

/// Approved recipient domains.
///
/// An address matches when its domain equals an entry or is a subdomain of
/// one. An empty list approves nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainAllowList(Vec<String>);

impl DomainAllowList {
    /// Build from domain names; blanks are dropped and case is folded.
    ///
    /// # Examples
    /// ```
    /// use lease_notifier::domain::ownership::DomainAllowList;
    /// use lease_notifier::domain::RecipientEmail;
    ///
    /// let list = DomainAllowList::new(["gov.uk"]);
    /// let ok = RecipientEmail::new("a@digital.cabinet-office.gov.uk").expect("valid");
    /// let spoof = RecipientEmail::new("a@evilgov.uk").expect("valid");
    /// assert!(list.allows(&ok));
    /// assert!(!list.allows(&spoof));
    /// ```
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            domains
                .into_iter()
                .map(|domain| {
                    domain
                        .as_ref()
                        .trim()
                        .trim_start_matches('.')
                        .to_ascii_lowercase()
                })
                .filter(|domain| !domain.is_empty())
                .collect(),
        )
    }

    /// Whether `recipient` is on an approved domain.
    pub fn allows(&self, recipient: &RecipientEmail) -> bool {
        let domain = recipient.domain().to_ascii_lowercase();
        self.0.iter().any(|approved| {
            domain == *approved
                || domain
                    .strip_suffix(approved.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

/// Ownership stage.
#[derive(Clone)]
pub struct OwnershipVerifier {
    leases: Arc<dyn LeaseStore>,
    accounts: Arc<dyn AccountStore>,
    allow_list: DomainAllowList,
    read_timeout: Duration,
}

impl OwnershipVerifier {
    /// Build a verifier over the authoritative stores.
    pub fn new(
        leases: Arc<dyn LeaseStore>,
        accounts: Arc<dyn AccountStore>,
        allow_list: DomainAllowList,
        read_timeout: Duration,
    ) -> Self {
        Self {
            leases,
            accounts,
            allow_list,
            read_timeout,
        }
    }

    /// Verify every claimed identity on `event` against the stores.
    ///
    /// Lease reads are strongly consistent. When the event names an account,
    /// the account registry must agree as well. The lease row is returned so
    /// later stages judge its status without a second, weaker read.
    pub async fn verify(&self, event: &ValidatedEvent) -> Result<VerifiedOwnership, SecurityError> {
        let uuid = event.lease().uuid();
        let lease = timeout(
            self.read_timeout,
            self.leases.find_lease(uuid, ReadConsistency::Strong),
        )
        .await
        .map_err(|_| unavailable("lease read timed out"))?
        .map_err(|err| unavailable(err.to_string()))?
        .ok_or(SecurityError::LeaseNotFound)?;

        let owner = lease.user_email.as_str();
        if event
            .claimed_identities()
            .any(|claimed| !claimed.same_identity(owner))
        {
            return Err(self.alarm(event, SecurityError::OwnershipMismatch));
        }

        if let Some(account_id) = event.account_id() {
            let lease_account = lease.aws_account_id.as_deref();
            if lease_account.is_some_and(|assigned| assigned != account_id.as_ref()) {
                return Err(self.alarm(event, SecurityError::AccountMismatch));
            }
            let account = timeout(
                self.read_timeout,
                self.accounts
                    .find_account(account_id, ReadConsistency::Strong),
            )
            .await
            .map_err(|_| unavailable("account read timed out"))?
            .map_err(|err| unavailable(err.to_string()))?
            .ok_or(SecurityError::AccountNotFound)?;

            let lessee = account.lessee_email.as_deref();
            if lessee.is_some_and(|holder| !event.recipient().same_identity(holder)) {
                return Err(self.alarm(event, SecurityError::StoreDisagreement));
            }
        }

        if !self.allow_list.allows(event.recipient()) {
            return Err(self.alarm(event, SecurityError::DomainNotAllowed));
        }

        Ok(VerifiedOwnership {
            recipient: VerifiedRecipient {
                email: event.recipient().clone(),
                lease: *uuid,
            },
            lease,
        })
    }

    fn alarm(&self, event: &ValidatedEvent, error: SecurityError) -> SecurityError {
        error!(
            security = true,
            event_id = %event.id(),
            event_type = %event.kind(),
            recipient = %recipient_fingerprint(event.recipient()),
            code = error.code(),
            "ownership verification failed"
        );
        error
    }
}

fn unavailable(message: impl Into<String>) -> SecurityError {
    SecurityError::StoreUnavailable {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::domain::ports::{
        AccountRecord, LeaseRecord, LeaseStatus, LeaseStoreError, MockAccountStore,
        MockLeaseStore,
    };
    use crate::domain::schema::validate_event;
    use crate::test_support::events::{approved_event, denied_event};

    fn lease(owner: &str, account: Option<&str>) -> LeaseRecord {
        crate::test_support::directory::lease_record(owner, account, LeaseStatus::Active)
    }

    fn leases(record: Option<LeaseRecord>) -> MockLeaseStore {
        let mut store = MockLeaseStore::new();
        store
            .expect_find_lease()
            .withf(|_, consistency| *consistency == ReadConsistency::Strong)
            .returning(move |_, _| Ok(record.clone()));
        store
    }

    fn accounts(lessee: Option<&str>) -> MockAccountStore {
        let record = AccountRecord {
            aws_account_id: "123456789012".to_owned(),
            name: Some("Sandbox 12".to_owned()),
            lessee_email: lessee.map(str::to_owned),
        };
        let mut store = MockAccountStore::new();
        store
            .expect_find_account()
            .returning(move |_, _| Ok(Some(record.clone())));
        store
    }

    #[fixture]
    fn allow_list() -> DomainAllowList {
        DomainAllowList::new(["gov.uk"])
    }

    fn verifier(
        leases: MockLeaseStore,
        accounts: MockAccountStore,
        allow_list: DomainAllowList,
    ) -> OwnershipVerifier {
        OwnershipVerifier::new(
            Arc::new(leases),
            Arc::new(accounts),
            allow_list,
            Duration::from_millis(200),
        )
    }

    #[rstest]
    #[tokio::test]
    async fn owner_match_ignores_case(allow_list: DomainAllowList) {
        let event = validate_event(&approved_event("evt-1", "A@Gov.UK")).expect("valid");
        let verifier = verifier(
            leases(Some(lease("a@gov.uk", Some("123456789012")))),
            accounts(Some("a@gov.uk")),
            allow_list,
        );
        let verified = verifier.verify(&event).await.expect("verified");
        assert!(verified.recipient.matches(event.recipient()));
        assert_eq!(verified.lease.user_email, "a@gov.uk");
    }

    #[rstest]
    #[tokio::test]
    async fn mismatched_owner_is_a_permanent_anomaly(allow_list: DomainAllowList) {
        let event = validate_event(&approved_event("evt-1", "b@gov.uk")).expect("valid");
        let verifier = verifier(
            leases(Some(lease("a@gov.uk", Some("123456789012")))),
            MockAccountStore::new(),
            allow_list,
        );
        let err = verifier.verify(&event).await.expect_err("mismatch");
        assert_eq!(err, SecurityError::OwnershipMismatch);
        assert_eq!(err.class(), FailureClass::Permanent);
        assert!(err.security_anomaly());
    }

    #[rstest]
    #[tokio::test]
    async fn repeated_user_email_must_also_match(allow_list: DomainAllowList) {
        let mut raw = approved_event("evt-1", "a@gov.uk");
        raw.detail["userEmail"] = serde_json::json!("b@gov.uk");
        let event = validate_event(&raw).expect("valid");
        let verifier = verifier(
            leases(Some(lease("a@gov.uk", Some("123456789012")))),
            MockAccountStore::new(),
            allow_list,
        );
        assert_eq!(
            verifier.verify(&event).await,
            Err(SecurityError::OwnershipMismatch)
        );
    }

    #[rstest]
    #[tokio::test]
    async fn account_registry_disagreement_is_distinct(allow_list: DomainAllowList) {
        let event = validate_event(&approved_event("evt-1", "a@gov.uk")).expect("valid");
        let verifier = verifier(
            leases(Some(lease("a@gov.uk", Some("123456789012")))),
            accounts(Some("someone-else@gov.uk")),
            allow_list,
        );
        assert_eq!(
            verifier.verify(&event).await,
            Err(SecurityError::StoreDisagreement)
        );
    }

    #[rstest]
    #[tokio::test]
    async fn event_account_must_match_lease_account(allow_list: DomainAllowList) {
        let event = validate_event(&approved_event("evt-1", "a@gov.uk")).expect("valid");
        let verifier = verifier(
            leases(Some(lease("a@gov.uk", Some("999999999999")))),
            MockAccountStore::new(),
            allow_list,
        );
        assert_eq!(
            verifier.verify(&event).await,
            Err(SecurityError::AccountMismatch)
        );
    }

    #[rstest]
    #[tokio::test]
    async fn unlisted_domain_blocks_even_when_owner_matches() {
        let event = validate_event(&denied_event("evt-1", "a@example.com")).expect("valid");
        let verifier = verifier(
            leases(Some(lease("a@example.com", None))),
            MockAccountStore::new(),
            DomainAllowList::new(["gov.uk"]),
        );
        let err = verifier.verify(&event).await.expect_err("domain");
        assert_eq!(err, SecurityError::DomainNotAllowed);
        assert!(err.security_anomaly());
    }

    #[rstest]
    #[tokio::test]
    async fn empty_allow_list_blocks_everything() {
        let event = validate_event(&denied_event("evt-1", "a@gov.uk")).expect("valid");
        let verifier = verifier(
            leases(Some(lease("a@gov.uk", None))),
            MockAccountStore::new(),
            DomainAllowList::new(Vec::<String>::new()),
        );
        assert_eq!(
            verifier.verify(&event).await,
            Err(SecurityError::DomainNotAllowed)
        );
    }

    #[rstest]
    #[tokio::test]
    async fn store_failure_is_retriable(allow_list: DomainAllowList) {
        let event = validate_event(&denied_event("evt-1", "a@gov.uk")).expect("valid");
        let mut store = MockLeaseStore::new();
        store
            .expect_find_lease()
            .returning(|_, _| Err(LeaseStoreError::unavailable("connection reset")));
        let verifier = verifier(store, MockAccountStore::new(), allow_list);
        let err = verifier.verify(&event).await.expect_err("unavailable");
        assert_eq!(err.class(), FailureClass::Retriable);
        assert!(!err.security_anomaly());
    }

    #[rstest]
    #[tokio::test]
    async fn missing_lease_is_permanent(allow_list: DomainAllowList) {
        let event = validate_event(&denied_event("evt-1", "a@gov.uk")).expect("valid");
        let verifier = verifier(leases(None), MockAccountStore::new(), allow_list);
        assert_eq!(
            verifier.verify(&event).await,
            Err(SecurityError::LeaseNotFound)
        );
    }

    #[test]
    fn allow_list_rejects_lookalike_suffixes() {
        let list = DomainAllowList::new([" .GOV.UK "]);
        let lookalike = RecipientEmail::new("a@notgov.uk").expect("valid");
        let nested = RecipientEmail::new("a@x.y.gov.uk").expect("valid");
        assert!(!list.allows(&lookalike));
        assert!(list.allows(&nested));
    }
}
