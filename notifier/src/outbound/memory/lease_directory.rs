//! Lease, account and lease-template lookups served from a JSON snapshot.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::event::{AccountId, LeaseUuid};
use crate::domain::ports::{
    AccountRecord, AccountStore, AccountStoreError, LeaseRecord, LeaseStore, LeaseStoreError,
    LeaseTemplateRecord, LeaseTemplateStore, LeaseTemplateStoreError, ReadConsistency,
};

/// Serialised directory contents.
///
/// ```json
/// { "leases": [...], "accounts": [...], "leaseTemplates": [...] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectorySnapshot {
    /// Lease rows.
    #[serde(default)]
    pub leases: Vec<LeaseRecord>,
    /// Account rows.
    #[serde(default)]
    pub accounts: Vec<AccountRecord>,
    /// Lease template rows.
    #[serde(default)]
    pub lease_templates: Vec<LeaseTemplateRecord>,
}

/// Read-only directory implementing all three lookup ports.
///
/// The snapshot is immutable once loaded, so every read is trivially
/// strongly consistent.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLeaseDirectory {
    leases: HashMap<Uuid, LeaseRecord>,
    accounts: HashMap<String, AccountRecord>,
    templates: HashMap<String, LeaseTemplateRecord>,
}

impl InMemoryLeaseDirectory {
    /// Index a snapshot. Later rows win over earlier rows with the same key.
    pub fn new(snapshot: DirectorySnapshot) -> Self {
        Self {
            leases: snapshot
                .leases
                .into_iter()
                .map(|lease| (lease.uuid, lease))
                .collect(),
            accounts: snapshot
                .accounts
                .into_iter()
                .map(|account| (account.aws_account_id.clone(), account))
                .collect(),
            templates: snapshot
                .lease_templates
                .into_iter()
                .map(|template| (template.uuid.clone(), template))
                .collect(),
        }
    }

    /// Decode a snapshot from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error when the value does not match [`DirectorySnapshot`].
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value).map(Self::new)
    }

    /// Decode a snapshot from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error when the text is not a valid [`DirectorySnapshot`].
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw).map(Self::new)
    }

    /// Number of indexed leases.
    pub fn lease_count(&self) -> usize {
        self.leases.len()
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseDirectory {
    async fn find_lease(
        &self,
        uuid: &LeaseUuid,
        _consistency: ReadConsistency,
    ) -> Result<Option<LeaseRecord>, LeaseStoreError> {
        Ok(self.leases.get(uuid.as_uuid()).cloned())
    }
}

#[async_trait]
impl AccountStore for InMemoryLeaseDirectory {
    async fn find_account(
        &self,
        account_id: &AccountId,
        _consistency: ReadConsistency,
    ) -> Result<Option<AccountRecord>, AccountStoreError> {
        Ok(self.accounts.get(account_id.as_ref()).cloned())
    }
}

#[async_trait]
impl LeaseTemplateStore for InMemoryLeaseDirectory {
    async fn find_template(
        &self,
        template_uuid: &str,
    ) -> Result<Option<LeaseTemplateRecord>, LeaseTemplateStoreError> {
        Ok(self.templates.get(template_uuid).cloned())
    }
}
