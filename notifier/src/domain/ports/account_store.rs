//! Driven port for the read-only account registry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ReadConsistency, define_port_error};
use crate::domain::event::AccountId;

/// Account row as exposed by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    /// Twelve-digit account identifier.
    pub aws_account_id: String,
    /// Human-readable account name.
    #[serde(default)]
    pub name: Option<String>,
    /// Identity currently holding the account, if leased.
    #[serde(default)]
    pub lessee_email: Option<String>,
}

define_port_error! {
    /// Errors raised by account store adapters.
    pub enum AccountStoreError {
        /// The store could not be reached or failed the read.
        Unavailable { message: String } => "account store unavailable: {message}",
        /// The read exceeded its timeout.
        Timeout { message: String } => "account store timed out: {message}",
    }
}

/// Port for keyed account lookups.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fetch one account by identifier.
    async fn find_account(
        &self,
        account_id: &AccountId,
        consistency: ReadConsistency,
    ) -> Result<Option<AccountRecord>, AccountStoreError>;
}

/// Fixture implementation that knows no accounts.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixtureAccountStore;

#[async_trait]
impl AccountStore for FixtureAccountStore {
    async fn find_account(
        &self,
        _account_id: &AccountId,
        _consistency: ReadConsistency,
    ) -> Result<Option<AccountRecord>, AccountStoreError> {
        Ok(None)
    }
}
