//! Driven port for the append-only recipient preference store.

use async_trait::async_trait;

use super::define_port_error;
use crate::domain::event::RecipientEmail;
use crate::domain::preferences::RecipientPreference;

define_port_error! {
    /// Errors raised by preference repository adapters.
    pub enum PreferenceRepositoryError {
        /// The repository could not be reached.
        Unavailable { message: String } => "preference repository unavailable: {message}",
    }
}

/// Append-only preference history per recipient.
///
/// Entries are never mutated in place; the latest entry wins.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PreferenceRepository: Send + Sync {
    /// Most recent entry for `recipient`, if any.
    async fn latest(
        &self,
        recipient: &RecipientEmail,
    ) -> Result<Option<RecipientPreference>, PreferenceRepositoryError>;

    /// Append a new entry.
    async fn append(
        &self,
        recipient: &RecipientEmail,
        preference: RecipientPreference,
    ) -> Result<(), PreferenceRepositoryError>;

    /// Full history, oldest first.
    async fn history(
        &self,
        recipient: &RecipientEmail,
    ) -> Result<Vec<RecipientPreference>, PreferenceRepositoryError>;
}

/// Fixture repository with no stored preferences.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixturePreferenceRepository;

#[async_trait]
impl PreferenceRepository for FixturePreferenceRepository {
    async fn latest(
        &self,
        _recipient: &RecipientEmail,
    ) -> Result<Option<RecipientPreference>, PreferenceRepositoryError> {
        Ok(None)
    }

    async fn append(
        &self,
        _recipient: &RecipientEmail,
        _preference: RecipientPreference,
    ) -> Result<(), PreferenceRepositoryError> {
        Ok(())
    }

    async fn history(
        &self,
        _recipient: &RecipientEmail,
    ) -> Result<Vec<RecipientPreference>, PreferenceRepositoryError> {
        Ok(Vec::new())
    }
}
