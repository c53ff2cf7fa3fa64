//! Append-only preference history kept in memory.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::lock;
use crate::domain::event::RecipientEmail;
use crate::domain::ports::{PreferenceRepository, PreferenceRepositoryError};
use crate::domain::preferences::RecipientPreference;

/// Preference history keyed by canonical recipient address.
#[derive(Debug, Default)]
pub struct InMemoryPreferenceRepository {
    history: Mutex<HashMap<String, Vec<RecipientPreference>>>,
}

impl InMemoryPreferenceRepository {
    /// Empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceRepository for InMemoryPreferenceRepository {
    async fn latest(
        &self,
        recipient: &RecipientEmail,
    ) -> Result<Option<RecipientPreference>, PreferenceRepositoryError> {
        Ok(lock(&self.history)
            .get(&recipient.canonical())
            .and_then(|entries| entries.last().cloned()))
    }

    async fn append(
        &self,
        recipient: &RecipientEmail,
        preference: RecipientPreference,
    ) -> Result<(), PreferenceRepositoryError> {
        lock(&self.history)
            .entry(recipient.canonical())
            .or_default()
            .push(preference);
        Ok(())
    }

    async fn history(
        &self,
        recipient: &RecipientEmail,
    ) -> Result<Vec<RecipientPreference>, PreferenceRepositoryError> {
        Ok(lock(&self.history)
            .get(&recipient.canonical())
            .cloned()
            .unwrap_or_default())
    }
}
