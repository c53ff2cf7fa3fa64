//! Process-scoped provider credential.
//!
//! The API key is fetched from the secret source once per process and held
//! in zeroizing memory. Only a length-plus-hash fingerprint is ever logged.

use std::fmt;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::info;
use zeroize::Zeroizing;

use crate::domain::ports::{SecretSource, SecretSourceError};
use crate::domain::redaction::fingerprint;

/// Provider API key. `Debug` never shows the value.
#[derive(Clone)]
pub struct ProviderApiKey(Zeroizing<String>);

impl ProviderApiKey {
    /// Wrap a raw key, trimming surrounding whitespace.
    pub fn new(raw: Zeroizing<String>) -> Result<Self, SecretSourceError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SecretSourceError::invalid("provider api key is empty"));
        }
        if trimmed.len() == raw.len() {
            return Ok(Self(raw));
        }
        Ok(Self(Zeroizing::new(trimmed.to_owned())))
    }

    /// Raw key for the transport layer. Never log the result.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    /// Audit fingerprint: `len=<n> sha256=<16 hex>`.
    ///
    /// # Examples
    /// ```
    /// use lease_notifier::domain::credentials::ProviderApiKey;
    /// use zeroize::Zeroizing;
    ///
    /// let key = ProviderApiKey::new(Zeroizing::new("secret-key".to_owned())).expect("key");
    /// assert!(key.fingerprint().starts_with("len=10 sha256="));
    /// assert!(!format!("{key:?}").contains("secret"));
    /// ```
    pub fn fingerprint(&self) -> String {
        format!("len={} sha256={}", self.0.len(), fingerprint(&self.0))
    }
}

impl fmt::Debug for ProviderApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProviderApiKey({})", self.fingerprint())
    }
}

/// Lazily resolved, cached provider credential.
pub struct CachedProviderCredential {
    source: Arc<dyn SecretSource>,
    name: String,
    cell: OnceCell<ProviderApiKey>,
}

impl CachedProviderCredential {
    /// Resolve `name` from `source` on first use.
    pub fn new(source: Arc<dyn SecretSource>, name: impl Into<String>) -> Self {
        Self {
            source,
            name: name.into(),
            cell: OnceCell::new(),
        }
    }

    /// Cached key, fetching it on the first call only.
    ///
    /// A failed fetch is not cached, so a later call may succeed.
    pub async fn get(&self) -> Result<&ProviderApiKey, SecretSourceError> {
        self.cell
            .get_or_try_init(|| async {
                let key = ProviderApiKey::new(self.source.fetch(&self.name).await?)?;
                info!(
                    secret = %self.name,
                    fingerprint = %key.fingerprint(),
                    "provider credential loaded"
                );
                Ok(key)
            })
            .await
    }
}
