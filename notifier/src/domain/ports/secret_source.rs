//! Driven port for secret retrieval.

use async_trait::async_trait;
use zeroize::Zeroizing;

use super::define_port_error;

define_port_error! {
    /// Errors raised by secret source adapters.
    pub enum SecretSourceError {
        /// No secret exists under the requested name.
        NotFound { name: String } => "secret {name} not found",
        /// The backing store could not be read.
        Unavailable { message: String } => "secret source unavailable: {message}",
        /// The secret exists but is unusable.
        Invalid { message: String } => "secret invalid: {message}",
    }
}

/// Port for fetching one secret value by name.
///
/// Callers cache the value for the process lifetime; adapters need not.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Fetch the named secret.
    async fn fetch(&self, name: &str) -> Result<Zeroizing<String>, SecretSourceError>;
}
