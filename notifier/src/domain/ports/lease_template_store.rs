//! Driven port for lease template lookups.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::define_port_error;

/// Lease template row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseTemplateRecord {
    /// Template identifier.
    pub uuid: String,
    /// Display name.
    pub name: String,
    /// Default lease duration, in hours.
    #[serde(default)]
    pub lease_duration_in_hours: Option<f64>,
}

define_port_error! {
    /// Errors raised by lease template store adapters.
    pub enum LeaseTemplateStoreError {
        /// The store could not be reached or failed the read.
        Unavailable { message: String } => "lease template store unavailable: {message}",
    }
}

/// Port for keyed lease template lookups.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LeaseTemplateStore: Send + Sync {
    /// Fetch one lease template by identifier.
    async fn find_template(
        &self,
        template_uuid: &str,
    ) -> Result<Option<LeaseTemplateRecord>, LeaseTemplateStoreError>;
}
