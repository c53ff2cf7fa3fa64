//! Driven port for the transactional email provider.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;

use super::define_port_error;

/// One transactional email send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailRequest {
    /// Provider template identifier.
    pub template_id: String,
    /// Destination address.
    pub email_address: String,
    /// Sanitised personalisation values.
    pub personalisation: BTreeMap<String, String>,
    /// Correlation reference; always the originating event id.
    pub reference: String,
}

/// Provider acknowledgement of a send.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EmailReceipt {
    /// Provider message identifier, when the response carried one.
    pub message_id: Option<String>,
}

define_port_error! {
    /// Errors raised by delivery provider adapters.
    pub enum DeliveryProviderError {
        /// The provider answered with a non-success HTTP status.
        Status { status: u16, retry_after: Option<Duration>, message: String } =>
            "provider returned status {status}: {message}",
        /// The call exceeded its timeout.
        Timeout { message: String } => "provider call timed out: {message}",
        /// The request could not be transmitted.
        Transport { message: String } => "provider transport failed: {message}",
        /// The response could not be decoded.
        Decode { message: String } => "provider response decode failed: {message}",
        /// The provider credential could not be resolved.
        Credential { message: String } => "provider credential unavailable: {message}",
    }
}

/// Port for sending templated email and inspecting templates.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailDeliveryProvider: Send + Sync {
    /// Send one templated email.
    async fn send_email(
        &self,
        request: &EmailRequest,
    ) -> Result<EmailReceipt, DeliveryProviderError>;

    /// Personalisation field names declared by a provider template.
    async fn template_fields(
        &self,
        template_id: &str,
    ) -> Result<BTreeSet<String>, DeliveryProviderError>;
}
