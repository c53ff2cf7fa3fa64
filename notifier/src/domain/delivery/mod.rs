//! Delivery stage: the only code path that talks to the email provider.

mod classify;
mod policy;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

pub use classify::{DEFAULT_RATE_LIMIT_BACKOFF, classify_status};
pub use policy::{AdmissionDecision, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState};

use crate::domain::error::{ClassifiedError, FailureClass};
use crate::domain::event::{EventId, EventKind, RecipientEmail};
use crate::domain::ownership::VerifiedRecipient;
use crate::domain::ports::{
    DeliveryProviderError, EmailDeliveryProvider, EmailReceipt, EmailRequest, NotificationMetrics,
};
use crate::domain::redaction::recipient_fingerprint;
use crate::domain::templates::{Personalisation, TemplateId, TemplateRegistry};

/// Everything needed to (re)attempt one send, captured after personalisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedMessage {
    template_id: TemplateId,
    recipient: VerifiedRecipient,
    address: RecipientEmail,
    personalisation: Personalisation,
    reference: EventId,
}

impl PreparedMessage {
    /// Bundle a send. `address` is re-checked against `recipient` on every
    /// attempt.
    pub fn new(
        template_id: TemplateId,
        recipient: VerifiedRecipient,
        address: RecipientEmail,
        personalisation: Personalisation,
        reference: EventId,
    ) -> Self {
        Self {
            template_id,
            recipient,
            address,
            personalisation,
            reference,
        }
    }

    /// Provider template.
    pub fn template_id(&self) -> &TemplateId {
        &self.template_id
    }

    /// Verified recipient.
    pub fn recipient(&self) -> &VerifiedRecipient {
        &self.recipient
    }

    /// Address the provider will deliver to.
    pub fn address(&self) -> &RecipientEmail {
        &self.address
    }

    /// Rendered values.
    pub fn personalisation(&self) -> &Personalisation {
        &self.personalisation
    }

    /// Correlation reference.
    pub fn reference(&self) -> &EventId {
        &self.reference
    }
}

/// Send failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The delivery address differs from the verified recipient.
    #[error("delivery address does not match the verified recipient")]
    RecipientMismatch,
    /// The circuit breaker refused the call.
    #[error("provider circuit breaker is open")]
    CircuitOpen {
        /// Remaining cooldown.
        retry_after: Duration,
    },
    /// The provider call failed.
    #[error(transparent)]
    Provider(#[from] DeliveryProviderError),
}

impl ClassifiedError for DeliveryError {
    fn class(&self) -> FailureClass {
        match self {
            Self::RecipientMismatch => FailureClass::Critical,
            Self::CircuitOpen { .. } => FailureClass::Retriable,
            Self::Provider(error) => error.class(),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::RecipientMismatch => "recipient_mismatch",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Provider(error) => error.code(),
        }
    }

    fn security_anomaly(&self) -> bool {
        matches!(self, Self::RecipientMismatch)
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RecipientMismatch => None,
            Self::CircuitOpen { retry_after } => Some(*retry_after),
            Self::Provider(error) => error.retry_after(),
        }
    }
}

/// One template that failed the startup check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateProblem {
    /// The provider template lacks required placeholders.
    MissingFields {
        /// Event kind served by the template.
        kind: EventKind,
        /// Placeholder names absent from the provider template.
        missing: Vec<String>,
    },
    /// The provider could not describe the template.
    Unreachable {
        /// Event kind served by the template.
        kind: EventKind,
        /// Provider failure.
        message: String,
    },
}

impl fmt::Display for TemplateProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFields { kind, missing } => {
                write!(f, "{kind}: missing {}", missing.join(", "))
            }
            Self::Unreachable { kind, message } => write!(f, "{kind}: {message}"),
        }
    }
}

/// Startup template check failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("template validation failed: {}", render_problems(.problems))]
pub struct TemplateValidationError {
    /// Every template that failed.
    pub problems: Vec<TemplateProblem>,
}

fn render_problems(problems: &[TemplateProblem]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Delivery stage.
pub struct DeliverySender {
    provider: Arc<dyn EmailDeliveryProvider>,
    metrics: Arc<dyn NotificationMetrics>,
    breaker: Mutex<CircuitBreaker>,
    call_timeout: Duration,
}

impl DeliverySender {
    /// Build a sender with a closed breaker.
    pub fn new(
        provider: Arc<dyn EmailDeliveryProvider>,
        metrics: Arc<dyn NotificationMetrics>,
        breaker: CircuitBreakerConfig,
        call_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            metrics,
            breaker: Mutex::new(CircuitBreaker::new(breaker)),
            call_timeout,
        }
    }

    /// Current breaker state.
    pub fn circuit_state(&self) -> CircuitBreakerState {
        self.lock_breaker().state()
    }

    /// Send `message`, bounded by the provider timeout and `budget`.
    pub async fn send(
        &self,
        message: &PreparedMessage,
        now: DateTime<Utc>,
        budget: Duration,
    ) -> Result<EmailReceipt, DeliveryError> {
        if !message.recipient.matches(&message.address) {
            error!(
                security = true,
                event_id = %message.reference,
                verified = %recipient_fingerprint(message.recipient.email()),
                address = %recipient_fingerprint(&message.address),
                "delivery address diverged from verified recipient; refusing to send"
            );
            return Err(DeliveryError::RecipientMismatch);
        }

        let admission = self.lock_breaker().admit_call(now);
        if let AdmissionDecision::DeniedByCircuit { retry_after } = admission {
            warn!(
                event_id = %message.reference,
                retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                "provider circuit open; send deferred"
            );
            return Err(DeliveryError::CircuitOpen { retry_after });
        }

        let request = EmailRequest {
            template_id: message.template_id.to_string(),
            email_address: message.address.as_ref().to_owned(),
            personalisation: message.personalisation.clone(),
            reference: message.reference.to_string(),
        };
        let limit = self.call_timeout.min(budget);
        let outcome = match timeout(limit, self.provider.send_email(&request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(DeliveryProviderError::timeout(format!(
                "no response within {}ms",
                limit.as_millis()
            ))),
        };

        match outcome {
            Ok(receipt) => {
                self.lock_breaker().record_success();
                info!(
                    event_id = %message.reference,
                    template_id = %message.template_id,
                    recipient = %recipient_fingerprint(&message.address),
                    message_id = receipt.message_id.as_deref().unwrap_or("unknown"),
                    "notification sent"
                );
                Ok(receipt)
            }
            Err(error) => {
                {
                    let mut breaker = self.lock_breaker();
                    if error.class() == FailureClass::Retriable {
                        breaker.record_failure(now);
                    } else {
                        breaker.record_inconclusive();
                    }
                }
                warn!(
                    event_id = %message.reference,
                    class = %error.class(),
                    code = error.code(),
                    "provider send failed"
                );
                Err(DeliveryError::Provider(error))
            }
        }
    }

    /// Compare every registered template with the provider's declared fields.
    ///
    /// Missing required placeholders fail; extra provider-side placeholders
    /// are accepted.
    pub async fn validate_templates(
        &self,
        registry: &TemplateRegistry,
    ) -> Result<(), TemplateValidationError> {
        let mut problems = Vec::new();
        for template in registry.iter() {
            let kind = template.kind();
            let declared = match self
                .provider
                .template_fields(template.template_id().as_ref())
                .await
            {
                Ok(declared) => declared,
                Err(error) => {
                    problems.push(TemplateProblem::Unreachable {
                        kind,
                        message: error.to_string(),
                    });
                    continue;
                }
            };
            let missing = missing_fields(&registry.required_names(kind), &declared);
            if missing.is_empty() {
                let known: BTreeSet<&str> = template.all_fields().map(|key| key.as_str()).collect();
                let extra = declared
                    .iter()
                    .filter(|name| !known.contains(name.as_str()))
                    .count();
                debug!(
                    event_type = kind.as_str(),
                    template_id = %template.template_id(),
                    extra,
                    "template matches registry"
                );
                continue;
            }
            error!(
                event_type = kind.as_str(),
                template_id = %template.template_id(),
                missing = ?missing,
                "provider template lacks required fields"
            );
            let _ = self
                .metrics
                .record_template_validation_failure(kind.as_str())
                .await;
            problems.push(TemplateProblem::MissingFields { kind, missing });
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(TemplateValidationError { problems })
        }
    }

    fn lock_breaker(&self) -> std::sync::MutexGuard<'_, CircuitBreaker> {
        self.breaker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn missing_fields(required: &BTreeSet<&'static str>, declared: &BTreeSet<String>) -> Vec<String> {
    required
        .iter()
        .filter(|name| !declared.contains(**name))
        .map(|name| (*name).to_owned())
        .collect()
}
