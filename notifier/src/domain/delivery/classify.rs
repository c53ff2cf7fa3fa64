//! Provider failure classification.

use std::time::Duration;

use crate::domain::error::{ClassifiedError, FailureClass};
use crate::domain::ports::DeliveryProviderError;

/// Backoff hint used for 429 responses without `Retry-After`.
pub const DEFAULT_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(60);

/// Class of an HTTP status returned by the provider.
///
/// The mapping is total: anything not recognised is retriable.
///
/// # Examples
/// ```
/// use lease_notifier::domain::delivery::classify_status;
/// use lease_notifier::domain::error::FailureClass;
///
/// assert_eq!(classify_status(400), FailureClass::Permanent);
/// assert_eq!(classify_status(403), FailureClass::Critical);
/// assert_eq!(classify_status(429), FailureClass::Retriable);
/// assert_eq!(classify_status(503), FailureClass::Retriable);
/// ```
pub const fn classify_status(status: u16) -> FailureClass {
    match status {
        401 | 403 => FailureClass::Critical,
        408 | 429 => FailureClass::Retriable,
        400..=499 => FailureClass::Permanent,
        _ => FailureClass::Retriable,
    }
}

impl ClassifiedError for DeliveryProviderError {
    fn class(&self) -> FailureClass {
        match self {
            Self::Status { status, .. } => classify_status(*status),
            Self::Credential { .. } => FailureClass::Critical,
            Self::Timeout { .. } | Self::Transport { .. } | Self::Decode { .. } => {
                FailureClass::Retriable
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Status { status, .. } => match *status {
                401 | 403 => "provider_unauthorised",
                429 => "provider_rate_limited",
                400..=499 => "provider_rejected",
                500..=599 => "provider_unavailable",
                _ => "provider_unexpected_status",
            },
            Self::Timeout { .. } => "provider_timeout",
            Self::Transport { .. } => "provider_transport",
            Self::Decode { .. } => "provider_decode",
            Self::Credential { .. } => "provider_credential",
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status {
                status: 429,
                retry_after,
                ..
            } => Some(retry_after.unwrap_or(DEFAULT_RATE_LIMIT_BACKOFF)),
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
