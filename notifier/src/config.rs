//! Notifier configuration loaded via OrthoConfig.
//!
//! Every field can be set through `NOTIFIER_*` environment variables, a
//! configuration file, or the command line. Template identifiers have no
//! defaults: [`NotifierSettings::template_registry`] fails fast when one is
//! missing.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use url::Url;

use crate::domain::EventKind;
use crate::domain::delivery::CircuitBreakerConfig;
use crate::domain::enrichment::ConflictPolicy;
use crate::domain::formatting::DEFAULT_TIMEZONE;
use crate::domain::idempotency::IdempotencyConfig;
use crate::domain::ownership::DomainAllowList;
use crate::domain::pipeline::{PipelineConfig, RetryPolicy};
use crate::domain::templates::{
    LinkSettings, PersonalisationError, TemplateError, TemplateId, TemplateRegistry,
};

const DEFAULT_PROVIDER_URL: &str = "https://api.notifications.service.gov.uk";
const DEFAULT_API_KEY_ENV: &str = "NOTIFY_API_KEY";
const DEFAULT_REPLAY_WINDOW_HOURS: u64 = 24;
const DEFAULT_DEDUP_WINDOW_SECONDS: u64 = 30;
const DEFAULT_STORE_READ_TIMEOUT_MS: u64 = 500;
const DEFAULT_ENRICHMENT_TIMEOUT_MS: u64 = 500;
const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_EVENT_DEADLINE_MS: u64 = 5_000;

/// Configuration failures detected before the pipeline starts.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// An event kind has no template identifier.
    #[error("no template id configured for {kind} (set NOTIFIER_TEMPLATE_{key})", key = .kind.config_key().to_ascii_uppercase())]
    MissingTemplate {
        /// Kind without a template.
        kind: EventKind,
    },
    /// A template identifier failed validation.
    #[error("template id for {kind} is invalid: {source}")]
    InvalidTemplate {
        /// Kind whose identifier is invalid.
        kind: EventKind,
        /// Validation failure.
        source: TemplateError,
    },
    /// The registry rejected the identifiers.
    #[error(transparent)]
    Registry(#[from] TemplateError),
    /// A URL setting did not parse.
    #[error("{field} is not a valid URL: {source}")]
    InvalidUrl {
        /// Setting name.
        field: &'static str,
        /// Parse failure.
        source: url::ParseError,
    },
    /// A required URL setting is absent.
    #[error("{field} must be set")]
    MissingUrl {
        /// Setting name.
        field: &'static str,
    },
    /// Portal links failed the https check.
    #[error(transparent)]
    InsecureLink(#[from] PersonalisationError),
    /// No recipient domains were approved.
    #[error("allowed_domains must list at least one domain")]
    NoAllowedDomains,
    /// The default timezone is not an IANA name.
    #[error("unknown timezone {0}")]
    UnknownTimezone(String),
    /// The conflict policy is not recognised.
    #[error("unknown conflict policy {0} (expected manual_review or reject)")]
    UnknownConflictPolicy(String),
}

/// Configuration values controlling the notification pipeline.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "NOTIFIER")]
pub struct NotifierSettings {
    /// Provider template for `LeaseRequested`.
    pub template_lease_requested: Option<String>,
    /// Provider template for `LeaseApproved`.
    pub template_lease_approved: Option<String>,
    /// Provider template for `LeaseDenied`.
    pub template_lease_denied: Option<String>,
    /// Provider template for `LeaseTerminated`.
    pub template_lease_terminated: Option<String>,
    /// Provider template for `LeaseFrozen`.
    pub template_lease_frozen: Option<String>,
    /// Provider template for `LeaseBudgetThresholdAlert`.
    pub template_lease_budget_threshold_alert: Option<String>,
    /// Provider template for `LeaseDurationThresholdAlert`.
    pub template_lease_duration_threshold_alert: Option<String>,
    /// Provider template for `LeaseFreezingThresholdAlert`.
    pub template_lease_freezing_threshold_alert: Option<String>,
    /// Provider template for `LeaseBudgetExceeded`.
    pub template_lease_budget_exceeded: Option<String>,
    /// Provider template for `LeaseExpired`.
    pub template_lease_expired: Option<String>,
    /// Provider API base URL.
    pub provider_url: Option<String>,
    /// Environment variable holding the provider API key.
    pub api_key_env: Option<String>,
    /// File holding the provider API key. Takes precedence over the variable.
    pub api_key_file: Option<PathBuf>,
    /// SSO portal base for account links.
    pub sso_portal_url: Option<String>,
    /// Self-service portal base.
    pub portal_url: Option<String>,
    /// Approved recipient domains, comma separated.
    pub allowed_domains: Option<String>,
    /// IANA timezone used when a recipient has none.
    pub default_timezone: Option<String>,
    /// Upstream replay window in hours; records live seven times longer.
    pub replay_window_hours: Option<u64>,
    /// Collapse window for repeated events about one lease, in seconds.
    pub dedup_window_seconds: Option<u64>,
    /// Ownership read timeout in milliseconds.
    pub store_read_timeout_ms: Option<u64>,
    /// Per-query enrichment timeout in milliseconds.
    pub enrichment_timeout_ms: Option<u64>,
    /// Provider call timeout in milliseconds.
    pub provider_timeout_ms: Option<u64>,
    /// End-to-end deadline per event in milliseconds.
    pub event_deadline_ms: Option<u64>,
    /// Maximum send attempts per event.
    pub retry_max_attempts: Option<u32>,
    /// Delay before the second attempt, in seconds.
    pub retry_initial_backoff_seconds: Option<u64>,
    /// Ceiling on any retry delay, in seconds.
    pub retry_max_backoff_seconds: Option<u64>,
    /// How late a drain may pick up a due retry, in seconds.
    pub retry_drain_grace_seconds: Option<u64>,
    /// Consecutive retriable failures that open the provider breaker.
    pub circuit_failure_threshold: Option<u32>,
    /// Breaker cooldown in seconds.
    pub circuit_cooldown_seconds: Option<u64>,
    /// `manual_review` (default) or `reject`.
    pub conflict_policy: Option<String>,
}

impl NotifierSettings {
    /// Template registry covering every event kind.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::MissingTemplate`] for the first kind without
    /// an identifier, or [`SettingsError::InvalidTemplate`] when one is
    /// malformed.
    pub fn template_registry(&self) -> Result<TemplateRegistry, SettingsError> {
        let mut ids = BTreeMap::new();
        for kind in EventKind::ALL {
            let raw = self
                .template_for(kind)
                .filter(|raw| !raw.trim().is_empty())
                .ok_or(SettingsError::MissingTemplate { kind })?;
            let id = TemplateId::new(raw.trim())
                .map_err(|source| SettingsError::InvalidTemplate { kind, source })?;
            ids.insert(kind, id);
        }
        Ok(TemplateRegistry::new(ids)?)
    }

    fn template_for(&self, kind: EventKind) -> Option<&str> {
        let raw = match kind {
            EventKind::LeaseRequested => &self.template_lease_requested,
            EventKind::LeaseApproved => &self.template_lease_approved,
            EventKind::LeaseDenied => &self.template_lease_denied,
            EventKind::LeaseTerminated => &self.template_lease_terminated,
            EventKind::LeaseFrozen => &self.template_lease_frozen,
            EventKind::LeaseBudgetThresholdAlert => &self.template_lease_budget_threshold_alert,
            EventKind::LeaseDurationThresholdAlert => &self.template_lease_duration_threshold_alert,
            EventKind::LeaseFreezingThresholdAlert => &self.template_lease_freezing_threshold_alert,
            EventKind::LeaseBudgetExceeded => &self.template_lease_budget_exceeded,
            EventKind::LeaseExpired => &self.template_lease_expired,
        };
        raw.as_deref()
    }

    /// Provider API base URL, falling back to the public Notify endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error when the configured value does not parse.
    pub fn provider_url(&self) -> Result<Url, SettingsError> {
        parse_url(
            "provider_url",
            self.provider_url.as_deref().unwrap_or(DEFAULT_PROVIDER_URL),
        )
    }

    /// Environment variable holding the API key.
    pub fn api_key_env(&self) -> &str {
        self.api_key_env.as_deref().unwrap_or(DEFAULT_API_KEY_ENV)
    }

    /// Portal links used in personalisation.
    ///
    /// # Errors
    ///
    /// Returns an error when either portal is unset, malformed or not https.
    pub fn links(&self) -> Result<LinkSettings, SettingsError> {
        let sso = self
            .sso_portal_url
            .as_deref()
            .ok_or(SettingsError::MissingUrl {
                field: "sso_portal_url",
            })?;
        let portal = self.portal_url.as_deref().ok_or(SettingsError::MissingUrl {
            field: "portal_url",
        })?;
        Ok(LinkSettings::new(
            parse_url("sso_portal_url", sso)?,
            parse_url("portal_url", portal)?,
        )?)
    }

    /// Approved recipient domains.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::NoAllowedDomains`] when the list is empty.
    pub fn allowed_domains(&self) -> Result<DomainAllowList, SettingsError> {
        let domains: Vec<&str> = self
            .allowed_domains
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|domain| !domain.is_empty())
            .collect();
        if domains.is_empty() {
            return Err(SettingsError::NoAllowedDomains);
        }
        Ok(DomainAllowList::new(domains))
    }

    /// Timezone for recipients without a preference.
    ///
    /// # Errors
    ///
    /// Returns an error when the name is not an IANA timezone.
    pub fn default_timezone(&self) -> Result<Tz, SettingsError> {
        match self.default_timezone.as_deref() {
            None => Ok(DEFAULT_TIMEZONE),
            Some(name) => name
                .trim()
                .parse::<Tz>()
                .map_err(|_| SettingsError::UnknownTimezone(name.to_owned())),
        }
    }

    /// Idempotency retention derived from the replay window.
    pub fn idempotency(&self) -> IdempotencyConfig {
        IdempotencyConfig::from_replay_window_hours(
            self.replay_window_hours
                .unwrap_or(DEFAULT_REPLAY_WINDOW_HOURS),
        )
    }

    /// Send retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.retry_max_attempts.unwrap_or(defaults.max_attempts),
            initial_backoff: self
                .retry_initial_backoff_seconds
                .map_or(defaults.initial_backoff, Duration::from_secs),
            max_backoff: self
                .retry_max_backoff_seconds
                .map_or(defaults.max_backoff, Duration::from_secs),
            drain_grace: self
                .retry_drain_grace_seconds
                .map_or(defaults.drain_grace, Duration::from_secs),
        }
    }

    /// Provider circuit breaker settings.
    pub fn circuit_breaker(&self) -> CircuitBreakerConfig {
        let defaults = CircuitBreakerConfig::default();
        CircuitBreakerConfig {
            failure_threshold: self
                .circuit_failure_threshold
                .unwrap_or(defaults.failure_threshold),
            open_cooldown: self
                .circuit_cooldown_seconds
                .map_or(defaults.open_cooldown, Duration::from_secs),
        }
    }

    /// Enrichment conflict handling.
    ///
    /// # Errors
    ///
    /// Returns an error for names other than `manual_review` and `reject`.
    pub fn conflict_policy(&self) -> Result<ConflictPolicy, SettingsError> {
        match self.conflict_policy.as_deref().map(str::trim) {
            None | Some("manual_review") => Ok(ConflictPolicy::ManualReview),
            Some("reject") => Ok(ConflictPolicy::Reject),
            Some(other) => Err(SettingsError::UnknownConflictPolicy(other.to_owned())),
        }
    }

    /// Provider call timeout.
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(
            self.provider_timeout_ms
                .unwrap_or(DEFAULT_PROVIDER_TIMEOUT_MS),
        )
    }

    /// Full pipeline configuration.
    ///
    /// # Errors
    ///
    /// Returns the first invalid or missing setting.
    pub fn pipeline_config(&self) -> Result<PipelineConfig, SettingsError> {
        let mut config = PipelineConfig::new(self.template_registry()?, self.links()?)
            .with_allowed_domains(self.allowed_domains()?);
        config.idempotency = self.idempotency();
        config.collapse_window = Duration::from_secs(
            self.dedup_window_seconds
                .unwrap_or(DEFAULT_DEDUP_WINDOW_SECONDS),
        );
        config.store_read_timeout = Duration::from_millis(
            self.store_read_timeout_ms
                .unwrap_or(DEFAULT_STORE_READ_TIMEOUT_MS),
        );
        config.enrichment_timeout = Duration::from_millis(
            self.enrichment_timeout_ms
                .unwrap_or(DEFAULT_ENRICHMENT_TIMEOUT_MS),
        );
        config.provider_timeout = self.provider_timeout();
        config.event_deadline = Duration::from_millis(
            self.event_deadline_ms
                .unwrap_or(DEFAULT_EVENT_DEADLINE_MS),
        );
        config.retry = self.retry_policy();
        config.circuit_breaker = self.circuit_breaker();
        config.conflict_policy = self.conflict_policy()?;
        config.default_timezone = self.default_timezone()?;
        Ok(config)
    }
}

fn parse_url(field: &'static str, raw: &str) -> Result<Url, SettingsError> {
    Url::parse(raw.trim()).map_err(|source| SettingsError::InvalidUrl { field, source })
}
