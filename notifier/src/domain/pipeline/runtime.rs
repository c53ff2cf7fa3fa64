//! Port, runtime and configuration bundles for the notification pipeline.

use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;

use super::{BackoffJitter, RandomJitter, RetryPolicy};
use crate::domain::delivery::CircuitBreakerConfig;
use crate::domain::enrichment::ConflictPolicy;
use crate::domain::formatting::DEFAULT_TIMEZONE;
use crate::domain::idempotency::IdempotencyConfig;
use crate::domain::ownership::DomainAllowList;
use crate::domain::ports::{
    AccountStore, DeadLetterQueue, EmailDeliveryProvider, IdempotencyStore, LeaseStore,
    LeaseTemplateStore, NotificationMetrics, OperationalAlerts, PreferenceRepository, RetryQueue,
};
use crate::domain::templates::{LinkSettings, TemplateRegistry};

/// Slack added to the reservation hold beyond the deadline and provider call.
const RESERVATION_MARGIN: Duration = Duration::from_secs(30);

/// Port bundle required by the pipeline.
pub struct NotificationPipelinePorts {
    /// Authoritative lease store.
    pub leases: Arc<dyn LeaseStore>,
    /// Account registry.
    pub accounts: Arc<dyn AccountStore>,
    /// Lease template store.
    pub lease_templates: Arc<dyn LeaseTemplateStore>,
    /// Recipient preference history.
    pub preferences: Arc<dyn PreferenceRepository>,
    /// Idempotency store.
    pub idempotency: Arc<dyn IdempotencyStore>,
    /// Transactional email provider.
    pub provider: Arc<dyn EmailDeliveryProvider>,
    /// Dead-letter area.
    pub dead_letters: Arc<dyn DeadLetterQueue>,
    /// Scheduled send retries.
    pub retries: Arc<dyn RetryQueue>,
    /// Metrics adapter.
    pub metrics: Arc<dyn NotificationMetrics>,
    /// Operational alarm sink.
    pub alerts: Arc<dyn OperationalAlerts>,
}

impl NotificationPipelinePorts {
    /// Build a strongly-typed pipeline port bundle.
    #[expect(
        clippy::too_many_arguments,
        reason = "one argument per driven port keeps wiring explicit"
    )]
    pub fn new(
        leases: Arc<dyn LeaseStore>,
        accounts: Arc<dyn AccountStore>,
        lease_templates: Arc<dyn LeaseTemplateStore>,
        preferences: Arc<dyn PreferenceRepository>,
        idempotency: Arc<dyn IdempotencyStore>,
        provider: Arc<dyn EmailDeliveryProvider>,
        dead_letters: Arc<dyn DeadLetterQueue>,
        retries: Arc<dyn RetryQueue>,
        metrics: Arc<dyn NotificationMetrics>,
        alerts: Arc<dyn OperationalAlerts>,
    ) -> Self {
        Self {
            leases,
            accounts,
            lease_templates,
            preferences,
            idempotency,
            provider,
            dead_letters,
            retries,
            metrics,
            alerts,
        }
    }
}

/// Runtime helpers used by the retry policy.
pub struct PipelineRuntime {
    /// Jitter strategy for retry delays.
    pub jitter: Arc<dyn BackoffJitter>,
}

impl Default for PipelineRuntime {
    fn default() -> Self {
        Self {
            jitter: Arc::new(RandomJitter::default()),
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Template per event kind.
    pub templates: TemplateRegistry,
    /// Link bases for personalisation.
    pub links: LinkSettings,
    /// Approved recipient domains.
    pub allowed_domains: DomainAllowList,
    /// Idempotency retention.
    pub idempotency: IdempotencyConfig,
    /// Secondary collapse window.
    pub collapse_window: Duration,
    /// Ownership read timeout.
    pub store_read_timeout: Duration,
    /// Per-query enrichment timeout.
    pub enrichment_timeout: Duration,
    /// Provider call timeout.
    pub provider_timeout: Duration,
    /// End-to-end deadline for one event.
    pub event_deadline: Duration,
    /// Send retry policy.
    pub retry: RetryPolicy,
    /// Provider circuit breaker.
    pub circuit_breaker: CircuitBreakerConfig,
    /// What to do with an enrichment status conflict.
    pub conflict_policy: ConflictPolicy,
    /// Timezone used when a recipient has none.
    pub default_timezone: Tz,
}

impl PipelineConfig {
    /// Configuration with default timings. The allow-list starts empty and
    /// must be set before any recipient can be approved.
    pub fn new(templates: TemplateRegistry, links: LinkSettings) -> Self {
        Self {
            templates,
            links,
            allowed_domains: DomainAllowList::new(Vec::<String>::new()),
            idempotency: IdempotencyConfig::default(),
            collapse_window: Duration::from_secs(30),
            store_read_timeout: Duration::from_millis(500),
            enrichment_timeout: Duration::from_millis(500),
            provider_timeout: Duration::from_secs(3),
            event_deadline: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            conflict_policy: ConflictPolicy::default(),
            default_timezone: DEFAULT_TIMEZONE,
        }
    }

    /// Replace the recipient domain allow-list.
    #[must_use]
    pub fn with_allowed_domains(mut self, allowed_domains: DomainAllowList) -> Self {
        self.allowed_domains = allowed_domains;
        self
    }

    /// How long a reservation is held while one attempt is in flight.
    pub fn reservation_hold(&self) -> Duration {
        self.event_deadline
            .saturating_add(self.provider_timeout)
            .saturating_add(RESERVATION_MARGIN)
    }

    /// How long a reservation is held past a retry's due time.
    pub fn retry_hold(&self) -> Duration {
        self.reservation_hold().saturating_add(self.retry.drain_grace)
    }
}
