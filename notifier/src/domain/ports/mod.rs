//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod account_store;
mod dead_letter_queue;
mod delivery_provider;
mod idempotency_store;
mod lease_store;
mod lease_template_store;
mod notification_metrics;
mod operational_alerts;
mod preference_repository;
mod retry_queue;
mod secret_source;

#[cfg(test)]
pub use account_store::MockAccountStore;
pub use account_store::{AccountRecord, AccountStore, AccountStoreError, FixtureAccountStore};
#[cfg(test)]
pub use dead_letter_queue::MockDeadLetterQueue;
pub use dead_letter_queue::{
    DeadLetterEntry, DeadLetterQueue, DeadLetterQueueError, DeadLetterReason,
};
#[cfg(test)]
pub use delivery_provider::MockEmailDeliveryProvider;
pub use delivery_provider::{
    DeliveryProviderError, EmailDeliveryProvider, EmailReceipt, EmailRequest,
};
#[cfg(test)]
pub use idempotency_store::MockIdempotencyStore;
pub use idempotency_store::{IdempotencyStore, IdempotencyStoreError, ReserveOutcome};
#[cfg(test)]
pub use lease_store::MockLeaseStore;
pub use lease_store::{
    FixtureLeaseStore, LeaseRecord, LeaseStatus, LeaseStore, LeaseStoreError, ReadConsistency,
};
#[cfg(test)]
pub use lease_template_store::MockLeaseTemplateStore;
pub use lease_template_store::{
    LeaseTemplateRecord, LeaseTemplateStore, LeaseTemplateStoreError,
};
#[cfg(test)]
pub use notification_metrics::MockNotificationMetrics;
pub use notification_metrics::{
    NoOpNotificationMetrics, NotificationMetrics, NotificationMetricsError,
};
#[cfg(test)]
pub use operational_alerts::MockOperationalAlerts;
pub use operational_alerts::{
    AlertSeverity, OperationalAlert, OperationalAlerts, OperationalAlertsError,
};
#[cfg(test)]
pub use preference_repository::MockPreferenceRepository;
pub use preference_repository::{
    FixturePreferenceRepository, PreferenceRepository, PreferenceRepositoryError,
};
#[cfg(test)]
pub use retry_queue::MockRetryQueue;
pub use retry_queue::{PendingDelivery, RetryQueue, RetryQueueError};
#[cfg(test)]
pub use secret_source::MockSecretSource;
pub use secret_source::{SecretSource, SecretSourceError};
