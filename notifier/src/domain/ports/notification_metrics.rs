//! Domain port surface for recording notification pipeline metrics.
//!
//! Labels are bounded: event types come from the closed registry (unknown
//! inbound types are reported as `unknown`) and never include personal data.

use std::time::Duration;

use async_trait::async_trait;

use super::define_port_error;
use crate::domain::error::FailureClass;

define_port_error! {
    /// Errors exposed when recording notification metrics.
    pub enum NotificationMetricsError {
        /// Metric exporter rejected the write.
        Export { message: String } => "notification metrics exporter failed: {message}",
    }
}

/// Metrics recording port for pipeline outcomes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationMetrics: Send + Sync {
    /// A message was accepted by the provider.
    async fn record_sent(&self, event_type: &str) -> Result<(), NotificationMetricsError>;

    /// An event ended in a classified failure.
    async fn record_failed(
        &self,
        event_type: &str,
        class: FailureClass,
    ) -> Result<(), NotificationMetricsError>;

    /// A replayed event id was absorbed.
    async fn record_duplicate(&self, event_type: &str) -> Result<(), NotificationMetricsError>;

    /// The claimed recipient did not own the lease.
    async fn record_ownership_mismatch(
        &self,
        event_type: &str,
    ) -> Result<(), NotificationMetricsError>;

    /// Store status contradicted the event kind.
    async fn record_enrichment_conflict(
        &self,
        event_type: &str,
    ) -> Result<(), NotificationMetricsError>;

    /// A provider template failed startup validation.
    async fn record_template_validation_failure(
        &self,
        event_type: &str,
    ) -> Result<(), NotificationMetricsError>;

    /// An event failed schema validation.
    async fn record_schema_failure(
        &self,
        event_type: &str,
        kind: &str,
    ) -> Result<(), NotificationMetricsError>;

    /// A recipient preference suppressed the send.
    async fn record_preference_skipped(
        &self,
        event_type: &str,
    ) -> Result<(), NotificationMetricsError>;

    /// An event was moved to the dead-letter area.
    async fn record_dead_lettered(&self, event_type: &str)
    -> Result<(), NotificationMetricsError>;

    /// Time from event origin to provider acceptance.
    async fn record_latency(
        &self,
        event_type: &str,
        latency: Duration,
    ) -> Result<(), NotificationMetricsError>;
}

/// No-op implementation for when metrics are disabled or in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpNotificationMetrics;

#[async_trait]
impl NotificationMetrics for NoOpNotificationMetrics {
    async fn record_sent(&self, _event_type: &str) -> Result<(), NotificationMetricsError> {
        Ok(())
    }

    async fn record_failed(
        &self,
        _event_type: &str,
        _class: FailureClass,
    ) -> Result<(), NotificationMetricsError> {
        Ok(())
    }

    async fn record_duplicate(&self, _event_type: &str) -> Result<(), NotificationMetricsError> {
        Ok(())
    }

    async fn record_ownership_mismatch(
        &self,
        _event_type: &str,
    ) -> Result<(), NotificationMetricsError> {
        Ok(())
    }

    async fn record_enrichment_conflict(
        &self,
        _event_type: &str,
    ) -> Result<(), NotificationMetricsError> {
        Ok(())
    }

    async fn record_template_validation_failure(
        &self,
        _event_type: &str,
    ) -> Result<(), NotificationMetricsError> {
        Ok(())
    }

    async fn record_schema_failure(
        &self,
        _event_type: &str,
        _kind: &str,
    ) -> Result<(), NotificationMetricsError> {
        Ok(())
    }

    async fn record_preference_skipped(
        &self,
        _event_type: &str,
    ) -> Result<(), NotificationMetricsError> {
        Ok(())
    }

    async fn record_dead_lettered(
        &self,
        _event_type: &str,
    ) -> Result<(), NotificationMetricsError> {
        Ok(())
    }

    async fn record_latency(
        &self,
        _event_type: &str,
        _latency: Duration,
    ) -> Result<(), NotificationMetricsError> {
        Ok(())
    }
}
