//! Prometheus adapter for notification pipeline metrics.
//!
//! Metrics are registered with a provided registry; exposing the registry is
//! left to the host process.

use std::time::Duration;

use async_trait::async_trait;
use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};

use crate::domain::error::FailureClass;
use crate::domain::ports::{NotificationMetrics, NotificationMetricsError};

/// End-to-end latency buckets, in seconds. The target is well under five.
const LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 3.0, 5.0, 10.0, 30.0, 120.0];

/// Prometheus-backed notification metrics recorder.
///
/// # Metrics
///
/// - `lease_notifier_events_total{event_type, outcome}`: counter, where
///   `outcome` is `sent`, `duplicate`, `ownership_mismatch`,
///   `enrichment_conflict`, `preference_skipped`, `dead_lettered` or
///   `template_validation_failure`
/// - `lease_notifier_failures_total{event_type, class}`: counter, `class` is
///   `permanent`, `retriable` or `critical`
/// - `lease_notifier_schema_failures_total{event_type, kind}`: counter
/// - `lease_notifier_send_latency_seconds{event_type}`: histogram
pub struct PrometheusNotificationMetrics {
    events_total: CounterVec,
    failures_total: CounterVec,
    schema_failures_total: CounterVec,
    send_latency: HistogramVec,
}

impl PrometheusNotificationMetrics {
    /// Create and register metrics with the given registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric cannot be registered (e.g., if a metric
    /// with the same name already exists in the registry).
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let events_total = CounterVec::new(
            Opts::new(
                "lease_notifier_events_total",
                "Notification events by type and outcome",
            ),
            &["event_type", "outcome"],
        )?;
        let failures_total = CounterVec::new(
            Opts::new(
                "lease_notifier_failures_total",
                "Classified notification failures by type and class",
            ),
            &["event_type", "class"],
        )?;
        let schema_failures_total = CounterVec::new(
            Opts::new(
                "lease_notifier_schema_failures_total",
                "Schema validation failures by type and violation kind",
            ),
            &["event_type", "kind"],
        )?;
        let send_latency = HistogramVec::new(
            HistogramOpts::new(
                "lease_notifier_send_latency_seconds",
                "Time from event origin to provider acceptance",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["event_type"],
        )?;
        registry.register(Box::new(events_total.clone()))?;
        registry.register(Box::new(failures_total.clone()))?;
        registry.register(Box::new(schema_failures_total.clone()))?;
        registry.register(Box::new(send_latency.clone()))?;
        Ok(Self {
            events_total,
            failures_total,
            schema_failures_total,
            send_latency,
        })
    }

    fn record(&self, event_type: &str, outcome: &str) {
        self.events_total
            .with_label_values(&[event_type, outcome])
            .inc();
    }
}

#[async_trait]
impl NotificationMetrics for PrometheusNotificationMetrics {
    async fn record_sent(&self, event_type: &str) -> Result<(), NotificationMetricsError> {
        self.record(event_type, "sent");
        Ok(())
    }

    async fn record_failed(
        &self,
        event_type: &str,
        class: FailureClass,
    ) -> Result<(), NotificationMetricsError> {
        self.failures_total
            .with_label_values(&[event_type, class.as_str()])
            .inc();
        Ok(())
    }

    async fn record_duplicate(&self, event_type: &str) -> Result<(), NotificationMetricsError> {
        self.record(event_type, "duplicate");
        Ok(())
    }

    async fn record_ownership_mismatch(
        &self,
        event_type: &str,
    ) -> Result<(), NotificationMetricsError> {
        self.record(event_type, "ownership_mismatch");
        Ok(())
    }

    async fn record_enrichment_conflict(
        &self,
        event_type: &str,
    ) -> Result<(), NotificationMetricsError> {
        self.record(event_type, "enrichment_conflict");
        Ok(())
    }

    async fn record_template_validation_failure(
        &self,
        event_type: &str,
    ) -> Result<(), NotificationMetricsError> {
        self.record(event_type, "template_validation_failure");
        Ok(())
    }

    async fn record_schema_failure(
        &self,
        event_type: &str,
        kind: &str,
    ) -> Result<(), NotificationMetricsError> {
        self.schema_failures_total
            .with_label_values(&[event_type, kind])
            .inc();
        Ok(())
    }

    async fn record_preference_skipped(
        &self,
        event_type: &str,
    ) -> Result<(), NotificationMetricsError> {
        self.record(event_type, "preference_skipped");
        Ok(())
    }

    async fn record_dead_lettered(
        &self,
        event_type: &str,
    ) -> Result<(), NotificationMetricsError> {
        self.record(event_type, "dead_lettered");
        Ok(())
    }

    async fn record_latency(
        &self,
        event_type: &str,
        latency: Duration,
    ) -> Result<(), NotificationMetricsError> {
        self.send_latency
            .with_label_values(&[event_type])
            .observe(latency.as_secs_f64());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    //! Regression coverage for notification counters.

    use super::*;
    use rstest::rstest;

    fn make_metrics() -> (Registry, PrometheusNotificationMetrics) {
        let registry = Registry::new();
        let metrics = PrometheusNotificationMetrics::new(&registry)
            .expect("metric registration should succeed");
        (registry, metrics)
    }

    #[test]
    fn registers_every_family() {
        let (registry, metrics) = make_metrics();
        metrics.record("LeaseApproved", "sent");
        metrics
            .failures_total
            .with_label_values(&["LeaseApproved", "permanent"])
            .inc();
        metrics
            .schema_failures_total
            .with_label_values(&["LeaseApproved", "missing_field"])
            .inc();
        metrics
            .send_latency
            .with_label_values(&["LeaseApproved"])
            .observe(0.2);

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.name().to_owned())
            .collect();
        for expected in [
            "lease_notifier_events_total",
            "lease_notifier_failures_total",
            "lease_notifier_schema_failures_total",
            "lease_notifier_send_latency_seconds",
        ] {
            assert!(
                names.iter().any(|name| name == expected),
                "{expected} should be registered"
            );
        }
    }

    #[test]
    fn double_registration_is_rejected() {
        let (registry, _metrics) = make_metrics();
        assert!(PrometheusNotificationMetrics::new(&registry).is_err());
    }

    #[tokio::test]
    async fn sent_and_duplicate_use_separate_outcomes() {
        let (_registry, metrics) = make_metrics();
        metrics.record_sent("LeaseApproved").await.expect("sent");
        metrics.record_sent("LeaseApproved").await.expect("sent");
        metrics
            .record_duplicate("LeaseApproved")
            .await
            .expect("duplicate");

        let sent = metrics
            .events_total
            .with_label_values(&["LeaseApproved", "sent"]);
        let duplicate = metrics
            .events_total
            .with_label_values(&["LeaseApproved", "duplicate"]);
        assert_eq!(sent.get() as u64, 2);
        assert_eq!(duplicate.get() as u64, 1);
    }

    #[rstest]
    #[case::permanent(FailureClass::Permanent)]
    #[case::retriable(FailureClass::Retriable)]
    #[case::critical(FailureClass::Critical)]
    #[tokio::test]
    async fn failures_are_labelled_by_class(#[case] class: FailureClass) {
        let (_registry, metrics) = make_metrics();
        metrics
            .record_failed("LeaseDenied", class)
            .await
            .expect("failed");
        let counter = metrics
            .failures_total
            .with_label_values(&["LeaseDenied", class.as_str()]);
        assert_eq!(counter.get() as u64, 1);
    }

    #[tokio::test]
    async fn latency_lands_in_the_histogram() {
        let (_registry, metrics) = make_metrics();
        metrics
            .record_latency("LeaseApproved", Duration::from_millis(1_500))
            .await
            .expect("latency");
        let histogram = metrics.send_latency.with_label_values(&["LeaseApproved"]);
        assert_eq!(histogram.get_sample_count(), 1);
        assert!((histogram.get_sample_sum() - 1.5).abs() < f64::EPSILON);
    }
}
