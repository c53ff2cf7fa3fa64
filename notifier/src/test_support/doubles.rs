//! Shared test doubles for pipeline tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, Utc};
use mockable::Clock;

use crate::domain::error::FailureClass;
use crate::domain::pipeline::BackoffJitter;
use crate::domain::ports::{
    DeliveryProviderError, EmailDeliveryProvider, EmailReceipt, EmailRequest, NotificationMetrics,
    NotificationMetricsError, OperationalAlert, OperationalAlerts, OperationalAlertsError,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clock that only moves when told to.
pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    /// Clock frozen at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    /// Move forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let delta = match TimeDelta::from_std(delta) {
            Ok(delta) => delta,
            Err(error) => {
                panic!("failed to convert Duration to TimeDelta: {error}; delta={delta:?}",)
            }
        };
        *lock(&self.0) += delta;
    }

    /// Move forward by whole seconds.
    pub fn advance_seconds(&self, seconds: i64) {
        *lock(&self.0) += TimeDelta::seconds(seconds);
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *lock(&self.0)
    }
}

/// Jitter that returns the base delay unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl BackoffJitter for NoJitter {
    fn jittered_delay(&self, base: Duration, _attempt: u32, _now: DateTime<Utc>) -> Duration {
        base
    }
}

/// Alert sink that keeps every alarm.
#[derive(Default)]
pub struct RecordingAlerts(Mutex<Vec<OperationalAlert>>);

impl RecordingAlerts {
    /// Alarms raised so far.
    pub fn raised(&self) -> Vec<OperationalAlert> {
        lock(&self.0).clone()
    }
}

#[async_trait]
impl OperationalAlerts for RecordingAlerts {
    async fn raise(&self, alert: &OperationalAlert) -> Result<(), OperationalAlertsError> {
        lock(&self.0).push(alert.clone());
        Ok(())
    }
}

/// Metrics sink counting `(metric, label)` pairs.
#[derive(Default)]
pub struct RecordingMetrics(Mutex<BTreeMap<(String, String), u64>>);

impl RecordingMetrics {
    /// Total for `metric` across every label.
    pub fn count(&self, metric: &str) -> u64 {
        lock(&self.0)
            .iter()
            .filter(|((name, _), _)| name == metric)
            .map(|(_, count)| *count)
            .sum()
    }

    /// Count for `metric` with `label`.
    pub fn count_labelled(&self, metric: &str, label: &str) -> u64 {
        lock(&self.0)
            .get(&(metric.to_owned(), label.to_owned()))
            .copied()
            .unwrap_or(0)
    }

    fn bump(&self, metric: &str, label: &str) -> Result<(), NotificationMetricsError> {
        *lock(&self.0)
            .entry((metric.to_owned(), label.to_owned()))
            .or_insert(0) += 1;
        Ok(())
    }
}

#[async_trait]
impl NotificationMetrics for RecordingMetrics {
    async fn record_sent(&self, event_type: &str) -> Result<(), NotificationMetricsError> {
        self.bump("sent", event_type)
    }

    async fn record_failed(
        &self,
        event_type: &str,
        class: FailureClass,
    ) -> Result<(), NotificationMetricsError> {
        self.bump("failed", &format!("{event_type}:{class}"))
    }

    async fn record_duplicate(&self, event_type: &str) -> Result<(), NotificationMetricsError> {
        self.bump("duplicate", event_type)
    }

    async fn record_ownership_mismatch(
        &self,
        event_type: &str,
    ) -> Result<(), NotificationMetricsError> {
        self.bump("ownership_mismatch", event_type)
    }

    async fn record_enrichment_conflict(
        &self,
        event_type: &str,
    ) -> Result<(), NotificationMetricsError> {
        self.bump("enrichment_conflict", event_type)
    }

    async fn record_template_validation_failure(
        &self,
        event_type: &str,
    ) -> Result<(), NotificationMetricsError> {
        self.bump("template_validation_failure", event_type)
    }

    async fn record_schema_failure(
        &self,
        event_type: &str,
        kind: &str,
    ) -> Result<(), NotificationMetricsError> {
        self.bump("schema_failure", &format!("{event_type}:{kind}"))
    }

    async fn record_preference_skipped(
        &self,
        event_type: &str,
    ) -> Result<(), NotificationMetricsError> {
        self.bump("preference_skipped", event_type)
    }

    async fn record_dead_lettered(
        &self,
        event_type: &str,
    ) -> Result<(), NotificationMetricsError> {
        self.bump("dead_lettered", event_type)
    }

    async fn record_latency(
        &self,
        event_type: &str,
        _latency: Duration,
    ) -> Result<(), NotificationMetricsError> {
        self.bump("latency", event_type)
    }
}

/// Provider that replays queued responses and records every request.
///
/// Once the script runs out every send succeeds with a numbered message id.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<EmailReceipt, DeliveryProviderError>>>,
    sent: Mutex<Vec<EmailRequest>>,
    templates: Mutex<BTreeMap<String, BTreeSet<String>>>,
}

impl ScriptedProvider {
    /// Queue one response.
    pub fn push_response(&self, response: Result<EmailReceipt, DeliveryProviderError>) {
        lock(&self.script).push_back(response);
    }

    /// Declare the placeholder names of a provider template.
    pub fn declare_template(&self, template_id: &str, fields: impl IntoIterator<Item = String>) {
        lock(&self.templates).insert(template_id.to_owned(), fields.into_iter().collect());
    }

    /// Every request the provider received.
    pub fn requests(&self) -> Vec<EmailRequest> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl EmailDeliveryProvider for ScriptedProvider {
    async fn send_email(
        &self,
        request: &EmailRequest,
    ) -> Result<EmailReceipt, DeliveryProviderError> {
        let count = {
            let mut sent = lock(&self.sent);
            sent.push(request.clone());
            sent.len()
        };
        lock(&self.script).pop_front().unwrap_or_else(|| {
            Ok(EmailReceipt {
                message_id: Some(format!("msg-{count}")),
            })
        })
    }

    async fn template_fields(
        &self,
        template_id: &str,
    ) -> Result<BTreeSet<String>, DeliveryProviderError> {
        lock(&self.templates)
            .get(template_id)
            .cloned()
            .ok_or_else(|| DeliveryProviderError::status(404_u16, None::<Duration>, "template not found"))
    }
}
