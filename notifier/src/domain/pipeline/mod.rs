//! Orchestrator for the notification pipeline.
//!
//! Stages run in a fixed order: idempotency, schema, freshness, ownership,
//! preferences, template selection, enrichment, personalisation, collapse,
//! and send. Stages return typed errors; this module alone decides whether
//! an event is committed, retried, deferred, or dead-lettered.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use tokio::time::{Instant, timeout};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::delivery::{
    CircuitBreakerState, DeliverySender, PreparedMessage, TemplateValidationError,
};
use crate::domain::enrichment::{ConflictPolicy, EnrichmentError, EnrichmentResolver, ReviewOverride};
use crate::domain::error::{FailureClass, PipelineFailure, PipelineStage};
use crate::domain::event::{EventId, EventKind, InboundEvent, RecipientEmail, ValidatedEvent};
use crate::domain::idempotency::{
    Admission, CollapseKey, CollapseWindow, IdempotencyGuard, IdempotencyRecord, TerminalOutcome,
    verify_replay,
};
use crate::domain::ownership::{OwnershipVerifier, SecurityError};
use crate::domain::ports::{
    AlertSeverity, DeadLetterEntry, DeadLetterQueue, DeadLetterQueueError, DeadLetterReason,
    IdempotencyStoreError, NotificationMetrics, OperationalAlert, OperationalAlerts,
    PendingDelivery, PreferenceRepository, RetryQueue, RetryQueueError,
};
use crate::domain::preferences::EffectivePreference;
use crate::domain::redaction::recipient_digest;
use crate::domain::schema::{
    SchemaError, SchemaValidator, ViolationRule, metric_type_label, validate_event,
};
use crate::domain::templates::PersonalisationBuilder;

mod report;
mod retry;
mod runtime;

pub use report::{PipelineReport, PipelineState};
pub use retry::{BackoffJitter, RandomJitter, RetryPolicy};
pub use runtime::{NotificationPipelinePorts, PipelineConfig, PipelineRuntime};

/// Failure while re-driving a dead-lettered event.
#[derive(Debug, thiserror::Error)]
pub enum RedriveError {
    /// No dead-letter entry carries the identifier.
    #[error("dead-letter entry {id} not found")]
    NotFound {
        /// Requested entry.
        id: Uuid,
    },
    /// The dead-letter area failed.
    #[error(transparent)]
    DeadLetter(#[from] DeadLetterQueueError),
    /// The idempotency store failed while clearing a rejection.
    #[error(transparent)]
    Idempotency(#[from] IdempotencyStoreError),
}

/// What happens to the reservation and the event once a run stops early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// Commit a deliberate non-send.
    Suppress(&'static str),
    /// Commit a rejection and dead-letter the event.
    Reject,
    /// Release the reservation and dead-letter the event.
    Hold(DeadLetterReason),
    /// Release the reservation only.
    Defer,
}

/// Early stop raised by a pre-send stage.
#[derive(Debug)]
struct Stop {
    state: PipelineState,
    disposition: Disposition,
    failure: Option<PipelineFailure>,
    recipient_digest: Option<String>,
}

impl Stop {
    fn new(state: PipelineState, disposition: Disposition) -> Self {
        Self {
            state,
            disposition,
            failure: None,
            recipient_digest: None,
        }
    }

    fn failed(mut self, failure: PipelineFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    fn for_recipient(mut self, recipient: &RecipientEmail) -> Self {
        self.recipient_digest = Some(recipient_digest(recipient));
        self
    }
}

/// The event a run is about.
#[derive(Clone, Copy)]
struct Subject<'a> {
    inbound: &'a InboundEvent,
    event_id: &'a EventId,
    label: &'static str,
    kind: Option<EventKind>,
}

impl Subject<'_> {
    fn report(&self) -> PipelineReport {
        PipelineReport::new(self.event_id.as_ref(), self.kind)
    }
}

/// Output of the pre-send stages.
struct Prepared {
    kind: EventKind,
    event_time: DateTime<Utc>,
    collapse: CollapseKey,
    message: PreparedMessage,
}

/// Domain-owned notification pipeline.
pub struct NotificationPipeline {
    guard: IdempotencyGuard,
    schema: SchemaValidator,
    ownership: OwnershipVerifier,
    preferences: Arc<dyn PreferenceRepository>,
    enrichment: EnrichmentResolver,
    personalisation: PersonalisationBuilder,
    sender: DeliverySender,
    collapse: CollapseWindow,
    dead_letters: Arc<dyn DeadLetterQueue>,
    retries: Arc<dyn RetryQueue>,
    metrics: Arc<dyn NotificationMetrics>,
    alerts: Arc<dyn OperationalAlerts>,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn BackoffJitter>,
    config: PipelineConfig,
}

impl NotificationPipeline {
    /// Build a pipeline using default runtime dependencies.
    /// ```rust,ignore
    /// let pipeline = NotificationPipeline::new(ports, clock, config);
    /// ```
    pub fn new(
        ports: NotificationPipelinePorts,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Self {
        Self::with_runtime(ports, clock, PipelineRuntime::default(), config)
    }

    /// Build a pipeline with injected runtime abstractions.
    /// ```rust,ignore
    /// let pipeline = NotificationPipeline::with_runtime(ports, clock, runtime, config);
    /// ```
    pub fn with_runtime(
        ports: NotificationPipelinePorts,
        clock: Arc<dyn Clock>,
        runtime: PipelineRuntime,
        config: PipelineConfig,
    ) -> Self {
        Self {
            guard: IdempotencyGuard::new(ports.idempotency, config.idempotency.clone()),
            schema: SchemaValidator::new(Arc::clone(&ports.metrics)),
            ownership: OwnershipVerifier::new(
                Arc::clone(&ports.leases),
                Arc::clone(&ports.accounts),
                config.allowed_domains.clone(),
                config.store_read_timeout,
            ),
            preferences: ports.preferences,
            enrichment: EnrichmentResolver::new(
                ports.leases,
                ports.accounts,
                ports.lease_templates,
                config.enrichment_timeout,
            ),
            personalisation: PersonalisationBuilder::new(config.links.clone()),
            sender: DeliverySender::new(
                ports.provider,
                Arc::clone(&ports.metrics),
                config.circuit_breaker,
                config.provider_timeout,
            ),
            collapse: CollapseWindow::new(config.collapse_window),
            dead_letters: ports.dead_letters,
            retries: ports.retries,
            metrics: ports.metrics,
            alerts: ports.alerts,
            clock,
            jitter: runtime.jitter,
            config,
        }
    }

    /// Pipeline configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Current provider circuit state.
    pub fn circuit_state(&self) -> CircuitBreakerState {
        self.sender.circuit_state()
    }

    /// Check every registered template against the provider.
    pub async fn validate_templates(&self) -> Result<(), TemplateValidationError> {
        self.sender.validate_templates(&self.config.templates).await
    }

    /// Process one inbound event end to end.
    ///
    /// Never fails: every outcome, including infrastructure trouble, is
    /// described by the returned report.
    pub async fn process(&self, event: &InboundEvent) -> PipelineReport {
        self.run(event, None).await
    }

    /// Re-attempt every scheduled send that is due, entering at the send
    /// stage.
    ///
    /// A retry whose event gained a terminal outcome while it waited is
    /// settled without a send.
    pub async fn drain_due_retries(
        &self,
        limit: usize,
    ) -> Result<Vec<PipelineReport>, RetryQueueError> {
        let now = self.clock.utc();
        let due = self.retries.take_due(now, limit).await?;
        let mut reports = Vec::with_capacity(due.len());
        for pending in due {
            if let Err(report) = self.resume_retry(&pending, now).await {
                reports.push(report);
                continue;
            }
            let attempts = pending.attempts.saturating_add(1);
            let retry = PendingDelivery { attempts, ..pending };
            reports.push(self.attempt_send(retry, self.config.provider_timeout).await);
        }
        Ok(reports)
    }

    /// Dead-letter every queued retry, due or not.
    ///
    /// Used by one-shot runs that exit before later retries fall due, so no
    /// scheduled send is dropped silently. Each entry can be re-driven.
    pub async fn dead_letter_pending(&self) -> Result<Vec<PipelineReport>, RetryQueueError> {
        let pending = self
            .retries
            .take_due(DateTime::<Utc>::MAX_UTC, usize::MAX)
            .await?;
        let mut reports = Vec::with_capacity(pending.len());
        for pending in pending {
            if let Ok(Some(record)) = self.guard.get(pending.message.reference()).await {
                reports.push(self.settle_retry(&pending, Some(record)).await);
                continue;
            }
            let failure = PipelineFailure::new(
                PipelineStage::Send,
                FailureClass::Retriable,
                "retry_abandoned",
                format!(
                    "run ended before retry due at {}",
                    pending.next_attempt_at.to_rfc3339()
                ),
            );
            self.alert(
                AlertSeverity::Operational,
                &failure,
                pending.message.reference().as_ref(),
            )
            .await;
            let stop = Stop::new(
                PipelineState::DeadLettered,
                Disposition::Hold(DeadLetterReason::RetriesExhausted),
            )
            .failed(failure);
            reports.push(self.conclude_send(&pending, stop).await);
        }
        Ok(reports)
    }

    /// Replay a dead-lettered event from the start.
    ///
    /// A committed rejection for the event is cleared first. `review` is the
    /// only way past an enrichment status conflict and is logged as an audit
    /// record.
    pub async fn redrive(
        &self,
        id: Uuid,
        review: Option<ReviewOverride>,
    ) -> Result<PipelineReport, RedriveError> {
        let entry = self
            .dead_letters
            .take(id)
            .await?
            .ok_or(RedriveError::NotFound { id })?;

        match &review {
            Some(review) => warn!(
                audit = true,
                dead_letter_id = %id,
                event_id = %entry.event.id,
                operator = %review.operator,
                justification = %review.justification,
                "dead-letter re-drive with operator review"
            ),
            None => info!(dead_letter_id = %id, event_id = %entry.event.id, "dead-letter re-drive"),
        }

        if let Ok(event_id) = EventId::new(entry.event.id.as_str()) {
            if let Err(error) = self.clear_rejection(&event_id).await {
                self.restore(entry).await;
                return Err(error.into());
            }
        }

        Ok(self.run(&entry.event, review.as_ref()).await)
    }

    async fn clear_rejection(&self, event_id: &EventId) -> Result<(), IdempotencyStoreError> {
        let committed = self.guard.get(event_id).await?;
        if committed.is_some_and(|record| matches!(record.outcome, TerminalOutcome::Rejected { .. }))
        {
            self.guard.forget(event_id).await?;
        }
        Ok(())
    }

    async fn restore(&self, entry: DeadLetterEntry) {
        let id = entry.id;
        if let Err(push_error) = self.dead_letters.push(entry).await {
            error!(dead_letter_id = %id, error = %push_error, "failed to restore dead-letter entry");
        }
    }

    async fn run(&self, inbound: &InboundEvent, review: Option<&ReviewOverride>) -> PipelineReport {
        let started = Instant::now();
        let label = metric_type_label(&inbound.event_type);
        let kind = inbound.event_type.parse::<EventKind>().ok();

        let Ok(event_id) = EventId::new(inbound.id.as_str()) else {
            return self.reject_unidentified(inbound, label, kind).await;
        };
        let subject = Subject {
            inbound,
            event_id: &event_id,
            label,
            kind,
        };

        let now = self.clock.utc();
        match self
            .guard
            .check_and_reserve(&event_id, now, self.config.reservation_hold())
            .await
        {
            Ok(Admission::Proceed) => {}
            Ok(Admission::InFlight) => {
                info!(event_id = %event_id, event_type = label, "event already in flight");
                return subject.report().with_state(PipelineState::Deferred);
            }
            Ok(Admission::Duplicate(record)) => return self.replay(subject, record).await,
            Err(store_error) => {
                let failure = PipelineFailure::from_error(PipelineStage::Idempotency, &store_error);
                warn!(event_id = %event_id, error = %store_error, "idempotency store unavailable");
                let _ = self.metrics.record_failed(label, failure.class).await;
                return subject
                    .report()
                    .with_state(PipelineState::Deferred)
                    .with_failure(failure);
            }
        }

        let prepared = match timeout(self.config.event_deadline, self.prepare(subject, now, review))
            .await
        {
            Ok(Ok(prepared)) => prepared,
            Ok(Err(stop)) => return self.conclude(subject, stop, 0).await,
            Err(_) => {
                let failure = PipelineFailure::new(
                    PipelineStage::Deadline,
                    FailureClass::Retriable,
                    "deadline_exceeded",
                    format!(
                        "pre-send stages exceeded {}ms",
                        self.config.event_deadline.as_millis()
                    ),
                );
                let stop = Stop::new(PipelineState::Deferred, Disposition::Defer).failed(failure);
                return self.conclude(subject, stop, 0).await;
            }
        };

        if !self.collapse.try_claim(&prepared.collapse, now) {
            info!(event_id = %event_id, event_type = label, "equivalent notification sent moments ago");
            let stop = Stop::new(PipelineState::Collapsed, Disposition::Suppress("collapsed"))
                .for_recipient(prepared.message.recipient().email());
            return self.conclude(subject, stop, 0).await;
        }

        let budget = self
            .config
            .event_deadline
            .saturating_sub(started.elapsed());
        let collapse = prepared.collapse;
        let pending = PendingDelivery {
            event: inbound.clone(),
            kind: prepared.kind,
            event_time: prepared.event_time,
            message: prepared.message,
            attempts: 1,
            next_attempt_at: now,
        };
        let report = self.attempt_send(pending, budget).await;
        if !matches!(report.state, PipelineState::Sent | PipelineState::Retrying) {
            self.collapse.release(&collapse);
        }
        report
    }

    async fn prepare(
        &self,
        subject: Subject<'_>,
        now: DateTime<Utc>,
        review: Option<&ReviewOverride>,
    ) -> Result<Prepared, Stop> {
        let event = self.schema.validate(subject.inbound).await.map_err(|error| {
            Stop::new(PipelineState::ValidationFailed, Disposition::Reject)
                .failed(PipelineFailure::from_error(PipelineStage::Schema, &error))
        })?;

        if let Err(error) = self.guard.check_freshness(event.time(), now) {
            warn!(event_id = %event.id(), error = %error, "event outside freshness window");
            return Err(Stop::new(PipelineState::ValidationFailed, Disposition::Reject)
                .failed(PipelineFailure::from_error(PipelineStage::Schema, &error))
                .for_recipient(event.recipient()));
        }

        let ownership = match self.ownership.verify(&event).await {
            Ok(ownership) => ownership,
            Err(error) => return Err(self.ownership_stop(&event, &error).await),
        };

        let preference = self.preference_for(&event).await;
        if !preference.enabled {
            info!(event_id = %event.id(), event_type = subject.label, "recipient opted out");
            let _ = self.metrics.record_preference_skipped(subject.label).await;
            return Err(Stop::new(
                PipelineState::PreferenceSkipped,
                Disposition::Suppress("preference_disabled"),
            )
            .for_recipient(event.recipient()));
        }

        let template = self.config.templates.select(event.kind()).map_err(|error| {
            Stop::new(PipelineState::PersonalisationFailed, Disposition::Reject)
                .failed(PipelineFailure::from_error(
                    PipelineStage::Personalisation,
                    &error,
                ))
                .for_recipient(event.recipient())
        })?;

        let enriched = match self
            .enrichment
            .enrich(&event, template, &ownership.lease, now, review)
            .await
        {
            Ok(enriched) => enriched,
            Err(error) => return Err(self.enrichment_stop(&event, &error).await),
        };

        let personalisation = self
            .personalisation
            .build(&enriched, template, &preference)
            .map_err(|error| {
                Stop::new(PipelineState::PersonalisationFailed, Disposition::Reject)
                    .failed(PipelineFailure::from_error(
                        PipelineStage::Personalisation,
                        &error,
                    ))
                    .for_recipient(event.recipient())
            })?;

        Ok(Prepared {
            kind: event.kind(),
            event_time: event.time(),
            collapse: CollapseKey::for_event(&event),
            message: PreparedMessage::new(
                template.template_id().clone(),
                ownership.recipient,
                event.recipient().clone(),
                personalisation,
                event.id().clone(),
            ),
        })
    }

    async fn ownership_stop(&self, event: &ValidatedEvent, error: &SecurityError) -> Stop {
        let failure = PipelineFailure::from_error(PipelineStage::Ownership, error);
        if failure.class == FailureClass::Retriable {
            return Stop::new(PipelineState::Deferred, Disposition::Defer).failed(failure);
        }
        let label = event.kind().as_str();
        if matches!(
            error,
            SecurityError::OwnershipMismatch
                | SecurityError::AccountMismatch
                | SecurityError::StoreDisagreement
        ) {
            let _ = self.metrics.record_ownership_mismatch(label).await;
        }
        if failure.security_anomaly {
            self.alert(AlertSeverity::Security, &failure, event.id().as_ref())
                .await;
        }
        Stop::new(PipelineState::OwnershipFailed, Disposition::Reject)
            .failed(failure)
            .for_recipient(event.recipient())
    }

    async fn enrichment_stop(&self, event: &ValidatedEvent, error: &EnrichmentError) -> Stop {
        let failure = PipelineFailure::from_error(PipelineStage::Enrichment, error);
        if !matches!(error, EnrichmentError::StatusConflict) {
            return Stop::new(PipelineState::EnrichmentFailed, Disposition::Reject)
                .failed(failure)
                .for_recipient(event.recipient());
        }
        let _ = self
            .metrics
            .record_enrichment_conflict(event.kind().as_str())
            .await;
        self.alert(AlertSeverity::Security, &failure, event.id().as_ref())
            .await;
        let stop = match self.config.conflict_policy {
            ConflictPolicy::ManualReview => Stop::new(
                PipelineState::ManualReview,
                Disposition::Hold(DeadLetterReason::ManualReview),
            ),
            ConflictPolicy::Reject => {
                Stop::new(PipelineState::EnrichmentFailed, Disposition::Reject)
            }
        };
        stop.failed(failure).for_recipient(event.recipient())
    }

    async fn preference_for(&self, event: &ValidatedEvent) -> EffectivePreference {
        let lookup = self.preferences.latest(event.recipient());
        let stored = match timeout(self.config.store_read_timeout, lookup).await {
            Ok(Ok(stored)) => stored,
            Ok(Err(lookup_error)) => {
                warn!(event_id = %event.id(), error = %lookup_error, "preference lookup failed; using defaults");
                None
            }
            Err(_) => {
                warn!(event_id = %event.id(), "preference lookup timed out; using defaults");
                None
            }
        };
        EffectivePreference::resolve(stored.as_ref(), self.config.default_timezone)
    }

    async fn replay(&self, subject: Subject<'_>, record: IdempotencyRecord) -> PipelineReport {
        let replayed = validate_event(subject.inbound).ok();
        match verify_replay(&record, replayed.as_ref()) {
            Ok(()) => {
                info!(
                    event_id = %subject.event_id,
                    event_type = subject.label,
                    stage = PipelineStage::Idempotency.as_str(),
                    outcome = PipelineState::Deduplicated.as_str(),
                    "duplicate event; reusing committed outcome"
                );
                let _ = self.metrics.record_duplicate(subject.label).await;
                let mut report = subject.report().with_state(PipelineState::Deduplicated);
                if let TerminalOutcome::Delivered { message_id } = &record.outcome {
                    report.message_id.clone_from(message_id);
                }
                report.cached_outcome = Some(record.outcome);
                report
            }
            Err(tamper) => {
                let failure = PipelineFailure::from_error(PipelineStage::Idempotency, &tamper);
                error!(
                    security = true,
                    event_id = %subject.event_id,
                    event_type = subject.label,
                    code = failure.code.as_str(),
                    "duplicate does not match committed record; refusing to reuse outcome"
                );
                let _ = self.metrics.record_failed(subject.label, failure.class).await;
                self.alert(AlertSeverity::Security, &failure, subject.event_id.as_ref())
                    .await;
                let dead_letter_id = self
                    .dead_letter(
                        subject,
                        &failure,
                        DeadLetterReason::Critical,
                        0,
                    )
                    .await;
                let mut report = subject
                    .report()
                    .with_state(PipelineState::DuplicateTampered)
                    .with_failure(failure);
                report.dead_letter_id = dead_letter_id;
                report
            }
        }
    }

    async fn reject_unidentified(
        &self,
        inbound: &InboundEvent,
        label: &'static str,
        kind: Option<EventKind>,
    ) -> PipelineReport {
        let error = self
            .schema
            .validate(inbound)
            .await
            .err()
            .unwrap_or_else(|| SchemaError::envelope("id", ViolationRule::InvalidFormat));
        let failure = PipelineFailure::from_error(PipelineStage::Schema, &error);
        warn!(event_type = label, "event identifier rejected; nothing reserved");
        let _ = self.metrics.record_failed(label, failure.class).await;

        let now = self.clock.utc();
        let entry = DeadLetterEntry {
            id: Uuid::new_v4(),
            event: inbound.clone(),
            failure: failure.clone(),
            reason: DeadLetterReason::Permanent,
            attempts: 0,
            dead_lettered_at: now,
        };
        let dead_letter_id = self.push_dead_letter(entry, label).await;
        let mut report = PipelineReport::new(inbound.id.as_str(), kind)
            .with_state(PipelineState::ValidationFailed)
            .with_failure(failure);
        report.dead_letter_id = dead_letter_id;
        report
    }

    async fn attempt_send(&self, pending: PendingDelivery, budget: Duration) -> PipelineReport {
        let now = self.clock.utc();
        let label = pending.kind.as_str();
        match self.sender.send(&pending.message, now, budget).await {
            Ok(receipt) => {
                let record = IdempotencyRecord {
                    event_id: pending.message.reference().to_string(),
                    event_type: label.to_owned(),
                    recipient_digest: Some(recipient_digest(pending.message.recipient().email())),
                    outcome: TerminalOutcome::Delivered {
                        message_id: receipt.message_id.clone(),
                    },
                    recorded_at: now,
                };
                self.commit(pending.message.reference(), record).await;
                let _ = self.metrics.record_sent(label).await;
                let latency = (now - pending.event_time).to_std().unwrap_or_default();
                let _ = self.metrics.record_latency(label, latency).await;
                info!(
                    event_id = %pending.message.reference(),
                    event_type = label,
                    stage = PipelineStage::Send.as_str(),
                    outcome = PipelineState::Sent.as_str(),
                    attempts = pending.attempts,
                    "notification delivered"
                );
                let mut report = PipelineReport::new(pending.message.reference().as_ref(), Some(pending.kind))
                    .with_state(PipelineState::Sent);
                report.message_id = receipt.message_id;
                report.attempts = pending.attempts;
                report
            }
            Err(send_error) => {
                let failure = PipelineFailure::from_error(PipelineStage::Send, &send_error);
                match failure.class {
                    FailureClass::Retriable if self.config.retry.allows_another(pending.attempts) => {
                        self.schedule_retry(pending, failure, now).await
                    }
                    FailureClass::Retriable => {
                        self.alert(AlertSeverity::Operational, &failure, pending.message.reference().as_ref())
                            .await;
                        let stop = Stop::new(
                            PipelineState::DeadLettered,
                            Disposition::Hold(DeadLetterReason::RetriesExhausted),
                        )
                        .failed(failure);
                        self.conclude_send(&pending, stop).await
                    }
                    FailureClass::Critical => {
                        let severity = if failure.security_anomaly {
                            AlertSeverity::Security
                        } else {
                            AlertSeverity::Critical
                        };
                        self.alert(severity, &failure, pending.message.reference().as_ref())
                            .await;
                        let stop = Stop::new(
                            PipelineState::DeadLettered,
                            Disposition::Hold(DeadLetterReason::Critical),
                        )
                        .failed(failure);
                        self.conclude_send(&pending, stop).await
                    }
                    FailureClass::Permanent => {
                        let stop = Stop::new(PipelineState::DeadLettered, Disposition::Reject)
                            .failed(failure);
                        self.conclude_send(&pending, stop).await
                    }
                }
            }
        }
    }

    /// Confirm a due retry still owns its event and extend the hold.
    async fn resume_retry(
        &self,
        pending: &PendingDelivery,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineReport> {
        let event_id = pending.message.reference();
        let hold_until = offset(now, self.config.reservation_hold());
        let resumed = match self.guard.get(event_id).await {
            Ok(Some(record)) => return Err(self.settle_retry(pending, Some(record)).await),
            Ok(None) => self.guard.renew(event_id, hold_until).await,
            Err(store_error) => Err(store_error),
        };
        match resumed {
            Ok(()) => Ok(()),
            Err(IdempotencyStoreError::Conflict { .. }) => {
                let record = self.guard.get(event_id).await.ok().flatten();
                Err(self.settle_retry(pending, record).await)
            }
            Err(store_error) => Err(self.postpone_retry(pending, &store_error, now).await),
        }
    }

    async fn settle_retry(
        &self,
        pending: &PendingDelivery,
        record: Option<IdempotencyRecord>,
    ) -> PipelineReport {
        let label = pending.kind.as_str();
        info!(
            event_id = %pending.message.reference(),
            event_type = label,
            stage = PipelineStage::Idempotency.as_str(),
            outcome = PipelineState::Deduplicated.as_str(),
            attempts = pending.attempts,
            "event settled while its retry waited; skipping send"
        );
        let _ = self.metrics.record_duplicate(label).await;
        let mut report = PipelineReport::new(pending.message.reference().as_ref(), Some(pending.kind))
            .with_state(PipelineState::Deduplicated);
        report.attempts = pending.attempts;
        if let Some(record) = record {
            if let TerminalOutcome::Delivered { message_id } = &record.outcome {
                report.message_id.clone_from(message_id);
            }
            report.cached_outcome = Some(record.outcome);
        }
        report
    }

    /// Put a due retry back when the idempotency store cannot vouch for it.
    async fn postpone_retry(
        &self,
        pending: &PendingDelivery,
        store_error: &IdempotencyStoreError,
        now: DateTime<Utc>,
    ) -> PipelineReport {
        let failure = PipelineFailure::from_error(PipelineStage::Idempotency, store_error);
        let label = pending.kind.as_str();
        let _ = self.metrics.record_failed(label, failure.class).await;
        let next_attempt_at = offset(now, self.config.retry.base_delay(pending.attempts));
        let postponed = PendingDelivery {
            next_attempt_at,
            ..pending.clone()
        };
        match self.retries.schedule(postponed).await {
            Ok(()) => {
                warn!(
                    event_id = %pending.message.reference(),
                    error = %store_error,
                    retry_at = %next_attempt_at,
                    "idempotency store unavailable; retry postponed"
                );
                let mut report =
                    PipelineReport::new(pending.message.reference().as_ref(), Some(pending.kind))
                        .with_state(PipelineState::Retrying)
                        .with_failure(failure);
                report.attempts = pending.attempts;
                report.retry_at = Some(next_attempt_at);
                report
            }
            Err(queue_error) => {
                error!(
                    event_id = %pending.message.reference(),
                    error = %queue_error,
                    "retry queue unavailable; dead-lettering postponed retry"
                );
                let stop = Stop::new(
                    PipelineState::DeadLettered,
                    Disposition::Hold(DeadLetterReason::RetriesExhausted),
                )
                .failed(failure);
                self.conclude_send(pending, stop).await
            }
        }
    }

    async fn conclude_send(&self, pending: &PendingDelivery, stop: Stop) -> PipelineReport {
        let subject = Subject {
            inbound: &pending.event,
            event_id: pending.message.reference(),
            label: pending.kind.as_str(),
            kind: Some(pending.kind),
        };
        let stop = stop.for_recipient(pending.message.recipient().email());
        self.conclude(subject, stop, pending.attempts).await
    }

    async fn schedule_retry(
        &self,
        pending: PendingDelivery,
        failure: PipelineFailure,
        now: DateTime<Utc>,
    ) -> PipelineReport {
        let label = pending.kind.as_str();
        let event_id = pending.message.reference().clone();
        let base = self
            .config
            .retry
            .base_delay(pending.attempts)
            .max(failure.retry_after.unwrap_or_default());
        let delay = self.jitter.jittered_delay(base, pending.attempts, now);
        let next_attempt_at = offset(now, delay);
        let attempts = pending.attempts;
        let _ = self.metrics.record_failed(label, failure.class).await;

        let mut report = PipelineReport::new(event_id.as_ref(), Some(pending.kind))
            .with_failure(failure);
        report.attempts = attempts;

        let retry = PendingDelivery {
            next_attempt_at,
            ..pending
        };
        match self.retries.schedule(retry).await {
            Ok(()) => {
                let hold_until = offset(next_attempt_at, self.config.retry_hold());
                if let Err(renew_error) = self.guard.renew(&event_id, hold_until).await {
                    warn!(event_id = %event_id, error = %renew_error, "failed to extend reservation for retry");
                }
                info!(
                    event_id = %event_id,
                    event_type = label,
                    stage = PipelineStage::Send.as_str(),
                    outcome = PipelineState::Retrying.as_str(),
                    attempts,
                    retry_at = %next_attempt_at,
                    "send failed; retry scheduled"
                );
                report.retry_at = Some(next_attempt_at);
                report.with_state(PipelineState::Retrying)
            }
            Err(queue_error) => {
                error!(event_id = %event_id, error = %queue_error, "retry queue unavailable; releasing event");
                let alert = OperationalAlert {
                    severity: AlertSeverity::Operational,
                    code: "retry_queue_unavailable".to_owned(),
                    event_id: Some(event_id.to_string()),
                    summary: queue_error.to_string(),
                };
                self.raise(&alert).await;
                self.release(&event_id).await;
                report.with_state(PipelineState::Deferred)
            }
        }
    }

    async fn conclude(&self, subject: Subject<'_>, stop: Stop, attempts: u32) -> PipelineReport {
        let Stop {
            state,
            disposition,
            failure,
            recipient_digest: digest,
        } = stop;
        let mut report = subject.report().with_state(state);
        report.attempts = attempts;

        match &failure {
            Some(failure) => {
                warn!(
                    event_id = %subject.event_id,
                    event_type = subject.label,
                    stage = failure.stage.as_str(),
                    outcome = state.as_str(),
                    class = %failure.class,
                    code = failure.code.as_str(),
                    "pipeline stopped"
                );
                let _ = self.metrics.record_failed(subject.label, failure.class).await;
            }
            None => info!(
                event_id = %subject.event_id,
                event_type = subject.label,
                outcome = state.as_str(),
                "pipeline stopped without sending"
            ),
        }

        let now = self.clock.utc();
        let record = |outcome| IdempotencyRecord {
            event_id: subject.event_id.to_string(),
            event_type: subject.inbound.event_type.clone(),
            recipient_digest: digest.clone(),
            outcome,
            recorded_at: now,
        };

        match disposition {
            Disposition::Suppress(reason) => {
                let outcome = TerminalOutcome::Suppressed {
                    reason: reason.to_owned(),
                };
                self.commit(subject.event_id, record(outcome)).await;
            }
            Disposition::Reject => {
                let rejected = failure.clone().unwrap_or_else(|| {
                    PipelineFailure::new(
                        PipelineStage::Idempotency,
                        FailureClass::Permanent,
                        "rejected",
                        "rejected without a classified failure",
                    )
                });
                let outcome = TerminalOutcome::Rejected {
                    class: rejected.class,
                    code: rejected.code.clone(),
                };
                self.commit(subject.event_id, record(outcome)).await;
                report.dead_letter_id = self
                    .dead_letter(
                        subject,
                        &rejected,
                        DeadLetterReason::Permanent,
                        attempts,
                    )
                    .await;
            }
            Disposition::Hold(reason) => {
                self.release(subject.event_id).await;
                if let Some(held) = &failure {
                    report.dead_letter_id = self.dead_letter(subject, held, reason, attempts).await;
                }
            }
            Disposition::Defer => self.release(subject.event_id).await,
        }

        if let Some(failure) = failure {
            report = report.with_failure(failure);
        }
        report
    }

    async fn dead_letter(
        &self,
        subject: Subject<'_>,
        failure: &PipelineFailure,
        reason: DeadLetterReason,
        attempts: u32,
    ) -> Option<Uuid> {
        let entry = DeadLetterEntry {
            id: Uuid::new_v4(),
            event: subject.inbound.clone(),
            failure: failure.clone(),
            reason,
            attempts,
            dead_lettered_at: self.clock.utc(),
        };
        self.push_dead_letter(entry, subject.label).await
    }

    async fn push_dead_letter(&self, entry: DeadLetterEntry, label: &'static str) -> Option<Uuid> {
        let id = entry.id;
        let event_id = entry.event.id.clone();
        match self.dead_letters.push(entry).await {
            Ok(()) => {
                let _ = self.metrics.record_dead_lettered(label).await;
                info!(event_id = %event_id, dead_letter_id = %id, "event dead-lettered");
                Some(id)
            }
            Err(push_error) => {
                error!(event_id = %event_id, error = %push_error, "dead-letter queue unavailable");
                let alert = OperationalAlert {
                    severity: AlertSeverity::Operational,
                    code: "dead_letter_unavailable".to_owned(),
                    event_id: Some(event_id),
                    summary: push_error.to_string(),
                };
                self.raise(&alert).await;
                None
            }
        }
    }

    async fn commit(&self, event_id: &EventId, record: IdempotencyRecord) {
        if let Err(commit_error) = self.guard.commit(event_id, record).await {
            error!(event_id = %event_id, error = %commit_error, "failed to commit terminal outcome");
            let alert = OperationalAlert {
                severity: AlertSeverity::Operational,
                code: "idempotency_commit_failed".to_owned(),
                event_id: Some(event_id.to_string()),
                summary: commit_error.to_string(),
            };
            self.raise(&alert).await;
        }
    }

    async fn release(&self, event_id: &EventId) {
        if let Err(release_error) = self.guard.release(event_id).await {
            warn!(event_id = %event_id, error = %release_error, "failed to release reservation");
        }
    }

    async fn alert(&self, severity: AlertSeverity, failure: &PipelineFailure, event_id: &str) {
        let alert = OperationalAlert {
            severity,
            code: failure.code.clone(),
            event_id: Some(event_id.to_owned()),
            summary: failure.to_string(),
        };
        self.raise(&alert).await;
    }

    async fn raise(&self, alert: &OperationalAlert) {
        if let Err(sink_error) = self.alerts.raise(alert).await {
            error!(code = alert.code.as_str(), error = %sink_error, "failed to raise operational alert");
        }
    }
}

fn offset(instant: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| instant.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests;
