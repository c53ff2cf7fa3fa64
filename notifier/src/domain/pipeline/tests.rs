//! Unit tests for pipeline orchestration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rstest::rstest;
use serde_json::Value;
use uuid::Uuid;

use super::{
    NotificationPipeline, NotificationPipelinePorts, PipelineConfig, PipelineRuntime,
    PipelineState,
};
use crate::domain::enrichment::{ConflictPolicy, ReviewOverride};
use crate::domain::error::FailureClass;
use crate::domain::event::{AccountId, EventId, LeaseUuid, RecipientEmail};
use crate::domain::idempotency::{IdempotencyKey, IdempotencyRecord, TerminalOutcome};
use crate::domain::ownership::DomainAllowList;
use crate::domain::ports::{
    AccountRecord, AccountStore, AccountStoreError, AlertSeverity, DeadLetterEntry,
    DeadLetterQueue, DeadLetterQueueError, DeadLetterReason, DeliveryProviderError,
    IdempotencyStore, IdempotencyStoreError, LeaseRecord, LeaseStatus, LeaseStore,
    LeaseStoreError, LeaseTemplateRecord, LeaseTemplateStore, LeaseTemplateStoreError,
    PendingDelivery, PreferenceRepository, PreferenceRepositoryError, ReadConsistency,
    ReserveOutcome, RetryQueue, RetryQueueError,
};
use crate::domain::preferences::{NotificationFrequency, RecipientPreference};
use crate::test_support::directory::{account_record, lease_record, template_record};
use crate::test_support::doubles::{
    MutableClock, NoJitter, RecordingAlerts, RecordingMetrics, ScriptedProvider,
};
use crate::test_support::events::{ACCOUNT_ID, approved_event, budget_alert_event, denied_event};
use crate::test_support::templates::{links, registry};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 5)
        .single()
        .expect("valid instant")
}

/// Directory holding one lease row and one account row.
struct Directory {
    lease: Mutex<Option<LeaseRecord>>,
    account: Mutex<Option<AccountRecord>>,
    lease_reads: AtomicUsize,
    replica_down: AtomicBool,
}

impl Directory {
    fn owned_by(owner: &str, status: LeaseStatus) -> Self {
        Self {
            lease: Mutex::new(Some(lease_record(owner, Some(ACCOUNT_ID), status))),
            account: Mutex::new(Some(account_record(Some(owner)))),
            lease_reads: AtomicUsize::new(0),
            replica_down: AtomicBool::new(false),
        }
    }

    /// Fail every eventually consistent lease read.
    fn without_replica(self) -> Self {
        self.replica_down.store(true, Ordering::SeqCst);
        self
    }

    fn transfer_to(&self, owner: &str) {
        *self.lease.lock().expect("lease lock") =
            Some(lease_record(owner, Some(ACCOUNT_ID), LeaseStatus::Active));
        *self.account.lock().expect("account lock") = Some(account_record(Some(owner)));
    }

    fn lease_reads(&self) -> usize {
        self.lease_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LeaseStore for Directory {
    async fn find_lease(
        &self,
        _uuid: &LeaseUuid,
        consistency: ReadConsistency,
    ) -> Result<Option<LeaseRecord>, LeaseStoreError> {
        self.lease_reads.fetch_add(1, Ordering::SeqCst);
        if consistency == ReadConsistency::Eventual && self.replica_down.load(Ordering::SeqCst) {
            return Err(LeaseStoreError::unavailable("replica unreachable"));
        }
        Ok(self.lease.lock().expect("lease lock").clone())
    }
}

#[async_trait]
impl AccountStore for Directory {
    async fn find_account(
        &self,
        _account_id: &AccountId,
        _consistency: ReadConsistency,
    ) -> Result<Option<AccountRecord>, AccountStoreError> {
        Ok(self.account.lock().expect("account lock").clone())
    }
}

#[async_trait]
impl LeaseTemplateStore for Directory {
    async fn find_template(
        &self,
        _template_uuid: &str,
    ) -> Result<Option<LeaseTemplateRecord>, LeaseTemplateStoreError> {
        Ok(Some(template_record()))
    }
}

enum Slot {
    Held(DateTime<Utc>),
    Done(IdempotencyRecord),
}

/// Idempotency store keeping reservations and records in a map.
#[derive(Default)]
struct Ledger(Mutex<HashMap<String, Slot>>);

impl Ledger {
    fn key(event_id: &str) -> String {
        IdempotencyKey::for_event(&EventId::new(event_id).expect("event id"))
            .as_ref()
            .to_owned()
    }

    fn committed(&self, event_id: &str) -> Option<IdempotencyRecord> {
        match self.0.lock().expect("ledger lock").get(&Self::key(event_id)) {
            Some(Slot::Done(record)) => Some(record.clone()),
            _ => None,
        }
    }

    fn held_until(&self, event_id: &str) -> Option<DateTime<Utc>> {
        match self.0.lock().expect("ledger lock").get(&Self::key(event_id)) {
            Some(Slot::Held(until)) => Some(*until),
            _ => None,
        }
    }

    fn hold(&self, event_id: &str, until: DateTime<Utc>) {
        self.0
            .lock()
            .expect("ledger lock")
            .insert(Self::key(event_id), Slot::Held(until));
    }

    fn is_empty(&self) -> bool {
        self.0.lock().expect("ledger lock").is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for Ledger {
    async fn check_and_reserve(
        &self,
        key: &IdempotencyKey,
        now: DateTime<Utc>,
        hold_until: DateTime<Utc>,
    ) -> Result<ReserveOutcome, IdempotencyStoreError> {
        let mut slots = self.0.lock().expect("ledger lock");
        match slots.get(key.as_ref()) {
            Some(Slot::Done(record)) => return Ok(ReserveOutcome::Committed(record.clone())),
            Some(Slot::Held(until)) if *until > now => return Ok(ReserveOutcome::InFlight),
            _ => {}
        }
        slots.insert(key.as_ref().to_owned(), Slot::Held(hold_until));
        Ok(ReserveOutcome::Reserved)
    }

    async fn renew(
        &self,
        key: &IdempotencyKey,
        hold_until: DateTime<Utc>,
    ) -> Result<(), IdempotencyStoreError> {
        let mut slots = self.0.lock().expect("ledger lock");
        if let Some(Slot::Held(until)) = slots.get_mut(key.as_ref()) {
            *until = hold_until;
        }
        Ok(())
    }

    async fn commit(
        &self,
        key: &IdempotencyKey,
        record: IdempotencyRecord,
        _expires_at: DateTime<Utc>,
    ) -> Result<(), IdempotencyStoreError> {
        self.0
            .lock()
            .expect("ledger lock")
            .insert(key.as_ref().to_owned(), Slot::Done(record));
        Ok(())
    }

    async fn release(&self, key: &IdempotencyKey) -> Result<(), IdempotencyStoreError> {
        let mut slots = self.0.lock().expect("ledger lock");
        if matches!(slots.get(key.as_ref()), Some(Slot::Held(_))) {
            slots.remove(key.as_ref());
        }
        Ok(())
    }

    async fn get(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyStoreError> {
        match self.0.lock().expect("ledger lock").get(key.as_ref()) {
            Some(Slot::Done(record)) => Ok(Some(record.clone())),
            _ => Ok(None),
        }
    }

    async fn forget(&self, key: &IdempotencyKey) -> Result<(), IdempotencyStoreError> {
        self.0.lock().expect("ledger lock").remove(key.as_ref());
        Ok(())
    }

    async fn cleanup_expired(&self, _now: DateTime<Utc>) -> Result<usize, IdempotencyStoreError> {
        Ok(0)
    }
}

#[derive(Default)]
struct Parked(Mutex<Vec<PendingDelivery>>);

impl Parked {
    fn all(&self) -> Vec<PendingDelivery> {
        self.0.lock().expect("parked lock").clone()
    }
}

#[async_trait]
impl RetryQueue for Parked {
    async fn schedule(&self, pending: PendingDelivery) -> Result<(), RetryQueueError> {
        self.0.lock().expect("parked lock").push(pending);
        Ok(())
    }

    async fn take_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PendingDelivery>, RetryQueueError> {
        let mut parked = self.0.lock().expect("parked lock");
        let (due, later): (Vec<_>, Vec<_>) = parked
            .drain(..)
            .partition(|pending| pending.next_attempt_at <= now);
        let mut due = due.into_iter();
        let taken: Vec<_> = due.by_ref().take(limit).collect();
        *parked = due.chain(later).collect();
        Ok(taken)
    }

    async fn pending_count(&self) -> Result<usize, RetryQueueError> {
        Ok(self.0.lock().expect("parked lock").len())
    }
}

#[derive(Default)]
struct DeadLetters(Mutex<Vec<DeadLetterEntry>>);

impl DeadLetters {
    fn all(&self) -> Vec<DeadLetterEntry> {
        self.0.lock().expect("dead letter lock").clone()
    }
}

#[async_trait]
impl DeadLetterQueue for DeadLetters {
    async fn push(&self, entry: DeadLetterEntry) -> Result<(), DeadLetterQueueError> {
        self.0.lock().expect("dead letter lock").push(entry);
        Ok(())
    }

    async fn take(&self, id: Uuid) -> Result<Option<DeadLetterEntry>, DeadLetterQueueError> {
        let mut entries = self.0.lock().expect("dead letter lock");
        Ok(entries
            .iter()
            .position(|entry| entry.id == id)
            .map(|index| entries.remove(index)))
    }

    async fn list(&self) -> Result<Vec<DeadLetterEntry>, DeadLetterQueueError> {
        Ok(self.all())
    }
}

struct Preferences(Option<RecipientPreference>);

#[async_trait]
impl PreferenceRepository for Preferences {
    async fn latest(
        &self,
        _recipient: &RecipientEmail,
    ) -> Result<Option<RecipientPreference>, PreferenceRepositoryError> {
        Ok(self.0.clone())
    }

    async fn append(
        &self,
        _recipient: &RecipientEmail,
        _preference: RecipientPreference,
    ) -> Result<(), PreferenceRepositoryError> {
        Ok(())
    }

    async fn history(
        &self,
        _recipient: &RecipientEmail,
    ) -> Result<Vec<RecipientPreference>, PreferenceRepositoryError> {
        Ok(self.0.iter().cloned().collect())
    }
}

struct Harness {
    pipeline: NotificationPipeline,
    clock: Arc<MutableClock>,
    directory: Arc<Directory>,
    ledger: Arc<Ledger>,
    provider: Arc<ScriptedProvider>,
    retries: Arc<Parked>,
    dead_letters: Arc<DeadLetters>,
    metrics: Arc<RecordingMetrics>,
    alerts: Arc<RecordingAlerts>,
}

fn harness_with(
    directory: Directory,
    preference: Option<RecipientPreference>,
    tune: impl FnOnce(&mut PipelineConfig),
) -> Harness {
    let clock = Arc::new(MutableClock::new(start()));
    let directory = Arc::new(directory);
    let ledger = Arc::new(Ledger::default());
    let provider = Arc::new(ScriptedProvider::default());
    let retries = Arc::new(Parked::default());
    let dead_letters = Arc::new(DeadLetters::default());
    let metrics = Arc::new(RecordingMetrics::default());
    let alerts = Arc::new(RecordingAlerts::default());

    let mut config = PipelineConfig::new(registry(), links())
        .with_allowed_domains(DomainAllowList::new(["gov.uk"]));
    tune(&mut config);

    let ports = NotificationPipelinePorts::new(
        directory.clone(),
        directory.clone(),
        directory.clone(),
        Arc::new(Preferences(preference)),
        ledger.clone(),
        provider.clone(),
        dead_letters.clone(),
        retries.clone(),
        metrics.clone(),
        alerts.clone(),
    );
    let runtime = PipelineRuntime {
        jitter: Arc::new(NoJitter),
    };
    let pipeline = NotificationPipeline::with_runtime(ports, clock.clone(), runtime, config);
    Harness {
        pipeline,
        clock,
        directory,
        ledger,
        provider,
        retries,
        dead_letters,
        metrics,
        alerts,
    }
}

fn harness() -> Harness {
    harness_with(
        Directory::owned_by("a@gov.uk", LeaseStatus::Active),
        None,
        |_| {},
    )
}

fn failure_code(report: &super::PipelineReport) -> &str {
    report
        .failure
        .as_ref()
        .map_or("", |failure| failure.code.as_str())
}

#[tokio::test]
async fn verified_event_is_sent_and_committed() {
    let h = harness();

    let report = h.pipeline.process(&approved_event("evt-1", "a@gov.uk")).await;

    assert_eq!(report.state, PipelineState::Sent);
    assert_eq!(report.message_id.as_deref(), Some("msg-1"));
    assert_eq!(report.attempts, 1);
    let requests = h.provider.requests();
    assert_eq!(requests.len(), 1);
    let request = requests.first().expect("one request");
    assert_eq!(request.reference, "evt-1");
    assert_eq!(request.email_address, "a@gov.uk");
    assert_eq!(
        request.personalisation.get("expiryDate").map(String::as_str),
        Some("8 Mar 2026, 09:00")
    );
    assert!(
        request
            .personalisation
            .get("ssoUrl")
            .is_some_and(|url| url.contains("account_id=123456789012"))
    );
    assert_eq!(
        h.ledger.committed("evt-1").map(|record| record.outcome),
        Some(TerminalOutcome::Delivered {
            message_id: Some("msg-1".to_owned())
        })
    );
    assert_eq!(h.metrics.count_labelled("sent", "LeaseApproved"), 1);
    assert_eq!(h.metrics.count("latency"), 1);
}

#[tokio::test]
async fn replay_reuses_the_committed_outcome() {
    let h = harness();
    let event = approved_event("evt-1", "a@gov.uk");

    h.pipeline.process(&event).await;
    let replay = h.pipeline.process(&event).await;

    assert_eq!(replay.state, PipelineState::Deduplicated);
    assert_eq!(replay.message_id.as_deref(), Some("msg-1"));
    assert!(matches!(
        replay.cached_outcome,
        Some(TerminalOutcome::Delivered { .. })
    ));
    assert_eq!(h.provider.requests().len(), 1);
    assert_eq!(h.metrics.count("duplicate"), 1);
}

#[tokio::test]
async fn replay_naming_another_recipient_is_tampering() {
    let h = harness();
    h.pipeline.process(&approved_event("evt-1", "a@gov.uk")).await;

    let forged = h.pipeline.process(&approved_event("evt-1", "b@gov.uk")).await;

    assert_eq!(forged.state, PipelineState::DuplicateTampered);
    assert_eq!(failure_code(&forged), "replay_recipient_mismatch");
    assert!(forged.cached_outcome.is_none());
    assert_eq!(h.provider.requests().len(), 1);
    let alerts = h.alerts.raised();
    assert!(alerts.iter().any(|alert| alert.severity == AlertSeverity::Security));
    let dead = h.dead_letters.all();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead.first().map(|entry| entry.reason), Some(DeadLetterReason::Critical));
    assert_eq!(forged.dead_letter_id, dead.first().map(|entry| entry.id));
}

#[tokio::test]
async fn ownership_mismatch_never_reaches_the_provider() {
    let h = harness();

    let report = h.pipeline.process(&approved_event("evt-1", "b@gov.uk")).await;

    assert_eq!(report.state, PipelineState::OwnershipFailed);
    assert_eq!(failure_code(&report), "ownership_mismatch");
    assert!(report.failure.as_ref().is_some_and(|failure| failure.security_anomaly));
    assert!(h.provider.requests().is_empty());
    assert_eq!(h.metrics.count_labelled("ownership_mismatch", "LeaseApproved"), 1);
    assert_eq!(
        h.ledger.committed("evt-1").map(|record| record.outcome),
        Some(TerminalOutcome::Rejected {
            class: FailureClass::Permanent,
            code: "ownership_mismatch".to_owned(),
        })
    );
    assert_eq!(
        h.dead_letters.all().first().map(|entry| entry.reason),
        Some(DeadLetterReason::Permanent)
    );
}

#[tokio::test]
async fn schema_failure_stops_before_any_store_read() {
    let h = harness();
    let mut event = approved_event("evt-1", "a@gov.uk");
    if let Some(Value::Object(lease)) = event.detail.get_mut("leaseId") {
        lease.remove("uuid");
    }

    let report = h.pipeline.process(&event).await;

    assert_eq!(report.state, PipelineState::ValidationFailed);
    assert_eq!(h.directory.lease_reads(), 0);
    assert_eq!(
        h.metrics
            .count_labelled("schema_failure", "LeaseApproved:missing_field"),
        1
    );
    let record = h.ledger.committed("evt-1").expect("rejection committed");
    assert!(record.recipient_digest.is_none());
}

#[tokio::test]
async fn malformed_identifier_is_dead_lettered_without_a_reservation() {
    let h = harness();

    let report = h
        .pipeline
        .process(&approved_event("evt 1?", "a@gov.uk"))
        .await;

    assert_eq!(report.state, PipelineState::ValidationFailed);
    assert!(h.ledger.is_empty());
    assert_eq!(h.dead_letters.all().len(), 1);
    assert_eq!(
        h.metrics
            .count_labelled("schema_failure", "LeaseApproved:invalid_envelope"),
        1
    );
}

#[tokio::test]
async fn stale_event_is_rejected() {
    let h = harness();
    h.clock.advance_seconds(8 * 24 * 3600);

    let report = h.pipeline.process(&approved_event("evt-1", "a@gov.uk")).await;

    assert_eq!(report.state, PipelineState::ValidationFailed);
    assert_eq!(failure_code(&report), "event_stale");
    assert!(h.provider.requests().is_empty());
}

#[tokio::test]
async fn in_flight_event_is_deferred() {
    let h = harness();
    h.ledger.hold("evt-1", start() + TimeDelta::seconds(60));

    let report = h.pipeline.process(&approved_event("evt-1", "a@gov.uk")).await;

    assert_eq!(report.state, PipelineState::Deferred);
    assert!(report.failure.is_none());
    assert!(h.provider.requests().is_empty());
}

#[tokio::test]
async fn opted_out_recipient_is_skipped() {
    let preference = RecipientPreference {
        notifications_enabled: false,
        frequency: NotificationFrequency::Instant,
        timezone: None,
        recorded_at: start(),
    };
    let h = harness_with(
        Directory::owned_by("a@gov.uk", LeaseStatus::Active),
        Some(preference),
        |_| {},
    );

    let report = h.pipeline.process(&approved_event("evt-1", "a@gov.uk")).await;

    assert_eq!(report.state, PipelineState::PreferenceSkipped);
    assert!(h.provider.requests().is_empty());
    assert_eq!(h.metrics.count("preference_skipped"), 1);
    assert_eq!(
        h.ledger.committed("evt-1").map(|record| record.outcome),
        Some(TerminalOutcome::Suppressed {
            reason: "preference_disabled".to_owned()
        })
    );
}

#[tokio::test]
async fn equivalent_event_inside_the_window_is_collapsed() {
    let h = harness();

    h.pipeline.process(&approved_event("evt-1", "a@gov.uk")).await;
    let second = h.pipeline.process(&approved_event("evt-2", "a@gov.uk")).await;

    assert_eq!(second.state, PipelineState::Collapsed);
    assert_eq!(h.provider.requests().len(), 1);
    assert_eq!(
        h.ledger.committed("evt-2").map(|record| record.outcome),
        Some(TerminalOutcome::Suppressed {
            reason: "collapsed".to_owned()
        })
    );
}

#[tokio::test]
async fn rate_limited_send_is_scheduled_for_retry() {
    let h = harness();
    h.provider.push_response(Err(DeliveryProviderError::status(
        429_u16,
        Some(Duration::from_secs(120)),
        "slow down",
    )));

    let report = h.pipeline.process(&approved_event("evt-1", "a@gov.uk")).await;

    let retry_at = start() + TimeDelta::seconds(120);
    assert_eq!(report.state, PipelineState::Retrying);
    assert_eq!(report.retry_at, Some(retry_at));
    assert!(h.dead_letters.all().is_empty());
    assert!(h.ledger.committed("evt-1").is_none());
    assert_eq!(
        h.ledger.held_until("evt-1"),
        Some(retry_at + TimeDelta::seconds(38 + 900))
    );
    let parked = h.retries.all();
    assert_eq!(parked.len(), 1);
    assert_eq!(parked.first().map(|pending| pending.attempts), Some(1));

    h.clock.advance_seconds(121);
    let retried = h.pipeline.drain_due_retries(10).await.expect("queue reachable");

    assert_eq!(retried.len(), 1);
    let sent = retried.first().expect("one report");
    assert_eq!(sent.state, PipelineState::Sent);
    assert_eq!(sent.attempts, 2);
    assert_eq!(h.provider.requests().len(), 2);
    assert!(h.ledger.committed("evt-1").is_some());
}

#[tokio::test]
async fn redelivery_while_a_retry_waits_is_deferred() {
    let h = harness();
    h.provider.push_response(Err(DeliveryProviderError::status(
        429_u16,
        Some(Duration::from_secs(120)),
        "slow down",
    )));
    let event = approved_event("evt-1", "a@gov.uk");
    let first = h.pipeline.process(&event).await;
    assert_eq!(first.state, PipelineState::Retrying);

    h.clock.advance_seconds(100);
    let redelivered = h.pipeline.process(&event).await;

    assert_eq!(redelivered.state, PipelineState::Deferred);
    assert_eq!(h.provider.requests().len(), 1);

    h.clock.advance_seconds(21);
    let retried = h.pipeline.drain_due_retries(10).await.expect("queue reachable");
    assert_eq!(
        retried.iter().map(|report| report.state).collect::<Vec<_>>(),
        vec![PipelineState::Sent]
    );
    assert_eq!(h.provider.requests().len(), 2);
}

#[tokio::test]
async fn drain_skips_a_retry_whose_event_was_committed_meanwhile() {
    let h = harness();
    h.provider.push_response(Err(DeliveryProviderError::status(
        429_u16,
        Some(Duration::from_secs(120)),
        "slow down",
    )));
    let event = approved_event("evt-1", "a@gov.uk");
    h.pipeline.process(&event).await;

    h.clock.advance_seconds(120 + 938 + 1);
    let redelivered = h.pipeline.process(&event).await;
    assert_eq!(redelivered.state, PipelineState::Sent);

    let retried = h.pipeline.drain_due_retries(10).await.expect("queue reachable");

    let settled = retried.first().expect("one report");
    assert_eq!(settled.state, PipelineState::Deduplicated);
    assert_eq!(settled.message_id.as_deref(), Some("msg-2"));
    assert!(matches!(
        settled.cached_outcome,
        Some(TerminalOutcome::Delivered { .. })
    ));
    assert_eq!(h.provider.requests().len(), 2);
    assert!(h.retries.all().is_empty());
}

#[tokio::test]
async fn outstanding_retries_are_dead_lettered_on_request() {
    let h = harness();
    h.provider.push_response(Err(DeliveryProviderError::status(
        503_u16,
        None::<Duration>,
        "unavailable",
    )));
    h.pipeline.process(&approved_event("evt-1", "a@gov.uk")).await;

    let abandoned = h.pipeline.dead_letter_pending().await.expect("queue reachable");

    let report = abandoned.first().expect("one report");
    assert_eq!(report.state, PipelineState::DeadLettered);
    assert_eq!(failure_code(report), "retry_abandoned");
    assert!(h.retries.all().is_empty());
    let dead = h.dead_letters.all();
    assert_eq!(
        dead.first().map(|entry| entry.reason),
        Some(DeadLetterReason::RetriesExhausted)
    );
    assert_eq!(report.dead_letter_id, dead.first().map(|entry| entry.id));
    assert!(h.ledger.held_until("evt-1").is_none());
    assert!(h.ledger.committed("evt-1").is_none());
    assert!(
        h.alerts
            .raised()
            .iter()
            .any(|alert| alert.code == "retry_abandoned")
    );
    assert_eq!(h.provider.requests().len(), 1);
}

#[tokio::test]
async fn exhausted_retries_dead_letter_and_alarm() {
    let h = harness_with(
        Directory::owned_by("a@gov.uk", LeaseStatus::Active),
        None,
        |config| config.retry.max_attempts = 2,
    );
    for _ in 0..2 {
        h.provider.push_response(Err(DeliveryProviderError::status(
            503_u16,
            None::<Duration>,
            "unavailable",
        )));
    }

    let first = h.pipeline.process(&approved_event("evt-1", "a@gov.uk")).await;
    assert_eq!(first.state, PipelineState::Retrying);
    assert_eq!(first.retry_at, Some(start() + TimeDelta::seconds(60)));

    h.clock.advance_seconds(61);
    let retried = h.pipeline.drain_due_retries(10).await.expect("queue reachable");

    let last = retried.first().expect("one report");
    assert_eq!(last.state, PipelineState::DeadLettered);
    let dead = h.dead_letters.all();
    assert_eq!(dead.len(), 1);
    let entry = dead.first().expect("entry");
    assert_eq!(entry.reason, DeadLetterReason::RetriesExhausted);
    assert_eq!(entry.attempts, 2);
    assert!(
        h.alerts
            .raised()
            .iter()
            .any(|alert| alert.severity == AlertSeverity::Operational)
    );
    assert!(h.ledger.committed("evt-1").is_none());
    assert!(h.ledger.held_until("evt-1").is_none());
    assert_eq!(
        h.metrics.count_labelled("failed", "LeaseApproved:retriable"),
        2
    );
}

#[rstest]
#[case(401, DeadLetterReason::Critical, false)]
#[case(400, DeadLetterReason::Permanent, true)]
#[tokio::test]
async fn non_retriable_send_failures_dead_letter(
    #[case] status: u16,
    #[case] reason: DeadLetterReason,
    #[case] committed: bool,
) {
    let h = harness();
    h.provider.push_response(Err(DeliveryProviderError::status(
        status,
        None::<Duration>,
        "refused",
    )));

    let report = h.pipeline.process(&approved_event("evt-1", "a@gov.uk")).await;

    assert_eq!(report.state, PipelineState::DeadLettered);
    assert!(h.retries.all().is_empty());
    assert_eq!(
        h.dead_letters.all().first().map(|entry| entry.reason),
        Some(reason)
    );
    assert_eq!(h.ledger.committed("evt-1").is_some(), committed);
}

#[tokio::test]
async fn credential_rejection_raises_a_critical_alarm() {
    let h = harness();
    h.provider.push_response(Err(DeliveryProviderError::status(
        401_u16,
        None::<Duration>,
        "bad key",
    )));

    h.pipeline.process(&approved_event("evt-1", "a@gov.uk")).await;

    let alerts = h.alerts.raised();
    assert_eq!(alerts.len(), 1);
    let alert = alerts.first().expect("alert");
    assert_eq!(alert.severity, AlertSeverity::Critical);
    assert_eq!(alert.code, "provider_unauthorised");
    assert_eq!(alert.event_id.as_deref(), Some("evt-1"));
}

#[tokio::test]
async fn status_conflict_is_held_for_review_then_released_by_an_operator() {
    let h = harness();

    let held = h.pipeline.process(&denied_event("evt-1", "a@gov.uk")).await;

    assert_eq!(held.state, PipelineState::ManualReview);
    assert_eq!(failure_code(&held), "enrichment_conflict");
    assert!(h.provider.requests().is_empty());
    assert!(h.ledger.committed("evt-1").is_none());
    assert_eq!(h.metrics.count("enrichment_conflict"), 1);
    let entry_id = held.dead_letter_id.expect("held in dead-letter area");

    let review = ReviewOverride {
        operator: "ops@gov.uk".to_owned(),
        justification: "store status lags the approver decision".to_owned(),
    };
    let released = h
        .pipeline
        .redrive(entry_id, Some(review))
        .await
        .expect("redrive");

    assert_eq!(released.state, PipelineState::Sent);
    assert_eq!(h.provider.requests().len(), 1);
    assert!(h.dead_letters.all().is_empty());
}

#[tokio::test]
async fn terminated_lease_conflicts_even_when_the_replica_read_fails() {
    let h = harness_with(
        Directory::owned_by("a@gov.uk", LeaseStatus::ManuallyTerminated).without_replica(),
        None,
        |_| {},
    );

    let report = h
        .pipeline
        .process(&budget_alert_event("evt-1", "a@gov.uk", 37.5, 50.0, 75.0))
        .await;

    assert_eq!(report.state, PipelineState::ManualReview);
    assert_eq!(failure_code(&report), "enrichment_conflict");
    assert!(h.provider.requests().is_empty());
    assert_eq!(h.metrics.count("enrichment_conflict"), 1);
    assert!(h.ledger.committed("evt-1").is_none());
}

#[tokio::test]
async fn status_conflict_without_review_stays_blocked() {
    let h = harness_with(
        Directory::owned_by("a@gov.uk", LeaseStatus::Active),
        None,
        |config| config.conflict_policy = ConflictPolicy::Reject,
    );

    let report = h.pipeline.process(&denied_event("evt-1", "a@gov.uk")).await;

    assert_eq!(report.state, PipelineState::EnrichmentFailed);
    assert!(h.provider.requests().is_empty());
    assert!(matches!(
        h.ledger.committed("evt-1").map(|record| record.outcome),
        Some(TerminalOutcome::Rejected { .. })
    ));
}

#[tokio::test]
async fn redrive_clears_a_committed_rejection() {
    let h = harness();
    let rejected = h.pipeline.process(&approved_event("evt-1", "b@gov.uk")).await;
    let entry_id = rejected.dead_letter_id.expect("dead-lettered");

    h.directory.transfer_to("b@gov.uk");
    let report = h.pipeline.redrive(entry_id, None).await.expect("redrive");

    assert_eq!(report.state, PipelineState::Sent);
    assert_eq!(h.provider.requests().len(), 1);
    assert!(matches!(
        h.ledger.committed("evt-1").map(|record| record.outcome),
        Some(TerminalOutcome::Delivered { .. })
    ));
}

#[tokio::test]
async fn redrive_of_unknown_entry_fails() {
    let h = harness();
    let missing = Uuid::new_v4();

    let err = h.pipeline.redrive(missing, None).await.expect_err("missing");

    assert!(matches!(err, super::RedriveError::NotFound { id } if id == missing));
}

#[tokio::test]
async fn redrive_of_delivered_event_reports_the_duplicate() {
    let h = harness();
    h.pipeline.process(&approved_event("evt-1", "a@gov.uk")).await;
    let entry = DeadLetterEntry {
        id: Uuid::new_v4(),
        event: approved_event("evt-1", "a@gov.uk"),
        failure: crate::domain::error::PipelineFailure::new(
            crate::domain::error::PipelineStage::Send,
            FailureClass::Retriable,
            "provider_unavailable",
            "unavailable",
        ),
        reason: DeadLetterReason::RetriesExhausted,
        attempts: 4,
        dead_lettered_at: start(),
    };
    let id = entry.id;
    h.dead_letters.push(entry).await.expect("push");

    let report = h.pipeline.redrive(id, None).await.expect("redrive");

    assert_eq!(report.state, PipelineState::Deduplicated);
    assert_eq!(h.provider.requests().len(), 1);
}
