//! Read-only enrichment of validated events from the lease stores.
//!
//! Enrichment is strictly additive: it fills fields the event does not carry
//! and never overrides one it does. The store's lease status is read only to
//! detect contradictions with the event kind and is never exposed to the
//! personalisation stage.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::domain::error::{ClassifiedError, FailureClass};
use crate::domain::event::{Hours, Money, ValidatedEvent};
use crate::domain::ports::{
    AccountRecord, AccountStore, LeaseRecord, LeaseStatus, LeaseStore, LeaseTemplateRecord,
    LeaseTemplateStore, ReadConsistency,
};
use crate::domain::templates::TemplateConfig;

/// Personalisation inputs that can be sourced from the stores.
///
/// There is deliberately no status variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EnrichmentField {
    /// Account display name.
    AccountName,
    /// Lease template display name.
    TemplateName,
    /// Lease expiry instant.
    ExpirationDate,
    /// Spend so far.
    TotalSpend,
    /// Current budget.
    MaxSpend,
    /// Lease duration.
    LeaseDurationHours,
}

impl EnrichmentField {
    /// Stable label for logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AccountName => "account_name",
            Self::TemplateName => "template_name",
            Self::ExpirationDate => "expiration_date",
            Self::TotalSpend => "total_spend",
            Self::MaxSpend => "max_spend",
            Self::LeaseDurationHours => "lease_duration_hours",
        }
    }

    const fn is_monetary(self) -> bool {
        matches!(self, Self::TotalSpend | Self::MaxSpend)
    }
}

/// Store-sourced value.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichedValue {
    /// Free text.
    Text(String),
    /// Sterling amount.
    Amount(Money),
    /// Instant.
    Instant(DateTime<Utc>),
    /// Hour count.
    Hours(Hours),
}

/// Fields an enrichment pass should try to fill.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentPlan {
    wanted: BTreeMap<EnrichmentField, bool>,
}

impl EnrichmentPlan {
    /// Request `field`; `required` fields must resolve or enrichment fails.
    pub fn want(&mut self, field: EnrichmentField, required: bool) {
        let entry = self.wanted.entry(field).or_insert(false);
        *entry |= required;
    }

    /// Whether `field` was requested.
    pub fn wants(&self, field: EnrichmentField) -> bool {
        self.wanted.contains_key(&field)
    }

    fn required(&self) -> impl Iterator<Item = EnrichmentField> + '_ {
        self.wanted
            .iter()
            .filter_map(|(field, required)| required.then_some(*field))
    }
}

/// Additive enrichment output, held apart from the validated event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enrichment {
    values: BTreeMap<EnrichmentField, EnrichedValue>,
    data_as_of: Option<DateTime<Utc>>,
}

impl Enrichment {
    /// Value resolved for `field`.
    pub fn get(&self, field: EnrichmentField) -> Option<&EnrichedValue> {
        self.values.get(&field)
    }

    /// Freshness of store-sourced monetary values, when any were used.
    pub fn data_as_of(&self) -> Option<DateTime<Utc>> {
        self.data_as_of
    }

    /// Resolved fields.
    pub fn fields(&self) -> BTreeSet<EnrichmentField> {
        self.values.keys().copied().collect()
    }

    #[cfg(test)]
    pub(crate) fn with(mut self, field: EnrichmentField, value: EnrichedValue) -> Self {
        self.values.insert(field, value);
        self
    }

    #[cfg(test)]
    pub(crate) fn as_of(mut self, instant: DateTime<Utc>) -> Self {
        self.data_as_of = Some(instant);
        self
    }

    fn insert(&mut self, field: EnrichmentField, value: Option<EnrichedValue>) {
        if let Some(value) = value {
            self.values.insert(field, value);
        }
    }
}

/// A validated event paired with its enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedEvent<'e> {
    event: &'e ValidatedEvent,
    enrichment: Enrichment,
}

impl<'e> EnrichedEvent<'e> {
    #[cfg(test)]
    pub(crate) fn new(event: &'e ValidatedEvent, enrichment: Enrichment) -> Self {
        Self { event, enrichment }
    }

    /// Underlying validated event.
    pub fn event(&self) -> &'e ValidatedEvent {
        self.event
    }

    /// Store-sourced values.
    pub fn enrichment(&self) -> &Enrichment {
        &self.enrichment
    }
}

/// How an unresolved status conflict is handled. Both options block sending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Reject permanently.
    Reject,
    /// Hold in the dead-letter area for an operator decision.
    #[default]
    ManualReview,
}

/// Audited operator decision that releases a held status conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewOverride {
    /// Operator identity.
    pub operator: String,
    /// Recorded justification.
    pub justification: String,
}

/// Enrichment failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnrichmentError {
    /// A required field could not be sourced.
    #[error("required field {} could not be resolved", field.as_str())]
    RequiredFieldUnresolved {
        /// Missing field.
        field: EnrichmentField,
    },
    /// The store status contradicts the event kind.
    #[error("store lease status contradicts the event type")]
    StatusConflict,
}

impl ClassifiedError for EnrichmentError {
    fn class(&self) -> FailureClass {
        FailureClass::Permanent
    }

    fn code(&self) -> &'static str {
        match self {
            Self::RequiredFieldUnresolved { .. } => "enrichment_field_unresolved",
            Self::StatusConflict => "enrichment_conflict",
        }
    }

    fn security_anomaly(&self) -> bool {
        matches!(self, Self::StatusConflict)
    }
}

/// Enrichment stage.
#[derive(Clone)]
pub struct EnrichmentResolver {
    leases: Arc<dyn LeaseStore>,
    accounts: Arc<dyn AccountStore>,
    templates: Arc<dyn LeaseTemplateStore>,
    query_timeout: Duration,
}

impl EnrichmentResolver {
    /// Build a resolver with a per-query timeout.
    pub fn new(
        leases: Arc<dyn LeaseStore>,
        accounts: Arc<dyn AccountStore>,
        templates: Arc<dyn LeaseTemplateStore>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            leases,
            accounts,
            templates,
            query_timeout,
        }
    }

    /// Enrich `event` for `template`.
    ///
    /// `authoritative` is the lease row from the ownership stage's strongly
    /// consistent read; its status is always checked, so a degraded replica
    /// read cannot hide a conflict. The replica lease and account queries run
    /// concurrently; the lease template query depends on the lease row and
    /// runs after it, only when needed. Timed-out or failed queries degrade to
    /// the authoritative row or to missing values. A status conflict blocks
    /// unless an operator `review` is supplied.
    pub async fn enrich<'e>(
        &self,
        event: &'e ValidatedEvent,
        template: &TemplateConfig,
        authoritative: &LeaseRecord,
        now: DateTime<Utc>,
        review: Option<&ReviewOverride>,
    ) -> Result<EnrichedEvent<'e>, EnrichmentError> {
        check_status(event, authoritative.status, review)?;

        let plan = template.enrichment_plan(event);
        let (replica, account) =
            join(self.fetch_lease(event), self.fetch_account(event, &plan)).await;
        if let Some(replica) = replica
            .as_ref()
            .filter(|replica| replica.status != authoritative.status)
        {
            check_status(event, replica.status, review)?;
        }
        let lease = replica.as_ref().unwrap_or(authoritative);

        let lease_template = self.fetch_lease_template(lease, &plan).await;
        let mut enrichment = merge(&plan, lease, account.as_ref(), lease_template.as_ref());
        if enrichment.values.keys().any(|field| field.is_monetary()) {
            enrichment.data_as_of = Some(lease.last_checked_date.unwrap_or(now));
        }

        if let Some(field) = plan
            .required()
            .find(|field| !enrichment.values.contains_key(field))
        {
            warn!(
                event_id = %event.id(),
                field = field.as_str(),
                "required enrichment field unresolved"
            );
            return Err(EnrichmentError::RequiredFieldUnresolved { field });
        }

        debug!(
            event_id = %event.id(),
            fields = ?enrichment.fields(),
            "event enriched"
        );
        Ok(EnrichedEvent { event, enrichment })
    }

    async fn fetch_lease(&self, event: &ValidatedEvent) -> Option<LeaseRecord> {
        let query = self
            .leases
            .find_lease(event.lease().uuid(), ReadConsistency::Eventual);
        match timeout(self.query_timeout, query).await {
            Ok(Ok(lease)) => lease,
            Ok(Err(err)) => degrade(event, "lease", &err),
            Err(_) => degrade(event, "lease", &"timed out"),
        }
    }

    async fn fetch_account(
        &self,
        event: &ValidatedEvent,
        plan: &EnrichmentPlan,
    ) -> Option<AccountRecord> {
        if !plan.wants(EnrichmentField::AccountName) {
            return None;
        }
        let account_id = event.account_id()?;
        let query = self
            .accounts
            .find_account(account_id, ReadConsistency::Eventual);
        match timeout(self.query_timeout, query).await {
            Ok(Ok(account)) => account,
            Ok(Err(err)) => degrade(event, "account", &err),
            Err(_) => degrade(event, "account", &"timed out"),
        }
    }

    async fn fetch_lease_template(
        &self,
        lease: &LeaseRecord,
        plan: &EnrichmentPlan,
    ) -> Option<LeaseTemplateRecord> {
        let needs_name =
            plan.wants(EnrichmentField::TemplateName) && lease.original_lease_template_name.is_none();
        let needs_duration = plan.wants(EnrichmentField::LeaseDurationHours)
            && lease.lease_duration_in_hours.is_none();
        if !(needs_name || needs_duration) {
            return None;
        }
        let template_uuid = lease.original_lease_template_uuid.as_deref()?;
        match timeout(self.query_timeout, self.templates.find_template(template_uuid)).await {
            Ok(Ok(template)) => template,
            Ok(Err(err)) => {
                warn!(query = "lease_template", error = %err, "enrichment query failed; degrading");
                None
            }
            Err(_) => {
                warn!(query = "lease_template", "enrichment query timed out; degrading");
                None
            }
        }
    }
}

fn degrade<T>(event: &ValidatedEvent, query: &str, reason: &dyn std::fmt::Display) -> Option<T> {
    warn!(
        event_id = %event.id(),
        query,
        reason = %reason,
        "enrichment query failed; degrading"
    );
    None
}

fn check_status(
    event: &ValidatedEvent,
    status: LeaseStatus,
    review: Option<&ReviewOverride>,
) -> Result<(), EnrichmentError> {
    if event.kind().expected_statuses().contains(&status) {
        return Ok(());
    }
    match review {
        Some(review) => {
            warn!(
                security = true,
                audit = true,
                event_id = %event.id(),
                event_type = %event.kind(),
                store_status = ?status,
                operator = %review.operator,
                justification = %review.justification,
                "enrichment status conflict released by operator review"
            );
            Ok(())
        }
        None => {
            error!(
                security = true,
                event_id = %event.id(),
                event_type = %event.kind(),
                store_status = ?status,
                "store lease status contradicts event type"
            );
            Err(EnrichmentError::StatusConflict)
        }
    }
}

/// Pure merge of store rows into the requested fields.
fn merge(
    plan: &EnrichmentPlan,
    lease: &LeaseRecord,
    account: Option<&AccountRecord>,
    template: Option<&LeaseTemplateRecord>,
) -> Enrichment {
    let mut enrichment = Enrichment::default();
    for field in plan.wanted.keys().copied() {
        let value = match field {
            EnrichmentField::AccountName => account
                .and_then(|account| account.name.clone())
                .map(EnrichedValue::Text),
            EnrichmentField::TemplateName => lease
                .original_lease_template_name
                .clone()
                .or_else(|| template.map(|template| template.name.clone()))
                .map(EnrichedValue::Text),
            EnrichmentField::ExpirationDate => lease.expiration_date.map(EnrichedValue::Instant),
            EnrichmentField::TotalSpend => lease
                .total_cost_accrued
                .and_then(|pounds| Money::from_pounds(pounds).ok())
                .map(EnrichedValue::Amount),
            EnrichmentField::MaxSpend => lease
                .max_spend
                .and_then(|pounds| Money::from_pounds(pounds).ok())
                .map(EnrichedValue::Amount),
            EnrichmentField::LeaseDurationHours => lease
                .lease_duration_in_hours
                .or_else(|| template.and_then(|template| template.lease_duration_in_hours))
                .and_then(|hours| Hours::new(hours).ok())
                .map(EnrichedValue::Hours),
        };
        enrichment.insert(field, value.filter(non_blank));
    }
    enrichment
}

fn non_blank(value: &EnrichedValue) -> bool {
    match value {
        EnrichedValue::Text(text) => !text.trim().is_empty(),
        _ => true,
    }
}
