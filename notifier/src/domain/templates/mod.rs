//! Template registry and personalisation building.
//!
//! Each event kind maps to exactly one [`TemplateConfig`] through an
//! exhaustive match; the provider template identifiers themselves come from
//! configuration.

mod personalise;
mod sanitise;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

pub use personalise::{LinkSettings, Personalisation, PersonalisationBuilder, PersonalisationError};
pub use sanitise::escape_html;

use crate::domain::enrichment::{EnrichmentField, EnrichmentPlan};
use crate::domain::error::{ClassifiedError, FailureClass};
use crate::domain::event::{EventKind, ValidatedEvent};

/// Named values substituted into provider templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PersonalisationKey {
    /// Twelve-digit account number.
    AccountId,
    /// Account display name.
    AccountName,
    /// Lease template display name.
    TemplateName,
    /// Lease expiry date.
    ExpiryDate,
    /// Single sign-on deep link for the account.
    SsoUrl,
    /// Self-service portal link.
    PortalUrl,
    /// Lease duration in hours.
    LeaseDurationHours,
    /// Spend at the time of a threshold alert.
    CurrentSpend,
    /// Budget carried on the event.
    BudgetLimit,
    /// Share of the budget consumed.
    PercentUsed,
    /// Final or accrued spend.
    TotalSpend,
    /// Human readable termination or freeze reason.
    Reason,
    /// Free-text comment from a requester or administrator.
    Comment,
    /// Hours left before the lease expires.
    HoursRemaining,
    /// When the lease will be frozen.
    FreezesAt,
    /// When the lease expired.
    ExpiredAt,
    /// Freshness of store-sourced monetary values.
    DataAsOf,
    /// Event and store budgets when they differ.
    BudgetNote,
}

impl PersonalisationKey {
    /// Placeholder name used in provider templates.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AccountId => "accountId",
            Self::AccountName => "accountName",
            Self::TemplateName => "templateName",
            Self::ExpiryDate => "expiryDate",
            Self::SsoUrl => "ssoUrl",
            Self::PortalUrl => "portalUrl",
            Self::LeaseDurationHours => "leaseDurationHours",
            Self::CurrentSpend => "currentSpend",
            Self::BudgetLimit => "budgetLimit",
            Self::PercentUsed => "percentUsed",
            Self::TotalSpend => "totalSpend",
            Self::Reason => "reason",
            Self::Comment => "comment",
            Self::HoursRemaining => "hoursRemaining",
            Self::FreezesAt => "freezesAt",
            Self::ExpiredAt => "expiredAt",
            Self::DataAsOf => "dataAsOf",
            Self::BudgetNote => "budgetNote",
        }
    }

    /// Store field that can supply this key when the event does not.
    const fn enrichment_source(self) -> Option<EnrichmentField> {
        match self {
            Self::AccountName => Some(EnrichmentField::AccountName),
            Self::TemplateName => Some(EnrichmentField::TemplateName),
            Self::ExpiryDate => Some(EnrichmentField::ExpirationDate),
            Self::LeaseDurationHours => Some(EnrichmentField::LeaseDurationHours),
            Self::TotalSpend => Some(EnrichmentField::TotalSpend),
            Self::BudgetNote => Some(EnrichmentField::MaxSpend),
            _ => None,
        }
    }

    /// Whether the event itself carries this key's value.
    fn carried_by(self, event: &ValidatedEvent) -> bool {
        let detail = event.detail();
        match self {
            Self::ExpiryDate => detail.expiration_date().is_some(),
            Self::LeaseDurationHours => detail.lease_duration_hours().is_some(),
            Self::TotalSpend => detail.total_spend().is_some(),
            _ => false,
        }
    }
}

impl fmt::Display for PersonalisationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maximum length of a provider template identifier.
pub const TEMPLATE_ID_MAX: usize = 64;

static TEMPLATE_ID_RE: OnceLock<Regex> = OnceLock::new();

fn template_id_regex() -> &'static Regex {
    TEMPLATE_ID_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9\-]*$")
            .unwrap_or_else(|error| panic!("template id regex failed to compile: {error}"))
    })
}

/// Provider-side template identifier.
///
/// # Examples
/// ```
/// use lease_notifier::domain::templates::TemplateId;
///
/// assert!(TemplateId::new("b3f1c2d4-0000-4000-8000-000000000001").is_ok());
/// assert!(TemplateId::new("../v2/other").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TemplateId(String);

impl TemplateId {
    /// Validate a provider template identifier.
    pub fn new(raw: impl Into<String>) -> Result<Self, TemplateError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty()
            || trimmed.len() > TEMPLATE_ID_MAX
            || !template_id_regex().is_match(trimmed)
        {
            return Err(TemplateError::InvalidTemplateId);
        }
        Ok(Self(trimmed.to_owned()))
    }
}

impl TryFrom<String> for TemplateId {
    type Error = TemplateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TemplateId> for String {
    fn from(value: TemplateId) -> Self {
        value.0
    }
}

impl AsRef<str> for TemplateId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// An identifier did not match the provider's identifier grammar.
    #[error("template id must be 1-64 letters, digits, or hyphens")]
    InvalidTemplateId,
    /// No template was configured for an event kind.
    #[error("no template registered for {kind}")]
    Unregistered {
        /// Kind without a template.
        kind: EventKind,
    },
}

impl ClassifiedError for TemplateError {
    fn class(&self) -> FailureClass {
        FailureClass::Permanent
    }

    fn code(&self) -> &'static str {
        match self {
            Self::InvalidTemplateId => "template_id_invalid",
            Self::Unregistered { .. } => "template_unregistered",
        }
    }
}

/// Template binding and field contract for one event kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateConfig {
    kind: EventKind,
    template_id: TemplateId,
}

impl TemplateConfig {
    /// Event kind served by this template.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Provider template identifier.
    pub fn template_id(&self) -> &TemplateId {
        &self.template_id
    }

    /// Keys that must be present for a send.
    pub fn required_fields(&self) -> &'static [PersonalisationKey] {
        fields_for(self.kind).0
    }

    /// Keys filled when data is available.
    pub fn optional_fields(&self) -> &'static [PersonalisationKey] {
        fields_for(self.kind).1
    }

    /// Every key this template declares.
    pub fn all_fields(&self) -> impl Iterator<Item = PersonalisationKey> {
        let (required, optional) = fields_for(self.kind);
        required.iter().chain(optional).copied()
    }

    /// Store fields needed to complete this template for `event`.
    ///
    /// Keys the event already carries are never requested.
    pub fn enrichment_plan(&self, event: &ValidatedEvent) -> EnrichmentPlan {
        let mut plan = EnrichmentPlan::default();
        let (required, optional) = fields_for(self.kind);
        let keys = required
            .iter()
            .map(|key| (*key, true))
            .chain(optional.iter().map(|key| (*key, false)));
        for (key, required) in keys {
            if key.carried_by(event) {
                continue;
            }
            if let Some(field) = key.enrichment_source() {
                plan.want(field, required);
            }
        }
        plan
    }
}

/// Required and optional keys per kind.
const fn fields_for(
    kind: EventKind,
) -> (&'static [PersonalisationKey], &'static [PersonalisationKey]) {
    use PersonalisationKey as K;
    match kind {
        EventKind::LeaseRequested => (&[K::TemplateName, K::PortalUrl], &[K::Comment]),
        EventKind::LeaseApproved => (
            &[K::AccountId, K::ExpiryDate, K::SsoUrl],
            &[K::AccountName, K::TemplateName, K::LeaseDurationHours],
        ),
        EventKind::LeaseDenied => (&[K::TemplateName, K::PortalUrl], &[]),
        EventKind::LeaseTerminated => (
            &[K::AccountId, K::Reason],
            &[
                K::Comment,
                K::TotalSpend,
                K::AccountName,
                K::PortalUrl,
                K::DataAsOf,
            ],
        ),
        EventKind::LeaseFrozen => (
            &[K::AccountId, K::Reason, K::SsoUrl],
            &[
                K::Comment,
                K::TotalSpend,
                K::AccountName,
                K::LeaseDurationHours,
            ],
        ),
        EventKind::LeaseBudgetThresholdAlert => (
            &[
                K::AccountId,
                K::CurrentSpend,
                K::BudgetLimit,
                K::PercentUsed,
                K::SsoUrl,
            ],
            &[K::AccountName, K::BudgetNote, K::DataAsOf],
        ),
        EventKind::LeaseDurationThresholdAlert => (
            &[K::AccountId, K::HoursRemaining, K::ExpiryDate, K::SsoUrl],
            &[K::LeaseDurationHours, K::AccountName],
        ),
        EventKind::LeaseFreezingThresholdAlert => {
            (&[K::AccountId, K::FreezesAt, K::SsoUrl], &[K::AccountName])
        }
        EventKind::LeaseBudgetExceeded => (
            &[K::AccountId, K::TotalSpend, K::BudgetLimit],
            &[K::AccountName, K::BudgetNote, K::DataAsOf, K::PortalUrl],
        ),
        EventKind::LeaseExpired => (
            &[K::AccountId, K::ExpiredAt],
            &[K::AccountName, K::TotalSpend, K::DataAsOf, K::PortalUrl],
        ),
    }
}

/// Event kind to template lookup, complete for every kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRegistry {
    templates: BTreeMap<EventKind, TemplateConfig>,
}

impl TemplateRegistry {
    /// Build a registry, failing when any kind lacks a template id.
    ///
    /// # Examples
    /// ```
    /// use std::collections::BTreeMap;
    /// use lease_notifier::domain::EventKind;
    /// use lease_notifier::domain::templates::{TemplateError, TemplateId, TemplateRegistry};
    ///
    /// let ids = BTreeMap::from([(
    ///     EventKind::LeaseApproved,
    ///     TemplateId::new("approved").expect("valid id"),
    /// )]);
    /// assert!(matches!(
    ///     TemplateRegistry::new(ids),
    ///     Err(TemplateError::Unregistered { .. })
    /// ));
    /// ```
    pub fn new(mut ids: BTreeMap<EventKind, TemplateId>) -> Result<Self, TemplateError> {
        let mut templates = BTreeMap::new();
        for kind in EventKind::ALL {
            let template_id = ids
                .remove(&kind)
                .ok_or(TemplateError::Unregistered { kind })?;
            templates.insert(kind, TemplateConfig { kind, template_id });
        }
        Ok(Self { templates })
    }

    /// Template for `kind`.
    pub fn select(&self, kind: EventKind) -> Result<&TemplateConfig, TemplateError> {
        self.templates
            .get(&kind)
            .ok_or(TemplateError::Unregistered { kind })
    }

    /// Every registered template.
    pub fn iter(&self) -> impl Iterator<Item = &TemplateConfig> {
        self.templates.values()
    }

    /// Required placeholder names of `kind`, as the provider reports them.
    pub fn required_names(&self, kind: EventKind) -> BTreeSet<&'static str> {
        fields_for(kind).0.iter().map(|key| key.as_str()).collect()
    }
}
