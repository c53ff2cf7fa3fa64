//! Builds the provider personalisation map from an enriched event.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::debug;
use url::Url;

use super::sanitise::escape_html;
use super::{PersonalisationKey, TemplateConfig};
use crate::domain::enrichment::{EnrichedEvent, EnrichedValue, Enrichment, EnrichmentField};
use crate::domain::error::{ClassifiedError, FailureClass};
use crate::domain::event::{EventDetail, FreezeReason, Hours, Money, TerminationReason};
use crate::domain::formatting::{format_currency, format_hours, format_percentage, format_uk_date};
use crate::domain::preferences::EffectivePreference;

/// Placeholder name to rendered, sanitised value.
pub type Personalisation = BTreeMap<String, String>;

/// Personalisation failures. All are permanent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersonalisationError {
    /// A required key had no value after enrichment.
    #[error("required personalisation field {key} is missing")]
    MissingField {
        /// Missing key.
        key: PersonalisationKey,
    },
    /// A configured link base is not an absolute https URL.
    #[error("link base for {key} must be an absolute https URL")]
    InsecureLink {
        /// Key the link feeds.
        key: PersonalisationKey,
    },
}

impl ClassifiedError for PersonalisationError {
    fn class(&self) -> FailureClass {
        FailureClass::Permanent
    }

    fn code(&self) -> &'static str {
        match self {
            Self::MissingField { .. } => "personalisation_field_missing",
            Self::InsecureLink { .. } => "personalisation_link_insecure",
        }
    }
}

/// Configured link bases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    sso_portal: Url,
    self_service_portal: Url,
}

impl LinkSettings {
    /// Validate the link bases.
    pub fn new(sso_portal: Url, self_service_portal: Url) -> Result<Self, PersonalisationError> {
        require_https(&sso_portal, PersonalisationKey::SsoUrl)?;
        require_https(&self_service_portal, PersonalisationKey::PortalUrl)?;
        Ok(Self {
            sso_portal,
            self_service_portal,
        })
    }
}

fn require_https(url: &Url, key: PersonalisationKey) -> Result<(), PersonalisationError> {
    if url.scheme() == "https" && url.host_str().is_some() {
        Ok(())
    } else {
        Err(PersonalisationError::InsecureLink { key })
    }
}

/// Personalisation stage.
#[derive(Debug, Clone)]
pub struct PersonalisationBuilder {
    links: LinkSettings,
}

struct Context<'a> {
    detail: &'a EventDetail,
    enrichment: &'a Enrichment,
    timezone: Tz,
}

impl PersonalisationBuilder {
    /// Build with the configured link bases.
    pub fn new(links: LinkSettings) -> Self {
        Self { links }
    }

    /// Render every key `template` declares.
    ///
    /// Text is HTML-escaped, links are assembled through [`Url`], and
    /// optional keys without data render as an empty string so provider
    /// placeholders always resolve.
    pub fn build(
        &self,
        enriched: &EnrichedEvent<'_>,
        template: &TemplateConfig,
        preference: &EffectivePreference,
    ) -> Result<Personalisation, PersonalisationError> {
        let context = Context {
            detail: enriched.event().detail(),
            enrichment: enriched.enrichment(),
            timezone: preference.timezone,
        };
        let mut personalisation = Personalisation::new();
        for key in template.required_fields() {
            let value = self
                .render(*key, &context)
                .filter(|value| !value.is_empty())
                .ok_or(PersonalisationError::MissingField { key: *key })?;
            personalisation.insert(key.as_str().to_owned(), value);
        }
        for key in template.optional_fields() {
            let value = self.render(*key, &context).unwrap_or_default();
            personalisation.insert(key.as_str().to_owned(), value);
        }
        debug!(
            event_id = %enriched.event().id(),
            template_id = %template.template_id(),
            keys = personalisation.len(),
            "personalisation built"
        );
        Ok(personalisation)
    }

    fn render(&self, key: PersonalisationKey, context: &Context<'_>) -> Option<String> {
        let detail = context.detail;
        let enrichment = context.enrichment;
        let date = |instant: DateTime<Utc>| format_uk_date(instant, context.timezone);
        match key {
            PersonalisationKey::AccountId => detail.account_id().map(|id| escape_html(id.as_ref())),
            PersonalisationKey::AccountName => {
                text(enrichment, EnrichmentField::AccountName).map(escape_html)
            }
            PersonalisationKey::TemplateName => {
                text(enrichment, EnrichmentField::TemplateName).map(escape_html)
            }
            PersonalisationKey::ExpiryDate => detail
                .expiration_date()
                .or_else(|| instant(enrichment, EnrichmentField::ExpirationDate))
                .map(date),
            PersonalisationKey::SsoUrl => detail.account_id().map(|account_id| {
                let mut link = self.links.sso_portal.clone();
                link.query_pairs_mut()
                    .append_pair("account_id", account_id.as_ref());
                link.to_string()
            }),
            PersonalisationKey::PortalUrl => Some(self.links.self_service_portal.to_string()),
            PersonalisationKey::LeaseDurationHours => detail
                .lease_duration_hours()
                .or_else(|| hours(enrichment, EnrichmentField::LeaseDurationHours))
                .map(format_hours),
            PersonalisationKey::CurrentSpend => match detail {
                EventDetail::LeaseBudgetThresholdAlert { current_spend, .. } => {
                    Some(format_currency(*current_spend))
                }
                _ => None,
            },
            PersonalisationKey::BudgetLimit => detail.budget_limit().map(format_currency),
            PersonalisationKey::PercentUsed => match detail {
                EventDetail::LeaseBudgetThresholdAlert { percent_used, .. } => {
                    Some(format_percentage(*percent_used))
                }
                _ => None,
            },
            PersonalisationKey::TotalSpend => detail
                .total_spend()
                .or_else(|| amount(enrichment, EnrichmentField::TotalSpend))
                .map(format_currency),
            PersonalisationKey::Reason => reason_text(detail).map(str::to_owned),
            PersonalisationKey::Comment => detail.comment().map(escape_html),
            PersonalisationKey::HoursRemaining => match detail {
                EventDetail::LeaseDurationThresholdAlert {
                    hours_remaining, ..
                } => Some(format_hours(*hours_remaining)),
                _ => None,
            },
            PersonalisationKey::FreezesAt => match detail {
                EventDetail::LeaseFreezingThresholdAlert { freezes_at, .. } => {
                    Some(date(*freezes_at))
                }
                _ => None,
            },
            PersonalisationKey::ExpiredAt => match detail {
                EventDetail::LeaseExpired { expired_at, .. } => Some(date(*expired_at)),
                _ => None,
            },
            PersonalisationKey::DataAsOf => enrichment.data_as_of().map(date),
            PersonalisationKey::BudgetNote => budget_note(detail, enrichment, context.timezone),
        }
    }
}

/// Surface both budgets when the event and the store disagree.
fn budget_note(detail: &EventDetail, enrichment: &Enrichment, timezone: Tz) -> Option<String> {
    let event_budget = detail.budget_limit()?;
    let store_budget = amount(enrichment, EnrichmentField::MaxSpend)?;
    if event_budget == store_budget {
        return None;
    }
    let as_of = enrichment
        .data_as_of()
        .map(|instant| format!(" (as of {})", format_uk_date(instant, timezone)))
        .unwrap_or_default();
    Some(format!(
        "Budget when this alert was raised: {}. Current budget: {}{}.",
        format_currency(event_budget),
        format_currency(store_budget),
        as_of
    ))
}

fn reason_text(detail: &EventDetail) -> Option<&'static str> {
    match detail {
        EventDetail::LeaseTerminated { reason, .. } => Some(match reason {
            TerminationReason::Expired => "The lease reached its expiry date.",
            TerminationReason::BudgetExceeded { .. } => "The lease exceeded its budget.",
            TerminationReason::ManuallyTerminated { .. } => {
                "The lease was ended by an administrator."
            }
            TerminationReason::AccountQuarantined => "The account was quarantined.",
            TerminationReason::Ejected => "The account was removed from the lease.",
        }),
        EventDetail::LeaseFrozen { reason, .. } => Some(match reason {
            FreezeReason::Expired { .. } => "The lease reached its duration threshold.",
            FreezeReason::BudgetExceeded { .. } => "The lease reached its budget threshold.",
            FreezeReason::ManuallyFrozen { .. } => "The lease was frozen by an administrator.",
        }),
        _ => None,
    }
}

fn text(enrichment: &Enrichment, field: EnrichmentField) -> Option<&str> {
    match enrichment.get(field) {
        Some(EnrichedValue::Text(value)) => Some(value.as_str()),
        _ => None,
    }
}

fn amount(enrichment: &Enrichment, field: EnrichmentField) -> Option<Money> {
    match enrichment.get(field) {
        Some(EnrichedValue::Amount(value)) => Some(*value),
        _ => None,
    }
}

fn instant(enrichment: &Enrichment, field: EnrichmentField) -> Option<DateTime<Utc>> {
    match enrichment.get(field) {
        Some(EnrichedValue::Instant(value)) => Some(*value),
        _ => None,
    }
}

fn hours(enrichment: &Enrichment, field: EnrichmentField) -> Option<Hours> {
    match enrichment.get(field) {
        Some(EnrichedValue::Hours(value)) => Some(*value),
        _ => None,
    }
}
