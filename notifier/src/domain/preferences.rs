//! Recipient notification preferences.
//!
//! Preferences are an optional extension point: absence is never an error
//! and resolves to instant delivery in the default timezone. Digest
//! frequencies are recorded but delivered instantly.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Requested delivery cadence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationFrequency {
    /// Send each notification as it happens.
    #[default]
    Instant,
    /// Daily digest.
    Daily,
    /// Weekly digest.
    Weekly,
}

/// One entry in a recipient's append-only preference history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientPreference {
    /// Whether notifications are enabled.
    pub notifications_enabled: bool,
    /// Delivery cadence.
    #[serde(default)]
    pub frequency: NotificationFrequency,
    /// IANA timezone name.
    #[serde(default)]
    pub timezone: Option<String>,
    /// When this entry was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Preference after defaults are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectivePreference {
    /// Whether to send at all.
    pub enabled: bool,
    /// Requested cadence.
    pub frequency: NotificationFrequency,
    /// Timezone for rendered dates.
    pub timezone: Tz,
}

impl EffectivePreference {
    /// Defaults used when no preference is stored.
    pub fn defaults(timezone: Tz) -> Self {
        Self {
            enabled: true,
            frequency: NotificationFrequency::Instant,
            timezone,
        }
    }

    /// Apply defaults to an optional stored preference.
    ///
    /// Unknown timezone names fall back to `default_timezone`.
    ///
    /// # Examples
    /// ```
    /// use lease_notifier::domain::preferences::EffectivePreference;
    ///
    /// let effective = EffectivePreference::resolve(None, chrono_tz::Europe::London);
    /// assert!(effective.enabled);
    /// ```
    pub fn resolve(stored: Option<&RecipientPreference>, default_timezone: Tz) -> Self {
        let Some(stored) = stored else {
            return Self::defaults(default_timezone);
        };
        let timezone = stored
            .timezone
            .as_deref()
            .and_then(|name| name.parse::<Tz>().ok())
            .unwrap_or(default_timezone);
        Self {
            enabled: stored.notifications_enabled,
            frequency: stored.frequency,
            timezone,
        }
    }
}
