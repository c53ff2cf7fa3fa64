//! Environment-driven configuration for idempotency retention.

use std::time::Duration;

/// Environment variable holding the upstream replay window, in hours.
pub const REPLAY_WINDOW_HOURS_ENV: &str = "NOTIFIER_REPLAY_WINDOW_HOURS";

/// Environment abstraction for idempotency configuration lookups.
///
/// This trait allows testing with mock environments without unsafe env var
/// mutations.
pub trait IdempotencyEnv {
    /// Fetch a string value by name.
    fn string(&self, name: &str) -> Option<String>;
}

/// Environment access backed by the real process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultIdempotencyEnv;

impl IdempotencyEnv for DefaultIdempotencyEnv {
    fn string(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Retention and freshness settings for event idempotency.
///
/// Records live for [`IdempotencyConfig::TTL_MULTIPLIER`] times the upstream
/// replay window. Events older than that retention are rejected outright.
///
/// # Example
///
/// ```
/// # use lease_notifier::domain::idempotency::IdempotencyConfig;
/// # use std::time::Duration;
/// let config = IdempotencyConfig::default();
/// assert_eq!(config.ttl(), Duration::from_secs(7 * 24 * 3600));
///
/// let custom = IdempotencyConfig::from_replay_window_hours(2);
/// assert_eq!(custom.ttl(), Duration::from_secs(14 * 3600));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyConfig {
    ttl: Duration,
    max_future_skew: Duration,
}

impl IdempotencyConfig {
    /// Default upstream replay window in hours.
    const DEFAULT_REPLAY_WINDOW_HOURS: u64 = 24;

    /// Minimum replay window in hours.
    const MIN_REPLAY_WINDOW_HOURS: u64 = 1;

    /// Maximum replay window in hours (90 days).
    const MAX_REPLAY_WINDOW_HOURS: u64 = 24 * 90;

    /// Retention multiple applied to the replay window.
    pub const TTL_MULTIPLIER: u64 = 7;

    /// Tolerated clock skew for event timestamps in the future.
    const DEFAULT_FUTURE_SKEW: Duration = Duration::from_secs(5 * 60);

    /// Load configuration from the real process environment.
    ///
    /// Reads `NOTIFIER_REPLAY_WINDOW_HOURS` (default: 24), clamped to
    /// [1, 2160].
    pub fn from_env() -> Self {
        Self::from_env_with(&DefaultIdempotencyEnv)
    }

    /// Load configuration from a custom environment source.
    pub fn from_env_with(env: &impl IdempotencyEnv) -> Self {
        let hours = env
            .string(REPLAY_WINDOW_HOURS_ENV)
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(Self::DEFAULT_REPLAY_WINDOW_HOURS);
        Self::from_replay_window_hours(hours)
    }

    /// Derive retention from an upstream replay window in hours.
    pub fn from_replay_window_hours(hours: u64) -> Self {
        let hours = hours.clamp(Self::MIN_REPLAY_WINDOW_HOURS, Self::MAX_REPLAY_WINDOW_HOURS);
        Self {
            ttl: Duration::from_secs(
                hours
                    .saturating_mul(Self::TTL_MULTIPLIER)
                    .saturating_mul(3600),
            ),
            max_future_skew: Self::DEFAULT_FUTURE_SKEW,
        }
    }

    /// Create with explicit TTL (for testing).
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            max_future_skew: Self::DEFAULT_FUTURE_SKEW,
        }
    }

    /// Record retention. Also the maximum accepted event age.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Largest accepted distance of an event timestamp into the future.
    pub fn max_future_skew(&self) -> Duration {
        self.max_future_skew
    }
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self::from_replay_window_hours(Self::DEFAULT_REPLAY_WINDOW_HOURS)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    struct MapEnv(HashMap<&'static str, &'static str>);

    impl IdempotencyEnv for MapEnv {
        fn string(&self, name: &str) -> Option<String> {
            self.0.get(name).map(|value| (*value).to_owned())
        }
    }

    fn env_with(value: Option<&'static str>) -> MapEnv {
        MapEnv(
            value
                .map(|value| HashMap::from([(REPLAY_WINDOW_HOURS_ENV, value)]))
                .unwrap_or_default(),
        )
    }

    #[rstest]
    #[case(None, 7 * 24)]
    #[case(Some("2"), 14)]
    #[case(Some(" 48 "), 7 * 48)]
    #[case(Some("0"), 7)]
    #[case(Some("100000"), 7 * 24 * 90)]
    #[case(Some("not-a-number"), 7 * 24)]
    fn ttl_is_seven_replay_windows(#[case] raw: Option<&'static str>, #[case] ttl_hours: u64) {
        let config = IdempotencyConfig::from_env_with(&env_with(raw));
        assert_eq!(config.ttl(), Duration::from_secs(ttl_hours * 3600));
    }
}
