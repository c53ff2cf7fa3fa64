//! Send retry policy and backoff jitter.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Bounded exponential backoff for retriable send failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum send attempts per event, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Ceiling on any single delay.
    pub max_backoff: Duration,
    /// How late a drain may pick up a due retry while the event stays
    /// reserved.
    pub drain_grace: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(3600),
            drain_grace: Duration::from_secs(900),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt may follow `attempts` failed ones.
    pub fn allows_another(&self, attempts: u32) -> bool {
        attempts < self.max_attempts.max(1)
    }

    /// Un-jittered delay after failed attempt number `attempt` (1-based).
    ///
    /// # Examples
    /// ```
    /// use std::time::Duration;
    /// use lease_notifier::domain::pipeline::RetryPolicy;
    ///
    /// let policy = RetryPolicy::default();
    /// assert_eq!(policy.base_delay(1), Duration::from_secs(60));
    /// assert_eq!(policy.base_delay(3), Duration::from_secs(240));
    /// assert_eq!(policy.base_delay(12), Duration::from_secs(3600));
    /// ```
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = 2_u32.saturating_pow(attempt.saturating_sub(1));
        let base_ms = u64::try_from(self.initial_backoff.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_backoff.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(u64::from(exponent)).min(max_ms))
    }
}

/// Retry backoff jitter abstraction.
pub trait BackoffJitter: Send + Sync {
    /// Return a jittered delay from the exponential base delay.
    ///
    /// ```rust
    /// use lease_notifier::domain::pipeline::BackoffJitter;
    /// use chrono::{TimeZone, Utc};
    /// use std::time::Duration;
    /// struct DeterministicJitter;
    /// impl BackoffJitter for DeterministicJitter {
    ///     fn jittered_delay(&self, base: Duration, attempt: u32, _now: chrono::DateTime<chrono::Utc>) -> Duration {
    ///         base + Duration::from_millis(u64::from(attempt) * 5)
    ///     }
    /// }
    /// let jitter = DeterministicJitter;
    /// let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("valid time");
    /// let delay = jitter.jittered_delay(Duration::from_millis(100), 2, now);
    /// assert_eq!(delay, Duration::from_millis(110));
    /// ```
    fn jittered_delay(&self, base: Duration, attempt: u32, now: DateTime<Utc>) -> Duration;
}

/// Adds up to a quarter of the base delay, drawn from a small PRNG.
pub struct RandomJitter(Mutex<SmallRng>);

impl Default for RandomJitter {
    fn default() -> Self {
        Self(Mutex::new(SmallRng::from_entropy()))
    }
}

impl RandomJitter {
    /// Deterministic jitter for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self(Mutex::new(SmallRng::seed_from_u64(seed)))
    }
}

impl BackoffJitter for RandomJitter {
    fn jittered_delay(&self, base: Duration, _attempt: u32, _now: DateTime<Utc>) -> Duration {
        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let max_extra = (base_ms / 4).max(1);
        let extra = self
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(0..=max_extra);
        Duration::from_millis(base_ms.saturating_add(extra))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    #[rstest]
    #[case(1, 60)]
    #[case(2, 120)]
    #[case(4, 480)]
    #[case(7, 3600)]
    #[case(40, 3600)]
    fn backoff_doubles_up_to_the_ceiling(#[case] attempt: u32, #[case] seconds: u64) {
        assert_eq!(
            RetryPolicy::default().base_delay(attempt),
            Duration::from_secs(seconds)
        );
    }

    #[rstest]
    #[case(1, true)]
    #[case(3, true)]
    #[case(4, false)]
    fn attempts_are_bounded(#[case] attempts: u32, #[case] allowed: bool) {
        assert_eq!(RetryPolicy::default().allows_another(attempts), allowed);
    }

    #[test]
    fn jitter_stays_within_a_quarter_of_the_base() {
        let jitter = RandomJitter::seeded(7);
        let now = Utc
            .with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
            .single()
            .expect("valid");
        let base = Duration::from_secs(60);
        for attempt in 1..50 {
            let delay = jitter.jittered_delay(base, attempt, now);
            assert!(delay >= base);
            assert!(delay <= base + Duration::from_secs(15));
        }
    }
}
