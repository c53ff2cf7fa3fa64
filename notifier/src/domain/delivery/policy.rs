//! Circuit breaker state machine guarding the delivery provider.
//!
//! Only retriable provider failures move the breaker. Permanent and critical
//! failures say nothing about provider health.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open the breaker.
    pub failure_threshold: u32,
    /// Cooldown period while the breaker remains open.
    pub open_cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_cooldown: Duration::from_secs(60),
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerState {
    /// Normal operation.
    Closed,
    /// Calls are blocked until cooldown elapses.
    Open,
    /// One probe call is allowed.
    HalfOpen,
}

/// Admission decision for one provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Call may proceed.
    Allowed,
    /// Breaker is open; retry no earlier than the given delay.
    DeniedByCircuit {
        /// Time left in the cooldown.
        retry_after: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitInternalState {
    Closed { consecutive_failures: u32 },
    Open { opened_at: DateTime<Utc> },
    HalfOpen { probe_in_flight: bool },
}

/// Mutable breaker shared across sends.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitInternalState,
}

impl CircuitBreaker {
    /// Build a closed breaker.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use chrono::{TimeZone, Utc};
    /// use lease_notifier::domain::delivery::{
    ///     AdmissionDecision, CircuitBreaker, CircuitBreakerConfig,
    /// };
    ///
    /// let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("valid");
    /// let mut breaker = CircuitBreaker::new(CircuitBreakerConfig {
    ///     failure_threshold: 1,
    ///     open_cooldown: Duration::from_secs(30),
    /// });
    /// assert_eq!(breaker.admit_call(now), AdmissionDecision::Allowed);
    /// breaker.record_failure(now);
    /// assert!(matches!(
    ///     breaker.admit_call(now),
    ///     AdmissionDecision::DeniedByCircuit { .. }
    /// ));
    /// ```
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: CircuitBreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                open_cooldown: config.open_cooldown,
            },
            state: CircuitInternalState::Closed {
                consecutive_failures: 0,
            },
        }
    }

    /// Attempt to admit one provider call.
    pub fn admit_call(&mut self, now: DateTime<Utc>) -> AdmissionDecision {
        match self.state {
            CircuitInternalState::Closed { .. } => AdmissionDecision::Allowed,
            CircuitInternalState::Open { opened_at } => {
                let remaining = cooldown_remaining(opened_at, now, self.config.open_cooldown);
                if remaining.is_zero() {
                    self.state = CircuitInternalState::HalfOpen {
                        probe_in_flight: true,
                    };
                    AdmissionDecision::Allowed
                } else {
                    AdmissionDecision::DeniedByCircuit {
                        retry_after: remaining,
                    }
                }
            }
            CircuitInternalState::HalfOpen { probe_in_flight } => {
                if probe_in_flight {
                    AdmissionDecision::DeniedByCircuit {
                        retry_after: self.config.open_cooldown,
                    }
                } else {
                    self.state = CircuitInternalState::HalfOpen {
                        probe_in_flight: true,
                    };
                    AdmissionDecision::Allowed
                }
            }
        }
    }

    /// Record a call that reached a healthy provider.
    pub fn record_success(&mut self) {
        self.state = CircuitInternalState::Closed {
            consecutive_failures: 0,
        };
    }

    /// Record a retriable provider failure.
    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.state = match self.state {
            CircuitInternalState::Closed {
                consecutive_failures,
            } => {
                let next_failures = consecutive_failures.saturating_add(1);
                if next_failures >= self.config.failure_threshold {
                    CircuitInternalState::Open { opened_at: now }
                } else {
                    CircuitInternalState::Closed {
                        consecutive_failures: next_failures,
                    }
                }
            }
            CircuitInternalState::HalfOpen { .. } => CircuitInternalState::Open { opened_at: now },
            CircuitInternalState::Open { opened_at } => CircuitInternalState::Open { opened_at },
        };
    }

    /// Release a half-open probe whose outcome said nothing about health.
    pub fn record_inconclusive(&mut self) {
        if let CircuitInternalState::HalfOpen { .. } = self.state {
            self.state = CircuitInternalState::HalfOpen {
                probe_in_flight: false,
            };
        }
    }

    /// Snapshot current circuit breaker state.
    pub fn state(&self) -> CircuitBreakerState {
        match self.state {
            CircuitInternalState::Closed { .. } => CircuitBreakerState::Closed,
            CircuitInternalState::Open { .. } => CircuitBreakerState::Open,
            CircuitInternalState::HalfOpen { .. } => CircuitBreakerState::HalfOpen,
        }
    }
}

fn cooldown_remaining(opened_at: DateTime<Utc>, now: DateTime<Utc>, cooldown: Duration) -> Duration {
    let Ok(elapsed) = now.signed_duration_since(opened_at).to_std() else {
        return cooldown;
    };
    cooldown.saturating_sub(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use rstest::{fixture, rstest};

    #[fixture]
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
            .single()
            .expect("valid instant")
    }

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            open_cooldown: Duration::from_secs(30),
        })
    }

    #[rstest]
    fn opens_after_consecutive_failures(now: DateTime<Utc>) {
        let mut breaker = breaker(3);
        breaker.record_failure(now);
        breaker.record_failure(now);
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        breaker.record_failure(now);
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert_eq!(
            breaker.admit_call(now + TimeDelta::seconds(10)),
            AdmissionDecision::DeniedByCircuit {
                retry_after: Duration::from_secs(20)
            }
        );
    }

    #[rstest]
    fn success_resets_the_failure_count(now: DateTime<Utc>) {
        let mut breaker = breaker(2);
        breaker.record_failure(now);
        breaker.record_success();
        breaker.record_failure(now);
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }

    #[rstest]
    fn half_open_admits_a_single_probe(now: DateTime<Utc>) {
        let mut breaker = breaker(1);
        breaker.record_failure(now);
        let later = now + TimeDelta::seconds(30);
        assert_eq!(breaker.admit_call(later), AdmissionDecision::Allowed);
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);
        assert!(matches!(
            breaker.admit_call(later),
            AdmissionDecision::DeniedByCircuit { .. }
        ));
    }

    #[rstest]
    #[case::probe_succeeds(true, CircuitBreakerState::Closed)]
    #[case::probe_fails(false, CircuitBreakerState::Open)]
    fn probe_outcome_decides_next_state(
        now: DateTime<Utc>,
        #[case] succeeded: bool,
        #[case] expected: CircuitBreakerState,
    ) {
        let mut breaker = breaker(1);
        breaker.record_failure(now);
        let later = now + TimeDelta::seconds(31);
        assert_eq!(breaker.admit_call(later), AdmissionDecision::Allowed);
        if succeeded {
            breaker.record_success();
        } else {
            breaker.record_failure(later);
        }
        assert_eq!(breaker.state(), expected);
    }

    #[rstest]
    fn inconclusive_probe_frees_the_slot(now: DateTime<Utc>) {
        let mut breaker = breaker(1);
        breaker.record_failure(now);
        let later = now + TimeDelta::seconds(30);
        assert_eq!(breaker.admit_call(later), AdmissionDecision::Allowed);
        breaker.record_inconclusive();
        assert_eq!(breaker.admit_call(later), AdmissionDecision::Allowed);
    }
}
