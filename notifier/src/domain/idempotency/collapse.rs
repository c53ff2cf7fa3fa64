//! Short-window collapse of repeated notifications with distinct ids.
//!
//! This is spam prevention rather than correctness: two events for the same
//! recipient, lease and kind inside the window produce one email.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::domain::event::{EventKind, LeaseUuid, ValidatedEvent};

/// Collapse key: canonical recipient, lease and kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollapseKey {
    recipient: String,
    lease: LeaseUuid,
    kind: EventKind,
}

impl CollapseKey {
    /// Key for `event`.
    pub fn for_event(event: &ValidatedEvent) -> Self {
        Self {
            recipient: event.recipient().canonical(),
            lease: *event.lease().uuid(),
            kind: event.kind(),
        }
    }
}

/// In-process collapse window.
#[derive(Debug)]
pub struct CollapseWindow {
    window: TimeDelta,
    claims: Mutex<HashMap<CollapseKey, DateTime<Utc>>>,
}

impl CollapseWindow {
    /// Window of `window` length. A zero window disables collapsing.
    pub fn new(window: Duration) -> Self {
        Self {
            window: TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX),
            claims: Mutex::new(HashMap::new()),
        }
    }

    /// Claim `key` at `now`. Returns `false` when a live claim exists.
    pub fn try_claim(&self, key: &CollapseKey, now: DateTime<Utc>) -> bool {
        if self.window <= TimeDelta::zero() {
            return true;
        }
        let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        claims.retain(|_, claimed_at| now - *claimed_at < self.window);
        if claims.contains_key(key) {
            return false;
        }
        claims.insert(key.clone(), now);
        true
    }

    /// Give back a claim whose event did not end in a send.
    pub fn release(&self, key: &CollapseKey) {
        let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        claims.remove(key);
    }

    /// Live claims at `now`.
    pub fn live_claims(&self, now: DateTime<Utc>) -> usize {
        let claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        claims
            .values()
            .filter(|claimed_at| now - **claimed_at < self.window)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::domain::event::RecipientEmail;

    fn key(recipient: &str, kind: EventKind) -> CollapseKey {
        CollapseKey {
            recipient: RecipientEmail::new(recipient)
                .expect("valid email")
                .canonical(),
            lease: LeaseUuid::new("11111111-1111-1111-1111-111111111111").expect("uuid"),
            kind,
        }
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
            .single()
            .expect("valid instant")
            + TimeDelta::seconds(seconds)
    }

    #[test]
    fn second_claim_inside_window_is_refused() {
        let window = CollapseWindow::new(Duration::from_secs(30));
        let first = key("a@gov.uk", EventKind::LeaseBudgetThresholdAlert);
        let second = key("A@GOV.UK", EventKind::LeaseBudgetThresholdAlert);
        assert!(window.try_claim(&first, at(0)));
        assert!(!window.try_claim(&second, at(29)));
        assert!(window.try_claim(&second, at(30)));
    }

    #[test]
    fn different_kinds_do_not_collapse() {
        let window = CollapseWindow::new(Duration::from_secs(30));
        assert!(window.try_claim(&key("a@gov.uk", EventKind::LeaseFrozen), at(0)));
        assert!(window.try_claim(&key("a@gov.uk", EventKind::LeaseExpired), at(1)));
        assert_eq!(window.live_claims(at(2)), 2);
        assert_eq!(window.live_claims(at(30)), 1);
        assert_eq!(window.live_claims(at(31)), 0);
    }

    #[test]
    fn released_claims_can_be_retaken() {
        let window = CollapseWindow::new(Duration::from_secs(30));
        let claim = key("a@gov.uk", EventKind::LeaseFrozen);
        assert!(window.try_claim(&claim, at(0)));
        window.release(&claim);
        assert!(window.try_claim(&claim, at(1)));
    }

    #[test]
    fn zero_window_never_collapses() {
        let window = CollapseWindow::new(Duration::ZERO);
        let claim = key("a@gov.uk", EventKind::LeaseFrozen);
        assert!(window.try_claim(&claim, at(0)));
        assert!(window.try_claim(&claim, at(0)));
    }
}
