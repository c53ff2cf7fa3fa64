//! Scheduled send retries kept in memory.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::lock;
use crate::domain::ports::{PendingDelivery, RetryQueue, RetryQueueError};

/// Parked deliveries awaiting their next attempt.
#[derive(Debug, Default)]
pub struct InMemoryRetryQueue {
    pending: Mutex<Vec<PendingDelivery>>,
}

impl InMemoryRetryQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Earliest scheduled attempt, if anything is parked.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        lock(&self.pending)
            .iter()
            .map(|pending| pending.next_attempt_at)
            .min()
    }
}

#[async_trait]
impl RetryQueue for InMemoryRetryQueue {
    async fn schedule(&self, pending: PendingDelivery) -> Result<(), RetryQueueError> {
        lock(&self.pending).push(pending);
        Ok(())
    }

    async fn take_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PendingDelivery>, RetryQueueError> {
        let mut pending = lock(&self.pending);
        let (mut due, waiting): (Vec<_>, Vec<_>) = pending
            .drain(..)
            .partition(|delivery| delivery.next_attempt_at <= now);
        due.sort_by_key(|delivery| delivery.next_attempt_at);
        let deferred = if due.len() > limit {
            due.split_off(limit)
        } else {
            Vec::new()
        };
        pending.extend(waiting);
        pending.extend(deferred);
        Ok(due)
    }

    async fn pending_count(&self) -> Result<usize, RetryQueueError> {
        Ok(lock(&self.pending).len())
    }
}
