//! Dead-letter area kept in memory.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::lock;
use crate::domain::ports::{DeadLetterEntry, DeadLetterQueue, DeadLetterQueueError};

/// Insertion-ordered dead-letter entries.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterQueue {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl InMemoryDeadLetterQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of parked entries.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Whether nothing is parked.
    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}

#[async_trait]
impl DeadLetterQueue for InMemoryDeadLetterQueue {
    async fn push(&self, entry: DeadLetterEntry) -> Result<(), DeadLetterQueueError> {
        info!(
            dead_letter_id = %entry.id,
            event_id = %entry.event.id,
            reason = ?entry.reason,
            "event parked in dead-letter area"
        );
        lock(&self.entries).push(entry);
        Ok(())
    }

    async fn take(&self, id: Uuid) -> Result<Option<DeadLetterEntry>, DeadLetterQueueError> {
        let mut entries = lock(&self.entries);
        Ok(entries
            .iter()
            .position(|entry| entry.id == id)
            .map(|index| entries.remove(index)))
    }

    async fn list(&self) -> Result<Vec<DeadLetterEntry>, DeadLetterQueueError> {
        Ok(lock(&self.entries).clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::error::{FailureClass, PipelineFailure, PipelineStage};
    use crate::domain::ports::DeadLetterReason;
    use crate::test_support::events::approved_event;

    fn entry(event_id: &str) -> DeadLetterEntry {
        DeadLetterEntry {
            id: Uuid::new_v4(),
            event: approved_event(event_id, "alice@gov.uk"),
            failure: PipelineFailure::new(
                PipelineStage::Ownership,
                FailureClass::Permanent,
                "owner_mismatch",
                "claimed recipient does not own the lease",
            ),
            reason: DeadLetterReason::Permanent,
            attempts: 0,
            dead_lettered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn entries_list_oldest_first() {
        let queue = InMemoryDeadLetterQueue::new();
        queue.push(entry("evt-1")).await.expect("push");
        queue.push(entry("evt-2")).await.expect("push");

        let ids: Vec<String> = queue
            .list()
            .await
            .expect("list")
            .into_iter()
            .map(|entry| entry.event.id)
            .collect();
        assert_eq!(ids, vec!["evt-1".to_owned(), "evt-2".to_owned()]);
    }

    #[tokio::test]
    async fn take_removes_exactly_one_entry() {
        let queue = InMemoryDeadLetterQueue::new();
        let first = entry("evt-1");
        let first_id = first.id;
        queue.push(first).await.expect("push");
        queue.push(entry("evt-2")).await.expect("push");

        let taken = queue.take(first_id).await.expect("take");
        assert_eq!(taken.map(|entry| entry.event.id).as_deref(), Some("evt-1"));
        assert_eq!(queue.len(), 1);
        assert!(queue.take(first_id).await.expect("second take").is_none());
    }
}
