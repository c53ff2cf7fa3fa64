//! Driven port for the dead-letter area.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::define_port_error;
use crate::domain::error::PipelineFailure;
use crate::domain::event::InboundEvent;

/// Why an entry was dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// Permanent failure, kept for audit.
    Permanent,
    /// Critical failure awaiting operator action.
    Critical,
    /// Retries were exhausted.
    RetriesExhausted,
    /// Held for manual review of a data conflict.
    ManualReview,
}

/// One dead-lettered event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Entry identifier.
    pub id: Uuid,
    /// Original envelope exactly as received.
    pub event: InboundEvent,
    /// Final classified failure.
    pub failure: PipelineFailure,
    /// Why the entry exists.
    pub reason: DeadLetterReason,
    /// Send attempts made before dead-lettering.
    pub attempts: u32,
    /// When the entry was written.
    pub dead_lettered_at: DateTime<Utc>,
}

define_port_error! {
    /// Errors raised by dead-letter adapters.
    pub enum DeadLetterQueueError {
        /// The queue could not be reached.
        Unavailable { message: String } => "dead-letter queue unavailable: {message}",
    }
}

/// Durable holding area for failed events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeadLetterQueue: Send + Sync {
    /// Store an entry.
    async fn push(&self, entry: DeadLetterEntry) -> Result<(), DeadLetterQueueError>;

    /// Remove and return an entry for re-drive.
    async fn take(&self, id: Uuid) -> Result<Option<DeadLetterEntry>, DeadLetterQueueError>;

    /// All entries, oldest first.
    async fn list(&self) -> Result<Vec<DeadLetterEntry>, DeadLetterQueueError>;
}
