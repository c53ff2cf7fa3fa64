//! Driven port for scheduled send retries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::define_port_error;
use crate::domain::delivery::PreparedMessage;
use crate::domain::event::{EventKind, InboundEvent};

/// A prepared send parked for a later attempt.
///
/// Retries re-enter at the send stage only, so everything the send needs is
/// captured here.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDelivery {
    /// Original envelope, kept for dead-lettering.
    pub event: InboundEvent,
    /// Validated event kind.
    pub kind: EventKind,
    /// Event origin time, for latency measurement.
    pub event_time: DateTime<Utc>,
    /// Message ready to send.
    pub message: PreparedMessage,
    /// Send attempts made so far.
    pub attempts: u32,
    /// Earliest time for the next attempt.
    pub next_attempt_at: DateTime<Utc>,
}

define_port_error! {
    /// Errors raised by retry queue adapters.
    pub enum RetryQueueError {
        /// The queue could not be reached.
        Unavailable { message: String } => "retry queue unavailable: {message}",
    }
}

/// Port for scheduling and claiming due retries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RetryQueue: Send + Sync {
    /// Park a delivery.
    async fn schedule(&self, pending: PendingDelivery) -> Result<(), RetryQueueError>;

    /// Remove and return up to `limit` deliveries due at `now`, earliest first.
    async fn take_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PendingDelivery>, RetryQueueError>;

    /// Number of parked deliveries.
    async fn pending_count(&self) -> Result<usize, RetryQueueError>;
}
