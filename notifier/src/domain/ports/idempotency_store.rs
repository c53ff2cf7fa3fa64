//! Driven port for the idempotency store.
//!
//! The store is the only mutable shared state in the pipeline. Adapters must
//! make [`IdempotencyStore::check_and_reserve`] atomic so that two concurrent
//! attempts for the same event cannot both proceed to send.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::define_port_error;
use crate::domain::idempotency::{IdempotencyKey, IdempotencyRecord};

define_port_error! {
    /// Errors raised by idempotency store adapters.
    pub enum IdempotencyStoreError {
        /// The store could not be reached.
        Unavailable { message: String } => "idempotency store unavailable: {message}",
        /// The conditional write lost a race or was rejected.
        Conflict { message: String } => "idempotency store conflict: {message}",
    }
}

/// Result of an atomic check-and-reserve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// No record or live reservation existed; the caller now holds one.
    Reserved,
    /// A terminal outcome is already committed.
    Committed(IdempotencyRecord),
    /// Another attempt holds a live reservation.
    InFlight,
}

/// Port for idempotency records and in-flight reservations.
///
/// Reservations expire at their hold deadline so a crashed attempt cannot
/// suppress an event forever. Committed records expire at their TTL.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically inspect `key` and reserve it if free.
    async fn check_and_reserve(
        &self,
        key: &IdempotencyKey,
        now: DateTime<Utc>,
        hold_until: DateTime<Utc>,
    ) -> Result<ReserveOutcome, IdempotencyStoreError>;

    /// Extend a live reservation.
    async fn renew(
        &self,
        key: &IdempotencyKey,
        hold_until: DateTime<Utc>,
    ) -> Result<(), IdempotencyStoreError>;

    /// Replace the reservation with a terminal record.
    async fn commit(
        &self,
        key: &IdempotencyKey,
        record: IdempotencyRecord,
        expires_at: DateTime<Utc>,
    ) -> Result<(), IdempotencyStoreError>;

    /// Drop a reservation without committing. Committed records are kept.
    async fn release(&self, key: &IdempotencyKey) -> Result<(), IdempotencyStoreError>;

    /// Fetch a committed record.
    async fn get(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyStoreError>;

    /// Remove a committed record. Used only by operator re-drive.
    async fn forget(&self, key: &IdempotencyKey) -> Result<(), IdempotencyStoreError>;

    /// Remove expired records and reservations, returning how many went.
    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<usize, IdempotencyStoreError>;
}
