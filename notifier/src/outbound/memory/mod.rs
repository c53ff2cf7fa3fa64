//! In-process adapters.
//!
//! Every adapter here keeps its state behind a `std::sync::Mutex` and never
//! holds the lock across an await point. They back the CLI and the
//! integration tests; durable deployments supply their own adapters for the
//! same ports.

mod dead_letter_queue;
mod idempotency_store;
mod lease_directory;
mod preference_repository;
mod retry_queue;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use dead_letter_queue::InMemoryDeadLetterQueue;
pub use idempotency_store::InMemoryIdempotencyStore;
pub use lease_directory::{DirectorySnapshot, InMemoryLeaseDirectory};
pub use preference_repository::InMemoryPreferenceRepository;
pub use retry_queue::InMemoryRetryQueue;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
