//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! This module follows the hexagonal architecture pattern, providing concrete
//! implementations of domain port traits:
//!
//! - **notify**: reqwest-backed transactional email provider
//! - **memory**: in-process stores, queues and the lease directory snapshot
//! - **secrets**: environment and file-backed secret sources
//! - **alerts**: tracing-backed operational alarms
//! - **metrics**: Prometheus-backed metrics exporters (feature-gated)
//!
//! Adapters are thin translators that convert between domain types and
//! infrastructure-specific representations. They contain no business logic.

pub mod alerts;
pub mod memory;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod notify;
pub mod secrets;
