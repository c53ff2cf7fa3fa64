//! Lease lifecycle notification pipeline.
//!
//! Consumes lease lifecycle and monitoring events, verifies the claimed
//! recipient against authoritative stores, enriches and personalises the
//! message, and delivers it through a transactional email provider with
//! exactly-once semantics per event identifier.

pub mod config;
pub mod domain;
pub mod outbound;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use domain::{NotificationPipeline, PipelineReport, PipelineState};
