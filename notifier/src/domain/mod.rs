//! Domain primitives, stages and the pipeline orchestrator.
//!
//! Purpose: Define strongly typed lease events, the stages that turn an
//! inbound event into a verified and personalised message, and the ports
//! through which those stages reach stores and the email provider.
//!
//! Public surface:
//! - InboundEvent / ValidatedEvent: raw envelope and its validated form.
//! - EventKind: closed registry of accepted event types.
//! - NotificationPipeline: orchestrator returning a PipelineReport.

pub mod credentials;
pub mod delivery;
pub mod enrichment;
pub mod error;
pub mod event;
pub mod formatting;
pub mod idempotency;
pub mod ownership;
pub mod pipeline;
pub mod ports;
pub mod preferences;
pub mod redaction;
pub mod schema;
pub mod templates;

pub use self::error::{ClassifiedError, FailureClass, PipelineFailure, PipelineStage};
pub use self::event::{
    EventId, EventKind, InboundEvent, Money, Percentage, RecipientEmail, ValidatedEvent,
};
pub use self::pipeline::{
    NotificationPipeline, NotificationPipelinePorts, PipelineConfig, PipelineReport,
    PipelineState,
};
