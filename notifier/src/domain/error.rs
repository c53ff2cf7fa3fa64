//! Failure classification shared by every pipeline stage.
//!
//! Stages return typed errors; only the orchestrator turns a classified
//! failure into a retry, a dead-letter entry, or a terminal report.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a failure should be treated by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Retrying cannot help. Dead-letter for audit.
    Permanent,
    /// Transient. Retry with backoff, then dead-letter.
    Retriable,
    /// Credential, configuration, or tamper problem. Alarm immediately.
    Critical,
}

impl FailureClass {
    /// Stable label for logs and metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Permanent => "permanent",
            Self::Retriable => "retriable",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Idempotency check and duplicate handling.
    Idempotency,
    /// Schema validation.
    Schema,
    /// Ownership verification.
    Ownership,
    /// Recipient preference lookup.
    Preferences,
    /// Store enrichment.
    Enrichment,
    /// Template selection and personalisation.
    Personalisation,
    /// Provider send.
    Send,
    /// End-to-end event deadline.
    Deadline,
}

impl PipelineStage {
    /// Stable label for logs and metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idempotency => "idempotency",
            Self::Schema => "schema",
            Self::Ownership => "ownership",
            Self::Preferences => "preferences",
            Self::Enrichment => "enrichment",
            Self::Personalisation => "personalisation",
            Self::Send => "send",
            Self::Deadline => "deadline",
        }
    }
}

/// Implemented by every stage error so the orchestrator can act on it.
pub trait ClassifiedError: std::error::Error {
    /// Failure class.
    fn class(&self) -> FailureClass;

    /// Short stable code for logs, metrics, and audit records.
    fn code(&self) -> &'static str;

    /// Whether the failure is a security anomaly. Anomalies always block
    /// sending and are logged at security severity.
    fn security_anomaly(&self) -> bool {
        false
    }

    /// Provider-suggested delay before retrying, when known.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Classified failure as recorded in reports and dead-letter entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineFailure {
    /// Stage that failed.
    pub stage: PipelineStage,
    /// Failure class.
    pub class: FailureClass,
    /// Whether the failure is a security anomaly.
    pub security_anomaly: bool,
    /// Stable failure code.
    pub code: String,
    /// Redacted human-readable detail.
    pub message: String,
    /// Retry hint from the failing dependency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<Duration>,
}

impl PipelineFailure {
    /// Capture a stage error.
    pub fn from_error(stage: PipelineStage, error: &impl ClassifiedError) -> Self {
        Self {
            stage,
            class: error.class(),
            security_anomaly: error.security_anomaly(),
            code: error.code().to_owned(),
            message: error.to_string(),
            retry_after: error.retry_after(),
        }
    }

    /// Build a failure that has no dedicated error type.
    pub fn new(
        stage: PipelineStage,
        class: FailureClass,
        code: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            class,
            security_anomaly: false,
            code: code.to_owned(),
            message: message.into(),
            retry_after: None,
        }
    }

    /// Mark the failure as a security anomaly.
    #[must_use]
    pub fn with_security_anomaly(mut self) -> Self {
        self.security_anomaly = true;
        self
    }
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failure at {} stage ({}): {}",
            self.class,
            self.stage.as_str(),
            self.code,
            self.message
        )
    }
}
