//! Driven port for operational alarms.
//!
//! Alarms are distinct from ordinary failure metrics: they page someone.

use async_trait::async_trait;
use serde::Serialize;

use super::define_port_error;

/// Alarm severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Possible data leak, tampering, or misconfigured trust boundary.
    Security,
    /// Credential or configuration failure.
    Critical,
    /// Events stuck in the dead-letter area.
    Operational,
}

/// One alarm. Never carries personal data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationalAlert {
    /// Severity.
    pub severity: AlertSeverity,
    /// Stable alarm code.
    pub code: String,
    /// Originating event, when there is one.
    pub event_id: Option<String>,
    /// Redacted summary.
    pub summary: String,
}

define_port_error! {
    /// Errors raised by alert adapters.
    pub enum OperationalAlertsError {
        /// The alert sink rejected the alarm.
        Sink { message: String } => "alert sink failed: {message}",
    }
}

/// Port for raising alarms.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OperationalAlerts: Send + Sync {
    /// Raise one alarm.
    async fn raise(&self, alert: &OperationalAlert) -> Result<(), OperationalAlertsError>;
}
