//! Operational alarms emitted as structured log events.
//!
//! Log shipping turns `alert = true` lines into pages; the adapter itself
//! only decides the level.

use async_trait::async_trait;
use tracing::{error, warn};

use crate::domain::ports::{
    AlertSeverity, OperationalAlert, OperationalAlerts, OperationalAlertsError,
};

/// `OperationalAlerts` adapter backed by `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingOperationalAlerts;

#[async_trait]
impl OperationalAlerts for TracingOperationalAlerts {
    async fn raise(&self, alert: &OperationalAlert) -> Result<(), OperationalAlertsError> {
        let event_id = alert.event_id.as_deref().unwrap_or("none");
        match alert.severity {
            AlertSeverity::Security => error!(
                alert = true,
                security = true,
                code = %alert.code,
                event_id,
                summary = %alert.summary,
                "security alarm"
            ),
            AlertSeverity::Critical => error!(
                alert = true,
                code = %alert.code,
                event_id,
                summary = %alert.summary,
                "critical alarm"
            ),
            AlertSeverity::Operational => warn!(
                alert = true,
                code = %alert.code,
                event_id,
                summary = %alert.summary,
                "operational alarm"
            ),
        }
        Ok(())
    }
}
