//! Severity-leveled alerts raised by the synchronizer's backoff escalation
//! and the Monitor's threshold checks. Kept as a separate, tiny seam (rather
//! than folding into [`crate::tenant::events::GatewayEvent`]) because alerts
//! are meant for an ops-facing sink (pager, Slack webhook, log line) while
//! manager events are meant for in-process subscribers like the CLI.

use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
            AlertSeverity::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub message: String,
}

/// Destination for alerts. The default [`TracingAlertSink`] just logs; a
/// deployment wires in a pager/webhook sink at the same seam.
pub trait AlertSink: Send + Sync {
    fn alert(&self, alert: Alert);
}

/// Default sink: routes severity to the matching `tracing` macro so an
/// alert is never silently dropped even with nothing else wired up.
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn alert(&self, alert: Alert) {
        match alert.severity {
            AlertSeverity::Info => tracing::info!(message = %alert.message, "alert"),
            AlertSeverity::Warning => tracing::warn!(message = %alert.message, "alert"),
            AlertSeverity::Error => tracing::error!(message = %alert.message, "alert"),
            AlertSeverity::Critical => tracing::error!(message = %alert.message, critical = true, "alert"),
        }
    }
}

pub fn default_alert_sink() -> Arc<dyn AlertSink> {
    Arc::new(TracingAlertSink)
}

/// In-memory sink for assertions in this crate's own tests and in other
/// modules' test code (synchronizer backoff alerts, monitor thresholds).
#[cfg(any(test, feature = "testing"))]
pub mod test_support {
    use super::{Alert, AlertSink};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct CollectingAlertSink {
        pub alerts: Mutex<Vec<Alert>>,
    }

    impl AlertSink for CollectingAlertSink {
        fn alert(&self, alert: Alert) {
            self.alerts.lock().unwrap().push(alert);
        }
    }
}
