use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::envelope::now_ms;

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Medium,
    High,
    Critical,
}

/// Record handed to the host application's notification sink.
///
/// The connectivity layer emits these for degradation notices ("backup mode
/// active"), restoration confirmations, offline warnings, and critical
/// system alerts arriving over the polling fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Unique notification id.
    pub id: String,
    /// Machine-readable kind, e.g. `"fallback_active"` or `"system_alert"`.
    pub kind: String,
    /// Short headline.
    pub title: String,
    /// Longer description.
    pub body: String,
    /// Display severity.
    pub priority: NotificationPriority,
    /// Whether the notification should stay until explicitly dismissed.
    pub persistent: bool,
    /// Millis since Unix epoch when the notification was created.
    pub timestamp: u64,
}

impl Notification {
    /// Create a new notification with a fresh id and timestamp.
    pub fn new(
        kind: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        priority: NotificationPriority,
        persistent: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            title: title.into(),
            body: body.into(),
            priority,
            persistent,
            timestamp: now_ms(),
        }
    }

    /// Build a notification from a polled alert item, promoting
    /// critical-priority alerts to persistent display.
    pub fn from_alert_item(item: &Value) -> Self {
        let title = item
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("System alert")
            .to_string();
        let body = item
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let critical = item
            .get("priority")
            .and_then(Value::as_str)
            .map(|p| p.eq_ignore_ascii_case("critical"))
            .unwrap_or(false);
        Self::new(
            "system_alert",
            title,
            body,
            if critical {
                NotificationPriority::Critical
            } else {
                NotificationPriority::High
            },
            critical,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_critical_alert_is_persistent() {
        let n = Notification::from_alert_item(&json!({
            "title": "Disk full",
            "message": "warehouse-db volume at 98%",
            "priority": "critical",
        }));
        assert!(n.persistent);
        assert_eq!(n.priority, NotificationPriority::Critical);
        assert_eq!(n.title, "Disk full");
    }

    #[test]
    fn test_non_critical_alert_is_transient() {
        let n = Notification::from_alert_item(&json!({
            "title": "Slow queries",
            "priority": "high",
        }));
        assert!(!n.persistent);
        assert_eq!(n.priority, NotificationPriority::High);
    }
}
