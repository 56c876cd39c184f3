//! Notification sink seam.
//!
//! The connectivity layer reports user-facing conditions (fallback mode,
//! restoration, offline state, critical alerts) as [`Notification`] records
//! through a host-supplied sink. How they are rendered is the host's concern.

use crate::models::Notification;
use std::sync::Mutex;

/// Destination for user-facing notification records.
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification. Must not block.
    fn notify(&self, notification: Notification);
}

/// Default sink that writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, notification: Notification) {
        log::info!(
            "[notify] {:?} {}: {} (persistent={})",
            notification.priority,
            notification.title,
            notification.body,
            notification.persistent,
        );
    }
}

/// Sink that records notifications in memory; useful for tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Notification>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything delivered so far.
    pub fn records(&self) -> Vec<Notification> {
        self.records.lock().expect("sink lock poisoned").clone()
    }

    /// Drop all recorded notifications.
    pub fn clear(&self) {
        self.records.lock().expect("sink lock poisoned").clear();
    }
}

impl NotificationSink for MemorySink {
    fn notify(&self, notification: Notification) {
        self.records
            .lock()
            .expect("sink lock poisoned")
            .push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotificationPriority;

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.notify(Notification::new(
            "a",
            "first",
            "",
            NotificationPriority::Low,
            false,
        ));
        sink.notify(Notification::new(
            "b",
            "second",
            "",
            NotificationPriority::High,
            true,
        ));
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].title, "first");
        assert_eq!(records[1].title, "second");
    }
}
