use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Scheduling priority of a polled resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Data resources approximated by the polling fallback when the real-time
/// channel is unusable. Each resource polls on its own independent timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Notifications,
    Inventory,
    CustomerActivity,
    Orders,
    Pricing,
    SystemAlerts,
}

impl Resource {
    /// The default resource set activated when fallback mode starts.
    pub const ALL: [Resource; 6] = [
        Resource::Notifications,
        Resource::Inventory,
        Resource::CustomerActivity,
        Resource::Orders,
        Resource::Pricing,
        Resource::SystemAlerts,
    ];

    /// Stable name used in events and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Resource::Notifications => "notifications",
            Resource::Inventory => "inventory",
            Resource::CustomerActivity => "customer_activity",
            Resource::Orders => "orders",
            Resource::Pricing => "pricing",
            Resource::SystemAlerts => "system_alerts",
        }
    }

    /// Polling endpoint path, relative to the REST base URL.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Resource::Notifications => "/v1/api/poll/notifications",
            Resource::Inventory => "/v1/api/poll/inventory",
            Resource::CustomerActivity => "/v1/api/poll/customer-activity",
            Resource::Orders => "/v1/api/poll/orders",
            Resource::Pricing => "/v1/api/poll/pricing",
            Resource::SystemAlerts => "/v1/api/poll/system-alerts",
        }
    }

    /// Default polling interval for this resource.
    pub fn default_interval(&self) -> Duration {
        match self {
            Resource::Notifications => Duration::from_secs(15),
            Resource::Inventory => Duration::from_secs(30),
            Resource::CustomerActivity => Duration::from_secs(45),
            Resource::Orders => Duration::from_secs(20),
            Resource::Pricing => Duration::from_secs(60),
            Resource::SystemAlerts => Duration::from_secs(30),
        }
    }

    /// Scheduling priority.
    pub fn priority(&self) -> Priority {
        match self {
            Resource::Notifications => Priority::High,
            Resource::Inventory => Priority::Medium,
            Resource::CustomerActivity => Priority::Medium,
            Resource::Orders => Priority::High,
            Resource::Pricing => Priority::Low,
            Resource::SystemAlerts => Priority::High,
        }
    }

    /// Event type emitted when fresh items arrive for this resource.
    /// Matches the reserved channel message types so UI subscribers see the
    /// same events regardless of transport.
    pub fn update_event(&self) -> &'static str {
        match self {
            Resource::Notifications => "notification",
            Resource::Inventory => "inventory_update",
            Resource::CustomerActivity => "customer_activity",
            Resource::Orders => "order_update",
            Resource::Pricing => "pricing_update",
            Resource::SystemAlerts => "system_alert",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_intervals() {
        assert_eq!(
            Resource::Notifications.default_interval(),
            Duration::from_secs(15)
        );
        assert_eq!(Resource::Orders.default_interval(), Duration::from_secs(20));
        assert_eq!(
            Resource::Pricing.default_interval(),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_high_priority_resources() {
        for res in [
            Resource::Notifications,
            Resource::Orders,
            Resource::SystemAlerts,
        ] {
            assert_eq!(res.priority(), Priority::High);
        }
    }

    #[test]
    fn test_names_are_distinct() {
        let names: std::collections::HashSet<_> =
            Resource::ALL.iter().map(|r| r.name()).collect();
        assert_eq!(names.len(), Resource::ALL.len());
    }
}
