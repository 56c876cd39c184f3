use serde::{Deserialize, Serialize};

/// Connection-level options for the real-time channel.
///
/// These control reconnection timing, the heartbeat cadence, and the
/// outbound-queue bound. Separate from [`ShopLinkTimeouts`] which bounds
/// individual operations.
///
/// [`ShopLinkTimeouts`]: crate::timeouts::ShopLinkTimeouts
///
/// # Example
///
/// ```rust
/// use shop_link::ConnectionOptions;
///
/// let options = ConnectionOptions::default()
///     .with_auto_reconnect(true)
///     .with_reconnect_delay_ms(500)
///     .with_max_reconnect_attempts(3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Enable automatic reconnection on abnormal connection loss.
    /// Default: true.
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// Initial delay in milliseconds between reconnection attempts.
    /// Doubles on every attempt up to `max_reconnect_delay_ms`.
    /// Default: 1000ms.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Maximum delay between reconnection attempts.
    /// Default: 30000ms.
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    /// Maximum number of reconnection attempts before the connection latches
    /// into the failed state. Default: 5.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Application-level heartbeat interval in milliseconds. A `heartbeat`
    /// envelope is sent at this cadence while authenticated. Set to `0` to
    /// disable. Default: 30_000 (30 seconds).
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Bound on the outbound queue held while disconnected; the oldest
    /// message is dropped on overflow. Default: 100.
    #[serde(default = "default_max_queued_messages")]
    pub max_queued_messages: usize,
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_delay_ms() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_max_queued_messages() -> usize {
    100
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: default_auto_reconnect(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            max_queued_messages: default_max_queued_messages(),
        }
    }
}

impl ConnectionOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable automatic reconnection.
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the initial reconnection delay in milliseconds.
    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    /// Set the maximum reconnection delay in milliseconds.
    pub fn with_max_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.max_reconnect_delay_ms = delay_ms;
        self
    }

    /// Set the maximum number of reconnection attempts.
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the heartbeat interval in milliseconds (0 disables).
    pub fn with_heartbeat_interval_ms(mut self, interval_ms: u64) -> Self {
        self.heartbeat_interval_ms = interval_ms;
        self
    }

    /// Set the outbound queue bound.
    pub fn with_max_queued_messages(mut self, max: usize) -> Self {
        self.max_queued_messages = max;
        self
    }

    /// Backoff delay for a given 1-based attempt number:
    /// `reconnect_delay_ms × 2^(attempt−1)`, capped at
    /// `max_reconnect_delay_ms`.
    pub fn reconnect_delay_for_attempt(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1);
        std::cmp::min(
            self.reconnect_delay_ms
                .saturating_mul(2u64.saturating_pow(exp)),
            self.max_reconnect_delay_ms,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = ConnectionOptions::default();
        assert!(opts.auto_reconnect);
        assert_eq!(opts.reconnect_delay_ms, 1000);
        assert_eq!(opts.max_reconnect_attempts, 5);
        assert_eq!(opts.heartbeat_interval_ms, 30_000);
        assert_eq!(opts.max_queued_messages, 100);
    }

    #[test]
    fn test_backoff_growth() {
        let opts = ConnectionOptions::default();
        assert_eq!(opts.reconnect_delay_for_attempt(1), 1000);
        assert_eq!(opts.reconnect_delay_for_attempt(2), 2000);
        assert_eq!(opts.reconnect_delay_for_attempt(3), 4000);
        assert_eq!(opts.reconnect_delay_for_attempt(4), 8000);
        assert_eq!(opts.reconnect_delay_for_attempt(5), 16_000);
    }

    #[test]
    fn test_backoff_cap() {
        let opts = ConnectionOptions::default().with_max_reconnect_delay_ms(5000);
        assert_eq!(opts.reconnect_delay_for_attempt(10), 5000);
    }

    #[test]
    fn test_backoff_overflow_is_capped() {
        let opts = ConnectionOptions::default();
        // 2^63 would overflow the multiply; saturating math must cap it.
        assert_eq!(opts.reconnect_delay_for_attempt(64), 30_000);
    }
}
