//! Timeout configuration for shop-link operations.
//!
//! Centralizes the bounds applied to connection establishment, the
//! authentication handshake, outbound sends, and fallback polling requests.

use std::time::Duration;

/// Timeout configuration for shop-link operations.
///
/// # Examples
///
/// ```rust
/// use shop_link::ShopLinkTimeouts;
/// use std::time::Duration;
///
/// // Defaults (recommended for most cases)
/// let timeouts = ShopLinkTimeouts::default();
///
/// // Custom bounds for high-latency environments
/// let timeouts = ShopLinkTimeouts::builder()
///     .connection_timeout(Duration::from_secs(30))
///     .poll_request_timeout(Duration::from_secs(20))
///     .build();
///
/// // Aggressive bounds for local development
/// let timeouts = ShopLinkTimeouts::fast();
/// ```
#[derive(Debug, Clone)]
pub struct ShopLinkTimeouts {
    /// Timeout for establishing the WebSocket transport (TCP + handshake).
    /// Default: 10 seconds.
    pub connection_timeout: Duration,

    /// Timeout for the authentication message exchange after the transport
    /// opens. Default: 5 seconds.
    pub auth_timeout: Duration,

    /// Timeout for writing a single message to the socket.
    /// Default: 10 seconds.
    pub send_timeout: Duration,

    /// Timeout for one fallback polling HTTP request.
    /// Default: 10 seconds.
    pub poll_request_timeout: Duration,
}

impl Default for ShopLinkTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(10),
            poll_request_timeout: Duration::from_secs(10),
        }
    }
}

impl ShopLinkTimeouts {
    /// Create a new builder for custom timeout configuration.
    pub fn builder() -> ShopLinkTimeoutsBuilder {
        ShopLinkTimeoutsBuilder::new()
    }

    /// Timeouts optimized for fast local development.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            auth_timeout: Duration::from_secs(2),
            send_timeout: Duration::from_secs(2),
            poll_request_timeout: Duration::from_secs(3),
        }
    }

    /// Timeouts optimized for high-latency or unreliable networks.
    pub fn relaxed() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            auth_timeout: Duration::from_secs(15),
            send_timeout: Duration::from_secs(30),
            poll_request_timeout: Duration::from_secs(30),
        }
    }

    /// Check if a duration represents "no timeout" (zero or very large).
    pub fn is_no_timeout(duration: Duration) -> bool {
        duration.is_zero() || duration > Duration::from_secs(86400 * 365)
    }
}

/// Builder for custom [`ShopLinkTimeouts`] configurations.
#[derive(Debug, Clone)]
pub struct ShopLinkTimeoutsBuilder {
    timeouts: ShopLinkTimeouts,
}

impl ShopLinkTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: ShopLinkTimeouts::default(),
        }
    }

    /// Set the transport establishment timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_timeout = timeout;
        self
    }

    /// Set the authentication handshake timeout.
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.auth_timeout = timeout;
        self
    }

    /// Set the per-message send timeout.
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.send_timeout = timeout;
        self
    }

    /// Set the fallback polling request timeout.
    pub fn poll_request_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.poll_request_timeout = timeout;
        self
    }

    /// Build the timeout configuration.
    pub fn build(self) -> ShopLinkTimeouts {
        self.timeouts
    }
}
