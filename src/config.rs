//! Endpoint configuration for the shop-link client.

use serde::{Deserialize, Serialize};

/// Environment variable naming the real-time WebSocket endpoint.
pub const ENV_WS_URL: &str = "SHOPLINK_WS_URL";
/// Environment variable naming the REST base URL for polling.
pub const ENV_API_URL: &str = "SHOPLINK_API_URL";

/// Endpoint configuration.
///
/// The real-time endpoint is deliberately optional: a deployment without one
/// is a valid configuration in which `connect()` silently no-ops and the
/// dashboard runs on REST alone. Missing configuration is not a startup
/// failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// WebSocket endpoint for the real-time channel, e.g.
    /// `wss://api.example.com/v1/realtime`. `None` disables the channel.
    pub realtime_url: Option<String>,

    /// REST base URL used by the polling fallback, e.g.
    /// `https://api.example.com`.
    pub api_url: String,
}

impl LinkConfig {
    /// Create a configuration with a REST base URL and no real-time channel.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            realtime_url: None,
            api_url: api_url.into(),
        }
    }

    /// Set the real-time WebSocket endpoint.
    pub fn with_realtime_url(mut self, url: impl Into<String>) -> Self {
        self.realtime_url = Some(url.into());
        self
    }

    /// Build a configuration from `SHOPLINK_API_URL` / `SHOPLINK_WS_URL`.
    /// Falls back to localhost defaults when unset.
    pub fn from_env() -> Self {
        let api_url =
            std::env::var(ENV_API_URL).unwrap_or_else(|_| "http://localhost:3000".to_string());
        let realtime_url = std::env::var(ENV_WS_URL).ok().filter(|s| !s.trim().is_empty());
        Self {
            realtime_url,
            api_url,
        }
    }
}
