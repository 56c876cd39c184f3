use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the real-time channel.
///
/// Transitions follow `Disconnected → Connecting → Connected →
/// Authenticated`, with `Reconnecting` entered while a backoff delay is
/// pending, `Error` flagged on transport failure before teardown, and
/// `Failed` latched once the reconnect attempt budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No channel open and no attempt in progress.
    Disconnected,
    /// Transport handshake in progress.
    Connecting,
    /// Transport open; authenticate message sent, awaiting the reply.
    Connected,
    /// Authentication accepted; channel fully usable.
    Authenticated,
    /// Waiting out a reconnection backoff delay.
    Reconnecting,
    /// Transport error observed; teardown imminent.
    Error,
    /// Reconnect attempts exhausted; requires an external reset.
    Failed,
}

impl ConnectionState {
    /// Stable string form used in `state_change` event payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
            ConnectionState::Failed => "failed",
        }
    }

    /// Whether a connect() call should be a no-op in this state.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Authenticated
                | ConnectionState::Reconnecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
