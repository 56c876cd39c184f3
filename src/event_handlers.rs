//! Connection lifecycle event handlers.
//!
//! Callback-based hooks for monitoring channel lifecycle events:
//!
//! - [`on_connect`](EventHandlers::on_connect): transport established
//! - [`on_disconnect`](EventHandlers::on_disconnect): channel closed
//! - [`on_error`](EventHandlers::on_error): transport or protocol error
//!
//! These complement the string-typed [`ListenerRegistry`] fan-out: handlers
//! are for host wiring (status indicators, the recovery layer), the registry
//! is for data subscribers.
//!
//! [`ListenerRegistry`]: crate::registry::ListenerRegistry

use std::fmt;
use std::sync::Arc;

/// Reason for a disconnect event.
#[derive(Debug, Clone)]
pub struct DisconnectReason {
    /// Human-readable description of why the channel closed.
    pub message: String,
    /// WebSocket close code, if available (1000 = normal, 1006 = abnormal).
    pub code: Option<u16>,
}

impl DisconnectReason {
    /// Create a new disconnect reason with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Create a new disconnect reason with a message and close code.
    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "{} (code: {})", self.message, code)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Error information passed to the `on_error` handler.
#[derive(Debug, Clone)]
pub struct ConnectionFault {
    /// Human-readable error message.
    pub message: String,
    /// Whether auto-reconnect may recover from this error.
    pub recoverable: bool,
}

impl ConnectionFault {
    /// Create a new connection fault.
    pub fn new(message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            message: message.into(),
            recoverable,
        }
    }
}

impl fmt::Display for ConnectionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Type alias for the on_connect callback.
pub type OnConnectCallback = Arc<dyn Fn() + Send + Sync>;

/// Type alias for the on_disconnect callback.
pub type OnDisconnectCallback = Arc<dyn Fn(DisconnectReason) + Send + Sync>;

/// Type alias for the on_error callback.
pub type OnErrorCallback = Arc<dyn Fn(ConnectionFault) + Send + Sync>;

/// Connection lifecycle event handlers.
///
/// All handlers are optional; the builder registers only what you need.
/// Handlers are `Send + Sync` so they work across the tokio runtime.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pub(crate) on_connect: Option<OnConnectCallback>,
    pub(crate) on_disconnect: Option<OnDisconnectCallback>,
    pub(crate) on_error: Option<OnErrorCallback>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl EventHandlers {
    /// Create a new empty `EventHandlers` (no callbacks registered).
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked when the transport is established.
    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when the channel closes, with a
    /// [`DisconnectReason`] describing why.
    pub fn on_disconnect(mut self, f: impl Fn(DisconnectReason) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked on connection errors, with a
    /// [`ConnectionFault`] indicating whether reconnection may help.
    pub fn on_error(mut self, f: impl Fn(ConnectionFault) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub(crate) fn emit_connect(&self) {
        if let Some(cb) = &self.on_connect {
            cb();
        }
    }

    pub(crate) fn emit_disconnect(&self, reason: DisconnectReason) {
        if let Some(cb) = &self.on_disconnect {
            cb(reason);
        }
    }

    pub(crate) fn emit_error(&self, fault: ConnectionFault) {
        if let Some(cb) = &self.on_error {
            cb(fault);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_handlers_fire_when_registered() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let handlers = EventHandlers::new().on_connect(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        handlers.emit_connect();
        handlers.emit_disconnect(DisconnectReason::new("bye")); // unregistered, no-op
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disconnect_reason_display() {
        let reason = DisconnectReason::with_code("server closed", 1006);
        assert_eq!(reason.to_string(), "server closed (code: 1006)");
    }
}
