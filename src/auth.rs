//! Credential provider seam for the real-time channel.
//!
//! The connectivity layer never stores credentials itself; the host
//! application supplies a [`TokenProvider`] backed by whatever storage is
//! appropriate (session store, keychain, config file). The manager reads the
//! current bearer token when connecting and calls [`TokenProvider::invalidate`]
//! when the server rejects authentication, the one failure that propagates
//! outward instead of being retried.

use std::sync::RwLock;

/// Source of the bearer token used for the channel handshake.
///
/// Implementations must be cheap to call; `token()` is consulted on every
/// connection attempt so a reconnect after token refresh picks up the new
/// credential automatically.
pub trait TokenProvider: Send + Sync {
    /// Current bearer token, or `None` when no session is active.
    fn token(&self) -> Option<String>;

    /// Discard the stored credential. Called on authentication failure;
    /// the host should treat this as a forced logout.
    fn invalidate(&self);
}

/// In-memory token provider.
///
/// Suitable for CLI tools and tests; long-lived applications usually
/// implement [`TokenProvider`] over their own session storage.
#[derive(Debug, Default)]
pub struct BearerToken {
    token: RwLock<Option<String>>,
}

impl BearerToken {
    /// Create a provider holding the given token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    /// Create a provider with no token (connect() will no-op).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Replace the stored token, e.g. after a refresh.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write().expect("token lock poisoned") = Some(token.into());
    }
}

impl TokenProvider for BearerToken {
    fn token(&self) -> Option<String> {
        self.token.read().expect("token lock poisoned").clone()
    }

    fn invalidate(&self) {
        self.token.write().expect("token lock poisoned").take();
    }
}
