//! High-level client façade.
//!
//! [`ShopLinkClient`] wires the connection manager, the error recovery
//! handler, and the polling fallback behind one handle. Most applications
//! build one client at startup, subscribe their UI listeners, and call
//! [`connect`](ShopLinkClient::connect).

use crate::{
    auth::{BearerToken, TokenProvider},
    config::LinkConfig,
    connection::ConnectionManager,
    error::Result,
    event_handlers::EventHandlers,
    models::{
        ConnectionOptions, ConnectionState, NetworkCondition, Notification, NotificationPriority,
    },
    notify::{LogSink, NotificationSink},
    polling::{FallbackPoller, PollingOptions},
    recovery::{RecoveryHandler, RecoveryOptions, RecoveryStatus},
    registry::{ListenerRegistry, Subscription},
    timeouts::ShopLinkTimeouts,
};
use serde_json::Value;
use std::sync::Arc;

/// Builder for [`ShopLinkClient`].
///
/// # Example
///
/// ```rust,no_run
/// use shop_link::{LinkConfig, ShopLinkClient};
///
/// # async fn run() -> shop_link::Result<()> {
/// let config = LinkConfig::new("https://api.example.com")
///     .with_realtime_url("wss://api.example.com/v1/realtime");
/// let client = ShopLinkClient::builder(config)
///     .with_token("session-token")
///     .build()?;
/// client.connect().await?;
/// # Ok(())
/// # }
/// ```
pub struct ShopLinkClientBuilder {
    config: LinkConfig,
    token_provider: Option<Arc<dyn TokenProvider>>,
    initial_token: Option<String>,
    options: ConnectionOptions,
    timeouts: ShopLinkTimeouts,
    polling_options: PollingOptions,
    recovery_options: RecoveryOptions,
    handlers: EventHandlers,
    sink: Option<Arc<dyn NotificationSink>>,
}

impl ShopLinkClientBuilder {
    fn new(config: LinkConfig) -> Self {
        Self {
            config,
            token_provider: None,
            initial_token: None,
            options: ConnectionOptions::default(),
            timeouts: ShopLinkTimeouts::default(),
            polling_options: PollingOptions::default(),
            recovery_options: RecoveryOptions::default(),
            handlers: EventHandlers::new(),
            sink: None,
        }
    }

    /// Use an in-memory bearer token. For hosts with their own session
    /// storage, prefer [`with_token_provider`].
    ///
    /// [`with_token_provider`]: ShopLinkClientBuilder::with_token_provider
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.initial_token = Some(token.into());
        self
    }

    /// Supply a custom credential source.
    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    pub fn with_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_timeouts(mut self, timeouts: ShopLinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_polling_options(mut self, options: PollingOptions) -> Self {
        self.polling_options = options;
        self
    }

    pub fn with_recovery_options(mut self, options: RecoveryOptions) -> Self {
        self.recovery_options = options;
        self
    }

    /// Lifecycle callbacks invoked alongside registry events.
    pub fn with_event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    /// Destination for user-facing notifications. Defaults to [`LogSink`].
    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Assemble the client. No I/O happens until
    /// [`connect`](ShopLinkClient::connect).
    pub fn build(self) -> Result<ShopLinkClient> {
        let bearer: Option<Arc<BearerToken>> = if self.token_provider.is_some() {
            None
        } else {
            Some(match self.initial_token {
                Some(token) => Arc::new(BearerToken::new(token)),
                None => Arc::new(BearerToken::empty()),
            })
        };
        let token_provider: Arc<dyn TokenProvider> = match self.token_provider {
            Some(provider) => provider,
            None => bearer.clone().expect("bearer token just constructed"),
        };
        let sink = self.sink.unwrap_or_else(|| Arc::new(LogSink));
        let registry = Arc::new(ListenerRegistry::new());

        let manager = ConnectionManager::new(
            self.config.realtime_url.clone(),
            token_provider.clone(),
            self.options,
            self.timeouts.clone(),
            registry.clone(),
            self.handlers,
        );
        let poller = FallbackPoller::new(
            self.config.api_url.clone(),
            token_provider.clone(),
            registry.clone(),
            sink.clone(),
            &self.timeouts,
            self.polling_options,
        );
        let recovery = RecoveryHandler::initialize(
            &manager,
            poller.clone(),
            sink.clone(),
            self.recovery_options,
        );

        Ok(ShopLinkClient {
            config: self.config,
            manager,
            poller,
            recovery,
            bearer,
            sink,
        })
    }
}

/// Connectivity client for the dashboard backend.
///
/// Owns the real-time channel, its recovery machinery, and the polling
/// fallback. Dropping the client does not close the channel; call
/// [`shutdown`](ShopLinkClient::shutdown) for an orderly teardown.
pub struct ShopLinkClient {
    config: LinkConfig,
    manager: ConnectionManager,
    poller: FallbackPoller,
    recovery: RecoveryHandler,
    /// Present only when the builder created the in-memory token provider.
    bearer: Option<Arc<BearerToken>>,
    sink: Arc<dyn NotificationSink>,
}

impl ShopLinkClient {
    /// Start building a client for the given endpoints.
    pub fn builder(config: LinkConfig) -> ShopLinkClientBuilder {
        ShopLinkClientBuilder::new(config)
    }

    /// Build a client from `SHOPLINK_API_URL` / `SHOPLINK_WS_URL` with an
    /// in-memory token.
    pub fn from_env(token: impl Into<String>) -> Result<Self> {
        Self::builder(LinkConfig::from_env()).with_token(token).build()
    }

    /// Initiate the real-time connection. Returns `Ok(false)` without
    /// side effects when no endpoint or token is configured, or when a
    /// connection is already pending or open.
    pub async fn connect(&self) -> Result<bool> {
        self.manager.connect().await
    }

    /// Close the channel with a normal-closure code; no auto-reconnect.
    pub async fn disconnect(&self) {
        self.manager.disconnect().await;
    }

    /// Send a typed message. `true` when handed to the transport, `false`
    /// when queued for flush after the next authentication.
    pub fn send(&self, kind: &str, data: Value) -> bool {
        self.manager.send(kind, data)
    }

    /// Register a listener for a message or lifecycle event type. Listeners
    /// fire identically whether data arrives over the channel or the
    /// polling fallback.
    pub fn subscribe(
        &self,
        event: impl Into<String>,
        listener: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        self.manager.subscribe(event, listener)
    }

    /// Remove a listener registration.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.manager.unsubscribe(subscription);
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn is_authenticated(&self) -> bool {
        self.manager.is_authenticated()
    }

    /// Messages queued for post-authentication flush.
    pub fn queued_messages(&self) -> usize {
        self.manager.queued_messages()
    }

    /// Whether the polling fallback is currently serving data.
    pub fn is_fallback_active(&self) -> bool {
        self.poller.is_active()
    }

    /// Snapshot of fallback, circuit-breaker, and error-count state.
    pub fn recovery_status(&self) -> RecoveryStatus {
        self.recovery.status()
    }

    /// The recovery handler, for operational control
    /// (`force_fallback_mode`, `reset_error_state`).
    pub fn recovery(&self) -> &RecoveryHandler {
        &self.recovery
    }

    /// The underlying connection manager, for advanced use.
    pub fn connection(&self) -> &ConnectionManager {
        &self.manager
    }

    /// The polling fallback, for advanced use.
    pub fn poller(&self) -> &FallbackPoller {
        &self.poller
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Replace the bearer token, e.g. after a session refresh. Only
    /// available when the builder created the in-memory provider; custom
    /// providers manage their own storage.
    pub fn set_token(&self, token: impl Into<String>) {
        if let Some(bearer) = &self.bearer {
            bearer.set_token(token);
        } else {
            log::warn!("[shop-link] set_token ignored, a custom token provider is installed");
        }
    }

    /// Adjust polling cadence for observed network quality.
    pub fn set_network_condition(&self, condition: NetworkCondition) {
        self.poller.set_network_condition(condition);
    }

    /// Host signal: connectivity was lost (e.g. the OS reported the
    /// interface down). Closes the channel, switches to fallback mode, and
    /// raises a persistent offline notification. Orthogonal to the
    /// error-count path: the breaker is not consulted.
    pub async fn notify_network_offline(&self) {
        log::warn!("[shop-link] Host reported network offline");
        self.manager.disconnect().await;
        self.poller.start();
        self.sink.notify(Notification::new(
            "offline",
            "Connection offline",
            "You appear to be offline; showing the latest available data until connectivity returns.",
            NotificationPriority::High,
            true,
        ));
    }

    /// Host signal: connectivity returned. Clears any failed latch and
    /// attempts to reconnect immediately.
    pub async fn notify_network_online(&self) {
        log::info!("[shop-link] Host reported network online");
        self.manager.reset();
        match self.manager.connect().await {
            Ok(true) => {}
            Ok(false) => log::debug!("[shop-link] Reconnect on network-online was a no-op"),
            Err(e) => log::warn!("[shop-link] Reconnect on network-online failed: {}", e),
        }
    }

    /// Orderly teardown: close the channel, stop the fallback, and detach
    /// the recovery listeners.
    pub async fn shutdown(self) {
        self.manager.disconnect().await;
        self.recovery.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_without_realtime_endpoint() {
        let client = ShopLinkClient::builder(LinkConfig::new("http://localhost:3000"))
            .with_token("t")
            .build()
            .unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_fallback_active());
        assert!(client.config().realtime_url.is_none());
    }

    #[tokio::test]
    async fn test_connect_without_endpoint_is_noop() {
        let client = ShopLinkClient::builder(LinkConfig::new("http://localhost:3000"))
            .with_token("t")
            .build()
            .unwrap();
        assert!(!client.connect().await.unwrap());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_without_token_is_noop() {
        let client = ShopLinkClient::builder(
            LinkConfig::new("http://localhost:3000")
                .with_realtime_url("ws://localhost:3000/v1/realtime"),
        )
        .build()
        .unwrap();
        assert!(!client.connect().await.unwrap());
    }

    #[test]
    fn test_send_while_disconnected_queues() {
        let client = ShopLinkClient::builder(LinkConfig::new("http://localhost:3000"))
            .with_token("t")
            .build()
            .unwrap();
        assert!(!client.send("ping", serde_json::json!({})));
        assert_eq!(client.queued_messages(), 1);
    }
}
