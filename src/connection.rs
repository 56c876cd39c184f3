//! Real-time channel connection manager.
//!
//! Owns a single authenticated WebSocket channel to the dashboard server.
//! Handles:
//!
//! - Single transport for all subscribers (no per-subscriber connections)
//! - Message fan-out to listeners by envelope type
//! - Automatic reconnection with exponential backoff
//! - Bounded FIFO queuing of outbound messages while disconnected
//! - Authentication handshake over the channel (`auth_success` / `auth_failed`)
//! - Application-level heartbeats while authenticated
//! - Lifecycle events (`state_change`, `connection_open`, `connection_closed`,
//!   `auth_success`, `auth_failed`, `error`)

use crate::{
    auth::TokenProvider,
    error::{Result, ShopLinkError},
    event_handlers::{ConnectionFault, DisconnectReason, EventHandlers},
    models::{now_ms, reserved, ConnectionOptions, ConnectionState, Envelope},
    queue::MessageQueue,
    registry::{ListenerRegistry, Subscription},
    timeouts::ShopLinkTimeouts,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    Arc, Mutex,
};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant as TokioInstant;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::{
        frame::coding::CloseCode, frame::CloseFrame, Message,
    },
};

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

/// Event type names emitted by the connection manager (and, for
/// [`POLLING_FAILED`](events::POLLING_FAILED), the polling fallback).
pub mod events {
    /// Every state transition, payload `{"state": "<name>"}`.
    pub const STATE_CHANGE: &str = "state_change";
    /// Transport established.
    pub const CONNECTION_OPEN: &str = "connection_open";
    /// Channel closed, payload `{"reason", "code"}`.
    pub const CONNECTION_CLOSED: &str = "connection_closed";
    /// Authentication accepted.
    pub const AUTH_SUCCESS: &str = "auth_success";
    /// Authentication rejected.
    pub const AUTH_FAILED: &str = "auth_failed";
    /// Transport or protocol error, payload `{"message"}`.
    pub const ERROR: &str = "error";
    /// A polled resource exhausted its retries, payload `{"resource"}`.
    pub const POLLING_FAILED: &str = "polling_failed";
}

/// Maximum accepted inbound text frame (4 MiB). Larger frames are dropped.
const MAX_WS_TEXT_MESSAGE_BYTES: usize = 4 << 20;

// ── Commands ────────────────────────────────────────────────────────────────

/// Commands sent from the public handle to the background connection task.
enum ConnCmd {
    /// Begin (or re-begin) connecting. `ready` resolves when the first
    /// attempt completes, successfully or not.
    Connect {
        ready: Option<oneshot::Sender<Result<()>>>,
    },
    /// Transmit (or queue) one outbound envelope.
    Send(Envelope),
    /// Close with a normal-closure code; no auto-reconnect.
    Disconnect,
    /// Tear down the background task entirely.
    Shutdown,
}

// ── Shared state ────────────────────────────────────────────────────────────

struct Shared {
    ws_url: Option<String>,
    token_provider: Arc<dyn TokenProvider>,
    options: ConnectionOptions,
    timeouts: ShopLinkTimeouts,
    registry: Arc<ListenerRegistry>,
    handlers: EventHandlers,
    state: watch::Sender<ConnectionState>,
    queue: Mutex<MessageQueue>,
    reconnect_attempts: AtomicU32,
    /// Gate set by the circuit breaker: while false, no reconnection is
    /// scheduled.
    reconnect_allowed: AtomicBool,
    last_activity_ms: AtomicU64,
    cmd_tx: Mutex<Option<mpsc::Sender<ConnCmd>>>,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            log::debug!("[shop-link] state -> {}", next);
            self.registry
                .emit(events::STATE_CHANGE, &json!({ "state": next.as_str() }));
        }
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn touch(&self) {
        self.last_activity_ms.store(now_ms(), Ordering::Relaxed);
    }

    fn enqueue(&self, envelope: Envelope) {
        let dropped = self
            .queue
            .lock()
            .expect("queue lock poisoned")
            .push(envelope);
        if dropped {
            log::warn!("[shop-link] Outbound queue full, dropped oldest message");
        }
    }
}

// ── Public handle ───────────────────────────────────────────────────────────

/// Handle to the shared real-time channel.
///
/// Cheap to clone; all clones drive the same background task, which owns the
/// WebSocket stream. Created by [`ShopLinkClient`](crate::client::ShopLinkClient)
/// or directly via [`ConnectionManager::new`].
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a manager. No connection is attempted until [`connect`]
    /// is called.
    ///
    /// [`connect`]: ConnectionManager::connect
    pub fn new(
        ws_url: Option<String>,
        token_provider: Arc<dyn TokenProvider>,
        options: ConnectionOptions,
        timeouts: ShopLinkTimeouts,
        registry: Arc<ListenerRegistry>,
        handlers: EventHandlers,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let max_queued = options.max_queued_messages;
        Self {
            shared: Arc::new(Shared {
                ws_url,
                token_provider,
                options,
                timeouts,
                registry,
                handlers,
                state,
                queue: Mutex::new(MessageQueue::new(max_queued)),
                reconnect_attempts: AtomicU32::new(0),
                reconnect_allowed: AtomicBool::new(true),
                last_activity_ms: AtomicU64::new(0),
                cmd_tx: Mutex::new(None),
            }),
        }
    }

    /// Initiate a connection attempt.
    ///
    /// Returns `Ok(false)` without doing anything when no real-time endpoint
    /// is configured, no bearer token is available, or a connection is
    /// already pending or open. Returns `Ok(true)` once an attempt has been
    /// initiated; a failed first attempt is logged and reconnection
    /// continues in the background.
    pub async fn connect(&self) -> Result<bool> {
        let shared = &self.shared;
        if shared.ws_url.is_none() {
            log::info!("[shop-link] No real-time endpoint configured, connect() is a no-op");
            return Ok(false);
        }
        if shared.token_provider.token().is_none() {
            log::info!("[shop-link] No bearer token available, connect() is a no-op");
            return Ok(false);
        }
        if shared.current_state().is_busy() {
            log::debug!(
                "[shop-link] connect() ignored, state is {}",
                shared.current_state()
            );
            return Ok(false);
        }

        let tx = self.ensure_task();
        let (ready_tx, ready_rx) = oneshot::channel();
        tx.send(ConnCmd::Connect {
            ready: Some(ready_tx),
        })
        .await
        .map_err(|_| {
            ShopLinkError::WebSocketError("Connection task is not running".to_string())
        })?;

        // Wait for the first attempt to finish; a failure only warns because
        // the background task keeps reconnecting on its own.
        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("[shop-link] Initial connection failed: {}", e),
            Err(_) => log::warn!("[shop-link] Connection task exited before signalling readiness"),
        }
        Ok(true)
    }

    /// Close the channel with a normal-closure code. Cancels heartbeat and
    /// reconnect timers; idempotent; no auto-reconnect afterwards.
    pub async fn disconnect(&self) {
        let tx = { self.shared.cmd_tx.lock().expect("cmd lock poisoned").clone() };
        if let Some(tx) = tx {
            let _ = tx.send(ConnCmd::Disconnect).await;
        }
    }

    /// Send a typed message over the channel.
    ///
    /// Returns `true` when the channel is authenticated and the message was
    /// handed to the transport; `false` when it was queued instead (bounded,
    /// oldest dropped past the limit) to be flushed after authentication.
    pub fn send(&self, kind: &str, data: Value) -> bool {
        let envelope = Envelope::new(kind, data);
        if self.shared.current_state() == ConnectionState::Authenticated {
            let tx = { self.shared.cmd_tx.lock().expect("cmd lock poisoned").clone() };
            if let Some(tx) = tx {
                match tx.try_send(ConnCmd::Send(envelope)) {
                    Ok(()) => return true,
                    Err(err) => {
                        // Channel full or task gone; fall back to queuing.
                        if let ConnCmd::Send(envelope) = err.into_inner() {
                            self.shared.enqueue(envelope);
                        }
                        return false;
                    }
                }
            }
            return false;
        }
        self.shared.enqueue(envelope);
        false
    }

    /// Register a listener for a message or lifecycle event type.
    pub fn subscribe(
        &self,
        event: impl Into<String>,
        listener: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.registry.subscribe(event, listener)
    }

    /// Remove a listener registration.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.shared.registry.unsubscribe(subscription);
    }

    /// The shared listener registry (also used by the polling fallback).
    pub fn registry(&self) -> Arc<ListenerRegistry> {
        self.shared.registry.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.current_state()
    }

    /// Watch receiver observing every state transition.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Whether the channel is open and authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.state() == ConnectionState::Authenticated
    }

    /// Number of messages currently queued for post-auth flush.
    pub fn queued_messages(&self) -> usize {
        self.shared.queue.lock().expect("queue lock poisoned").len()
    }

    /// Reconnection attempts made since the last successful authentication.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Millis since epoch of the last send or receive; 0 before any traffic.
    pub fn last_activity_ms(&self) -> u64 {
        self.shared.last_activity_ms.load(Ordering::Relaxed)
    }

    /// Clear the attempt counter and the `Failed` latch so a later
    /// [`connect`](ConnectionManager::connect) starts fresh.
    pub fn reset(&self) {
        self.shared.reconnect_attempts.store(0, Ordering::SeqCst);
        if self.state() == ConnectionState::Failed {
            self.shared.set_state(ConnectionState::Disconnected);
        }
    }

    /// Gate used by the circuit breaker: while `false`, the manager will not
    /// schedule reconnection attempts.
    pub(crate) fn set_reconnect_allowed(&self, allowed: bool) {
        self.shared
            .reconnect_allowed
            .store(allowed, Ordering::SeqCst);
    }

    /// Spawn the background task on first use; return the command sender.
    fn ensure_task(&self) -> mpsc::Sender<ConnCmd> {
        let mut guard = self.shared.cmd_tx.lock().expect("cmd lock poisoned");
        if let Some(tx) = guard.as_ref() {
            if !tx.is_closed() {
                return tx.clone();
            }
        }
        let (tx, rx) = mpsc::channel(256);
        *guard = Some(tx.clone());
        let shared = self.shared.clone();
        tokio::spawn(connection_task(shared, rx));
        tx
    }
}

// ── URL building ────────────────────────────────────────────────────────────

/// Build the connect URL: `<endpoint>?token=<url-encoded bearer token>`.
fn build_connect_url(base: &str, token: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(base.trim()).map_err(|e| {
        ShopLinkError::ConfigurationError(format!("Invalid realtime_url '{}': {}", base, e))
    })?;
    match url.scheme() {
        "ws" | "wss" => {}
        "http" => url
            .set_scheme("ws")
            .map_err(|_| ShopLinkError::ConfigurationError("Failed to set ws scheme".into()))?,
        "https" => url
            .set_scheme("wss")
            .map_err(|_| ShopLinkError::ConfigurationError("Failed to set wss scheme".into()))?,
        other => {
            return Err(ShopLinkError::ConfigurationError(format!(
                "Unsupported realtime_url scheme '{}'; expected ws(s) or http(s)",
                other
            )));
        }
    }
    url.query_pairs_mut().append_pair("token", token);
    Ok(url.to_string())
}

/// Deterministic per-endpoint jitter (±10%) on the heartbeat start so a
/// fleet of clients does not beat in lockstep.
fn jitter_interval(interval: Duration, key: &str) -> Duration {
    if interval.is_zero() {
        return interval;
    }
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let spread = (hasher.finish() % 2001) as f64 / 1000.0 - 1.0; // -1.0..=1.0
    let factor = 1.0 + spread * 0.1;
    interval.mul_f64(factor)
}

// ── Background connection task ──────────────────────────────────────────────

/// Establish the transport and send the authenticate envelope.
async fn establish(shared: &Shared) -> Result<WsStream> {
    let base = shared
        .ws_url
        .as_deref()
        .ok_or_else(|| ShopLinkError::ConfigurationError("No realtime_url configured".into()))?;
    let token = shared.token_provider.token().ok_or_else(|| {
        ShopLinkError::AuthenticationError("No bearer token available".to_string())
    })?;
    let url = build_connect_url(base, &token)?;

    log::debug!("[shop-link] Establishing WebSocket connection to {}", base);
    let connect_result = if ShopLinkTimeouts::is_no_timeout(shared.timeouts.connection_timeout) {
        connect_async(url.as_str()).await.map_err(|e| {
            ShopLinkError::WebSocketError(format!("Connection failed: {}", e))
        })
    } else {
        match tokio::time::timeout(shared.timeouts.connection_timeout, connect_async(url.as_str()))
            .await
        {
            Ok(Ok(ok)) => Ok(ok),
            Ok(Err(e)) => Err(ShopLinkError::WebSocketError(format!(
                "Connection failed: {}",
                e
            ))),
            Err(_) => Err(ShopLinkError::TimeoutError(format!(
                "Connection timeout ({:?})",
                shared.timeouts.connection_timeout
            ))),
        }
    };

    let (mut stream, _response) = connect_result?;

    // Transport is open; authenticate over the channel.
    shared.set_state(ConnectionState::Connected);
    shared.registry.emit(events::CONNECTION_OPEN, &Value::Null);
    shared.handlers.emit_connect();

    let auth = Envelope::new("authenticate", json!({ "token": token }));
    write_envelope(shared, &mut stream, &auth).await?;
    shared.touch();

    Ok(stream)
}

/// Serialize and transmit one envelope, bounded by the send timeout.
///
/// A timed-out write leaves a partially transmitted frame on the wire, so
/// callers must treat `Err` as fatal for this transport.
async fn write_envelope(shared: &Shared, ws: &mut WsStream, envelope: &Envelope) -> Result<()> {
    let payload = serde_json::to_string(envelope)?;
    let send = ws.send(Message::Text(payload.into()));
    if ShopLinkTimeouts::is_no_timeout(shared.timeouts.send_timeout) {
        send.await
            .map_err(|e| ShopLinkError::WebSocketError(format!("Failed to send message: {}", e)))
    } else {
        match tokio::time::timeout(shared.timeouts.send_timeout, send).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ShopLinkError::WebSocketError(format!(
                "Failed to send message: {}",
                e
            ))),
            Err(_) => Err(ShopLinkError::TimeoutError(format!(
                "Send timed out ({:?})",
                shared.timeouts.send_timeout
            ))),
        }
    }
}

/// The main background task managing the shared channel.
///
/// Lifecycle:
/// 1. Idle until a `Connect` command arrives
/// 2. Establish the transport, send the authenticate envelope
/// 3. Event loop: read frames + process commands + heartbeat
/// 4. On abnormal loss: reconnect with exponential backoff, up to the
///    configured attempt budget, unless the circuit-breaker gate is closed
async fn connection_task(shared: Arc<Shared>, mut cmd_rx: mpsc::Receiver<ConnCmd>) {
    let mut ws: Option<WsStream> = None;
    let mut authenticated = false;
    let mut want_connection = false;
    let mut ready: Option<oneshot::Sender<Result<()>>> = None;

    let hb_interval = Duration::from_millis(shared.options.heartbeat_interval_ms);
    let hb_enabled = !hb_interval.is_zero();
    let hb_key = shared.ws_url.clone().unwrap_or_default();
    let mut hb_deadline = TokioInstant::now() + jitter_interval(hb_interval, &hb_key);

    let auth_enabled = !ShopLinkTimeouts::is_no_timeout(shared.timeouts.auth_timeout);
    let mut auth_deadline = TokioInstant::now();

    loop {
        if let Some(stream) = ws.as_mut() {
            let hb_sleep = tokio::time::sleep_until(hb_deadline);
            tokio::pin!(hb_sleep);
            let auth_sleep = tokio::time::sleep_until(auth_deadline);
            tokio::pin!(auth_sleep);

            tokio::select! {
                biased;

                // Commands from the public handle
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(ConnCmd::Send(envelope)) => {
                            if authenticated {
                                if let Err(e) = write_envelope(&shared, stream, &envelope).await {
                                    log::warn!("[shop-link] Send failed: {}", e);
                                    shared.enqueue(envelope);
                                    fail_transport(&shared, &mut ws, &mut authenticated, &mut want_connection, e.to_string());
                                    continue;
                                }
                                shared.touch();
                            } else {
                                shared.enqueue(envelope);
                            }
                        }
                        Some(ConnCmd::Disconnect) => {
                            let _ = stream
                                .close(Some(CloseFrame {
                                    code: CloseCode::Normal,
                                    reason: "client disconnect".into(),
                                }))
                                .await;
                            ws = None;
                            authenticated = false;
                            want_connection = false;
                            shared.reconnect_attempts.store(0, Ordering::SeqCst);
                            shared.set_state(ConnectionState::Disconnected);
                            shared.registry.emit(
                                events::CONNECTION_CLOSED,
                                &json!({ "reason": "client disconnect", "code": 1000 }),
                            );
                            shared
                                .handlers
                                .emit_disconnect(DisconnectReason::with_code("Client disconnected", 1000));
                        }
                        Some(ConnCmd::Connect { ready: r }) => {
                            // Already connected; a second connect() is a no-op.
                            if let Some(r) = r {
                                let _ = r.send(Ok(()));
                            }
                        }
                        Some(ConnCmd::Shutdown) | None => {
                            let _ = stream.close(None).await;
                            return;
                        }
                    }
                }

                // The server never confirmed the handshake; a connected but
                // unauthenticated channel is not allowed to linger.
                _ = &mut auth_sleep, if auth_enabled && !authenticated => {
                    fail_transport(
                        &shared,
                        &mut ws,
                        &mut authenticated,
                        &mut want_connection,
                        format!("Handshake response timeout ({:?})", shared.timeouts.auth_timeout),
                    );
                }

                // Application-level heartbeat
                _ = &mut hb_sleep, if hb_enabled && authenticated => {
                    let heartbeat = Envelope::new("heartbeat", Value::Null);
                    if let Err(e) = write_envelope(&shared, stream, &heartbeat).await {
                        log::warn!("[shop-link] Heartbeat send failed: {}", e);
                        fail_transport(&shared, &mut ws, &mut authenticated, &mut want_connection, e.to_string());
                        continue;
                    }
                    shared.touch();
                    hb_deadline = TokioInstant::now() + hb_interval;
                }

                // Inbound frames
                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if text.len() > MAX_WS_TEXT_MESSAGE_BYTES {
                                log::warn!("[shop-link] Dropping oversized frame ({} bytes)", text.len());
                                continue;
                            }
                            shared.touch();
                            match serde_json::from_str::<Envelope>(&text) {
                                Ok(envelope) => {
                                    let outcome = handle_envelope(
                                        &shared,
                                        stream,
                                        envelope,
                                        &mut authenticated,
                                        &mut hb_deadline,
                                        hb_interval,
                                    )
                                    .await;
                                    if let Err(e) = outcome {
                                        fail_transport(&shared, &mut ws, &mut authenticated, &mut want_connection, e.to_string());
                                    } else if !authenticated && shared.current_state() == ConnectionState::Disconnected {
                                        // auth_failed path closed the channel
                                        ws = None;
                                        want_connection = false;
                                    }
                                }
                                Err(e) => {
                                    log::warn!("[shop-link] Failed to parse inbound message: {}", e);
                                }
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            log::warn!("[shop-link] Dropping unexpected binary frame ({} bytes)", data.len());
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = stream.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                        Some(Ok(Message::Close(frame))) => {
                            let (reason, code) = match frame {
                                Some(f) => (f.reason.to_string(), u16::from(f.code)),
                                None => ("Server closed connection".to_string(), 1005),
                            };
                            shared.registry.emit(
                                events::CONNECTION_CLOSED,
                                &json!({ "reason": reason, "code": code }),
                            );
                            shared
                                .handlers
                                .emit_disconnect(DisconnectReason::with_code(reason, code));
                            ws = None;
                            authenticated = false;
                            shared.set_state(ConnectionState::Disconnected);
                            // Normal closure is final; anything else reconnects.
                            if code == 1000 {
                                want_connection = false;
                            } else {
                                shared.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
                                want_connection = true;
                            }
                        }
                        Some(Err(e)) => {
                            fail_transport(&shared, &mut ws, &mut authenticated, &mut want_connection, e.to_string());
                        }
                        None => {
                            fail_transport(&shared, &mut ws, &mut authenticated, &mut want_connection, "WebSocket stream ended".to_string());
                        }
                    }
                }
            }
        } else if want_connection {
            // ── Not connected, connection wanted: connect or back off ──────
            let attempt = shared.reconnect_attempts.load(Ordering::SeqCst);

            if attempt > shared.options.max_reconnect_attempts {
                log::warn!(
                    "[shop-link] Max reconnection attempts ({}) reached",
                    shared.options.max_reconnect_attempts
                );
                let message = format!(
                    "Max reconnection attempts ({}) reached",
                    shared.options.max_reconnect_attempts
                );
                shared
                    .registry
                    .emit(events::ERROR, &json!({ "message": message }));
                shared
                    .handlers
                    .emit_error(ConnectionFault::new(message, false));
                shared.set_state(ConnectionState::Failed);
                want_connection = false;
                if let Some(r) = ready.take() {
                    let _ = r.send(Err(ShopLinkError::WebSocketError(
                        "Max reconnection attempts reached".to_string(),
                    )));
                }
                continue;
            }

            if attempt > 0 {
                if !shared.reconnect_allowed.load(Ordering::SeqCst) {
                    log::info!("[shop-link] Reconnection suppressed (circuit breaker open)");
                    shared.set_state(ConnectionState::Disconnected);
                    want_connection = false;
                    continue;
                }
                shared.set_state(ConnectionState::Reconnecting);
                let delay = shared.options.reconnect_delay_for_attempt(attempt);
                log::info!(
                    "[shop-link] Reconnecting in {}ms (attempt {}/{})",
                    delay,
                    attempt,
                    shared.options.max_reconnect_attempts
                );

                // Wait out the backoff, still servicing commands.
                let sleep_fut = tokio::time::sleep(Duration::from_millis(delay));
                tokio::pin!(sleep_fut);
                let mut cancelled = false;
                loop {
                    tokio::select! {
                        biased;
                        cmd = cmd_rx.recv() => {
                            match cmd {
                                Some(ConnCmd::Send(envelope)) => shared.enqueue(envelope),
                                Some(ConnCmd::Connect { ready: r }) => {
                                    if ready.is_none() {
                                        ready = r;
                                    } else if let Some(r) = r {
                                        let _ = r.send(Ok(()));
                                    }
                                }
                                Some(ConnCmd::Disconnect) => {
                                    cancelled = true;
                                    break;
                                }
                                Some(ConnCmd::Shutdown) | None => return,
                            }
                        }
                        _ = &mut sleep_fut => break,
                    }
                }
                if cancelled {
                    shared.reconnect_attempts.store(0, Ordering::SeqCst);
                    shared.set_state(ConnectionState::Disconnected);
                    want_connection = false;
                    continue;
                }
            } else {
                shared.set_state(ConnectionState::Connecting);
            }

            match establish(&shared).await {
                Ok(stream) => {
                    ws = Some(stream);
                    authenticated = false;
                    hb_deadline = TokioInstant::now() + jitter_interval(hb_interval, &hb_key);
                    auth_deadline = TokioInstant::now() + shared.timeouts.auth_timeout;
                    if let Some(r) = ready.take() {
                        let _ = r.send(Ok(()));
                    }
                }
                Err(e) => {
                    log::warn!("[shop-link] Connection attempt failed: {}", e);
                    shared
                        .registry
                        .emit(events::ERROR, &json!({ "message": e.to_string() }));
                    shared
                        .handlers
                        .emit_error(ConnectionFault::new(e.to_string(), true));
                    shared.set_state(ConnectionState::Disconnected);
                    if let Some(r) = ready.take() {
                        let _ = r.send(Err(e));
                    }
                    shared.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
                    if !shared.options.auto_reconnect {
                        want_connection = false;
                    }
                }
            }
        } else {
            // ── Idle: wait for commands ────────────────────────────────────
            match cmd_rx.recv().await {
                Some(ConnCmd::Connect { ready: r }) => {
                    want_connection = true;
                    ready = r;
                }
                Some(ConnCmd::Send(envelope)) => shared.enqueue(envelope),
                Some(ConnCmd::Disconnect) => {}
                Some(ConnCmd::Shutdown) | None => return,
            }
        }
    }
}

/// Tear down after a transport failure and arm reconnection.
fn fail_transport(
    shared: &Shared,
    ws: &mut Option<WsStream>,
    authenticated: &mut bool,
    want_connection: &mut bool,
    message: String,
) {
    shared.set_state(ConnectionState::Error);
    shared
        .registry
        .emit(events::ERROR, &json!({ "message": message }));
    shared
        .handlers
        .emit_error(ConnectionFault::new(message.clone(), true));
    shared
        .handlers
        .emit_disconnect(DisconnectReason::new(format!("Transport error: {}", message)));
    *ws = None;
    *authenticated = false;
    shared.set_state(ConnectionState::Disconnected);
    shared.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
    *want_connection = true;
}

/// Dispatch one parsed inbound envelope.
///
/// `Err` means the transport is no longer trustworthy and must be torn down
/// by the caller.
async fn handle_envelope(
    shared: &Shared,
    stream: &mut WsStream,
    envelope: Envelope,
    authenticated: &mut bool,
    hb_deadline: &mut TokioInstant,
    hb_interval: Duration,
) -> Result<()> {
    match envelope.kind.as_str() {
        reserved::AUTH_SUCCESS => {
            log::info!("[shop-link] Channel authenticated");
            *authenticated = true;
            shared.reconnect_attempts.store(0, Ordering::SeqCst);
            shared.set_state(ConnectionState::Authenticated);
            shared.registry.emit(events::AUTH_SUCCESS, &envelope.data);
            *hb_deadline = TokioInstant::now() + hb_interval;

            // Flush everything queued while disconnected, FIFO.
            let mut pending = shared.queue.lock().expect("queue lock poisoned").drain();
            if !pending.is_empty() {
                log::info!("[shop-link] Flushing {} queued message(s)", pending.len());
            }
            let mut sent = 0;
            while sent < pending.len() {
                if let Err(e) = write_envelope(shared, stream, &pending[sent]).await {
                    log::warn!("[shop-link] Queue flush failed: {}", e);
                    // The failed envelope and everything behind it go back,
                    // ahead of anything queued in the meantime.
                    shared
                        .queue
                        .lock()
                        .expect("queue lock poisoned")
                        .requeue_front(pending.split_off(sent));
                    return Err(e);
                }
                shared.touch();
                sent += 1;
            }
        }
        reserved::AUTH_FAILED => {
            let message = envelope.data["message"].as_str().unwrap_or("rejected");
            log::warn!("[shop-link] Authentication failed: {}", message);
            shared.registry.emit(events::AUTH_FAILED, &envelope.data);
            // Forced logout: the credential is no longer valid, so there is
            // no point reconnecting with it.
            shared.token_provider.invalidate();
            let _ = stream
                .close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "auth failed".into(),
                }))
                .await;
            *authenticated = false;
            shared.set_state(ConnectionState::Disconnected);
            shared.registry.emit(
                events::CONNECTION_CLOSED,
                &json!({ "reason": "authentication failed", "code": 1000 }),
            );
            shared.handlers.emit_disconnect(DisconnectReason::new(format!(
                "Authentication failed: {}",
                message
            )));
        }
        reserved::HEARTBEAT_RESPONSE => {
            log::trace!("[shop-link] Heartbeat acknowledged");
        }
        other => {
            let delivered = shared.registry.emit(other, &envelope.data);
            if delivered == 0 {
                log::debug!("[shop-link] No listeners for message type '{}'", other);
            }
        }
    }
    Ok(())
}
