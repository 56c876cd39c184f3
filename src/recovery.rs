//! Error recovery: classification, circuit breaker, fallback switchover.
//!
//! A recovery handler listens on the shared registry for `error` and
//! `state_change` events. Repeated connection errors inside a sliding window
//! trip a circuit breaker, which suppresses further reconnection, activates
//! the polling fallback, and raises a persistent notification. The breaker
//! re-arms after a cooldown, and everything resets the moment the channel is
//! usable again.

use crate::{
    connection::{events, ConnectionManager},
    models::{now_ms, Notification, NotificationPriority},
    notify::NotificationSink,
    polling::FallbackPoller,
    registry::{ListenerRegistry, Subscription},
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

// ── Error classification ────────────────────────────────────────────────────

/// Coarse category of a connection error, used to decide whether it counts
/// toward the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transport-level failure (refused, reset, DNS, timeout).
    Network,
    /// Credential problem; reconnecting with the same token cannot help.
    Authentication,
    /// Server asked us to slow down; handled by polling backoff.
    RateLimit,
    /// Server-side fault (5xx and friends).
    Server,
    /// Anything else.
    Unknown,
}

impl ErrorClass {
    /// Classify an error message from an `error` event payload.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("401")
            || lower.contains("403")
            || lower.contains("unauthorized")
            || lower.contains("forbidden")
            || lower.contains("authentication")
            || lower.contains("token")
        {
            ErrorClass::Authentication
        } else if lower.contains("429") || lower.contains("rate limit") {
            ErrorClass::RateLimit
        } else if lower.contains("500")
            || lower.contains("502")
            || lower.contains("503")
            || lower.contains("504")
            || lower.contains("server error")
        {
            ErrorClass::Server
        } else if lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("refused")
            || lower.contains("reset")
            || lower.contains("dns")
            || lower.contains("connection")
            || lower.contains("websocket")
            || lower.contains("stream ended")
        {
            ErrorClass::Network
        } else {
            ErrorClass::Unknown
        }
    }

    /// Whether this class of error should trip the circuit breaker.
    pub fn counts_toward_breaker(&self) -> bool {
        !matches!(self, ErrorClass::Authentication | ErrorClass::RateLimit)
    }
}

// ── Circuit breaker ─────────────────────────────────────────────────────────

/// Tuning for the recovery handler's circuit breaker.
#[derive(Debug, Clone)]
pub struct RecoveryOptions {
    /// Failures within the window that open the breaker. Default: 3.
    pub failure_threshold: u32,
    /// Sliding window over which failures are counted. Default: 60s.
    pub failure_window: Duration,
    /// How long the breaker stays open before reconnection is allowed
    /// again. Default: 60s.
    pub cooldown: Duration,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(60),
        }
    }
}

impl RecoveryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_failure_window(mut self, window: Duration) -> Self {
        self.failure_window = window;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Sliding-window circuit breaker over connection failures.
///
/// Opens when `failure_threshold` failures land inside `failure_window`,
/// then auto-closes once `cooldown` has elapsed. Failures older than the
/// window are forgotten before every evaluation.
pub struct CircuitBreaker {
    threshold: u32,
    window_ms: u64,
    cooldown_ms: u64,
    failures: Mutex<VecDeque<u64>>,
    /// Millis-since-epoch instant at which the breaker closes again;
    /// 0 while closed.
    open_until_ms: AtomicU64,
    /// When the most recent failure was recorded; 0 before any failure.
    last_error_ms: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(options: &RecoveryOptions) -> Self {
        Self {
            threshold: options.failure_threshold,
            window_ms: options.failure_window.as_millis() as u64,
            cooldown_ms: options.cooldown.as_millis() as u64,
            failures: Mutex::new(VecDeque::new()),
            open_until_ms: AtomicU64::new(0),
            last_error_ms: AtomicU64::new(0),
        }
    }

    /// Record one failure; returns `true` when this failure opened the
    /// breaker.
    pub fn record_failure(&self) -> bool {
        self.record_failure_at(now_ms())
    }

    fn record_failure_at(&self, now: u64) -> bool {
        self.last_error_ms.store(now, Ordering::SeqCst);
        if self.is_open_at(now) {
            return false;
        }
        let mut failures = self.failures.lock().expect("breaker lock poisoned");
        let horizon = now.saturating_sub(self.window_ms);
        while failures.front().is_some_and(|&t| t < horizon) {
            failures.pop_front();
        }
        failures.push_back(now);
        if failures.len() as u32 >= self.threshold {
            failures.clear();
            self.open_until_ms
                .store(now.saturating_add(self.cooldown_ms), Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Whether the breaker is currently open. An elapsed cooldown closes it
    /// as a side effect.
    pub fn is_open(&self) -> bool {
        self.is_open_at(now_ms())
    }

    fn is_open_at(&self, now: u64) -> bool {
        let open_until = self.open_until_ms.load(Ordering::SeqCst);
        if open_until == 0 {
            return false;
        }
        if now >= open_until {
            self.open_until_ms.store(0, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Failures currently inside the window.
    pub fn failure_count(&self) -> u32 {
        self.failure_count_at(now_ms())
    }

    fn failure_count_at(&self, now: u64) -> u32 {
        let failures = self.failures.lock().expect("breaker lock poisoned");
        let horizon = now.saturating_sub(self.window_ms);
        failures.iter().filter(|&&t| t >= horizon).count() as u32
    }

    /// Millis since epoch of the most recent recorded failure; 0 before
    /// any failure.
    pub fn last_error_ms(&self) -> u64 {
        self.last_error_ms.load(Ordering::SeqCst)
    }

    /// Close the breaker and forget recorded failures.
    pub fn reset(&self) {
        self.open_until_ms.store(0, Ordering::SeqCst);
        self.last_error_ms.store(0, Ordering::SeqCst);
        self.failures
            .lock()
            .expect("breaker lock poisoned")
            .clear();
    }
}

// ── Recovery handler ────────────────────────────────────────────────────────

/// Point-in-time snapshot of the recovery machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStatus {
    /// Whether the polling fallback is serving data.
    pub fallback_active: bool,
    /// Whether the circuit breaker is open.
    pub circuit_open: bool,
    /// Failures currently inside the breaker window.
    pub error_count: u32,
    /// Millis since epoch of the last recorded failure; 0 before any.
    pub last_error_ms: u64,
}

/// Wires the circuit breaker to the connection manager and the polling
/// fallback via registry listeners. Holds the listener registrations; call
/// [`detach`](RecoveryHandler::detach) to unhook them.
pub struct RecoveryHandler {
    breaker: Arc<CircuitBreaker>,
    registry: Arc<ListenerRegistry>,
    manager: ConnectionManager,
    poller: FallbackPoller,
    sink: Arc<dyn NotificationSink>,
    subscriptions: Vec<Subscription>,
}

impl RecoveryHandler {
    /// Wire recovery to an existing manager/poller pair. Explicit
    /// post-construction wiring: the manager must already exist so that the
    /// listeners can be registered against its registry.
    pub fn initialize(
        manager: &ConnectionManager,
        poller: FallbackPoller,
        sink: Arc<dyn NotificationSink>,
        options: RecoveryOptions,
    ) -> Self {
        let registry = manager.registry();
        let breaker = Arc::new(CircuitBreaker::new(&options));
        let cooldown = options.cooldown;

        let mut subscriptions = Vec::with_capacity(3);

        // Classify connection errors; qualifying ones feed the breaker.
        {
            let breaker = breaker.clone();
            let manager = manager.clone();
            let poller = poller.clone();
            let sink = sink.clone();
            subscriptions.push(registry.subscribe(events::ERROR, move |payload: &Value| {
                let message = payload
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                match ErrorClass::classify(message) {
                    ErrorClass::RateLimit => {
                        poller.slow_down();
                    }
                    ErrorClass::Authentication => {
                        log::debug!(
                            "[shop-link] Authentication error handled outside the breaker: {}",
                            message
                        );
                    }
                    _ => {
                        if breaker.record_failure() {
                            on_breaker_open(&manager, &poller, &sink, &breaker, cooldown);
                        }
                    }
                }
            }));
        }

        // A rejected handshake is a forced logout, surfaced as a blocking
        // notification. Token invalidation already happened in the manager.
        {
            let sink = sink.clone();
            subscriptions.push(registry.subscribe(events::AUTH_FAILED, move |_: &Value| {
                sink.notify(Notification::new(
                    "session_expired",
                    "Session expired",
                    "Your session is no longer valid; please sign in again.",
                    NotificationPriority::Critical,
                    true,
                ));
            }));
        }

        // A usable channel resets everything and retires the fallback.
        {
            let breaker = breaker.clone();
            let manager = manager.clone();
            let poller = poller.clone();
            let sink = sink.clone();
            subscriptions.push(registry.subscribe(
                events::STATE_CHANGE,
                move |payload: &Value| {
                    let state = payload.get("state").and_then(Value::as_str).unwrap_or("");
                    if state == "connected" || state == "authenticated" {
                        breaker.reset();
                        manager.set_reconnect_allowed(true);
                        if poller.is_active() {
                            poller.stop();
                            sink.notify(Notification::new(
                                "realtime_restored",
                                "Live updates restored",
                                "The real-time connection is back; background refresh has been turned off.",
                                NotificationPriority::Medium,
                                false,
                            ));
                        }
                    }
                },
            ));
        }

        Self {
            breaker,
            registry,
            manager: manager.clone(),
            poller,
            sink,
            subscriptions,
        }
    }

    /// The breaker, for inspection.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Whether the polling fallback is currently serving data.
    pub fn is_fallback_active(&self) -> bool {
        self.poller.is_active()
    }

    /// Snapshot of fallback, breaker, and error-count state.
    pub fn status(&self) -> RecoveryStatus {
        RecoveryStatus {
            fallback_active: self.poller.is_active(),
            circuit_open: self.breaker.is_open(),
            error_count: self.breaker.failure_count(),
            last_error_ms: self.breaker.last_error_ms(),
        }
    }

    /// Operational control: activate the fallback immediately, breaker
    /// state notwithstanding.
    pub fn force_fallback_mode(&self) {
        if self.poller.start() {
            log::warn!("[shop-link] Fallback mode forced");
            self.sink.notify(Notification::new(
                "fallback_active",
                "Live updates interrupted",
                "Data is being refreshed periodically in the background.",
                NotificationPriority::Critical,
                true,
            ));
        }
    }

    /// Operational control: forget recorded errors, close the breaker, and
    /// re-allow reconnection.
    pub fn reset_error_state(&self) {
        self.breaker.reset();
        self.manager.set_reconnect_allowed(true);
    }

    /// Unhook the registry listeners and stop the fallback.
    pub fn detach(self) {
        for subscription in &self.subscriptions {
            self.registry.unsubscribe(subscription);
        }
        self.poller.stop();
    }
}

/// Breaker just opened: degrade to polling and schedule the cooldown probe.
fn on_breaker_open(
    manager: &ConnectionManager,
    poller: &FallbackPoller,
    sink: &Arc<dyn NotificationSink>,
    breaker: &Arc<CircuitBreaker>,
    cooldown: Duration,
) {
    log::warn!(
        "[shop-link] Circuit breaker opened, switching to fallback polling for {:?}",
        cooldown
    );
    manager.set_reconnect_allowed(false);
    poller.start();
    sink.notify(Notification::new(
        "fallback_active",
        "Live updates interrupted",
        "The real-time connection is unavailable; data is being refreshed periodically in the background.",
        NotificationPriority::Critical,
        true,
    ));

    // After the cooldown, re-enable reconnection and probe the channel.
    let manager = manager.clone();
    let breaker = breaker.clone();
    tokio::spawn(async move {
        tokio::time::sleep(cooldown).await;
        if breaker.is_open() {
            // A later failure re-opened it; that open's own probe applies.
            return;
        }
        log::info!("[shop-link] Circuit breaker cooldown elapsed, probing reconnection");
        manager.set_reconnect_allowed(true);
        manager.reset();
        if let Err(e) = manager.connect().await {
            log::warn!("[shop-link] Post-cooldown reconnect failed: {}", e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_network_errors() {
        assert_eq!(
            ErrorClass::classify("Connection refused"),
            ErrorClass::Network
        );
        assert_eq!(
            ErrorClass::classify("WebSocket error: stream ended"),
            ErrorClass::Network
        );
        assert_eq!(ErrorClass::classify("Connection timeout"), ErrorClass::Network);
    }

    #[test]
    fn test_classify_auth_errors() {
        assert_eq!(
            ErrorClass::classify("401 Unauthorized"),
            ErrorClass::Authentication
        );
        assert_eq!(
            ErrorClass::classify("Authentication failed: bad token"),
            ErrorClass::Authentication
        );
    }

    #[test]
    fn test_classify_rate_limit_and_server() {
        assert_eq!(ErrorClass::classify("429 too many"), ErrorClass::RateLimit);
        assert_eq!(
            ErrorClass::classify("502 Bad Gateway"),
            ErrorClass::Server
        );
        assert_eq!(ErrorClass::classify("weird"), ErrorClass::Unknown);
    }

    #[test]
    fn test_auth_and_rate_limit_do_not_count() {
        assert!(!ErrorClass::Authentication.counts_toward_breaker());
        assert!(!ErrorClass::RateLimit.counts_toward_breaker());
        assert!(ErrorClass::Network.counts_toward_breaker());
        assert!(ErrorClass::Server.counts_toward_breaker());
        assert!(ErrorClass::Unknown.counts_toward_breaker());
    }

    #[test]
    fn test_breaker_opens_at_threshold() {
        let breaker = CircuitBreaker::new(&RecoveryOptions::default());
        assert!(!breaker.record_failure_at(1_000));
        assert!(!breaker.record_failure_at(2_000));
        assert!(breaker.record_failure_at(3_000));
        assert!(breaker.is_open_at(3_001));
    }

    #[test]
    fn test_breaker_window_expires_old_failures() {
        let breaker = CircuitBreaker::new(&RecoveryOptions::default());
        assert!(!breaker.record_failure_at(0));
        assert!(!breaker.record_failure_at(1_000));
        // Third failure arrives after the first two fell out of the window.
        assert!(!breaker.record_failure_at(120_000));
        assert!(!breaker.is_open_at(120_001));
        assert_eq!(breaker.failure_count_at(120_001), 1);
    }

    #[test]
    fn test_breaker_auto_closes_after_cooldown() {
        let breaker = CircuitBreaker::new(&RecoveryOptions::default());
        breaker.record_failure_at(1_000);
        breaker.record_failure_at(1_100);
        assert!(breaker.record_failure_at(1_200));
        assert!(breaker.is_open_at(30_000));
        // Cooldown is 60s from the opening failure.
        assert!(!breaker.is_open_at(61_300));
    }

    #[test]
    fn test_breaker_ignores_failures_while_open() {
        let breaker = CircuitBreaker::new(&RecoveryOptions::default());
        breaker.record_failure_at(1_000);
        breaker.record_failure_at(1_100);
        assert!(breaker.record_failure_at(1_200));
        assert!(!breaker.record_failure_at(2_000));
        assert_eq!(breaker.failure_count_at(2_001), 0);
    }

    #[test]
    fn test_breaker_reset() {
        let breaker = CircuitBreaker::new(&RecoveryOptions::default());
        breaker.record_failure_at(1_000);
        breaker.record_failure_at(1_100);
        assert!(breaker.record_failure_at(1_200));
        breaker.reset();
        assert!(!breaker.is_open_at(1_300));
        assert_eq!(breaker.failure_count_at(1_300), 0);
    }
}
