//! HTTP polling fallback.
//!
//! When the real-time channel is unusable, the poller approximates it by
//! periodically fetching each data resource over REST and re-emitting fresh
//! items through the shared listener registry, so UI subscribers receive the
//! same events regardless of transport.
//!
//! Each resource polls on its own timer; one failing resource never stalls
//! the others. Cadence stretches under degraded network conditions and backs
//! off further when the server answers 429.

use crate::{
    auth::TokenProvider,
    connection::events,
    error::{Result, ShopLinkError},
    models::{now_ms, NetworkCondition, Notification, PollResponse, Resource},
    notify::NotificationSink,
    registry::ListenerRegistry,
    timeouts::ShopLinkTimeouts,
};
use reqwest::StatusCode;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, Mutex,
};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Ceiling on a rate-limit-stretched polling interval (5 minutes).
const RATE_LIMIT_CEILING: Duration = Duration::from_secs(300);

/// Tuning knobs for the polling fallback.
#[derive(Debug, Clone)]
pub struct PollingOptions {
    /// Attempts per poll cycle before the cycle is declared failed.
    /// Default: 3.
    pub max_retries: u32,
    /// Delay between in-cycle retry attempts. Default: 1s.
    pub retry_delay: Duration,
    /// Resources covered while fallback mode is active.
    /// Default: every resource.
    pub resources: Vec<Resource>,
}

impl Default for PollingOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            resources: Resource::ALL.to_vec(),
        }
    }
}

impl PollingOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_resources(mut self, resources: Vec<Resource>) -> Self {
        self.resources = resources;
        self
    }
}

/// Outcome of one poll cycle for a resource.
enum PollOutcome {
    /// Number of fresh items delivered.
    Items(usize),
    /// Server answered 429; stretch this resource's interval.
    RateLimited,
}

struct PollerInner {
    api_url: String,
    http: reqwest::Client,
    token_provider: Arc<dyn TokenProvider>,
    registry: Arc<ListenerRegistry>,
    sink: Arc<dyn NotificationSink>,
    request_timeout: Duration,
    options: PollingOptions,
    active: AtomicBool,
    condition: Mutex<NetworkCondition>,
    /// Number of rate-limit doublings currently applied to every interval.
    slowdown_shift: AtomicU32,
    /// Per-resource `since` watermark, millis since epoch of the last
    /// successful poll. 0 until a resource has polled once.
    watermarks: Mutex<HashMap<Resource, u64>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Fallback polling service driving one timer per resource.
///
/// Activated by the recovery handler when the circuit breaker opens, and
/// deactivated as soon as the real-time channel is usable again. `start` and
/// `stop` are idempotent.
#[derive(Clone)]
pub struct FallbackPoller {
    inner: Arc<PollerInner>,
}

impl FallbackPoller {
    pub fn new(
        api_url: impl Into<String>,
        token_provider: Arc<dyn TokenProvider>,
        registry: Arc<ListenerRegistry>,
        sink: Arc<dyn NotificationSink>,
        timeouts: &ShopLinkTimeouts,
        options: PollingOptions,
    ) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                api_url: api_url.into().trim_end_matches('/').to_string(),
                http: reqwest::Client::new(),
                token_provider,
                registry,
                sink,
                request_timeout: timeouts.poll_request_timeout,
                options,
                active: AtomicBool::new(false),
                condition: Mutex::new(NetworkCondition::Excellent),
                slowdown_shift: AtomicU32::new(0),
                watermarks: Mutex::new(HashMap::new()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Begin polling every configured resource. Returns `false` when the
    /// poller was already active.
    pub fn start(&self) -> bool {
        if self.inner.active.swap(true, Ordering::SeqCst) {
            return false;
        }
        log::info!(
            "[shop-link] Fallback polling started ({} resources)",
            self.inner.options.resources.len()
        );
        let mut tasks = self.inner.tasks.lock().expect("tasks lock poisoned");
        for resource in self.inner.options.resources.clone() {
            let inner = self.inner.clone();
            tasks.push(tokio::spawn(poll_resource_loop(inner, resource)));
        }
        true
    }

    /// Stop polling, cancel every resource timer, and clear watermarks and
    /// rate-limit bookkeeping. Idempotent.
    pub fn stop(&self) {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return;
        }
        log::info!("[shop-link] Fallback polling stopped");
        let mut tasks = self.inner.tasks.lock().expect("tasks lock poisoned");
        for task in tasks.drain(..) {
            task.abort();
        }
        drop(tasks);
        self.inner
            .watermarks
            .lock()
            .expect("watermark lock poisoned")
            .clear();
        self.inner.slowdown_shift.store(0, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Adjust cadence for the observed network quality. Takes effect on each
    /// resource's next cycle.
    pub fn set_network_condition(&self, condition: NetworkCondition) {
        let mut guard = self.inner.condition.lock().expect("condition lock poisoned");
        if *guard != condition {
            log::info!("[shop-link] Network condition -> {:?}", condition);
            *guard = condition;
        }
    }

    pub fn network_condition(&self) -> NetworkCondition {
        *self.inner.condition.lock().expect("condition lock poisoned")
    }

    /// Rate-limit response: double every interval, up to the 5-minute
    /// ceiling. Also invoked internally when a poll answers 429.
    pub fn slow_down(&self) {
        self.inner.slow_down();
    }

    /// The `since` watermark for a resource; 0 before its first
    /// successful poll.
    pub fn watermark(&self, resource: Resource) -> u64 {
        self.inner
            .watermarks
            .lock()
            .expect("watermark lock poisoned")
            .get(&resource)
            .copied()
            .unwrap_or(0)
    }
}

impl PollerInner {
    fn slow_down(&self) {
        let shift = self.slowdown_shift.fetch_add(1, Ordering::SeqCst) + 1;
        log::warn!(
            "[shop-link] Rate limited, polling intervals doubled ({}x, ceiling {:?})",
            1u64 << shift.min(16),
            RATE_LIMIT_CEILING
        );
    }

    /// A resource's effective interval: base doubled per rate-limit
    /// slowdown, capped at the ceiling, then scaled for network quality.
    fn effective_interval(&self, base: Duration) -> Duration {
        let shift = self.slowdown_shift.load(Ordering::SeqCst).min(16);
        let stretched = base
            .checked_mul(1u32 << shift)
            .unwrap_or(RATE_LIMIT_CEILING)
            .min(RATE_LIMIT_CEILING);
        let multiplier = {
            self.condition
                .lock()
                .expect("condition lock poisoned")
                .interval_multiplier()
        };
        stretched.mul_f64(multiplier)
    }
}

/// One resource's polling loop: poll, emit, sleep, repeat.
async fn poll_resource_loop(inner: Arc<PollerInner>, resource: Resource) {
    let base_interval = resource.default_interval();

    loop {
        if !inner.active.load(Ordering::SeqCst) {
            break;
        }

        match poll_with_retries(&inner, resource).await {
            Ok(PollOutcome::Items(count)) => {
                if count > 0 {
                    log::debug!("[shop-link] Polled {} item(s) for {}", count, resource);
                }
            }
            Ok(PollOutcome::RateLimited) => {
                inner.slow_down();
            }
            Err(e) => {
                // Isolation: only this resource is reported; the other
                // timers keep running.
                log::warn!("[shop-link] Polling {} failed: {}", resource, e);
                inner.registry.emit(
                    events::POLLING_FAILED,
                    &json!({ "resource": resource.name(), "message": e.to_string() }),
                );
            }
        }

        tokio::time::sleep(inner.effective_interval(base_interval)).await;
    }
}

/// Poll once, retrying transient failures up to the configured attempt
/// budget inside the cycle.
async fn poll_with_retries(inner: &PollerInner, resource: Resource) -> Result<PollOutcome> {
    let mut last_error: Option<ShopLinkError> = None;

    for attempt in 1..=inner.options.max_retries {
        if attempt > 1 {
            tokio::time::sleep(inner.options.retry_delay).await;
        }
        match poll_once(inner, resource).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) if is_retriable(&e) => {
                log::debug!(
                    "[shop-link] Poll attempt {}/{} for {} failed: {}",
                    attempt,
                    inner.options.max_retries,
                    resource,
                    e
                );
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error
        .unwrap_or_else(|| ShopLinkError::TimeoutError("Poll retries exhausted".to_string())))
}

/// Whether a poll error is worth retrying within the same cycle.
fn is_retriable(error: &ShopLinkError) -> bool {
    match error {
        ShopLinkError::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        ShopLinkError::ServerError { status_code, .. } => *status_code >= 500,
        ShopLinkError::TimeoutError(_) => true,
        _ => false,
    }
}

/// Execute one GET against the resource's poll endpoint and fan out items.
async fn poll_once(inner: &PollerInner, resource: Resource) -> Result<PollOutcome> {
    let token = inner.token_provider.token().ok_or_else(|| {
        ShopLinkError::AuthenticationError("No bearer token available for polling".to_string())
    })?;
    let since = {
        inner
            .watermarks
            .lock()
            .expect("watermark lock poisoned")
            .get(&resource)
            .copied()
            .unwrap_or(0)
    };

    let url = format!("{}{}", inner.api_url, resource.endpoint());
    let response = inner
        .http
        .get(&url)
        .query(&[("since", since.to_string())])
        .bearer_auth(&token)
        .timeout(inner.request_timeout)
        .send()
        .await?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Ok(PollOutcome::RateLimited);
    }
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ShopLinkError::ServerError {
            status_code: status.as_u16(),
            message,
        });
    }

    let body: PollResponse = response.json().await?;
    let items = body.into_items();

    for item in &items {
        if resource == Resource::SystemAlerts {
            inner.sink.notify(Notification::from_alert_item(item));
        }
        inner.registry.emit(resource.update_event(), item);
    }

    // Watermark only advances after a successful cycle so missed windows are
    // re-fetched next time.
    inner
        .watermarks
        .lock()
        .expect("watermark lock poisoned")
        .insert(resource, now_ms());

    Ok(PollOutcome::Items(items.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::BearerToken;
    use crate::notify::MemorySink;

    fn test_poller() -> FallbackPoller {
        FallbackPoller::new(
            "http://localhost:1",
            Arc::new(BearerToken::new("t")),
            Arc::new(ListenerRegistry::new()),
            Arc::new(MemorySink::new()),
            &ShopLinkTimeouts::default(),
            PollingOptions::default(),
        )
    }

    #[test]
    fn test_slow_down_doubles_intervals() {
        let poller = test_poller();
        let base = Duration::from_secs(30);
        assert_eq!(poller.inner.effective_interval(base), Duration::from_secs(30));
        poller.slow_down();
        assert_eq!(poller.inner.effective_interval(base), Duration::from_secs(60));
        poller.slow_down();
        assert_eq!(
            poller.inner.effective_interval(base),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn test_slow_down_caps_at_five_minutes() {
        let poller = test_poller();
        for _ in 0..10 {
            poller.slow_down();
        }
        assert_eq!(
            poller.inner.effective_interval(Duration::from_secs(15)),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_network_condition_scales_intervals() {
        let poller = test_poller();
        poller.set_network_condition(NetworkCondition::Excellent);
        assert_eq!(
            poller.inner.effective_interval(Duration::from_secs(20)),
            Duration::from_secs(20)
        );
        poller.set_network_condition(NetworkCondition::Poor);
        assert_eq!(
            poller.inner.effective_interval(Duration::from_secs(20)),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_server_errors_are_retriable() {
        assert!(is_retriable(&ShopLinkError::ServerError {
            status_code: 503,
            message: "unavailable".into(),
        }));
        assert!(!is_retriable(&ShopLinkError::ServerError {
            status_code: 404,
            message: "missing".into(),
        }));
        assert!(!is_retriable(&ShopLinkError::AuthenticationError(
            "no token".into()
        )));
    }

    #[test]
    fn test_default_options_cover_all_resources() {
        let options = PollingOptions::default();
        assert_eq!(options.resources.len(), Resource::ALL.len());
        assert_eq!(options.max_retries, 3);
    }
}
