//! Integration tests for the HTTP polling fallback against a mock server.

use serde_json::{json, Value};
use shop_link::{
    BearerToken, FallbackPoller, ListenerRegistry, MemorySink, NotificationPriority,
    PollingOptions, Resource, ShopLinkTimeouts,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn poller_for(
    server: &MockServer,
    resources: Vec<Resource>,
) -> (FallbackPoller, Arc<ListenerRegistry>, Arc<MemorySink>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let registry = Arc::new(ListenerRegistry::new());
    let sink = Arc::new(MemorySink::new());
    let poller = FallbackPoller::new(
        server.uri(),
        Arc::new(BearerToken::new("poll-token")),
        registry.clone(),
        sink.clone(),
        &ShopLinkTimeouts::fast(),
        PollingOptions::default()
            .with_resources(resources)
            .with_retry_delay(Duration::from_millis(10)),
    );
    (poller, registry, sink)
}

/// Wait until the condition holds, or panic after 5 seconds.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition never satisfied");
}

#[tokio::test]
async fn test_polled_items_are_emitted_with_auth_and_watermark() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/api/poll/notifications"))
        .and(header("authorization", "Bearer poll-token"))
        .and(query_param("since", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                { "id": "n1", "title": "Order shipped" },
                { "id": "n2", "title": "Stock low" },
            ]
        })))
        .mount(&server)
        .await;

    let (poller, registry, _sink) = poller_for(&server, vec![Resource::Notifications]);
    let received = Arc::new(Mutex::new(Vec::<Value>::new()));
    let received_inner = received.clone();
    let _sub = registry.subscribe("notification", move |data| {
        received_inner.lock().unwrap().push(data.clone());
    });

    assert_eq!(poller.watermark(Resource::Notifications), 0);
    assert!(poller.start());
    wait_until(|| received.lock().unwrap().len() == 2).await;

    let items = received.lock().unwrap();
    assert_eq!(items[0]["id"], "n1");
    assert_eq!(items[1]["id"], "n2");
    // Watermark advances only after a successful cycle.
    assert!(poller.watermark(Resource::Notifications) > 0);
    poller.stop();
}

#[tokio::test]
async fn test_failing_resource_does_not_stall_others() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/api/poll/notifications"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/api/poll/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [ { "order_id": "o-77" } ]
        })))
        .mount(&server)
        .await;

    let (poller, registry, _sink) = poller_for(
        &server,
        vec![Resource::Notifications, Resource::Orders],
    );

    let failed = Arc::new(Mutex::new(Vec::<String>::new()));
    let failed_inner = failed.clone();
    let _fail_sub = registry.subscribe("polling_failed", move |data| {
        if let Some(name) = data["resource"].as_str() {
            failed_inner.lock().unwrap().push(name.to_string());
        }
    });
    let orders = Arc::new(Mutex::new(Vec::<Value>::new()));
    let orders_inner = orders.clone();
    let _order_sub = registry.subscribe("order_update", move |data| {
        orders_inner.lock().unwrap().push(data.clone());
    });

    assert!(poller.start());
    wait_until(|| !failed.lock().unwrap().is_empty() && !orders.lock().unwrap().is_empty()).await;
    poller.stop();

    // Only the failing resource is reported, and the healthy one delivered.
    assert!(failed.lock().unwrap().iter().all(|r| r == "notifications"));
    assert_eq!(orders.lock().unwrap()[0]["order_id"], "o-77");
    // Its watermark never advanced.
    assert_eq!(poller.watermark(Resource::Notifications), 0);
    assert!(poller.watermark(Resource::Orders) > 0);
}

#[tokio::test]
async fn test_transient_failures_are_retried_within_a_cycle() {
    let server = MockServer::start().await;
    // Two 500s then success, all inside one cycle's retry budget.
    Mock::given(method("GET"))
        .and(path("/v1/api/poll/orders"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/api/poll/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [ { "order_id": "o-1" } ]
        })))
        .mount(&server)
        .await;

    let (poller, registry, _sink) = poller_for(&server, vec![Resource::Orders]);
    let orders = Arc::new(Mutex::new(Vec::<Value>::new()));
    let orders_inner = orders.clone();
    let _sub = registry.subscribe("order_update", move |data| {
        orders_inner.lock().unwrap().push(data.clone());
    });

    assert!(poller.start());
    wait_until(|| !orders.lock().unwrap().is_empty()).await;
    poller.stop();
}

#[tokio::test]
async fn test_critical_system_alerts_reach_the_notification_sink() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/api/poll/system-alerts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                { "title": "Payment gateway down", "message": "checkout failing", "priority": "critical" }
            ]
        })))
        .mount(&server)
        .await;

    let (poller, _registry, sink) = poller_for(&server, vec![Resource::SystemAlerts]);
    assert!(poller.start());
    wait_until(|| !sink.records().is_empty()).await;
    poller.stop();

    let records = sink.records();
    assert_eq!(records[0].title, "Payment gateway down");
    assert_eq!(records[0].priority, NotificationPriority::Critical);
    assert!(records[0].persistent);
}

#[tokio::test]
async fn test_empty_and_missing_items_mean_no_data() {
    let server = MockServer::start().await;
    // No `items` field at all; must be treated as an empty result, not an
    // error.
    Mock::given(method("GET"))
        .and(path("/v1/api/poll/pricing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let (poller, registry, _sink) = poller_for(&server, vec![Resource::Pricing]);
    let failed = Arc::new(Mutex::new(0usize));
    let failed_inner = failed.clone();
    let _sub = registry.subscribe("polling_failed", move |_| {
        *failed_inner.lock().unwrap() += 1;
    });

    assert!(poller.start());
    wait_until(|| poller.watermark(Resource::Pricing) > 0).await;
    poller.stop();
    assert_eq!(*failed.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let server = MockServer::start().await;
    let (poller, _registry, _sink) = poller_for(&server, vec![Resource::Pricing]);

    assert!(!poller.is_active());
    assert!(poller.start());
    assert!(!poller.start());
    assert!(poller.is_active());

    poller.stop();
    assert!(!poller.is_active());
    poller.stop();
    assert!(!poller.is_active());
}
