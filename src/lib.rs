//! # shop-link
//!
//! Client-side connectivity layer for the shop operations dashboard.
//!
//! One authenticated WebSocket channel carries all real-time traffic
//! (notifications, inventory, customer activity, orders, pricing, system
//! alerts). When the channel degrades, a circuit breaker switches the client
//! to periodic HTTP polling, and UI subscribers keep receiving the same
//! events either way.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use shop_link::{LinkConfig, ShopLinkClient};
//! use serde_json::json;
//!
//! # async fn run() -> shop_link::Result<()> {
//! let config = LinkConfig::new("https://api.example.com")
//!     .with_realtime_url("wss://api.example.com/v1/realtime");
//! let client = ShopLinkClient::builder(config)
//!     .with_token("session-token")
//!     .build()?;
//!
//! let _sub = client.subscribe("inventory_update", |data| {
//!     println!("inventory changed: {data}");
//! });
//!
//! client.connect().await?;
//! client.send("mark_read", json!({ "notification_id": "abc" }));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`ConnectionManager`]: owns the WebSocket channel in a background task;
//!   handles authentication, heartbeats, reconnection with exponential
//!   backoff, and a bounded outbound queue.
//! - [`RecoveryHandler`] / [`CircuitBreaker`]: counts connection errors in a
//!   sliding window; on threshold it suppresses reconnection and activates
//!   the fallback.
//! - [`FallbackPoller`]: per-resource HTTP polling timers that re-emit fresh
//!   items through the same listener registry as the channel.
//! - [`ShopLinkClient`]: the façade wiring the three together.

pub mod auth;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod event_handlers;
pub mod models;
pub mod notify;
pub mod polling;
pub mod recovery;
pub mod timeouts;

mod queue;
mod registry;

pub use auth::{BearerToken, TokenProvider};
pub use client::{ShopLinkClient, ShopLinkClientBuilder};
pub use config::LinkConfig;
pub use connection::{events, ConnectionManager};
pub use error::{Result, ShopLinkError};
pub use event_handlers::{ConnectionFault, DisconnectReason, EventHandlers};
pub use models::{
    ConnectionOptions, ConnectionState, Envelope, NetworkCondition, Notification,
    NotificationPriority, PollResponse, Priority, Resource,
};
pub use notify::{LogSink, MemorySink, NotificationSink};
pub use polling::{FallbackPoller, PollingOptions};
pub use recovery::{CircuitBreaker, ErrorClass, RecoveryHandler, RecoveryOptions, RecoveryStatus};
pub use registry::{ListenerRegistry, Subscription};
pub use timeouts::ShopLinkTimeouts;
