//! Data model for the shop-link connectivity layer.

mod connection_options;
mod connection_state;
mod envelope;
mod network_condition;
mod notification;
mod poll_response;
mod resource;

pub(crate) use envelope::reserved;

pub use connection_options::ConnectionOptions;
pub use connection_state::ConnectionState;
pub use envelope::{now_ms, Envelope};
pub use network_condition::NetworkCondition;
pub use notification::{Notification, NotificationPriority};
pub use poll_response::PollResponse;
pub use resource::{Priority, Resource};
