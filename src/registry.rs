//! Listener registry: pub/sub fan-out keyed by event-type strings.
//!
//! UI and store code subscribe to typed events (`"inventory_update"`,
//! `"state_change"`, ...) and receive every matching payload, whether it
//! arrived over the real-time channel or the polling fallback. Registrations
//! persist across reconnections and are removed only by explicit
//! unsubscribe.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

/// Callback invoked with the payload of each matching event.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle returned by [`ListenerRegistry::subscribe`]; pass it to
/// [`ListenerRegistry::unsubscribe`] to remove exactly that registration.
#[derive(Debug, Clone)]
pub struct Subscription {
    event: String,
    id: u64,
}

impl Subscription {
    /// The event type this handle is registered for.
    pub fn event(&self) -> &str {
        &self.event
    }
}

/// Mapping from event-type string to an insertion-ordered listener list.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<String, Vec<(u64, Listener)>>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for an event type. Each call creates a distinct
    /// registration; the returned handle removes exactly that one.
    pub fn subscribe(
        &self,
        event: impl Into<String>,
        listener: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        let event = event.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .expect("registry lock poisoned")
            .entry(event.clone())
            .or_default()
            .push((id, Arc::new(listener)));
        Subscription { event, id }
    }

    /// Remove the registration behind a handle. Unsubscribing twice is a
    /// no-op. The event entry itself is deleted once its last listener goes.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        let mut map = self.listeners.lock().expect("registry lock poisoned");
        if let Some(entries) = map.get_mut(&subscription.event) {
            entries.retain(|(id, _)| *id != subscription.id);
            if entries.is_empty() {
                map.remove(&subscription.event);
            }
        }
    }

    /// Invoke every listener for `event` in insertion order. Returns the
    /// number of listeners invoked; zero for unknown event types (the caller
    /// decides whether that is worth logging).
    pub fn emit(&self, event: &str, payload: &Value) -> usize {
        // Snapshot under the lock, invoke outside it, so listeners may call
        // subscribe/unsubscribe without deadlocking.
        let snapshot: Vec<Listener> = {
            let map = self.listeners.lock().expect("registry lock poisoned");
            match map.get(event) {
                Some(entries) => entries.iter().map(|(_, l)| l.clone()).collect(),
                None => Vec::new(),
            }
        };
        for listener in &snapshot {
            listener(payload);
        }
        snapshot.len()
    }

    /// Number of listeners currently registered for an event type.
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .lock()
            .expect("registry lock poisoned")
            .get(event)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_reaches_only_matching_listeners() {
        let registry = ListenerRegistry::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));

        let a2 = a.clone();
        registry.subscribe("inventory_update", move |_| {
            a2.fetch_add(1, Ordering::SeqCst);
        });
        let b2 = b.clone();
        registry.subscribe("order_update", move |_| {
            b2.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(registry.emit("inventory_update", &json!({})), 1);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unknown_event_is_a_noop() {
        let registry = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        registry.subscribe("known", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(registry.emit("unknown_type", &json!({"x": 1})), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_removes_exactly_one() {
        let registry = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h1 = hits.clone();
        let sub1 = registry.subscribe("ev", move |_| {
            h1.fetch_add(1, Ordering::SeqCst);
        });
        let h2 = hits.clone();
        let _sub2 = registry.subscribe("ev", move |_| {
            h2.fetch_add(10, Ordering::SeqCst);
        });

        registry.unsubscribe(&sub1);
        assert_eq!(registry.listener_count("ev"), 1);
        registry.emit("ev", &Value::Null);
        assert_eq!(hits.load(Ordering::SeqCst), 10);

        // Unsubscribing the same handle again is a no-op.
        registry.unsubscribe(&sub1);
        assert_eq!(registry.listener_count("ev"), 1);
    }

    #[test]
    fn test_empty_entry_is_deleted() {
        let registry = ListenerRegistry::new();
        let sub = registry.subscribe("ev", |_| {});
        registry.unsubscribe(&sub);
        assert_eq!(registry.listener_count("ev"), 0);
        let map = registry.listeners.lock().unwrap();
        assert!(!map.contains_key("ev"));
    }

    #[test]
    fn test_insertion_order_within_type() {
        let registry = ListenerRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..5 {
            let o = order.clone();
            registry.subscribe("seq", move |_| {
                o.lock().unwrap().push(n);
            });
        }
        registry.emit("seq", &Value::Null);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_listener_may_unsubscribe_during_emit() {
        let registry = Arc::new(ListenerRegistry::new());
        let reg = registry.clone();
        let sub_holder: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let holder = sub_holder.clone();
        let sub = registry.subscribe("ev", move |_| {
            if let Some(s) = holder.lock().unwrap().take() {
                reg.unsubscribe(&s);
            }
        });
        *sub_holder.lock().unwrap() = Some(sub);
        registry.emit("ev", &Value::Null);
        assert_eq!(registry.listener_count("ev"), 0);
    }
}
