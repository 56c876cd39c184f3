use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Current time in millis since Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Typed message envelope exchanged over the real-time channel.
///
/// Both directions use the same shape. Inbound envelopes are dispatched to
/// listeners by their `type` tag; a handful of reserved types
/// (`auth_success`, `auth_failed`, `heartbeat_response`) are handled by the
/// connection manager itself before fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type tag, e.g. `"inventory_update"`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Opaque structured payload.
    #[serde(default)]
    pub data: Value,

    /// Millis since Unix epoch when the envelope was created.
    #[serde(default)]
    pub timestamp: u64,

    /// Unique message id (uuid v4 for outbound messages).
    #[serde(default)]
    pub id: String,
}

impl Envelope {
    /// Create a new outbound envelope with a fresh id and timestamp.
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: now_ms(),
            id: Uuid::new_v4().to_string(),
        }
    }
}

/// Reserved inbound message types with special handling.
pub(crate) mod reserved {
    pub const AUTH_SUCCESS: &str = "auth_success";
    pub const AUTH_FAILED: &str = "auth_failed";
    pub const HEARTBEAT_RESPONSE: &str = "heartbeat_response";
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_envelope_roundtrip() {
        let env = Envelope::new("inventory_update", serde_json::json!({"sku": "A-1"}));
        let text = serde_json::to_string(&env).unwrap();
        let parsed: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.kind, "inventory_update");
        assert_eq!(parsed.data["sku"], "A-1");
        assert_eq!(parsed.id, env.id);
    }

    #[test]
    fn test_envelope_tolerates_missing_fields() {
        // Inbound messages may carry only a type tag.
        let parsed: Envelope = serde_json::from_str(r#"{"type":"heartbeat_response"}"#).unwrap();
        assert_eq!(parsed.kind, "heartbeat_response");
        assert!(parsed.data.is_null());
    }

    #[test]
    fn test_message_ids_are_unique() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let env = Envelope::new("ping", Value::Null);
            assert!(seen.insert(env.id), "duplicate message id generated");
        }
    }
}
