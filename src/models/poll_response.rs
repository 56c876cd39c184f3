use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response shape for fallback polling endpoints.
///
/// Servers return `{ "items": [...] }`; a missing `items` field means
/// "no data since the watermark" and is not an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Value>>,
}

impl PollResponse {
    /// Items carried by the response, empty when `items` was absent.
    pub fn into_items(self) -> Vec<Value> {
        self.items.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_items_is_no_data() {
        let resp: PollResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.into_items().is_empty());
    }

    #[test]
    fn test_items_parsed() {
        let resp: PollResponse = serde_json::from_str(r#"{"items":[{"id":1},{"id":2}]}"#).unwrap();
        assert_eq!(resp.into_items().len(), 2);
    }
}
