//! Message envelopes exchanged with the edge
//!
//! Both directions share the same JSON shape:
//! `{"type": "...", "data": {...}, "id": "...", "timestamp": 1700000000000}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Envelope type used for caller-sent events
pub const EVENT_TYPE: &str = "event";

/// Message sent to the edge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub kind: String,

    pub data: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Unix time in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl OutboundMessage {
    /// Build a bare message with no id or timestamp
    pub fn new(kind: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            data,
            id: None,
            timestamp: None,
        }
    }

    /// Build a caller event stamped with a fresh id and the current time
    pub fn event(data: Map<String, Value>) -> Self {
        Self {
            kind: EVENT_TYPE.to_string(),
            data,
            id: Some(generate_id()),
            timestamp: Some(now_millis()),
        }
    }
}

/// Message received from the edge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub data: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl InboundMessage {
    pub fn new(kind: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            data,
            id: None,
            timestamp: None,
        }
    }

    /// Parse a wire frame
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Generate a message id: time-ordered prefix with a random suffix
pub fn generate_id() -> String {
    Uuid::now_v7().simple().to_string()
}

/// Current wall-clock time in Unix milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_outbound_serialization_omits_missing_fields() {
        let msg = OutboundMessage::new("event", object(json!({"event": "click"})));
        let text = serde_json::to_string(&msg).unwrap();
        assert_eq!(text, r#"{"type":"event","data":{"event":"click"}}"#);
    }

    #[test]
    fn test_outbound_event_is_stamped() {
        let before = now_millis();
        let msg = OutboundMessage::event(object(json!({"event": "purchase"})));

        assert_eq!(msg.kind, EVENT_TYPE);
        assert!(!msg.id.as_deref().unwrap_or_default().is_empty());
        assert!(msg.timestamp.unwrap() >= before);
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_inbound_parse_full() {
        let msg = InboundMessage::parse(
            r#"{"type":"price_update","data":{"sku":"A1","price":9.5},"id":"m-1","timestamp":1700000000000}"#,
        )
        .unwrap();

        assert_eq!(msg.kind, "price_update");
        assert_eq!(msg.data.get("sku"), Some(&json!("A1")));
        assert_eq!(msg.id.as_deref(), Some("m-1"));
        assert_eq!(msg.timestamp, Some(1_700_000_000_000));
    }

    #[test]
    fn test_inbound_parse_defaults_data() {
        let msg = InboundMessage::parse(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg.kind, "ping");
        assert!(msg.data.is_empty());
    }

    #[test]
    fn test_inbound_parse_rejects_malformed() {
        assert!(InboundMessage::parse("not json").is_err());
        assert!(InboundMessage::parse(r#"{"data":{}}"#).is_err());
        assert!(InboundMessage::parse(r#"{"type":42,"data":{}}"#).is_err());
        assert!(InboundMessage::parse(r#"{"type":"x","data":[1,2]}"#).is_err());
        assert!(InboundMessage::parse(r#"["type","x"]"#).is_err());
    }
}
