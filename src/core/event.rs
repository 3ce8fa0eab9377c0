//! Broadcast event record
//!
//! The single structured record that travels between the hub, the router and
//! every connected client: `{eventType, userId, sessionId, timestamp, data}`.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Target user value selecting master-only fan-out across every session
pub const WILDCARD_USER: &str = "*";

/// Well-known event type tags
pub mod kinds {
    pub const COMMAND_PREFIX: &str = "COMMAND_";
    pub const COMMAND_SET: &str = "COMMAND_SET";

    pub const STORAGE_PREFIX: &str = "S3_";
    pub const S3_UPLOAD_REQUEST: &str = "S3_UPLOAD_REQUEST";
    pub const S3_UPLOAD_RESPONSE: &str = "S3_UPLOAD_RESPONSE";
    pub const S3_SYNC_REQUEST: &str = "S3_SYNC_REQUEST";
    pub const S3_SYNC_RESPONSE: &str = "S3_SYNC_RESPONSE";
    pub const S3_DELETE_REQUEST: &str = "S3_DELETE_REQUEST";
    pub const S3_DELETE_RESPONSE: &str = "S3_DELETE_RESPONSE";
    pub const S3_ERROR: &str = "S3_ERROR";

    pub const DEBUG_PING: &str = "DEBUG_PING";
    pub const DEBUG_GESTURE_PONG: &str = "DEBUG_GESTURE_PONG";
    pub const DEBUG_VOICE_PONG: &str = "DEBUG_VOICE_PONG";
}

/// Event type tag (free-form string on the wire)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// `COMMAND_<KIND>` tag for an upstream command or voice verb
    pub fn command(kind: &str) -> Self {
        Self(format!("{}{}", kinds::COMMAND_PREFIX, kind.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Object-storage request/response family
    pub fn is_storage(&self) -> bool {
        self.0.starts_with(kinds::STORAGE_PREFIX)
    }

    /// Latency-probe replies sent back by visualiser clients
    pub fn is_debug_pong(&self) -> bool {
        self.0 == kinds::DEBUG_GESTURE_PONG || self.0 == kinds::DEBUG_VOICE_PONG
    }
}

impl From<&str> for EventType {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Event record exchanged with clients
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsocketEvent {
    pub event_type: EventType,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub session_id: String,
    /// Unix milliseconds
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl WebsocketEvent {
    /// Event stamped with the current time
    pub fn new(
        event_type: impl Into<EventType>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            timestamp: now_millis(),
            data,
        }
    }

    /// Event addressed to every session master
    pub fn to_all_masters(event_type: impl Into<EventType>, data: serde_json::Value) -> Self {
        Self::new(event_type, WILDCARD_USER, "", data)
    }

    #[inline]
    pub fn is_wildcard(&self) -> bool {
        self.user_id == WILDCARD_USER
    }

    /// Serialize for the wire
    pub fn encode(&self) -> Result<bytes::Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(bytes::Bytes::from)
    }
}

/// Current wall-clock time in Unix milliseconds
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_field_names() {
        let event = WebsocketEvent {
            event_type: EventType::new("COMMAND_MOVE"),
            user_id: "alice".into(),
            session_id: "room".into(),
            timestamp: 42,
            data: json!([1.0, 2.0]),
        };

        let value: serde_json::Value = serde_json::from_slice(&event.encode().unwrap()).unwrap();
        assert_eq!(value["eventType"], "COMMAND_MOVE");
        assert_eq!(value["userId"], "alice");
        assert_eq!(value["sessionId"], "room");
        assert_eq!(value["timestamp"], 42);
        assert_eq!(value["data"][1], 2.0);
    }

    #[test]
    fn test_missing_fields_default() {
        let event: WebsocketEvent = serde_json::from_str(r#"{"eventType":"PING"}"#).unwrap();
        assert_eq!(event.event_type.as_str(), "PING");
        assert!(event.user_id.is_empty());
        assert_eq!(event.data, serde_json::Value::Null);
    }

    #[test]
    fn test_event_type_families() {
        assert!(EventType::new(kinds::S3_SYNC_REQUEST).is_storage());
        assert!(!EventType::new("COMMAND_MOVE").is_storage());
        assert!(EventType::new(kinds::DEBUG_VOICE_PONG).is_debug_pong());
        assert!(!EventType::new(kinds::DEBUG_PING).is_debug_pong());
        assert_eq!(EventType::command("rotate").as_str(), "COMMAND_ROTATE");
    }

    #[test]
    fn test_wildcard_target() {
        let event = WebsocketEvent::to_all_masters("COMMAND_SET", serde_json::Value::Null);
        assert!(event.is_wildcard());
        assert!(event.timestamp > 0);
    }
}
