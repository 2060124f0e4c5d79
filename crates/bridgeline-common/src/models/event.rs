//! Room event envelope as produced by the core event log.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, source-defined offset into the core event log.
///
/// Bridgeline never interprets positions; it only stores the last one it
/// fully fanned out and hands it back to the source on restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamPosition(pub String);

impl StreamPosition {
    pub fn new(position: impl Into<String>) -> Self {
        Self(position.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A room event read from the core log.
///
/// Immutable once ingested: the consumer, the queue, and the workers only
/// ever pass it around by reference or as serialized JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Globally unique event ID (`$opaque:server_name`).
    pub event_id: String,
    /// Room the event belongs to (`!opaque:server_name`).
    pub room_id: String,
    /// User who sent the event (`@user:server_name`).
    pub sender: String,
    /// Event type (e.g. `m.room.message`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Present for state events only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    #[serde(default)]
    pub content: serde_json::Value,
    /// Unix millisecond timestamp on the origin server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_server_ts: Option<i64>,
    /// Position of this event in the core log.
    #[serde(default)]
    pub stream_position: StreamPosition,
}

impl Event {
    /// Build a non-state event with empty content.
    pub fn new(
        event_id: impl Into<String>,
        room_id: impl Into<String>,
        sender: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            room_id: room_id.into(),
            sender: sender.into(),
            event_type: event_type.into(),
            state_key: None,
            content: serde_json::Value::Object(Default::default()),
            origin_server_ts: None,
            stream_position: StreamPosition::default(),
        }
    }

    pub fn with_content(mut self, content: serde_json::Value) -> Self {
        self.content = content;
        self
    }

    pub fn with_state_key(mut self, state_key: impl Into<String>) -> Self {
        self.state_key = Some(state_key.into());
        self
    }

    pub fn with_stream_position(mut self, position: impl Into<String>) -> Self {
        self.stream_position = StreamPosition(position.into());
        self
    }

    pub fn is_state(&self) -> bool {
        self.state_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_field_is_renamed_on_the_wire() {
        let ev = Event::new("$e1:example", "!r:example", "@alice:example", "m.room.message")
            .with_content(serde_json::json!({"body": "hi"}));
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "m.room.message");
        assert!(json.get("state_key").is_none());
    }

    #[test]
    fn missing_optional_fields_deserialize() {
        let ev: Event = serde_json::from_str(
            r#"{"event_id":"$e","room_id":"!r:x","sender":"@a:x","type":"m.room.member","state_key":"@a:x"}"#,
        )
        .unwrap();
        assert!(ev.is_state());
        assert_eq!(ev.stream_position, StreamPosition::default());
        assert!(ev.content.is_null());
    }
}
