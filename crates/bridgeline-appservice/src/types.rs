//! Wire types for the application service push API.
//!
//! `PUT {url}/transactions/{txnId}` carries a JSON body of the form
//! `{"events": [ClientEvent, ...]}`.

use bridgeline_common::Event;
use bridgeline_db::QueuedEvent;
use serde::{Deserialize, Serialize};

/// An event as the bridge sees it: the stored event minus our own
/// bookkeeping (the core-log position).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEvent {
    pub event_id: String,
    pub room_id: String,
    pub sender: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    pub content: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_server_ts: Option<i64>,
}

impl From<&Event> for ClientEvent {
    fn from(ev: &Event) -> Self {
        Self {
            event_id: ev.event_id.clone(),
            room_id: ev.room_id.clone(),
            sender: ev.sender.clone(),
            event_type: ev.event_type.clone(),
            state_key: ev.state_key.clone(),
            content: ev.content.clone(),
            origin_server_ts: ev.origin_server_ts,
        }
    }
}

/// Request body of a transaction push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionBody {
    pub events: Vec<ClientEvent>,
}

impl TransactionBody {
    pub fn from_batch(batch: &[QueuedEvent]) -> Self {
        Self { events: batch.iter().map(|q| ClientEvent::from(&q.event)).collect() }
    }

    /// Serialize a batch exactly once; the result is stored and resent verbatim.
    pub fn encode(batch: &[QueuedEvent]) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Self::from_batch(batch))
    }
}
