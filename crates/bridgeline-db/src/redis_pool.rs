//! Redis connection and helpers for the core event stream and alias sets.

use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;

/// Stream entry field that carries the event JSON.
pub const EVENT_FIELD: &str = "event";

/// Stream ID that reads from the very beginning of a stream.
pub const STREAM_START: &str = "0-0";

/// One raw entry of the core event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Redis entry ID, used as the resume position.
    pub id: String,
    /// The `event` field, if the entry has one.
    pub event_json: Option<String>,
}

/// Open a reconnecting connection to `url`.
pub async fn connect(url: &str) -> Result<ConnectionManager, redis::RedisError> {
    tracing::info!("Connecting to Redis...");
    let client = redis::Client::open(url)?;
    let conn = ConnectionManager::new(client).await?;
    tracing::info!("Redis connection established");
    Ok(conn)
}

/// Read up to `count` entries of `key` strictly after `after_id`, blocking up
/// to `block_ms` for new ones. An empty result means the block timed out.
pub async fn read_stream_after(
    conn: &mut ConnectionManager,
    key: &str,
    after_id: &str,
    block_ms: usize,
    count: usize,
) -> Result<Vec<StreamEntry>, redis::RedisError> {
    let options = StreamReadOptions::default().block(block_ms).count(count);
    let reply: Option<StreamReadReply> = conn.xread_options(&[key], &[after_id], &options).await?;

    let entries = reply
        .into_iter()
        .flat_map(|r| r.keys)
        .flat_map(|k| k.ids)
        .map(|entry| StreamEntry {
            event_json: entry.get::<String>(EVENT_FIELD),
            id: entry.id,
        })
        .collect();
    Ok(entries)
}

/// Key of the set holding the aliases of `room_id`.
pub fn room_aliases_key(prefix: &str, room_id: &str) -> String {
    format!("{prefix}:room_aliases:{room_id}")
}

/// All aliases currently published for `room_id`.
pub async fn room_aliases(
    conn: &mut ConnectionManager,
    prefix: &str,
    room_id: &str,
) -> Result<Vec<String>, redis::RedisError> {
    conn.smembers(room_aliases_key(prefix, room_id)).await
}
