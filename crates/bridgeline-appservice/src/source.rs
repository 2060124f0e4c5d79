//! Readers of the core event log.

use std::collections::VecDeque;
use std::future::Future;

use async_trait::async_trait;
use bridgeline_common::{Event, StreamPosition};
use bridgeline_db::redis_pool::{self, StreamEntry, STREAM_START};
use redis::aio::ConnectionManager;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::backoff::Backoff;
use crate::error::SourceError;

/// Delay between attempts after a dropped Redis connection.
pub(crate) fn reconnect_backoff() -> Backoff {
    Backoff::from_millis(100, 5_000)
}

/// Whether a Redis error is a lost or refused connection that
/// `ConnectionManager` recovers from on the next command.
pub(crate) fn is_transient(err: &redis::RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout()
}

/// Run `op` until it succeeds or fails with a non-transient error.
///
/// With `max_attempts` set, the last transient error is returned once that
/// many attempts have failed.
pub(crate) async fn retry_transient<T, F, Fut>(
    what: &str,
    backoff: Backoff,
    max_attempts: Option<u32>,
    mut op: F,
) -> Result<T, redis::RedisError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, redis::RedisError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_transient(&e) => {
                attempt = attempt.saturating_add(1);
                if max_attempts.is_some_and(|max| attempt >= max) {
                    return Err(e);
                }
                let delay = backoff.delay(attempt);
                warn!(operation = what, attempt, error = %e, delay_ms = delay.as_millis() as u64, "Redis unavailable, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// An ordered stream of room events.
///
/// `next_event` must be cancel-safe: dropping the future before it resolves
/// must not lose an event. Every returned event carries its
/// `stream_position`.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Name under which the consumer persists its position.
    fn stream_name(&self) -> &str;

    /// Continue strictly after `position` instead of from the start.
    async fn resume_after(&mut self, position: StreamPosition) -> Result<(), SourceError> {
        let _ = position;
        Ok(())
    }

    /// The next event, or `None` once the stream is closed for good.
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError>;
}

/// Events pushed in-process through a tokio channel.
pub struct ChannelEventSource {
    name: String,
    rx: mpsc::Receiver<Event>,
}

impl ChannelEventSource {
    /// A bounded channel and the source reading from it. Dropping every
    /// sender closes the stream.
    pub fn channel(name: impl Into<String>, buffer: usize) -> (mpsc::Sender<Event>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self { name: name.into(), rx })
    }
}

#[async_trait]
impl EventSource for ChannelEventSource {
    fn stream_name(&self) -> &str {
        &self.name
    }

    async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        Ok(self.rx.recv().await)
    }
}

/// A Redis stream written by the core; each entry holds the event JSON in
/// its `event` field and the entry ID is the stream position.
pub struct RedisEventSource {
    conn: ConnectionManager,
    key: String,
    last_id: String,
    block_ms: usize,
    batch_size: usize,
    buffered: VecDeque<Event>,
}

impl RedisEventSource {
    pub fn new(conn: ConnectionManager, key: impl Into<String>, block_ms: u64, batch_size: usize) -> Self {
        Self {
            conn,
            key: key.into(),
            last_id: STREAM_START.to_owned(),
            block_ms: block_ms as usize,
            batch_size: batch_size.max(1),
            buffered: VecDeque::new(),
        }
    }

    fn decode(entry: StreamEntry) -> Result<Event, SourceError> {
        let json = entry.event_json.ok_or_else(|| SourceError::Malformed {
            id: entry.id.clone(),
            reason: format!("missing '{}' field", redis_pool::EVENT_FIELD),
        })?;
        let event: Event = serde_json::from_str(&json).map_err(|e| SourceError::Malformed {
            id: entry.id.clone(),
            reason: e.to_string(),
        })?;
        Ok(event.with_stream_position(entry.id))
    }
}

#[async_trait]
impl EventSource for RedisEventSource {
    fn stream_name(&self) -> &str {
        &self.key
    }

    async fn resume_after(&mut self, position: StreamPosition) -> Result<(), SourceError> {
        debug!(stream = %self.key, position = %position, "resuming core stream");
        self.last_id = position.0;
        self.buffered.clear();
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        loop {
            if let Some(event) = self.buffered.pop_front() {
                return Ok(Some(event));
            }

            // `last_id` only moves once the whole reply is buffered, so a
            // cancelled read is simply repeated.
            let (conn, key, after) = (&self.conn, self.key.as_str(), self.last_id.as_str());
            let (block_ms, count) = (self.block_ms, self.batch_size);
            let entries = retry_transient("xread", reconnect_backoff(), None, || {
                let mut conn = conn.clone();
                async move { redis_pool::read_stream_after(&mut conn, key, after, block_ms, count).await }
            })
            .await?;

            let Some(last) = entries.last() else { continue };
            self.last_id = last.id.clone();

            for entry in entries {
                let id = entry.id.clone();
                match Self::decode(entry) {
                    Ok(event) => self.buffered.push_back(event),
                    // An undecodable entry can never be delivered; it is skipped.
                    Err(e) => warn!(stream = %self.key, entry = %id, error = %e, "skipping core stream entry"),
                }
            }
        }
    }
}
