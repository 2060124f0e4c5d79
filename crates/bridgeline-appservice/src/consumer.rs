//! The event consumer: single reader of the core log.
//!
//! For every event, in stream order: match it against each destination,
//! durably enqueue it for every match, wake that destination's worker, and
//! only then commit the event's stream position. A queue write failure stops
//! the consumer; it never drops or skips an event.

use std::sync::Arc;

use bridgeline_common::Event;
use bridgeline_db::PositionStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::aliases::AliasResolver;
use crate::error::ConsumerError;
use crate::matcher::{matches_aliases, matches_ids};
use crate::registry::Registry;
use crate::source::EventSource;

pub struct Consumer {
    registry: Arc<Registry>,
    source: Box<dyn EventSource>,
    aliases: Arc<dyn AliasResolver>,
    positions: PositionStore,
}

impl Consumer {
    pub fn new(
        registry: Arc<Registry>,
        source: Box<dyn EventSource>,
        aliases: Arc<dyn AliasResolver>,
        positions: PositionStore,
    ) -> Self {
        Self { registry, source, aliases, positions }
    }

    /// Consume until the stream closes, `cancel` fires, or a fatal error.
    ///
    /// Cancellation is only observed between events.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), ConsumerError> {
        let stream = self.source.stream_name().to_owned();

        if let Some(position) =
            self.positions.load(&stream).await.map_err(ConsumerError::LoadPosition)?
        {
            info!(stream = %stream, position = %position, "Resuming event consumer");
            self.source.resume_after(position).await.map_err(ConsumerError::Source)?;
        } else {
            info!(stream = %stream, "Starting event consumer from the beginning");
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(stream = %stream, "Event consumer cancelled");
                    return Ok(());
                }
                next = self.source.next_event() => next,
            };

            let event = match next {
                Ok(Some(event)) => event,
                Ok(None) => {
                    info!(stream = %stream, "Core event stream closed");
                    return Ok(());
                }
                Err(e) => {
                    error!(stream = %stream, error = %e, "Event source failed");
                    return Err(ConsumerError::Source(e));
                }
            };

            if let Err(e) = self.process(&stream, &event).await {
                error!(stream = %stream, event_id = %event.event_id, error = %e, "Event consumer stopping");
                return Err(e);
            }
        }
    }

    /// Fan `event` out and commit its position. Returns how many
    /// destinations it was queued for.
    pub async fn process(&self, stream: &str, event: &Event) -> Result<usize, ConsumerError> {
        // Looked up at most once per event, and only if needed.
        let mut room_aliases: Option<Vec<String>> = None;
        let mut matched = 0;

        for dest in self.registry.iter() {
            let service = &dest.service;
            let interested = if matches_ids(event, service) {
                true
            } else if service.wants_aliases() {
                if room_aliases.is_none() {
                    let found = self
                        .aliases
                        .aliases_for_room(&event.room_id)
                        .await
                        .map_err(ConsumerError::Source)?;
                    room_aliases = Some(found);
                }
                matches_aliases(room_aliases.as_deref().unwrap_or_default(), service)
            } else {
                false
            };
            if !interested {
                continue;
            }

            dest.queue.enqueue(event).await.map_err(|source| ConsumerError::Enqueue {
                appservice: dest.id().to_owned(),
                event_id: event.event_id.clone(),
                source,
            })?;
            dest.wake.signal();
            matched += 1;
        }

        if !event.stream_position.as_str().is_empty() {
            self.positions.commit(stream, &event.stream_position).await.map_err(|source| {
                ConsumerError::CommitPosition { position: event.stream_position.to_string(), source }
            })?;
        }

        debug!(event_id = %event.event_id, destinations = matched, "Event fanned out");
        Ok(matched)
    }
}
