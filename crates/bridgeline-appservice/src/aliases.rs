//! Room alias lookup for `aliases` namespaces.

use std::collections::HashMap;

use async_trait::async_trait;
use bridgeline_db::redis_pool;
use redis::aio::ConnectionManager;

use crate::error::SourceError;
use crate::source::{reconnect_backoff, retry_transient};

/// Alias lookups run while an event is being fanned out, so they give up
/// after this many attempts instead of blocking shutdown.
const ALIAS_LOOKUP_ATTEMPTS: u32 = 5;

/// Resolves the aliases currently published for a room.
#[async_trait]
pub trait AliasResolver: Send + Sync {
    async fn aliases_for_room(&self, room_id: &str) -> Result<Vec<String>, SourceError>;
}

/// Fixed room → aliases map.
#[derive(Debug, Clone, Default)]
pub struct StaticAliases {
    rooms: HashMap<String, Vec<String>>,
}

impl StaticAliases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_room(mut self, room_id: impl Into<String>, aliases: &[&str]) -> Self {
        self.rooms
            .insert(room_id.into(), aliases.iter().map(|a| (*a).to_owned()).collect());
        self
    }
}

#[async_trait]
impl AliasResolver for StaticAliases {
    async fn aliases_for_room(&self, room_id: &str) -> Result<Vec<String>, SourceError> {
        Ok(self.rooms.get(room_id).cloned().unwrap_or_default())
    }
}

/// Alias sets kept by the core in Redis under `{prefix}:room_aliases:{room_id}`.
#[derive(Clone)]
pub struct RedisAliases {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisAliases {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self { conn, prefix: prefix.into() }
    }
}

#[async_trait]
impl AliasResolver for RedisAliases {
    async fn aliases_for_room(&self, room_id: &str) -> Result<Vec<String>, SourceError> {
        let (conn, prefix) = (&self.conn, self.prefix.as_str());
        let aliases = retry_transient("smembers", reconnect_backoff(), Some(ALIAS_LOOKUP_ATTEMPTS), || {
            let mut conn = conn.clone();
            async move { redis_pool::room_aliases(&mut conn, prefix, room_id).await }
        })
        .await?;
        Ok(aliases)
    }
}
