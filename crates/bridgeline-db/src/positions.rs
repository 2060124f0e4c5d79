//! Resume positions in the core event log, one per stream.

use bridgeline_common::StreamPosition;
use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::now_ms;
use crate::repository::positions;

/// Persists how far the consumer has read each core stream.
///
/// Lives in the queue database so a committed position is never ahead of
/// the queue writes it covers.
#[derive(Clone)]
pub struct PositionStore {
    pool: SqlitePool,
}

impl PositionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Last committed position for `stream`, or `None` to start from the beginning.
    pub async fn load(&self, stream: &str) -> Result<Option<StreamPosition>, StoreError> {
        let position = positions::load_position(&self.pool, stream).await?;
        Ok(position.map(StreamPosition))
    }

    pub async fn commit(&self, stream: &str, position: &StreamPosition) -> Result<(), StoreError> {
        positions::upsert_position(&self.pool, stream, position.as_str(), now_ms()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::open_temp;
    use bridgeline_common::StreamPosition;

    #[tokio::test]
    async fn commit_overwrites_previous_position() {
        let (_dir, db) = open_temp().await;
        let store = db.positions();
        assert_eq!(store.load("roomserver").await.unwrap(), None);

        store.commit("roomserver", &StreamPosition::new("10-0")).await.unwrap();
        store.commit("roomserver", &StreamPosition::new("12-1")).await.unwrap();
        assert_eq!(store.load("roomserver").await.unwrap(), Some(StreamPosition::new("12-1")));
        assert_eq!(store.load("other").await.unwrap(), None);
    }
}
