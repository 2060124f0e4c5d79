//! Durable per-application-service delivery queue.
//!
//! One [`DestinationQueue`] per application service, all sharing a single
//! SQLite database. The consumer is the only writer of new rows; the
//! service's worker is the only one that reads batches, opens transactions,
//! and advances the cursor. Rows leave the queue only when the cursor passes
//! them after an acknowledged transaction.
//!
//! Write transactions always start with a write so SQLite takes the write
//! lock up front and the busy timeout applies, instead of failing a
//! read-then-write upgrade when the other side committed in between.

use std::sync::Arc;

use bridgeline_common::Event;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::StoreError;
use crate::now_ms;
use crate::repository::{events, transactions};

/// An event as stored in a queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    /// Queue sequence number; strictly increasing in enqueue order.
    pub seq: i64,
    pub event: Event,
}

/// The in-flight transaction for a service, exactly as first sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTransaction {
    pub txn_id: u64,
    pub first_seq: i64,
    pub last_seq: i64,
    pub last_event_id: String,
    pub event_count: usize,
    /// Serialized request body; resent byte-for-byte on every retry.
    pub body: String,
}

impl From<transactions::TxnRow> for StoredTransaction {
    fn from(row: transactions::TxnRow) -> Self {
        let (txn_id, first_seq, last_seq, last_event_id, event_count, body) = row;
        Self {
            txn_id: txn_id as u64,
            first_seq,
            last_seq,
            last_event_id,
            event_count: event_count as usize,
            body,
        }
    }
}

/// Queue handle for one application service. Cheap to clone.
#[derive(Clone)]
pub struct DestinationQueue {
    pool: SqlitePool,
    appservice_id: Arc<str>,
}

impl DestinationQueue {
    pub fn new(pool: SqlitePool, appservice_id: &str) -> Self {
        Self { pool, appservice_id: Arc::from(appservice_id) }
    }

    pub fn appservice_id(&self) -> &str {
        &self.appservice_id
    }

    /// Append `event` to the tail. Durable once this returns `Ok`.
    ///
    /// Returns `false` if the event was already queued (a replay after
    /// restart); the existing entry keeps its place.
    pub async fn enqueue(&self, event: &Event) -> Result<bool, StoreError> {
        let json = serde_json::to_string(event)?;
        let inserted =
            events::insert_event(&self.pool, &self.appservice_id, &event.event_id, &json, now_ms())
                .await?;
        if !inserted {
            debug!(appservice = %self.appservice_id, event_id = %event.event_id, "event already queued");
        }
        Ok(inserted)
    }

    /// Up to `max_count` undelivered events, oldest first. Nothing is removed.
    pub async fn peek_batch(&self, max_count: usize) -> Result<Vec<QueuedEvent>, StoreError> {
        if max_count == 0 {
            return Ok(Vec::new());
        }
        let cursor = events::acked_seq(&self.pool, &self.appservice_id).await?;
        let rows =
            events::fetch_after(&self.pool, &self.appservice_id, cursor, max_count as i64).await?;

        rows.into_iter()
            .map(|(seq, _event_id, json)| {
                let event = serde_json::from_str(&json).map_err(|e| StoreError::Corrupted {
                    appservice_id: self.appservice_id.to_string(),
                    seq,
                    reason: e.to_string(),
                })?;
                Ok(QueuedEvent { seq, event })
            })
            .collect()
    }

    /// Commit the cursor through `through_event_id`.
    ///
    /// Idempotent and monotonic: an event that is no longer queued (already
    /// passed) or never was is a no-op. Returns whether the cursor moved.
    pub async fn advance(&self, through_event_id: &str) -> Result<bool, StoreError> {
        let Some(seq) =
            events::seq_of_event(&self.pool, &self.appservice_id, through_event_id).await?
        else {
            return Ok(false);
        };
        self.advance_to(seq).await
    }

    /// Sequence number of the last acknowledged entry (0 if none).
    pub async fn cursor(&self) -> Result<i64, StoreError> {
        Ok(events::acked_seq(&self.pool, &self.appservice_id).await?)
    }

    /// Number of undelivered events.
    pub async fn len(&self) -> Result<u64, StoreError> {
        let cursor = events::acked_seq(&self.pool, &self.appservice_id).await?;
        let count = events::count_after(&self.pool, &self.appservice_id, cursor).await?;
        Ok(count as u64)
    }

    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len().await? == 0)
    }

    /// The transaction that was sent but not yet acknowledged, if any.
    pub async fn in_flight(&self) -> Result<Option<StoredTransaction>, StoreError> {
        let row = transactions::fetch_txn(&self.pool, &self.appservice_id).await?;
        Ok(row.map(StoredTransaction::from))
    }

    /// Assign the next transaction ID to `batch` and persist it with `body`.
    ///
    /// `batch` must come from [`peek_batch`](Self::peek_batch) and there must
    /// be no transaction in flight.
    pub async fn open_transaction(
        &self,
        batch: &[QueuedEvent],
        body: String,
    ) -> Result<StoredTransaction, StoreError> {
        let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
            return Err(StoreError::EmptyTransaction(self.appservice_id.to_string()));
        };

        let mut tx = self.pool.begin().await?;
        let txn_id = transactions::next_txn_id(&mut *tx, &self.appservice_id).await?;
        transactions::insert_txn(
            &mut *tx,
            &self.appservice_id,
            txn_id,
            first.seq,
            last.seq,
            &last.event.event_id,
            batch.len() as i64,
            &body,
            now_ms(),
        )
        .await?;
        tx.commit().await?;

        debug!(appservice = %self.appservice_id, txn_id, events = batch.len(), "opened transaction");
        Ok(StoredTransaction {
            txn_id: txn_id as u64,
            first_seq: first.seq,
            last_seq: last.seq,
            last_event_id: last.event.event_id.clone(),
            event_count: batch.len(),
            body,
        })
    }

    /// The transaction to push next.
    ///
    /// Returns the persisted in-flight transaction if there is one, so a
    /// retry (or a restart) resends exactly what was sent before. Otherwise
    /// peeks up to `max_count` events, serializes them with `encode`, and
    /// opens a new transaction. `None` when the queue is empty.
    pub async fn begin_transaction<F>(
        &self,
        max_count: usize,
        encode: F,
    ) -> Result<Option<StoredTransaction>, StoreError>
    where
        F: FnOnce(&[QueuedEvent]) -> Result<String, serde_json::Error>,
    {
        if let Some(txn) = self.in_flight().await? {
            return Ok(Some(txn));
        }
        let batch = self.peek_batch(max_count).await?;
        if batch.is_empty() {
            return Ok(None);
        }
        let body = encode(&batch)?;
        self.open_transaction(&batch, body).await.map(Some)
    }

    /// Acknowledge `txn`: advance past its last event and forget it.
    pub async fn complete_transaction(&self, txn: &StoredTransaction) -> Result<(), StoreError> {
        self.advance_to(txn.last_seq).await?;
        Ok(())
    }

    /// Last transaction ID handed out (0 if none).
    pub async fn last_txn_id(&self) -> Result<u64, StoreError> {
        Ok(transactions::last_txn_id(&self.pool, &self.appservice_id).await? as u64)
    }

    async fn advance_to(&self, seq: i64) -> Result<bool, StoreError> {
        let before = events::acked_seq(&self.pool, &self.appservice_id).await?;
        if seq <= before {
            return Ok(false);
        }

        let mut tx = self.pool.begin().await?;
        events::raise_cursor(&mut *tx, &self.appservice_id, seq, now_ms()).await?;
        let removed = events::delete_through(&mut *tx, &self.appservice_id, seq).await?;
        transactions::delete_txn_through(&mut *tx, &self.appservice_id, seq).await?;
        tx.commit().await?;

        debug!(appservice = %self.appservice_id, cursor = seq, removed, "advanced queue cursor");
        Ok(true)
    }
}
