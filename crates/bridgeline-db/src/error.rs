//! Storage error types.

use thiserror::Error;

/// Errors from the queue database and the account store.
///
/// For the consumer any of these on `enqueue` is fatal: the event could not
/// be made durable, and dropping it would break at-least-once delivery.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Queue for '{appservice_id}' holds a corrupted entry at seq {seq}: {reason}")]
    Corrupted {
        appservice_id: String,
        seq: i64,
        reason: String,
    },

    #[error("Cannot open an empty transaction for '{0}'")]
    EmptyTransaction(String),
}
