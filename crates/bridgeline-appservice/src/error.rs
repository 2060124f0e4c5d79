//! Fan-out and delivery error types.

use bridgeline_db::StoreError;
use thiserror::Error;

/// A failed transaction push. Always transient: the worker backs off and
/// resends the same transaction.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Request to '{appservice}' timed out")]
    Timeout { appservice: String },

    #[error("Network error talking to '{appservice}': {message}")]
    Network { appservice: String, message: String },

    #[error("'{appservice}' answered with HTTP {status}")]
    Status { appservice: String, status: u16 },
}

impl DeliveryError {
    /// Build from a `reqwest` failure, keeping timeouts distinguishable.
    pub fn from_reqwest(appservice: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout { appservice: appservice.to_owned() }
        } else {
            Self::Network { appservice: appservice.to_owned(), message: e.to_string() }
        }
    }
}

/// Why the consumer stopped. Every variant is fatal.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Failed to enqueue event '{event_id}' for '{appservice}': {source}")]
    Enqueue {
        appservice: String,
        event_id: String,
        #[source]
        source: StoreError,
    },

    #[error("Failed to commit stream position '{position}': {source}")]
    CommitPosition {
        position: String,
        #[source]
        source: StoreError,
    },

    #[error("Failed to load stream position: {0}")]
    LoadPosition(#[source] StoreError),

    #[error("Event source failed: {0}")]
    Source(#[source] SourceError),

    #[error("Consumer task aborted: {0}")]
    Aborted(#[from] tokio::task::JoinError),
}

/// Errors from reading the core event stream or resolving aliases.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Malformed stream entry '{id}': {reason}")]
    Malformed { id: String, reason: String },
}

/// Errors from creating the masquerade account and device.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Account store error: {0}")]
    Store(#[from] StoreError),

    #[error("Account '{localpart}' exists but is not owned by this application service (owner: {owner:?})")]
    ForeignAccount {
        localpart: String,
        owner: Option<String>,
    },

    #[error("Provisioning '{appservice}' failed: {source}")]
    AppService {
        appservice: String,
        #[source]
        source: Box<ProvisionError>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
