//! # bridgeline-db
//!
//! Storage layer for Bridgeline. Manages:
//! - **SQLite**: the durable per-application-service delivery queue, in-flight
//!   transactions, and core-log resume positions
//! - **Account store** (`sqlx::Any`, Postgres or SQLite): masquerade accounts and devices
//! - **Redis**: reading the core event stream and room alias sets

pub mod error;
pub mod positions;
pub mod queue;
pub mod redis_pool;
pub mod repository;

pub use error::StoreError;
pub use positions::PositionStore;
pub use queue::{DestinationQueue, QueuedEvent, StoredTransaction};

use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, SqlitePool};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Handle to the queue database, shared by the consumer and every worker.
#[derive(Clone)]
pub struct QueueDatabase {
    pub pool: SqlitePool,
}

impl QueueDatabase {
    /// Connect to the queue database at `url` (e.g. `sqlite://data/appservice.db`).
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?;
        Self::connect_with(options, max_connections).await
    }

    /// Open (creating if needed) a queue database file at `path`.
    pub async fn connect_file(path: &Path) -> Result<Self, StoreError> {
        Self::connect_with(SqliteConnectOptions::new().filename(path), 4).await
    }

    async fn connect_with(
        options: SqliteConnectOptions,
        max_connections: u32,
    ) -> Result<Self, StoreError> {
        // WAL lets the worker read while the consumer appends; FULL makes a
        // commit durable before enqueue returns.
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(30));

        tracing::info!("Opening appservice queue database...");
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        tracing::info!("Appservice queue database ready");

        Ok(Self { pool })
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        tracing::info!("Running queue database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Migrations complete");
        Ok(())
    }

    /// Queue handle for one application service.
    pub fn queue(&self, appservice_id: &str) -> DestinationQueue {
        DestinationQueue::new(self.pool.clone(), appservice_id)
    }

    pub fn positions(&self) -> PositionStore {
        PositionStore::new(self.pool.clone())
    }

    /// Close all connections, checkpointing the WAL.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Handle to the account store (`postgres://…` or `sqlite://…`).
#[derive(Clone)]
pub struct AccountDatabase {
    pub pool: AnyPool,
}

impl AccountDatabase {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        sqlx::any::install_default_drivers();
        tracing::info!("Connecting to account store...");
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await?;
        repository::accounts::ensure_schema(&pool).await?;
        tracing::info!("Account store ready");
        Ok(Self { pool })
    }

    /// `false` if the localpart is already taken.
    pub async fn create_account(&self, localpart: &str, appservice_id: &str) -> Result<bool, StoreError> {
        Ok(repository::accounts::create_account(&self.pool, localpart, appservice_id, now_ms()).await?)
    }

    /// `false` if a device with this access token already exists.
    pub async fn create_device(
        &self,
        localpart: &str,
        device_id: &str,
        access_token: &str,
        display_name: Option<&str>,
    ) -> Result<bool, StoreError> {
        Ok(repository::accounts::create_device(
            &self.pool,
            localpart,
            device_id,
            access_token,
            display_name,
            now_ms(),
        )
        .await?)
    }

    /// Owning application service of `localpart`: `None` if the account does
    /// not exist, `Some(None)` for an account no service owns.
    pub async fn account_owner(&self, localpart: &str) -> Result<Option<Option<String>>, StoreError> {
        Ok(repository::accounts::find_owner(&self.pool, localpart).await?)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Milliseconds since the Unix epoch, for `*_at` columns.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
