//! Application configuration loaded from a TOML file and environment variables.
//!
//! Supports `.env` files for development and environment variables for production.
//! Config precedence: env vars > .env file > config file > defaults

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use validator::Validate;

use crate::error::{ConfigError, ConfigResult};
use crate::models::ApplicationService;

/// Load the configuration.
///
/// `path` names an explicit config file (required to exist). Without it an
/// optional `config.toml` in the working directory is used.
pub fn load(path: Option<&Path>) -> ConfigResult<AppConfig> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let mut builder = config::Config::builder()
        // Defaults
        .set_default("server.name", "localhost")?
        .set_default("database.queue_url", "sqlite://data/appservice.db")?
        .set_default("database.max_connections", 4)?
        .set_default("redis.stream_key", "bridgeline:room_events")?
        .set_default("redis.alias_prefix", "bridgeline")?
        .set_default("redis.block_ms", 5_000)?
        .set_default("redis.batch_size", 100)?
        .set_default("worker.max_transaction_events", 50)?
        .set_default("worker.backoff_base_ms", 1_000)?
        .set_default("worker.backoff_max_ms", 64_000)?
        .set_default("worker.request_timeout_secs", 60)?;

    builder = match path {
        Some(p) => builder.add_source(config::File::from(p).required(true)),
        None => builder.add_source(config::File::with_name("config").required(false)),
    };

    let cfg = builder
        // Environment variables (BRIDGELINE__SERVER__NAME, BRIDGELINE__REDIS__URL, etc.)
        .add_source(
            config::Environment::with_prefix("BRIDGELINE")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(cfg.try_deserialize()?)
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub worker: WorkerConfig,
    #[serde(default)]
    pub appservices: Vec<AppServiceRegistration>,
}

impl AppConfig {
    /// Validate every registration and compile it into an [`ApplicationService`].
    ///
    /// Fails on the first broken registration, or if two share an ID.
    pub fn application_services(&self) -> ConfigResult<Vec<ApplicationService>> {
        let mut seen = HashSet::new();
        let mut services = Vec::with_capacity(self.appservices.len());
        for reg in &self.appservices {
            if !seen.insert(reg.id.as_str()) {
                return Err(ConfigError::DuplicateAppService(reg.id.clone()));
            }
            let service = ApplicationService::from_registration(reg)?;
            tracing::debug!(
                appservice = %service.id,
                namespaces = service.namespaces.len(),
                "Registration loaded"
            );
            services.push(service);
        }
        Ok(services)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Homeserver name used to build masquerade user IDs (e.g. "matrix.example.com").
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// SQLite URL of the durable delivery queue.
    pub queue_url: String,
    pub max_connections: u32,
    /// Account store URL (`postgres://…` or `sqlite://…`). Optional; omit to
    /// skip masquerade account provisioning.
    pub accounts_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    /// Redis connection URL. Optional; omit to run without a core-log source.
    pub url: Option<String>,
    /// Stream the core log appends room events to.
    pub stream_key: String,
    /// Key prefix for room alias sets (`{prefix}:room_aliases:{room_id}`).
    pub alias_prefix: String,
    /// How long a single XREAD blocks before re-checking for shutdown.
    pub block_ms: u64,
    pub batch_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Maximum number of events carried by one transaction.
    pub max_transaction_events: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub request_timeout_secs: u64,
}

/// One `[[appservices]]` entry, as written by the operator.
#[derive(Debug, Deserialize, Clone, Validate)]
pub struct AppServiceRegistration {
    #[validate(length(min = 1, message = "id must not be empty"))]
    pub id: String,
    #[validate(url(message = "url must be an absolute URL"))]
    pub url: String,
    #[validate(length(min = 1, message = "hs_token must not be empty"))]
    pub hs_token: String,
    #[validate(length(min = 1, message = "as_token must not be empty"))]
    pub as_token: String,
    #[validate(length(min = 1, message = "sender_localpart must not be empty"))]
    pub sender_localpart: String,
    #[serde(default)]
    pub namespaces: NamespaceRegistrations,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NamespaceRegistrations {
    #[serde(default)]
    pub users: Vec<NamespaceRegistration>,
    #[serde(default)]
    pub rooms: Vec<NamespaceRegistration>,
    #[serde(default)]
    pub aliases: Vec<NamespaceRegistration>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NamespaceRegistration {
    pub regex: String,
    #[serde(default)]
    pub exclusive: bool,
}
