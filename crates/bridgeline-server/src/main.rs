//! # Bridgeline Server
//!
//! Main binary for the application service fan-out:
//! - loads `[[appservices]]` registrations and provisions their bot accounts
//! - reads room events from the core log (Redis stream)
//! - delivers them to each bridge through its own durable queue and worker
//!
//! Stops on Ctrl-C / SIGTERM, or when the event consumer hits a fatal error.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bridgeline_appservice::provisioning::provision_all;
use bridgeline_appservice::{
    AliasResolver, ChannelEventSource, EventSource, HttpTransactionSender, RedisAliases,
    RedisEventSource, Registry, Runtime, StaticAliases, WorkerSettings,
};
use bridgeline_common::config::AppConfig;
use bridgeline_common::ConfigError;
use bridgeline_db::{redis_pool, AccountDatabase, QueueDatabase};
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "bridgeline", version, about = "Event fan-out to Matrix application services")]
struct Cli {
    /// Path to the TOML config file (defaults to ./config.toml if present).
    #[arg(long, env = "BRIDGELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing (structured logging)
    init_tracing(cli.json_logs);

    // Load configuration
    let config = bridgeline_common::config::load(cli.config.as_deref()).inspect_err(log_config_error)?;

    tracing::info!("Starting Bridgeline v{}", env!("CARGO_PKG_VERSION"));

    let services = config.application_services().inspect_err(log_config_error)?;
    tracing::info!(count = services.len(), "Loaded application service registrations");

    // === Masquerade accounts ===
    if let Some(url) = &config.database.accounts_url {
        let accounts = AccountDatabase::connect(url, config.database.max_connections).await?;
        provision_all(&accounts, &services).await?;
        accounts.close().await;
        tracing::info!("Application service accounts provisioned");
    } else {
        tracing::warn!("database.accounts_url not set; skipping account provisioning");
    }

    // === Durable queue ===
    if let Some(dir) = sqlite_parent_dir(&config.database.queue_url) {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating queue directory {}", dir.display()))?;
    }
    let db = QueueDatabase::connect(&config.database.queue_url, config.database.max_connections)
        .await?;
    db.migrate().await?;

    let registry = Arc::new(Registry::new(services, &db)?);
    let sender = Arc::new(HttpTransactionSender::new(Duration::from_secs(
        config.worker.request_timeout_secs,
    ))?);

    // === Core event source ===
    // Without Redis the workers still drain whatever earlier runs queued.
    let (source, aliases, _idle_sender) = event_source(&config).await?;

    let mut runtime = Runtime::start(
        registry,
        source,
        aliases,
        db.positions(),
        sender,
        WorkerSettings::from_config(&config.worker),
    );

    tokio::select! {
        _ = shutdown_signal() => tracing::info!("Shutdown signal received"),
        _ = runtime.wait_consumer() => tracing::warn!("Event consumer exited"),
    }

    for status in runtime.registry().statuses() {
        tracing::info!(
            appservice = %status.appservice_id,
            phase = ?status.phase,
            in_flight_txn = ?status.in_flight_txn,
            consecutive_failures = status.consecutive_failures,
            "Worker state at shutdown"
        );
    }

    let result = runtime.shutdown().await;
    db.close().await;

    if let Err(e) = &result {
        tracing::error!(error = %e, "Event consumer failed");
    }
    result.map_err(Into::into)
}

fn log_config_error(e: &ConfigError) {
    tracing::error!(error_code = e.error_code(), error = %e, "Invalid configuration");
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "bridgeline=info,bridgeline_appservice=info,bridgeline_db=info".into());

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).with_target(true).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    }
}

type SourceParts = (
    Box<dyn EventSource>,
    Arc<dyn AliasResolver>,
    Option<tokio::sync::mpsc::Sender<bridgeline_common::Event>>,
);

async fn event_source(config: &AppConfig) -> anyhow::Result<SourceParts> {
    let Some(url) = &config.redis.url else {
        tracing::warn!("redis.url not set; no core events will be consumed");
        let (tx, source) = ChannelEventSource::channel("idle", 1);
        return Ok((Box::new(source), Arc::new(StaticAliases::new()), Some(tx)));
    };

    // Separate connections: XREAD BLOCK would stall alias lookups on a shared one.
    let stream_conn = redis_pool::connect(url).await?;
    let alias_conn = redis_pool::connect(url).await?;

    let source = RedisEventSource::new(
        stream_conn,
        config.redis.stream_key.clone(),
        config.redis.block_ms,
        config.redis.batch_size,
    );
    let aliases = RedisAliases::new(alias_conn, config.redis.alias_prefix.clone());
    Ok((Box::new(source), Arc::new(aliases), None))
}

/// Directory holding a file-backed SQLite database, if it has one.
fn sqlite_parent_dir(url: &str) -> Option<PathBuf> {
    let path = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path == ":memory:" {
        return None;
    }
    Path::new(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_dir_of_sqlite_urls() {
        assert_eq!(sqlite_parent_dir("sqlite://data/appservice.db"), Some(PathBuf::from("data")));
        assert_eq!(
            sqlite_parent_dir("sqlite:///var/lib/bridgeline/q.db?mode=rwc"),
            Some(PathBuf::from("/var/lib/bridgeline"))
        );
        assert_eq!(sqlite_parent_dir("sqlite://queue.db"), None);
        assert_eq!(sqlite_parent_dir("sqlite::memory:"), None);
        assert_eq!(sqlite_parent_dir("postgres://localhost/db"), None);
    }

    #[test]
    fn cli_accepts_config_and_json_flag() {
        let cli = Cli::try_parse_from(["bridgeline", "--config", "/etc/bridgeline.toml", "--json-logs"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/bridgeline.toml")));
        assert!(cli.json_logs);
    }

    #[tokio::test]
    async fn idle_source_without_redis() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridgeline.toml");
        std::fs::write(&path, "[server]\nname = \"example.org\"\n").unwrap();
        let config = bridgeline_common::config::load(Some(&path)).unwrap();

        let (source, _aliases, idle) = event_source(&config).await.unwrap();
        assert_eq!(source.stream_name(), "idle");
        assert!(idle.is_some());
    }
}
