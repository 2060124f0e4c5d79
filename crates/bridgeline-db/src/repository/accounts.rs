//! Account repository: masquerade accounts and devices for application services.
//!
//! These tables belong to the homeserver's identity store. Bridgeline only
//! inserts the bot account and its device; "already exists" is reported back
//! as `false`, never as an error.

use sqlx::AnyPool;

/// Create the account and device tables if the store is empty (SQLite / fresh Postgres).
pub async fn ensure_schema(pool: &AnyPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS account_accounts (
            localpart     TEXT   NOT NULL PRIMARY KEY,
            created_ts    BIGINT NOT NULL,
            appservice_id TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS device_devices (
            access_token TEXT   NOT NULL PRIMARY KEY,
            device_id    TEXT   NOT NULL,
            localpart    TEXT   NOT NULL,
            display_name TEXT,
            created_ts   BIGINT NOT NULL,
            UNIQUE (localpart, device_id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Create an account owned by an application service.
///
/// Returns `false` if an account with this localpart already exists.
pub async fn create_account(
    pool: &AnyPool,
    localpart: &str,
    appservice_id: &str,
    created_ts: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO account_accounts (localpart, created_ts, appservice_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (localpart) DO NOTHING
        "#,
    )
    .bind(localpart)
    .bind(created_ts)
    .bind(appservice_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Create a device with a fixed access token.
///
/// Returns `false` if a device with this token already exists.
pub async fn create_device(
    pool: &AnyPool,
    localpart: &str,
    device_id: &str,
    access_token: &str,
    display_name: Option<&str>,
    created_ts: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO device_devices (access_token, device_id, localpart, display_name, created_ts)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (access_token) DO NOTHING
        "#,
    )
    .bind(access_token)
    .bind(device_id)
    .bind(localpart)
    .bind(display_name)
    .bind(created_ts)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Application service that owns `localpart`, if the account exists.
pub async fn find_owner(pool: &AnyPool, localpart: &str) -> Result<Option<Option<String>>, sqlx::Error> {
    let row: Option<(Option<String>,)> =
        sqlx::query_as("SELECT appservice_id FROM account_accounts WHERE localpart = $1")
            .bind(localpart)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|r| r.0))
}

/// Count devices registered for `localpart`.
pub async fn count_devices(pool: &AnyPool, localpart: &str) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM device_devices WHERE localpart = $1")
        .bind(localpart)
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp() -> (tempfile::TempDir, AnyPool) {
        sqlx::any::install_default_drivers();
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("accounts.db").display());
        let pool = sqlx::any::AnyPoolOptions::new().max_connections(1).connect(&url).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn create_account_is_idempotent() {
        let (_dir, pool) = open_temp().await;
        assert!(create_account(&pool, "ircbot", "irc", 1).await.unwrap());
        assert!(!create_account(&pool, "ircbot", "irc", 2).await.unwrap());
        assert_eq!(find_owner(&pool, "ircbot").await.unwrap(), Some(Some("irc".to_owned())));
        assert_eq!(find_owner(&pool, "nobody").await.unwrap(), None);
    }

    #[tokio::test]
    async fn device_tokens_are_unique() {
        let (_dir, pool) = open_temp().await;
        assert!(create_device(&pool, "ircbot", "DEV1", "tok", Some("ircbot"), 1).await.unwrap());
        assert!(!create_device(&pool, "ircbot", "DEV2", "tok", None, 2).await.unwrap());
        assert_eq!(count_devices(&pool, "ircbot").await.unwrap(), 1);
    }
}
