//! Transaction IDs and in-flight transactions: `appservice_txn_counters` / `appservice_txns`.

use sqlx::{Executor, Sqlite};

/// Raw in-flight row:
/// `(txn_id, first_seq, last_seq, last_event_id, event_count, body)`.
pub type TxnRow = (i64, i64, i64, String, i64, String);

/// Allocate the next transaction ID. The first ID for a service is 1.
pub async fn next_txn_id<'e, E>(exec: E, appservice_id: &str) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO appservice_txn_counters (appservice_id, last_txn_id)
        VALUES (?, 1)
        ON CONFLICT (appservice_id) DO UPDATE SET last_txn_id = last_txn_id + 1
        RETURNING last_txn_id
        "#,
    )
    .bind(appservice_id)
    .fetch_one(exec)
    .await?;
    Ok(row.0)
}

/// Last transaction ID handed out, or 0.
pub async fn last_txn_id<'e, E>(exec: E, appservice_id: &str) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT last_txn_id FROM appservice_txn_counters WHERE appservice_id = ?")
            .bind(appservice_id)
            .fetch_optional(exec)
            .await?;
    Ok(row.map(|r| r.0).unwrap_or(0))
}

/// Record the in-flight transaction. Fails if one is already recorded.
#[allow(clippy::too_many_arguments)]
pub async fn insert_txn<'e, E>(
    exec: E,
    appservice_id: &str,
    txn_id: i64,
    first_seq: i64,
    last_seq: i64,
    last_event_id: &str,
    event_count: i64,
    body: &str,
    created_at: i64,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO appservice_txns
            (appservice_id, txn_id, first_seq, last_seq, last_event_id, event_count, body, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(appservice_id)
    .bind(txn_id)
    .bind(first_seq)
    .bind(last_seq)
    .bind(last_event_id)
    .bind(event_count)
    .bind(body)
    .bind(created_at)
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn fetch_txn<'e, E>(exec: E, appservice_id: &str) -> Result<Option<TxnRow>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, TxnRow>(
        r#"
        SELECT txn_id, first_seq, last_seq, last_event_id, event_count, body
        FROM appservice_txns
        WHERE appservice_id = ?
        "#,
    )
    .bind(appservice_id)
    .fetch_optional(exec)
    .await
}

/// Forget the in-flight transaction once the cursor covers all of it.
pub async fn delete_txn_through<'e, E>(exec: E, appservice_id: &str, seq: i64) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM appservice_txns WHERE appservice_id = ? AND last_seq <= ?")
        .bind(appservice_id)
        .bind(seq)
        .execute(exec)
        .await?;
    Ok(result.rows_affected())
}
