//! Queue rows and cursors: `appservice_events` / `appservice_cursors`.

use sqlx::{Executor, Sqlite};

/// Raw queue row: `(seq, event_id, event_json)`.
pub type EventRow = (i64, String, String);

/// Append an event to an application service's queue.
///
/// Returns `false` if the same event ID is already queued for this service.
pub async fn insert_event<'e, E>(
    exec: E,
    appservice_id: &str,
    event_id: &str,
    event_json: &str,
    enqueued_at: i64,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO appservice_events (appservice_id, event_id, event_json, enqueued_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (appservice_id, event_id) DO NOTHING
        "#,
    )
    .bind(appservice_id)
    .bind(event_id)
    .bind(event_json)
    .bind(enqueued_at)
    .execute(exec)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Oldest `limit` rows with `seq > after_seq`, in enqueue order.
pub async fn fetch_after<'e, E>(
    exec: E,
    appservice_id: &str,
    after_seq: i64,
    limit: i64,
) -> Result<Vec<EventRow>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, EventRow>(
        r#"
        SELECT seq, event_id, event_json
        FROM appservice_events
        WHERE appservice_id = ? AND seq > ?
        ORDER BY seq ASC
        LIMIT ?
        "#,
    )
    .bind(appservice_id)
    .bind(after_seq)
    .bind(limit)
    .fetch_all(exec)
    .await
}

/// Number of rows with `seq > after_seq`.
pub async fn count_after<'e, E>(exec: E, appservice_id: &str, after_seq: i64) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM appservice_events WHERE appservice_id = ? AND seq > ?",
    )
    .bind(appservice_id)
    .bind(after_seq)
    .fetch_one(exec)
    .await?;
    Ok(row.0)
}

/// Queue sequence number of a still-queued event.
pub async fn seq_of_event<'e, E>(
    exec: E,
    appservice_id: &str,
    event_id: &str,
) -> Result<Option<i64>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT seq FROM appservice_events WHERE appservice_id = ? AND event_id = ?",
    )
    .bind(appservice_id)
    .bind(event_id)
    .fetch_optional(exec)
    .await?;
    Ok(row.map(|r| r.0))
}

/// Highest acknowledged seq, or 0 if nothing was ever acknowledged.
pub async fn acked_seq<'e, E>(exec: E, appservice_id: &str) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT acked_seq FROM appservice_cursors WHERE appservice_id = ?")
            .bind(appservice_id)
            .fetch_optional(exec)
            .await?;
    Ok(row.map(|r| r.0).unwrap_or(0))
}

/// Move the cursor forward to `seq`. Never moves it backward.
pub async fn raise_cursor<'e, E>(
    exec: E,
    appservice_id: &str,
    seq: i64,
    updated_at: i64,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO appservice_cursors (appservice_id, acked_seq, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT (appservice_id) DO UPDATE SET
            acked_seq  = MAX(acked_seq, excluded.acked_seq),
            updated_at = excluded.updated_at
        "#,
    )
    .bind(appservice_id)
    .bind(seq)
    .bind(updated_at)
    .execute(exec)
    .await?;
    Ok(())
}

/// Drop acknowledged rows up to and including `seq`.
pub async fn delete_through<'e, E>(exec: E, appservice_id: &str, seq: i64) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM appservice_events WHERE appservice_id = ? AND seq <= ?")
        .bind(appservice_id)
        .bind(seq)
        .execute(exec)
        .await?;
    Ok(result.rows_affected())
}
