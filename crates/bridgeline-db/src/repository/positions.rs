//! Core-log resume positions: `stream_positions`.

use sqlx::{Executor, Sqlite};

pub async fn load_position<'e, E>(exec: E, stream_name: &str) -> Result<Option<String>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: Option<(String,)> =
        sqlx::query_as("SELECT position FROM stream_positions WHERE stream_name = ?")
            .bind(stream_name)
            .fetch_optional(exec)
            .await?;
    Ok(row.map(|r| r.0))
}

pub async fn upsert_position<'e, E>(
    exec: E,
    stream_name: &str,
    position: &str,
    updated_at: i64,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO stream_positions (stream_name, position, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT (stream_name) DO UPDATE SET
            position   = excluded.position,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(stream_name)
    .bind(position)
    .bind(updated_at)
    .execute(exec)
    .await?;
    Ok(())
}
