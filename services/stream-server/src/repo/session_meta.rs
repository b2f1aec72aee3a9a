use sqlx::{PgExecutor, Row};

use crate::engine::types::SessionMeta;

fn row_to_session(row: &sqlx::postgres::PgRow) -> SessionMeta {
    SessionMeta {
        session_id: row.get("session_id"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        last_active: row.get("last_active"),
    }
}

pub async fn get<'e>(
    executor: impl PgExecutor<'e>,
    session_id: &str,
) -> Result<Option<SessionMeta>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM session_meta WHERE session_id = $1")
        .bind(session_id)
        .fetch_optional(executor)
        .await?;
    Ok(row.as_ref().map(row_to_session))
}

pub async fn insert<'e>(
    executor: impl PgExecutor<'e>,
    session_id: &str,
    expires_at: chrono::DateTime<chrono::Utc>,
) -> Result<SessionMeta, sqlx::Error> {
    let row = sqlx::query(
        r#"INSERT INTO session_meta (session_id, created_at, expires_at, last_active)
           VALUES ($1, now(), $2, now())
           RETURNING *"#,
    )
    .bind(session_id)
    .bind(expires_at)
    .fetch_one(executor)
    .await?;
    Ok(row_to_session(&row))
}

pub async fn touch<'e>(
    executor: impl PgExecutor<'e>,
    session_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE session_meta SET last_active = now() WHERE session_id = $1")
        .bind(session_id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn delete<'e>(
    executor: impl PgExecutor<'e>,
    session_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM session_meta WHERE session_id = $1")
        .bind(session_id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Sessions past their expiry, swept lazily by the subscription routes on
/// access (mirrors the producer-state TTL approach).
pub async fn expired<'e>(
    executor: impl PgExecutor<'e>,
    now: chrono::DateTime<chrono::Utc>,
    limit: i64,
) -> Result<Vec<SessionMeta>, sqlx::Error> {
    let rows = sqlx::query("SELECT * FROM session_meta WHERE expires_at <= $1 LIMIT $2")
        .bind(now)
        .bind(limit)
        .fetch_all(executor)
        .await?;
    Ok(rows.iter().map(row_to_session).collect())
}
