use sqlx::{PgExecutor, Row};

/// One fan-out target: `source_stream_id` appends are delivered to
/// `session_id`'s subscription queue via `/internal/subscriptions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberLink {
    pub source_stream_id: String,
    pub session_id: String,
}

fn row_to_link(row: &sqlx::postgres::PgRow) -> SubscriberLink {
    SubscriberLink {
        source_stream_id: row.get("source_stream_id"),
        session_id: row.get("session_id"),
    }
}

pub async fn add<'e>(
    executor: impl PgExecutor<'e>,
    source_stream_id: &str,
    session_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO subscriber_links (source_stream_id, session_id)
           VALUES ($1, $2)
           ON CONFLICT (source_stream_id, session_id) DO NOTHING"#,
    )
    .bind(source_stream_id)
    .bind(session_id)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn remove<'e>(
    executor: impl PgExecutor<'e>,
    source_stream_id: &str,
    session_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "DELETE FROM subscriber_links WHERE source_stream_id = $1 AND session_id = $2",
    )
    .bind(source_stream_id)
    .bind(session_id)
    .execute(executor)
    .await?;
    Ok(())
}

/// All sessions subscribed to `source_stream_id`: the fan-out recipient
/// list for a given append. Count drives the inline-vs-queued
/// delivery threshold.
pub async fn subscribers_of<'e>(
    executor: impl PgExecutor<'e>,
    source_stream_id: &str,
) -> Result<Vec<SubscriberLink>, sqlx::Error> {
    let rows = sqlx::query("SELECT * FROM subscriber_links WHERE source_stream_id = $1")
        .bind(source_stream_id)
        .fetch_all(executor)
        .await?;
    Ok(rows.iter().map(row_to_link).collect())
}

/// All sources a given session is subscribed to, returned by
/// `/internal/subscriptions` for a session.
pub async fn subscriptions_of<'e>(
    executor: impl PgExecutor<'e>,
    session_id: &str,
) -> Result<Vec<SubscriberLink>, sqlx::Error> {
    let rows = sqlx::query("SELECT * FROM subscriber_links WHERE session_id = $1")
        .bind(session_id)
        .fetch_all(executor)
        .await?;
    Ok(rows.iter().map(row_to_link).collect())
}

pub async fn count_subscribers<'e>(
    executor: impl PgExecutor<'e>,
    source_stream_id: &str,
) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM subscriber_links WHERE source_stream_id = $1")
        .bind(source_stream_id)
        .fetch_one(executor)
        .await?;
    Ok(row.get("n"))
}
