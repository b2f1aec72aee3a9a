use sqlx::{PgExecutor, Row};

use crate::engine::types::SegmentRecord;

fn row_to_segment(row: &sqlx::postgres::PgRow) -> SegmentRecord {
    SegmentRecord {
        stream_id: row.get("stream_id"),
        read_seq: row.get::<i64, _>("read_seq") as u64,
        start_offset: row.get::<i64, _>("start_offset") as u64,
        end_offset: row.get::<i64, _>("end_offset") as u64,
        blob_key: row.get("blob_key"),
        content_type: row.get("content_type"),
        size_bytes: row.get::<i64, _>("size_bytes") as u64,
        message_count: row.get::<i64, _>("message_count") as u64,
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
    }
}

pub async fn get<'e>(
    executor: impl PgExecutor<'e>,
    stream_id: &str,
    read_seq: u64,
) -> Result<Option<SegmentRecord>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM segments WHERE stream_id = $1 AND read_seq = $2")
        .bind(stream_id)
        .bind(read_seq as i64)
        .fetch_optional(executor)
        .await?;
    Ok(row.as_ref().map(row_to_segment))
}

/// The most recently sealed segment for a stream, needed by the closed
/// empty-hot-region offset encoding branch.
pub async fn latest<'e>(
    executor: impl PgExecutor<'e>,
    stream_id: &str,
) -> Result<Option<SegmentRecord>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT * FROM segments WHERE stream_id = $1 ORDER BY read_seq DESC LIMIT 1",
    )
    .bind(stream_id)
    .fetch_optional(executor)
    .await?;
    Ok(row.as_ref().map(row_to_segment))
}

pub async fn insert<'e>(
    executor: impl PgExecutor<'e>,
    record: &SegmentRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO segments
             (stream_id, read_seq, start_offset, end_offset, blob_key, content_type,
              size_bytes, message_count, created_at, expires_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"#,
    )
    .bind(&record.stream_id)
    .bind(record.read_seq as i64)
    .bind(record.start_offset as i64)
    .bind(record.end_offset as i64)
    .bind(&record.blob_key)
    .bind(&record.content_type)
    .bind(record.size_bytes as i64)
    .bind(record.message_count as i64)
    .bind(record.created_at)
    .bind(record.expires_at)
    .execute(executor)
    .await?;
    Ok(())
}

/// Segments whose `expires_at` has passed, candidates for the orphan-blob
/// sweep.
pub async fn expired<'e>(
    executor: impl PgExecutor<'e>,
    now: chrono::DateTime<chrono::Utc>,
    limit: i64,
) -> Result<Vec<SegmentRecord>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT * FROM segments WHERE expires_at IS NOT NULL AND expires_at <= $1 LIMIT $2",
    )
    .bind(now)
    .bind(limit)
    .fetch_all(executor)
    .await?;
    Ok(rows.iter().map(row_to_segment).collect())
}

pub async fn delete<'e>(
    executor: impl PgExecutor<'e>,
    stream_id: &str,
    read_seq: u64,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM segments WHERE stream_id = $1 AND read_seq = $2")
        .bind(stream_id)
        .bind(read_seq as i64)
        .execute(executor)
        .await?;
    Ok(())
}
