use sqlx::{PgExecutor, Row};

use crate::engine::types::StreamMeta;

fn row_to_meta(row: &sqlx::postgres::PgRow) -> StreamMeta {
    StreamMeta {
        stream_id: row.get("stream_id"),
        content_type: row.get("content_type"),
        closed: row.get("closed"),
        closed_by_id: row.get("closed_by_id"),
        closed_by_epoch: row.get("closed_by_epoch"),
        closed_by_seq: row.get("closed_by_seq"),
        closed_at: row.get("closed_at"),
        tail_offset: row.get::<i64, _>("tail_offset") as u64,
        segment_start: row.get::<i64, _>("segment_start") as u64,
        read_seq: row.get::<i64, _>("read_seq") as u64,
        last_stream_seq: row.get("last_stream_seq"),
        ttl_seconds: row.get("ttl_seconds"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
        subscriber_count: row.get("subscriber_count"),
    }
}

pub async fn get_stream<'e>(
    executor: impl PgExecutor<'e>,
    stream_id: &str,
) -> Result<Option<StreamMeta>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM stream_meta WHERE stream_id = $1")
        .bind(stream_id)
        .fetch_optional(executor)
        .await?;
    Ok(row.as_ref().map(row_to_meta))
}

pub async fn insert_stream<'e>(
    executor: impl PgExecutor<'e>,
    stream_id: &str,
    content_type: &str,
    ttl_seconds: Option<i64>,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
) -> Result<StreamMeta, sqlx::Error> {
    let row = sqlx::query(
        r#"INSERT INTO stream_meta
             (stream_id, content_type, closed, tail_offset, segment_start, read_seq,
              ttl_seconds, expires_at, created_at, subscriber_count)
           VALUES ($1, $2, false, 0, 0, 0, $3, $4, now(), 0)
           RETURNING *"#,
    )
    .bind(stream_id)
    .bind(content_type)
    .bind(ttl_seconds)
    .bind(expires_at)
    .fetch_one(executor)
    .await?;
    Ok(row_to_meta(&row))
}

/// Applied after a successful append: advance the tail, optionally set
/// `last_stream_seq`, optionally close.
pub struct TailUpdate<'a> {
    pub new_tail_offset: u64,
    pub stream_seq: Option<&'a str>,
    pub close: Option<ProducerCloseInfo<'a>>,
}

pub struct ProducerCloseInfo<'a> {
    pub producer_id: &'a str,
    pub epoch: i64,
    pub seq: i64,
}

pub async fn advance_tail<'e>(
    executor: impl PgExecutor<'e>,
    stream_id: &str,
    update: &TailUpdate<'_>,
) -> Result<(), sqlx::Error> {
    match &update.close {
        Some(c) => {
            sqlx::query(
                r#"UPDATE stream_meta
                   SET tail_offset = $2,
                       last_stream_seq = COALESCE($3, last_stream_seq),
                       closed = true,
                       closed_at = now(),
                       closed_by_id = $4,
                       closed_by_epoch = $5,
                       closed_by_seq = $6
                   WHERE stream_id = $1"#,
            )
            .bind(stream_id)
            .bind(update.new_tail_offset as i64)
            .bind(update.stream_seq)
            .bind(c.producer_id)
            .bind(c.epoch)
            .bind(c.seq)
            .execute(executor)
            .await?;
        }
        None => {
            sqlx::query(
                r#"UPDATE stream_meta
                   SET tail_offset = $2,
                       last_stream_seq = COALESCE($3, last_stream_seq)
                   WHERE stream_id = $1"#,
            )
            .bind(stream_id)
            .bind(update.new_tail_offset as i64)
            .bind(update.stream_seq)
            .execute(executor)
            .await?;
        }
    }
    Ok(())
}

/// Applied by the rotation path: `segment_start = tail_offset`,
/// `read_seq += 1`.
pub async fn apply_rotation<'e>(
    executor: impl PgExecutor<'e>,
    stream_id: &str,
    new_segment_start: u64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE stream_meta
           SET segment_start = $2, read_seq = read_seq + 1
           WHERE stream_id = $1"#,
    )
    .bind(stream_id)
    .bind(new_segment_start as i64)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn close_stream<'e>(
    executor: impl PgExecutor<'e>,
    stream_id: &str,
    producer_id: &str,
    epoch: i64,
    seq: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE stream_meta
           SET closed = true, closed_at = now(),
               closed_by_id = $2, closed_by_epoch = $3, closed_by_seq = $4
           WHERE stream_id = $1"#,
    )
    .bind(stream_id)
    .bind(producer_id)
    .bind(epoch)
    .bind(seq)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn delete_stream_data<'e>(
    executor: impl PgExecutor<'e> + Copy,
    stream_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM hot_ops WHERE stream_id = $1")
        .bind(stream_id)
        .execute(executor)
        .await?;
    sqlx::query("DELETE FROM segments WHERE stream_id = $1")
        .bind(stream_id)
        .execute(executor)
        .await?;
    sqlx::query("DELETE FROM producer_state WHERE stream_id = $1")
        .bind(stream_id)
        .execute(executor)
        .await?;
    sqlx::query("DELETE FROM subscriber_links WHERE source_stream_id = $1 OR session_id = $1")
        .bind(stream_id)
        .execute(executor)
        .await?;
    sqlx::query("DELETE FROM session_meta WHERE session_id = $1")
        .bind(stream_id)
        .execute(executor)
        .await?;
    sqlx::query("DELETE FROM stream_meta WHERE stream_id = $1")
        .bind(stream_id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn increment_subscriber_count<'e>(
    executor: impl PgExecutor<'e>,
    stream_id: &str,
    delta: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE stream_meta SET subscriber_count = subscriber_count + $2 WHERE stream_id = $1")
        .bind(stream_id)
        .bind(delta)
        .execute(executor)
        .await?;
    Ok(())
}
