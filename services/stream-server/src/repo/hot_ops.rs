use sqlx::{PgExecutor, Row};

use crate::engine::types::HotOp;

fn row_to_op(row: &sqlx::postgres::PgRow) -> HotOp {
    HotOp {
        stream_id: row.get("stream_id"),
        start_offset: row.get::<i64, _>("start_offset") as u64,
        end_offset: row.get::<i64, _>("end_offset") as u64,
        size_bytes: row.get::<i64, _>("size_bytes") as u64,
        body: row.get("body"),
        created_at: row.get("created_at"),
        stream_seq: row.get("stream_seq"),
        producer_id: row.get("producer_id"),
        producer_epoch: row.get("producer_epoch"),
        producer_seq: row.get("producer_seq"),
    }
}

/// A single hot op to be staged during an append. Constructed by
/// the append engine, persisted atomically alongside the `stream_meta` tail
/// advance and `producer_state` upsert.
pub struct NewHotOp<'a> {
    pub start_offset: u64,
    pub end_offset: u64,
    pub body: &'a [u8],
    pub stream_seq: Option<&'a str>,
    pub producer_id: Option<&'a str>,
    pub producer_epoch: Option<i64>,
    pub producer_seq: Option<i64>,
}

pub async fn insert<'e>(
    executor: impl PgExecutor<'e>,
    stream_id: &str,
    op: &NewHotOp<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO hot_ops
             (stream_id, start_offset, end_offset, size_bytes, body, created_at,
              stream_seq, producer_id, producer_epoch, producer_seq)
           VALUES ($1, $2, $3, $4, $5, now(), $6, $7, $8, $9)"#,
    )
    .bind(stream_id)
    .bind(op.start_offset as i64)
    .bind(op.end_offset as i64)
    .bind(op.body.len() as i64)
    .bind(op.body)
    .bind(op.stream_seq)
    .bind(op.producer_id)
    .bind(op.producer_epoch)
    .bind(op.producer_seq)
    .execute(executor)
    .await?;
    Ok(())
}

/// Row count and total payload bytes of the hot region from `from_offset`
/// onward, used by rotation to check its triggers without pulling every
/// body across the wire.
pub async fn stats_from<'e>(
    executor: impl PgExecutor<'e>,
    stream_id: &str,
    from_offset: u64,
) -> Result<(u64, u64), sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT COUNT(*) AS n, COALESCE(SUM(size_bytes), 0) AS total
           FROM hot_ops WHERE stream_id = $1 AND start_offset >= $2"#,
    )
    .bind(stream_id)
    .bind(from_offset as i64)
    .fetch_one(executor)
    .await?;
    let n: i64 = row.get("n");
    let total: i64 = row.get("total");
    Ok((n as u64, total as u64))
}

/// Ops in `[from, to)`, ordered by `start_offset`, used both to serve reads
/// out of the hot region and to gather messages for rotation.
pub async fn range<'e>(
    executor: impl PgExecutor<'e>,
    stream_id: &str,
    from_offset: u64,
    to_offset: u64,
) -> Result<Vec<HotOp>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT * FROM hot_ops
           WHERE stream_id = $1 AND end_offset > $2 AND start_offset < $3
           ORDER BY start_offset ASC"#,
    )
    .bind(stream_id)
    .bind(from_offset as i64)
    .bind(to_offset as i64)
    .fetch_all(executor)
    .await?;
    Ok(rows.iter().map(row_to_op).collect())
}

/// All ops at or below `up_to_offset`, used by rotation to seal a segment.
pub async fn all_up_to<'e>(
    executor: impl PgExecutor<'e>,
    stream_id: &str,
    up_to_offset: u64,
) -> Result<Vec<HotOp>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT * FROM hot_ops
           WHERE stream_id = $1 AND end_offset <= $2
           ORDER BY start_offset ASC"#,
    )
    .bind(stream_id)
    .bind(up_to_offset as i64)
    .fetch_all(executor)
    .await?;
    Ok(rows.iter().map(row_to_op).collect())
}

/// Delete the rows just folded into a sealed segment.
pub async fn delete_up_to<'e>(
    executor: impl PgExecutor<'e>,
    stream_id: &str,
    up_to_offset: u64,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM hot_ops WHERE stream_id = $1 AND end_offset <= $2")
        .bind(stream_id)
        .bind(up_to_offset as i64)
        .execute(executor)
        .await?;
    Ok(())
}
