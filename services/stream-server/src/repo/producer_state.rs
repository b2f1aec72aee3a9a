use sqlx::{PgExecutor, Row};

use crate::engine::types::ProducerState;

fn row_to_state(row: &sqlx::postgres::PgRow) -> ProducerState {
    ProducerState {
        stream_id: row.get("stream_id"),
        producer_id: row.get("producer_id"),
        epoch: row.get("epoch"),
        last_seq: row.get("last_seq"),
        last_offset: row.get::<i64, _>("last_offset") as u64,
        last_updated: row.get("last_updated"),
    }
}

/// Fetched on every append to classify the incoming triple. A
/// `last_updated` older than the TTL is still returned here, the caller
/// (the idempotency module) decides whether to treat it as expired, since
/// there is no background sweeper.
pub async fn get<'e>(
    executor: impl PgExecutor<'e>,
    stream_id: &str,
    producer_id: &str,
) -> Result<Option<ProducerState>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT * FROM producer_state WHERE stream_id = $1 AND producer_id = $2",
    )
    .bind(stream_id)
    .bind(producer_id)
    .fetch_optional(executor)
    .await?;
    Ok(row.as_ref().map(row_to_state))
}

pub async fn upsert<'e>(
    executor: impl PgExecutor<'e>,
    stream_id: &str,
    producer_id: &str,
    epoch: i64,
    seq: i64,
    offset: u64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO producer_state
             (stream_id, producer_id, epoch, last_seq, last_offset, last_updated)
           VALUES ($1, $2, $3, $4, $5, now())
           ON CONFLICT (stream_id, producer_id)
           DO UPDATE SET epoch = $3, last_seq = $4, last_offset = $5, last_updated = now()"#,
    )
    .bind(stream_id)
    .bind(producer_id)
    .bind(epoch)
    .bind(seq)
    .bind(offset as i64)
    .execute(executor)
    .await?;
    Ok(())
}
