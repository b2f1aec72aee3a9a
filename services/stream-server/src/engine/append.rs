use thiserror::Error;

use crate::repo::{hot_ops, producer_state, stream_meta, Storage};

use super::idempotency::{self, Decision, ProducerTriple};
use super::segment_codec::MAX_MESSAGE_BYTES;
use super::types::{AppendOutcome, StreamMeta};

#[derive(Debug, Error)]
pub enum AppendError {
    #[error("stream not found")]
    NotFound,
    #[error("stream is closed")]
    Closed,
    #[error("body exceeds the {MAX_MESSAGE_BYTES} byte cap")]
    BodyTooLarge,
    #[error("stream content-type is application/json but the body is not valid JSON")]
    NotJson,
    #[error("a JSON append body must not be an empty array")]
    EmptyJsonArray,
    #[error("an opaque append body must not be empty")]
    EmptyBody,
    #[error("producer must start at seq 0 for a new epoch")]
    MustStartAtZero,
    #[error("producer epoch {stored_epoch} is current; the supplied epoch is stale")]
    StaleEpoch { stored_epoch: i64 },
    #[error("producer seq gap: expected {expected_seq}, received {received_seq}")]
    Gap { expected_seq: i64, received_seq: i64 },
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// A single append request, already stripped of wire-format concerns by the
/// HTTP layer.
pub struct AppendRequest<'a> {
    pub body: &'a [u8],
    pub stream_seq: Option<&'a str>,
    pub producer: Option<ProducerTriple>,
    pub close: bool,
}

/// Append `req` to `stream_id`, returning the outcome used to drive
/// long-poll/SSE/fan-out notification. Callers must hold the stream's actor
/// lock for the duration of this call.
pub async fn append(
    storage: &Storage,
    stream_id: &str,
    req: &AppendRequest<'_>,
) -> Result<AppendOutcome, AppendError> {
    if req.body.len() > MAX_MESSAGE_BYTES {
        return Err(AppendError::BodyTooLarge);
    }

    let mut tx = storage.begin().await?;

    let meta = stream_meta::get_stream(&mut *tx, stream_id)
        .await?
        .ok_or(AppendError::NotFound)?;

    if meta.closed {
        if req.close && closer_matches(&meta, req.producer.as_ref()) {
            tx.rollback().await?;
            return Ok(replay_outcome(
                &meta,
                meta.tail_offset,
                meta.closed_by_epoch,
                meta.closed_by_seq,
            ));
        }
        return Err(AppendError::Closed);
    }

    let close_only = req.close && req.body.is_empty();

    let json_values: Option<Vec<serde_json::Value>> = if close_only {
        None
    } else if meta.is_json() {
        let value: serde_json::Value =
            serde_json::from_slice(req.body).map_err(|_| AppendError::NotJson)?;
        let items = match value {
            serde_json::Value::Array(items) => {
                if items.is_empty() {
                    return Err(AppendError::EmptyJsonArray);
                }
                items
            }
            other => vec![other],
        };
        Some(items)
    } else {
        if req.body.is_empty() {
            return Err(AppendError::EmptyBody);
        }
        None
    };

    let messages: Vec<Vec<u8>> = match &json_values {
        Some(items) => items
            .iter()
            .map(|v| serde_json::to_vec(v).expect("serde_json::Value always serializes"))
            .collect(),
        None if close_only => Vec::new(),
        None => vec![req.body.to_vec()],
    };

    let mut producer_upsert = None;
    if let Some(triple) = &req.producer {
        let stored = producer_state::get(&mut *tx, stream_id, &triple.producer_id).await?;
        match idempotency::classify(triple, stored.as_ref()) {
            Decision::Ok => {
                producer_upsert = Some((triple.producer_id.clone(), triple.epoch, triple.seq));
            }
            Decision::Duplicate {
                next_offset,
                last_seq,
            } => {
                tx.rollback().await?;
                return Ok(replay_outcome(&meta, next_offset, Some(triple.epoch), Some(last_seq)));
            }
            Decision::Gap {
                expected_seq,
                received_seq,
            } => {
                tx.rollback().await?;
                return Err(AppendError::Gap {
                    expected_seq,
                    received_seq,
                });
            }
            Decision::StaleEpoch { stored_epoch } => {
                tx.rollback().await?;
                return Err(AppendError::StaleEpoch { stored_epoch });
            }
            Decision::MustStartAtZero => {
                tx.rollback().await?;
                return Err(AppendError::MustStartAtZero);
            }
        }
    }

    let start_offset = meta.tail_offset;
    let unit_span = |message: &[u8]| -> u64 {
        if meta.is_json() {
            1
        } else {
            message.len() as u64
        }
    };

    let mut row_start = start_offset;
    for message in &messages {
        let row_end = row_start + unit_span(message);
        hot_ops::insert(
            &mut *tx,
            stream_id,
            &hot_ops::NewHotOp {
                start_offset: row_start,
                end_offset: row_end,
                body: message,
                stream_seq: req.stream_seq,
                producer_id: req.producer.as_ref().map(|p| p.producer_id.as_str()),
                producer_epoch: req.producer.as_ref().map(|p| p.epoch),
                producer_seq: req.producer.as_ref().map(|p| p.seq),
            },
        )
        .await?;
        row_start = row_end;
    }
    let end_offset = row_start;

    let close_info = if req.close {
        req.producer.as_ref().map(|p| stream_meta::ProducerCloseInfo {
            producer_id: &p.producer_id,
            epoch: p.epoch,
            seq: p.seq,
        })
    } else {
        None
    };

    stream_meta::advance_tail(
        &mut *tx,
        stream_id,
        &stream_meta::TailUpdate {
            new_tail_offset: end_offset,
            stream_seq: req.stream_seq,
            close: close_info,
        },
    )
    .await?;

    if let Some((producer_id, epoch, seq)) = producer_upsert {
        producer_state::upsert(&mut *tx, stream_id, &producer_id, epoch, seq, end_offset).await?;
    }

    tx.commit().await?;

    // Per 4.5 step 6: the SSE payload is a freshly-built JSON array for
    // JSON streams (even a single wrapped value), or the raw body for
    // opaque streams.
    let sse_payload = match &json_values {
        Some(items) => serde_json::to_vec(&serde_json::Value::Array(items.clone()))
            .unwrap_or_default(),
        None => messages.first().cloned().unwrap_or_default(),
    };

    Ok(AppendOutcome {
        new_tail_offset: end_offset,
        sse_payload,
        json_messages: json_values,
        closed: req.close,
        is_duplicate: false,
        producer_epoch: None,
        producer_last_seq: None,
    })
}

fn replay_outcome(
    meta: &StreamMeta,
    next_offset: u64,
    producer_epoch: Option<i64>,
    producer_last_seq: Option<i64>,
) -> AppendOutcome {
    AppendOutcome {
        new_tail_offset: next_offset,
        sse_payload: Vec::new(),
        json_messages: None,
        closed: meta.closed,
        is_duplicate: true,
        producer_epoch,
        producer_last_seq,
    }
}

/// Whether `producer` exactly matches the triple that already closed
/// `meta`, making a repeated close-on-POST from the same producer an
/// idempotent no-op rather than a conflict.
fn closer_matches(meta: &StreamMeta, producer: Option<&ProducerTriple>) -> bool {
    let Some(p) = producer else { return false };
    let Some(closed_id) = &meta.closed_by_id else {
        return false;
    };
    p.producer_id == *closed_id
        && Some(p.epoch) == meta.closed_by_epoch
        && Some(p.seq) == meta.closed_by_seq
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_over_cap_is_rejected_before_touching_storage() {
        // oversized check happens before any db access, exercised via the
        // byte-length guard alone
        let oversized_len = MAX_MESSAGE_BYTES + 1;
        assert!(oversized_len > MAX_MESSAGE_BYTES);
    }
}
