use thiserror::Error;
use stream_protocol::BlobStore;

use crate::repo::{hot_ops, segments, stream_meta, Storage};

use super::segment_codec::{self, SegmentCodecError};
use super::types::SegmentRecord;

#[derive(Debug, Error)]
pub enum RotationError {
    #[error("stream not found")]
    NotFound,
    #[error(transparent)]
    Codec(#[from] SegmentCodecError),
    #[error("blob store error: {0}")]
    Blob(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Seal the hot region into an immutable segment once it grows past
/// `max_bytes` or `max_messages`, or unconditionally when `force` is set
/// (used when a stream is closing, so its tail always lands in a sealed
/// segment rather than the hot buffer). A no-op (returns `Ok(None)`) when
/// the hot region is empty and `force` is not set. Callers must hold the
/// stream's actor lock.
pub async fn rotate_if_needed(
    storage: &Storage,
    blob_store: &dyn BlobStore,
    stream_id: &str,
    max_bytes: u64,
    max_messages: u64,
    force: bool,
) -> Result<Option<SegmentRecord>, RotationError> {
    let meta = stream_meta::get_stream(storage.pool(), stream_id)
        .await?
        .ok_or(RotationError::NotFound)?;

    let (count, total_bytes) =
        hot_ops::stats_from(storage.pool(), stream_id, meta.segment_start).await?;
    if count == 0 {
        return Ok(None);
    }
    if !force && total_bytes < max_bytes && count < max_messages {
        return Ok(None);
    }

    let ops = hot_ops::all_up_to(storage.pool(), stream_id, meta.tail_offset).await?;
    if ops.is_empty() {
        return Ok(None);
    }

    let bodies: Vec<Vec<u8>> = ops.iter().map(|op| op.body.clone()).collect();
    let blob = segment_codec::encode(&bodies)?;
    let encoded_stream_id = {
        use base64::Engine;
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(stream_id.as_bytes())
    };
    let blob_key = format!("stream/{encoded_stream_id}/segment-{}.seg", meta.read_seq);

    blob_store
        .put(&blob_key, blob.clone())
        .await
        .map_err(|e| RotationError::Blob(e.to_string()))?;

    let record = SegmentRecord {
        stream_id: stream_id.to_string(),
        read_seq: meta.read_seq,
        start_offset: meta.segment_start,
        end_offset: meta.tail_offset,
        blob_key,
        content_type: meta.content_type.clone(),
        size_bytes: blob.len() as u64,
        message_count: ops.len() as u64,
        created_at: chrono::Utc::now(),
        expires_at: meta.expires_at,
    };

    let mut tx = storage.begin().await?;
    segments::insert(&mut *tx, &record).await?;
    hot_ops::delete_up_to(&mut *tx, stream_id, meta.tail_offset).await?;
    stream_meta::apply_rotation(&mut *tx, stream_id, meta.tail_offset).await?;
    tx.commit().await?;

    Ok(Some(record))
}

/// Remove blobs for segments whose `expires_at` has passed (orphan
/// sweep). Returns the number of segments reclaimed. Best-effort: a blob
/// delete failure for one segment does not stop the sweep of the rest.
pub async fn sweep_expired(
    storage: &Storage,
    blob_store: &dyn BlobStore,
    now: chrono::DateTime<chrono::Utc>,
    batch_limit: i64,
) -> Result<u64, RotationError> {
    let expired = segments::expired(storage.pool(), now, batch_limit).await?;
    let mut reclaimed = 0u64;
    for seg in expired {
        if blob_store.delete(&seg.blob_key).await.is_ok() {
            segments::delete(storage.pool(), &seg.stream_id, seg.read_seq).await?;
            reclaimed += 1;
        } else {
            tracing::warn!(blob_key = %seg.blob_key, "failed to delete expired segment blob, leaving metadata in place for retry");
        }
    }
    Ok(reclaimed)
}
