use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::stream::StreamExt;
use serde::Deserialize;
use stream_protocol::OffsetToken;
use tokio_stream::wrappers::BroadcastStream;

use crate::engine::append::AppendError;
use crate::engine::idempotency::ProducerTriple;
use crate::engine::operation::{Operation, OperationOutcome};
use crate::engine::rotation::RotationError;
use crate::engine::types::AppendOutcome;
use crate::repo::stream_meta;
use crate::state::AppState;

use super::response::{
    bad_request, conflict, internal_error, not_found, payload_too_large, stale_epoch, HttpResult,
};

fn producer_triple_from_headers(headers: &HeaderMap) -> Result<Option<ProducerTriple>, Response> {
    let id = headers.get("Producer-Id");
    let epoch = headers.get("Producer-Epoch");
    let seq = headers.get("Producer-Seq");

    match (id, epoch, seq) {
        (None, None, None) => Ok(None),
        (Some(id), Some(epoch), Some(seq)) => {
            let id = id
                .to_str()
                .map_err(|_| bad_request("Producer-Id is not valid UTF-8"))?
                .to_owned();
            let epoch: i64 = epoch
                .to_str()
                .ok()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| bad_request("Producer-Epoch must be an integer"))?;
            let seq: i64 = seq
                .to_str()
                .ok()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| bad_request("Producer-Seq must be an integer"))?;
            Ok(Some(ProducerTriple {
                producer_id: id,
                epoch,
                seq,
            }))
        }
        _ => Err(bad_request(
            "Producer-Id, Producer-Epoch, and Producer-Seq must all be supplied together",
        )),
    }
}

fn stream_seq_header(headers: &HeaderMap) -> Option<&str> {
    headers.get("X-Stream-Seq").and_then(|v| v.to_str().ok())
}

fn wants_close(headers: &HeaderMap) -> bool {
    headers
        .get("X-Stream-Closed")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn content_type_header(headers: &HeaderMap) -> Option<&str> {
    headers.get("Content-Type").and_then(|v| v.to_str().ok())
}

fn map_append_error(err: AppendError) -> Response {
    match err {
        AppendError::NotFound => not_found("stream not found"),
        AppendError::Closed => conflict("stream is closed"),
        AppendError::BodyTooLarge => payload_too_large("append body exceeds the size cap"),
        AppendError::NotJson => bad_request("stream content-type is application/json but body is not valid JSON"),
        AppendError::EmptyJsonArray => bad_request("a JSON append body must not be an empty array"),
        AppendError::EmptyBody => bad_request("an opaque append body must not be empty"),
        AppendError::MustStartAtZero => {
            bad_request("producer must start at seq 0 for a new epoch")
        }
        AppendError::StaleEpoch { stored_epoch } => stale_epoch(stored_epoch),
        AppendError::Gap {
            expected_seq,
            received_seq,
        } => conflict(format!(
            "producer seq gap: expected {expected_seq}, received {received_seq}"
        )),
        AppendError::Db(e) => internal_error(e),
    }
}

/// Rotation may have run between the append committing and this call, so
/// the offset is encoded against freshly-fetched meta rather than anything
/// cached from before the append.
async fn format_tail_offset(state: &AppState, stream_id: &str, tail_offset: u64) -> String {
    match stream_meta::get_stream(state.storage.pool(), stream_id).await {
        Ok(Some(meta)) => crate::engine::offset::encode(tail_offset, &meta, None, None).format(),
        _ => OffsetToken {
            read_seq: 0,
            offset: tail_offset,
        }
        .format(),
    }
}

/// A replayed producer write, or an idempotent repeat of a close, is a
/// no-op: 204 echoing the offset and producer state the original call
/// already committed rather than re-describing the append.
async fn duplicate_response(state: &AppState, stream_id: &str, outcome: &AppendOutcome) -> Response {
    let offset = format_tail_offset(state, stream_id, outcome.new_tail_offset).await;
    let mut response = StatusCode::NO_CONTENT.into_response();
    let headers = response.headers_mut();
    headers.insert("X-Stream-Next-Offset", offset.parse().unwrap());
    if let Some(epoch) = outcome.producer_epoch {
        if let Ok(value) = epoch.to_string().parse() {
            headers.insert("Producer-Epoch", value);
        }
    }
    if let Some(seq) = outcome.producer_last_seq {
        if let Ok(value) = seq.to_string().parse() {
            headers.insert("Producer-Seq", value);
        }
    }
    response
}

fn map_rotation_error(err: RotationError) -> Response {
    match err {
        RotationError::NotFound => not_found("stream not found"),
        RotationError::Codec(e) => internal_error(e),
        RotationError::Blob(e) => internal_error(e),
        RotationError::Db(e) => internal_error(e),
    }
}

/// `PUT /v1/stream/:id`: create a stream, optionally with an initial body.
pub async fn put_stream(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> HttpResult<Response> {
    let content_type = content_type_header(&headers)
        .ok_or_else(|| bad_request("Content-Type is required to create a stream"))?
        .to_owned();

    if stream_meta::get_stream(state.storage.pool(), &stream_id)
        .await
        .map_err(internal_error)?
        .is_some()
    {
        return Err(conflict("stream already exists"));
    }

    let ttl_seconds: Option<i64> = headers
        .get("X-Stream-TTL")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    let expires_at_header = headers
        .get("X-Stream-Expires-At")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.parse::<chrono::DateTime<chrono::Utc>>())
        .transpose()
        .map_err(|_| bad_request("X-Stream-Expires-At must be an RFC3339 timestamp"))?;
    if ttl_seconds.is_some() && expires_at_header.is_some() {
        return Err(bad_request(
            "X-Stream-TTL and X-Stream-Expires-At are mutually exclusive",
        ));
    }
    let expires_at = expires_at_header
        .or_else(|| ttl_seconds.map(|s| chrono::Utc::now() + chrono::Duration::seconds(s)));

    stream_meta::insert_stream(state.storage.pool(), &stream_id, &content_type, ttl_seconds, expires_at)
        .await
        .map_err(internal_error)?;

    let close = wants_close(&headers);
    if body.is_empty() && !close {
        return Ok(StatusCode::CREATED.into_response());
    }

    let producer = producer_triple_from_headers(&headers)?;
    let op = Operation::Append {
        body: &body,
        stream_seq: stream_seq_header(&headers),
        producer,
        close,
    };
    match state.engine.dispatch(&stream_id, op).await {
        Ok(OperationOutcome::Appended(outcome)) => {
            if outcome.is_duplicate {
                return Ok(duplicate_response(&state, &stream_id, &outcome).await);
            }
            let offset = format_tail_offset(&state, &stream_id, outcome.new_tail_offset).await;
            Ok((StatusCode::CREATED, Json(serde_json::json!({ "offset": offset }))).into_response())
        }
        Ok(_) => Ok(StatusCode::CREATED.into_response()),
        Err(crate::engine::operation::OperationError::Append(e)) => Err(map_append_error(e)),
        Err(crate::engine::operation::OperationError::Rotation(e)) => Err(map_rotation_error(e)),
        Err(crate::engine::operation::OperationError::Db(e)) => Err(internal_error(e)),
    }
}

/// `POST /v1/stream/:id`: append to an existing stream, optionally closing
/// it.
pub async fn post_stream(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> HttpResult<Response> {
    let producer = producer_triple_from_headers(&headers)?;
    let op = Operation::Append {
        body: &body,
        stream_seq: stream_seq_header(&headers),
        producer,
        close: wants_close(&headers),
    };

    match state.engine.dispatch(&stream_id, op).await {
        Ok(OperationOutcome::Appended(outcome)) => {
            if outcome.is_duplicate {
                return Ok(duplicate_response(&state, &stream_id, &outcome).await);
            }
            let offset = format_tail_offset(&state, &stream_id, outcome.new_tail_offset).await;
            Ok(Json(serde_json::json!({ "offset": offset })).into_response())
        }
        Ok(_) => Ok(StatusCode::OK.into_response()),
        Err(crate::engine::operation::OperationError::Append(e)) => Err(map_append_error(e)),
        Err(crate::engine::operation::OperationError::Rotation(e)) => Err(map_rotation_error(e)),
        Err(crate::engine::operation::OperationError::Db(e)) => Err(internal_error(e)),
    }
}

/// `HEAD /v1/stream/:id`: metadata without a body: tail offset, closed
/// state, content type.
pub async fn head_stream(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> HttpResult<Response> {
    let meta = stream_meta::get_stream(state.storage.pool(), &stream_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("stream not found"))?;

    let mut response = StatusCode::OK.into_response();
    let headers = response.headers_mut();
    headers.insert(
        "Content-Type",
        meta.content_type.parse().unwrap_or_else(|_| "application/octet-stream".parse().unwrap()),
    );
    headers.insert(
        "X-Stream-Closed",
        if meta.closed { "true" } else { "false" }.parse().unwrap(),
    );
    headers.insert(
        "X-Stream-Tail-Offset",
        OffsetToken {
            read_seq: meta.read_seq,
            offset: meta.tail_offset - meta.segment_start,
        }
        .format()
        .parse()
        .unwrap(),
    );
    Ok(response)
}

/// `DELETE /v1/stream/:id`: drop a stream and all its data.
pub async fn delete_stream(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> HttpResult<Response> {
    match state
        .engine
        .dispatch(&stream_id, Operation::Delete)
        .await
    {
        Ok(_) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(crate::engine::operation::OperationError::Db(e)) => Err(internal_error(e)),
        Err(e) => Err(internal_error(e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct ReadQuery {
    pub offset: Option<String>,
    pub live: Option<String>,
    pub wait_ms: Option<u64>,
}

/// `GET /v1/stream/:id?offset=...&live=long-poll|sse`: read from an
/// offset, optionally blocking (long-poll) or streaming (SSE).
pub async fn get_stream(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
    Query(query): Query<ReadQuery>,
) -> HttpResult<Response> {
    let offset = match &query.offset {
        Some(raw) => OffsetToken::parse(raw).ok_or_else(|| bad_request("malformed offset token"))?,
        None => OffsetToken::ZERO,
    };

    match query.live.as_deref() {
        Some("sse") => Ok(sse_response(state, stream_id, offset).await),
        Some("long-poll") => long_poll_response(state, stream_id, offset, query.wait_ms).await,
        Some(other) => Err(bad_request(format!("unknown live mode: {other}"))),
        None => plain_read_response(state, stream_id, offset).await,
    }
}

async fn plain_read_response(
    state: AppState,
    stream_id: String,
    offset: OffsetToken,
) -> HttpResult<Response> {
    let result = state
        .reads
        .read(
            &state.storage,
            state.engine.blob_store.as_ref(),
            &stream_id,
            offset,
            state.config.max_chunk_bytes,
        )
        .await
        .map_err(map_read_error)?;

    let mut response = if result.content_type == "application/json" {
        let values: Vec<serde_json::Value> = result
            .messages
            .iter()
            .filter_map(|m| serde_json::from_slice(m).ok())
            .collect();
        Json(values).into_response()
    } else {
        result.messages.concat().into_response()
    };

    let headers = response.headers_mut();
    headers.insert("X-Stream-Next-Offset", result.next_token.format().parse().unwrap());
    headers.insert(
        "X-Stream-Up-To-Date",
        if result.up_to_date { "true" } else { "false" }.parse().unwrap(),
    );
    headers.insert(
        "X-Stream-Closed",
        if result.closed { "true" } else { "false" }.parse().unwrap(),
    );
    Ok(response)
}

async fn long_poll_response(
    state: AppState,
    stream_id: String,
    offset: OffsetToken,
    wait_ms: Option<u64>,
) -> HttpResult<Response> {
    let timeout = wait_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| state.config.long_poll_timeout());
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let result = state
            .reads
            .read(
                &state.storage,
                state.engine.blob_store.as_ref(),
                &stream_id,
                offset,
                state.config.max_chunk_bytes,
            )
            .await
            .map_err(map_read_error)?;

        if !result.up_to_date || result.closed {
            return plain_read_response(state, stream_id, offset).await;
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            let mut response = StatusCode::NO_CONTENT.into_response();
            let headers = response.headers_mut();
            headers.insert("X-Stream-Next-Offset", offset.format().parse().unwrap());
            headers.insert("X-Stream-Up-To-Date", "true".parse().unwrap());
            return Ok(response);
        }

        state.engine.long_poll.wait(&stream_id, remaining).await;
    }
}

async fn sse_response(state: AppState, stream_id: String, from: OffsetToken) -> Response {
    let meta = match stream_meta::get_stream(state.storage.pool(), &stream_id).await {
        Ok(Some(m)) => m,
        Ok(None) => return not_found("stream not found"),
        Err(e) => return internal_error(e),
    };

    let rx = state.engine.sse.subscribe(&stream_id).await;
    let idle_timeout = state.config.sse_idle_timeout();
    let backfill = state
        .reads
        .read(
            &state.storage,
            state.engine.blob_store.as_ref(),
            &stream_id,
            from,
            state.config.max_chunk_bytes,
        )
        .await
        .ok();

    let backfill_events = backfill
        .into_iter()
        .flat_map(|r| r.messages.into_iter())
        .map(move |payload| {
            let is_json = meta.is_json();
            Ok::<_, std::convert::Infallible>(render_event(payload, is_json))
        });

    let live_events = BroadcastStream::new(rx).filter_map(|frame| async move {
        frame
            .ok()
            .map(|f| Ok::<_, std::convert::Infallible>(Event::default().event(f.event_name()).data(f.render())))
    });

    let combined = futures_util::stream::iter(backfill_events).chain(live_events);
    Sse::new(combined)
        .keep_alive(KeepAlive::new().interval(idle_timeout))
        .into_response()
}

fn render_event(payload: Vec<u8>, is_json: bool) -> Event {
    let frame = crate::engine::sse::SseFrame::Data { payload, is_json };
    Event::default().event(frame.event_name()).data(frame.render())
}

fn map_read_error(err: crate::engine::read::ReadError) -> Response {
    use crate::engine::read::ReadError;
    match err {
        ReadError::NotFound => not_found("stream not found"),
        ReadError::Offset(_) => bad_request("offset is out of range for this stream"),
        ReadError::Blob(e) => internal_error(e),
        ReadError::Db(e) => internal_error(e),
    }
}
