use axum::{extract::{Path, State}, http::StatusCode, response::IntoResponse, Json};
use stream_protocol::{
    InternalFanInAppend, InternalSessionRequest, InternalSubscriberMutation,
    InternalSubscriptionList, InternalSubscriptionRequest,
};

use crate::engine::operation::Operation;
use crate::repo::{session_meta, stream_meta, subscriptions};
use crate::state::AppState;

use super::response::{bad_request, internal_error, not_found, HttpResult};

/// `POST /internal/session`: create or renew a session's `session_meta`
/// row and its backing `subscriptions/<id>` stream.
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<InternalSessionRequest>,
) -> HttpResult<impl IntoResponse> {
    let ttl_seconds = req.ttl_seconds.unwrap_or(state.config.session_ttl_seconds);
    let expires_at = chrono::Utc::now() + chrono::Duration::seconds(ttl_seconds);

    session_meta::insert(state.storage.pool(), &req.session_id, expires_at)
        .await
        .map_err(internal_error)?;

    let session_stream = format!("subscriptions/{}", req.session_id);
    if stream_meta::get_stream(state.storage.pool(), &session_stream)
        .await
        .map_err(internal_error)?
        .is_none()
    {
        stream_meta::insert_stream(
            state.storage.pool(),
            &session_stream,
            "application/json",
            Some(ttl_seconds),
            Some(expires_at),
        )
        .await
        .map_err(internal_error)?;
    }

    Ok(StatusCode::CREATED)
}

/// `POST /internal/subscriptions`: subscribe a session to a source stream.
pub async fn add_subscription(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<InternalSubscriptionRequest>,
) -> HttpResult<impl IntoResponse> {
    if stream_meta::get_stream(state.storage.pool(), &req.source_stream)
        .await
        .map_err(internal_error)?
        .is_none()
    {
        return Err(not_found("source stream does not exist"));
    }

    subscriptions::add(state.storage.pool(), &req.source_stream, &session_id)
        .await
        .map_err(internal_error)?;
    stream_meta::increment_subscriber_count(state.storage.pool(), &req.source_stream, 1)
        .await
        .map_err(internal_error)?;

    Ok(StatusCode::CREATED)
}

/// `GET /internal/subscriptions/:session_id`: list a session's source
/// streams.
pub async fn list_subscriptions(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> HttpResult<Json<InternalSubscriptionList>> {
    let links = subscriptions::subscriptions_of(state.storage.pool(), &session_id)
        .await
        .map_err(internal_error)?;
    Ok(Json(InternalSubscriptionList {
        source_streams: links.into_iter().map(|l| l.source_stream_id).collect(),
    }))
}

/// `DELETE /internal/subscriptions/:session_id` body `{source_stream}`: 
/// unsubscribe.
pub async fn remove_subscription(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<InternalSubscriptionRequest>,
) -> HttpResult<impl IntoResponse> {
    subscriptions::remove(state.storage.pool(), &req.source_stream, &session_id)
        .await
        .map_err(internal_error)?;
    stream_meta::increment_subscriber_count(state.storage.pool(), &req.source_stream, -1)
        .await
        .map_err(internal_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /internal/subscribers/:source_stream`: list sessions subscribed to
/// a source stream, used by fan-out to size the inline/queued decision and
/// by operators inspecting the subscriber set.
pub async fn list_subscribers(
    State(state): State<AppState>,
    Path(source_stream): Path<String>,
) -> HttpResult<Json<Vec<String>>> {
    let links = subscriptions::subscribers_of(state.storage.pool(), &source_stream)
        .await
        .map_err(internal_error)?;
    Ok(Json(links.into_iter().map(|l| l.session_id).collect()))
}

/// `POST /internal/subscribers/:source_stream` body `{session_id}`: used
/// by tests and operators to add a subscriber without going through the
/// session-scoped route.
pub async fn add_subscriber(
    State(state): State<AppState>,
    Path(source_stream): Path<String>,
    Json(req): Json<InternalSubscriberMutation>,
) -> HttpResult<impl IntoResponse> {
    subscriptions::add(state.storage.pool(), &source_stream, &req.session_id)
        .await
        .map_err(internal_error)?;
    Ok(StatusCode::CREATED)
}

/// `POST /internal/fan-in-append/:session_id`: append a pre-built
/// envelope directly into a session's subscription stream, the path a
/// queued (above-threshold) fan-out delivery takes to retry independently
/// of the originating append's request lifetime.
pub async fn fan_in_append(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<InternalFanInAppend>,
) -> HttpResult<impl IntoResponse> {
    let session_stream = format!("subscriptions/{session_id}");
    let body = serde_json::to_vec(&req.envelope).map_err(|e| bad_request(e.to_string()))?;

    let op = Operation::Append {
        body: &body,
        stream_seq: None,
        producer: None,
        close: false,
    };
    state
        .engine
        .dispatch(&session_stream, op)
        .await
        .map_err(internal_error)?;

    Ok(StatusCode::CREATED)
}
