//! Single dispatch point for every mutating request against a stream.
//!
//! The original PUT/POST/DELETE handlers each re-implemented "lock the
//! stream, do the thing, notify waiters" inline. Collapsing that into one
//! enum and one dispatch function means the lock-then-notify sequence is
//! written exactly once, and HTTP handlers just build the right
//! `Operation` and match on the result.

use std::sync::Arc;

use stream_protocol::BlobStore;
use thiserror::Error;

use crate::repo::{stream_meta, subscriptions, Storage};

use super::actor::ActorRegistry;
use super::append::{self, AppendError, AppendRequest};
use super::fanout::{self, DEFAULT_SUBSCRIBER_THRESHOLD};
use super::idempotency::ProducerTriple;
use super::longpoll::LongPollRegistry;
use super::offset::encode as encode_offset;
use super::rotation::{self, RotationError};
use super::sse::SseBroadcaster;
use super::types::{AppendOutcome, StreamMeta};

pub enum Operation<'a> {
    Append {
        body: &'a [u8],
        stream_seq: Option<&'a str>,
        producer: Option<ProducerTriple>,
        close: bool,
    },
    Delete,
}

pub enum OperationOutcome {
    Appended(AppendOutcome),
    Deleted,
}

#[derive(Debug, Error)]
pub enum OperationError {
    #[error(transparent)]
    Append(#[from] AppendError),
    #[error(transparent)]
    Rotation(#[from] RotationError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Resources the dispatcher needs, held as `Arc`s so a single `Engine` can
/// be cloned cheaply into a background fan-out task without
/// borrowing from request-scoped state.
#[derive(Clone)]
pub struct Engine {
    pub storage: Storage,
    pub actors: Arc<ActorRegistry>,
    pub long_poll: Arc<LongPollRegistry>,
    pub sse: Arc<SseBroadcaster>,
    pub blob_store: Arc<dyn BlobStore>,
    pub rotation_threshold_bytes: u64,
    pub rotation_threshold_messages: u64,
    pub fanout_threshold: usize,
}

impl Engine {
    pub async fn dispatch(
        &self,
        stream_id: &str,
        op: Operation<'_>,
    ) -> Result<OperationOutcome, OperationError> {
        let _guard = self.actors.lock(stream_id).await;

        let outcome = match op {
            Operation::Append {
                body,
                stream_seq,
                producer,
                close,
            } => {
                let req = AppendRequest {
                    body,
                    stream_seq,
                    producer,
                    close,
                };
                let result = append::append(&self.storage, stream_id, &req).await?;
                self.after_append(stream_id, &result).await?;
                OperationOutcome::Appended(result)
            }
            Operation::Delete => {
                stream_meta::delete_stream_data(self.storage.pool(), stream_id).await?;
                self.actors.forget(stream_id).await;
                self.long_poll.forget(stream_id).await;
                self.sse.forget(stream_id).await;
                OperationOutcome::Deleted
            }
        };

        Ok(outcome)
    }

    async fn after_append(
        &self,
        stream_id: &str,
        result: &AppendOutcome,
    ) -> Result<(), OperationError> {
        if result.is_duplicate {
            return Ok(());
        }

        self.long_poll.notify(stream_id).await;

        if let Some(meta) = stream_meta::get_stream(self.storage.pool(), stream_id).await? {
            self.publish_sse(stream_id, &meta, result).await;
            self.run_fanout(stream_id, &meta, result).await?;
        }

        match rotation::rotate_if_needed(
            &self.storage,
            self.blob_store.as_ref(),
            stream_id,
            self.rotation_threshold_bytes,
            self.rotation_threshold_messages,
            result.closed,
        )
        .await
        {
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(%stream_id, error = %e, "rotation attempt failed, hot region left in place")
            }
        }

        Ok(())
    }

    async fn publish_sse(&self, stream_id: &str, meta: &StreamMeta, result: &AppendOutcome) {
        if !result.sse_payload.is_empty() {
            self.sse
                .publish_data(stream_id, result.sse_payload.clone(), meta.is_json())
                .await;
        }
        let token = encode_offset(result.new_tail_offset, meta, None, None);
        self.sse
            .publish_control(stream_id, token, None, Some(true), Some(result.closed))
            .await;
    }

    async fn run_fanout(
        &self,
        stream_id: &str,
        meta: &StreamMeta,
        result: &AppendOutcome,
    ) -> Result<(), OperationError> {
        if result.sse_payload.is_empty() {
            return Ok(());
        }
        let subs = subscriptions::subscribers_of(self.storage.pool(), stream_id).await?;
        if subs.is_empty() {
            return Ok(());
        }

        let token = encode_offset(result.new_tail_offset, meta, None, None);
        let envelope =
            fanout::build_envelope(stream_id, token, &result.sse_payload, meta.is_json());

        let threshold = if self.fanout_threshold == 0 {
            DEFAULT_SUBSCRIBER_THRESHOLD
        } else {
            self.fanout_threshold
        };

        if subs.len() <= threshold {
            fanout::deliver_once(&self.storage, &self.actors, &subs, &envelope).await;
        } else {
            // A stream with many subscribers must not make the triggering
            // append wait on every delivery; hand retried delivery off to a
            // detached task.
            let storage = self.storage.clone();
            let actors = self.actors.clone();
            tokio::spawn(async move {
                fanout::deliver_with_retry(&storage, &actors, subs, &envelope).await;
            });
        }

        Ok(())
    }
}
