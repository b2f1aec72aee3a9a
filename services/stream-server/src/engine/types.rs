use chrono::{DateTime, Utc};

/// One stream's metadata row (StreamMeta).
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMeta {
    pub stream_id: String,
    pub content_type: String,
    pub closed: bool,
    pub closed_by_id: Option<String>,
    pub closed_by_epoch: Option<i64>,
    pub closed_by_seq: Option<i64>,
    pub closed_at: Option<DateTime<Utc>>,
    pub tail_offset: u64,
    pub segment_start: u64,
    pub read_seq: u64,
    pub last_stream_seq: Option<String>,
    pub ttl_seconds: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub subscriber_count: i64,
}

impl StreamMeta {
    pub fn is_json(&self) -> bool {
        self.content_type == "application/json"
    }

    pub fn is_session_stream(stream_id: &str) -> bool {
        stream_id.starts_with("subscriptions/")
    }
}

/// One row of the hot append buffer (HotOp).
#[derive(Debug, Clone, PartialEq)]
pub struct HotOp {
    pub stream_id: String,
    pub start_offset: u64,
    pub end_offset: u64,
    pub size_bytes: u64,
    pub body: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub stream_seq: Option<String>,
    pub producer_id: Option<String>,
    pub producer_epoch: Option<i64>,
    pub producer_seq: Option<i64>,
}

/// One rotated, sealed segment (SegmentRecord).
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRecord {
    pub stream_id: String,
    pub read_seq: u64,
    pub start_offset: u64,
    pub end_offset: u64,
    pub blob_key: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Per-`(stream_id, producer_id)` idempotency state (ProducerState).
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerState {
    pub stream_id: String,
    pub producer_id: String,
    pub epoch: i64,
    pub last_seq: i64,
    pub last_offset: u64,
    pub last_updated: DateTime<Utc>,
}

/// SessionMeta, only present for `subscriptions/<id>` streams.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMeta {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// Producer header triple extracted from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerTriple {
    pub producer_id: String,
    pub epoch: i64,
    pub seq: i64,
}

/// Result of a single append: the new tail, the bytes/messages to fan out to
/// SSE/long-poll/fan-out, and whether the stream is now closed.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub new_tail_offset: u64,
    pub sse_payload: Vec<u8>,
    pub json_messages: Option<Vec<serde_json::Value>>,
    pub closed: bool,
    /// Set when this outcome is a replay of a producer's prior write (or an
    /// idempotent repeat of the close that already closed the stream): no
    /// new rows were written, and callers must not re-notify long-poll/SSE/
    /// fan-out.
    pub is_duplicate: bool,
    pub producer_epoch: Option<i64>,
    pub producer_last_seq: Option<i64>,
}
