// stream-protocol: wire types shared between the stream engine and its
// internal callers (subscription routes, fan-out queue consumers, tests).
//
// These are plain serde types with no engine logic attached; the engine
// crate owns all classification and validation.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Offset token
// ---------------------------------------------------------------------------

/// Width of each zero-padded decimal half of an offset token.
pub const OFFSET_TOKEN_DIGIT_WIDTH: usize = 16;

/// The wire-visible `<read_seq>_<byte_or_index_offset>` token.
///
/// Opaque to clients; structured for the engine. See `OFFSET_TOKEN_DIGIT_WIDTH`
/// for the zero-pad width of each half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OffsetToken {
    pub read_seq: u64,
    pub offset: u64,
}

impl OffsetToken {
    pub const ZERO: OffsetToken = OffsetToken {
        read_seq: 0,
        offset: 0,
    };

    pub fn format(&self) -> String {
        format!(
            "{:0w$}_{:0w$}",
            self.read_seq,
            self.offset,
            w = OFFSET_TOKEN_DIGIT_WIDTH
        )
    }

    pub fn parse(s: &str) -> Option<OffsetToken> {
        let (a, b) = s.split_once('_')?;
        if a.len() != OFFSET_TOKEN_DIGIT_WIDTH || b.len() != OFFSET_TOKEN_DIGIT_WIDTH {
            return None;
        }
        if !a.bytes().all(|c| c.is_ascii_digit()) || !b.bytes().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let read_seq = a.parse().ok()?;
        let offset = b.parse().ok()?;
        Some(OffsetToken { read_seq, offset })
    }
}

impl std::fmt::Display for OffsetToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}

// ---------------------------------------------------------------------------
// Producer idempotency headers
// ---------------------------------------------------------------------------

/// The three producer headers, required all-or-nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerTriple {
    pub producer_id: String,
    pub epoch: i64,
    pub seq: i64,
}

/// Outcome of classifying a `ProducerTriple` against stored producer state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProducerDecision {
    Ok,
    Duplicate { next_offset: i64, last_seq: i64 },
    Gap { expected_seq: i64, received_seq: i64 },
    StaleEpoch { stored_epoch: i64 },
    MustStartAtZero,
}

// ---------------------------------------------------------------------------
// Fan-out envelope
// ---------------------------------------------------------------------------

/// The JSON object fan-out writes into a subscriber's session stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub stream: String,
    pub offset: String,
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Data,
}

impl Envelope {
    pub fn json(stream: impl Into<String>, offset: OffsetToken, payload: serde_json::Value) -> Self {
        Envelope {
            stream: stream.into(),
            offset: offset.format(),
            kind: EnvelopeKind::Data,
            payload,
            encoding: None,
        }
    }

    pub fn base64(stream: impl Into<String>, offset: OffsetToken, body: &[u8]) -> Self {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(body);
        Envelope {
            stream: stream.into(),
            offset: offset.format(),
            kind: EnvelopeKind::Data,
            payload: serde_json::Value::String(encoded),
            encoding: Some("base64".to_owned()),
        }
    }
}

// ---------------------------------------------------------------------------
// SSE control frame
// ---------------------------------------------------------------------------

/// Serialized as the `data:` payload of an `event: control` SSE frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseControlFrame {
    pub stream_next_offset: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up_to_date: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_closed: Option<bool>,
}

// ---------------------------------------------------------------------------
// Internal subscription-route DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalSessionRequest {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalSubscriptionRequest {
    pub source_stream: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalSubscriptionList {
    pub source_streams: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalSubscriberMutation {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalFanInAppend {
    pub envelope: Envelope,
}

// ---------------------------------------------------------------------------
// Blob storage capability
// ---------------------------------------------------------------------------

/// Narrow capability the engine uses to durably store rotated segment
/// bodies. PUTs are idempotent by key; the engine never overwrites a
/// key with different content.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), BlobError>;
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError>;
    async fn delete(&self, key: &str) -> Result<(), BlobError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("blob backend error: {0}")]
    Backend(String),
}

// ---------------------------------------------------------------------------
// HTTP error envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_token_round_trips_through_format_and_parse() {
        let token = OffsetToken {
            read_seq: 3,
            offset: 128,
        };
        let formatted = token.format();
        assert_eq!(
            formatted,
            "0000000000000003_0000000000000128"
        );
        assert_eq!(OffsetToken::parse(&formatted), Some(token));
    }

    #[test]
    fn offset_token_parse_rejects_malformed_tokens() {
        assert_eq!(OffsetToken::parse("not-a-token"), None);
        assert_eq!(OffsetToken::parse("1_2"), None);
        assert_eq!(
            OffsetToken::parse("000000000000000a_0000000000000000"),
            None
        );
    }

    #[test]
    fn zero_token_formats_as_canonical_beginning() {
        assert_eq!(
            OffsetToken::ZERO.format(),
            "0000000000000000_0000000000000000"
        );
    }

    #[test]
    fn envelope_base64_sets_encoding_field() {
        let env = Envelope::base64("src", OffsetToken::ZERO, b"\xff\x00");
        assert_eq!(env.encoding.as_deref(), Some("base64"));
        assert_eq!(env.kind, EnvelopeKind::Data);
    }
}
