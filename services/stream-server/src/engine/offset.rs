use stream_protocol::OffsetToken;
use thiserror::Error;

use super::types::{SegmentRecord, StreamMeta};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OffsetError {
    #[error("malformed offset token")]
    Malformed,
    #[error("offset read_seq is ahead of the stream's current read_seq")]
    ReadSeqAheadOfCurrent,
    #[error("unknown segment for read_seq")]
    UnknownSegment,
    #[error("offset exceeds stream tail")]
    BeyondTail,
    #[error("offset exceeds segment end")]
    BeyondSegment,
}

/// Encode an absolute offset into the wire token, given the stream's
/// current meta and (if the offset falls inside a sealed segment) that
/// segment's record.
///
/// Open question: when `meta.closed` and the hot region is empty
/// (`meta.segment_start == meta.tail_offset`) and the caller is encoding
/// exactly the tail offset, the source's legacy behaviour is to express it
/// relative to the *last sealed segment* rather than the (empty) current
/// hot region, so that offsets advancing past the close remain decodable
/// through the segment index. This is reproduced verbatim via
/// `last_sealed_segment`: do not collapse this branch into the general
/// case.
pub fn encode(
    absolute_offset: u64,
    meta: &StreamMeta,
    covering_segment: Option<&SegmentRecord>,
    last_sealed_segment: Option<&SegmentRecord>,
) -> OffsetToken {
    if let Some(seg) = covering_segment {
        return OffsetToken {
            read_seq: seg.read_seq,
            offset: absolute_offset - seg.start_offset,
        };
    }

    let hot_region_empty = meta.segment_start == meta.tail_offset;
    if meta.closed && hot_region_empty && absolute_offset == meta.tail_offset {
        if let Some(seg) = last_sealed_segment {
            return OffsetToken {
                read_seq: seg.read_seq,
                offset: absolute_offset - seg.start_offset,
            };
        }
    }

    OffsetToken {
        read_seq: meta.read_seq,
        offset: absolute_offset - meta.segment_start,
    }
}

/// Decode a wire token into an absolute offset.
///
/// `segment_for_read_seq` must be `Some` whenever `token.read_seq <
/// meta.read_seq`, the caller is expected to have already looked up the
/// segment for that `read_seq` via the storage facade.
pub fn decode(
    token: OffsetToken,
    meta: &StreamMeta,
    segment_for_read_seq: Option<&SegmentRecord>,
) -> Result<u64, OffsetError> {
    if token.read_seq > meta.read_seq {
        return Err(OffsetError::ReadSeqAheadOfCurrent);
    }

    if token.read_seq == meta.read_seq {
        let decoded = meta.segment_start + token.offset;
        if decoded > meta.tail_offset {
            return Err(OffsetError::BeyondTail);
        }
        return Ok(decoded);
    }

    let seg = segment_for_read_seq.ok_or(OffsetError::UnknownSegment)?;
    let decoded = seg.start_offset + token.offset;
    if decoded > seg.end_offset {
        return Err(OffsetError::BeyondSegment);
    }
    if decoded > meta.tail_offset {
        return Err(OffsetError::BeyondTail);
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn meta(read_seq: u64, segment_start: u64, tail_offset: u64, closed: bool) -> StreamMeta {
        StreamMeta {
            stream_id: "s1".into(),
            content_type: "text/plain".into(),
            closed,
            closed_by_id: None,
            closed_by_epoch: None,
            closed_by_seq: None,
            closed_at: None,
            tail_offset,
            segment_start,
            read_seq,
            last_stream_seq: None,
            ttl_seconds: None,
            expires_at: None,
            created_at: Utc::now(),
            subscriber_count: 0,
        }
    }

    fn segment(read_seq: u64, start: u64, end: u64) -> SegmentRecord {
        SegmentRecord {
            stream_id: "s1".into(),
            read_seq,
            start_offset: start,
            end_offset: end,
            blob_key: format!("stream/s1/segment-{read_seq}.seg"),
            content_type: "text/plain".into(),
            size_bytes: end - start,
            message_count: end - start,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    #[test]
    fn encode_within_hot_region_is_relative_to_segment_start() {
        let m = meta(2, 100, 140, false);
        let token = encode(120, &m, None, None);
        assert_eq!(token.read_seq, 2);
        assert_eq!(token.offset, 20);
    }

    #[test]
    fn encode_within_sealed_segment_is_relative_to_that_segment() {
        let m = meta(2, 100, 140, false);
        let seg = segment(1, 50, 100);
        let token = encode(70, &m, Some(&seg), None);
        assert_eq!(token.read_seq, 1);
        assert_eq!(token.offset, 20);
    }

    #[test]
    fn encode_closed_empty_hot_region_prefers_last_sealed_segment() {
        let m = meta(2, 100, 100, true);
        let last_seg = segment(1, 50, 100);
        let token = encode(100, &m, None, Some(&last_seg));
        assert_eq!(token.read_seq, 1);
        assert_eq!(token.offset, 50);
    }

    #[test]
    fn decode_round_trips_hot_region_offset() {
        let m = meta(2, 100, 140, false);
        let token = encode(120, &m, None, None);
        assert_eq!(decode(token, &m, None), Ok(120));
    }

    #[test]
    fn decode_rejects_read_seq_ahead_of_current() {
        let m = meta(1, 50, 100, false);
        let token = OffsetToken {
            read_seq: 5,
            offset: 0,
        };
        assert_eq!(decode(token, &m, None), Err(OffsetError::ReadSeqAheadOfCurrent));
    }

    #[test]
    fn decode_rejects_offset_beyond_tail() {
        let m = meta(0, 0, 10, false);
        let token = OffsetToken {
            read_seq: 0,
            offset: 11,
        };
        assert_eq!(decode(token, &m, None), Err(OffsetError::BeyondTail));
    }

    #[test]
    fn decode_rejects_offset_beyond_sealed_segment_end() {
        let m = meta(2, 100, 140, false);
        let seg = segment(1, 50, 100);
        let token = OffsetToken {
            read_seq: 1,
            offset: 60,
        };
        assert_eq!(decode(token, &m, Some(&seg)), Err(OffsetError::BeyondSegment));
    }

    #[test]
    fn decode_missing_segment_lookup_is_unknown_segment() {
        let m = meta(2, 100, 140, false);
        let token = OffsetToken {
            read_seq: 1,
            offset: 0,
        };
        assert_eq!(decode(token, &m, None), Err(OffsetError::UnknownSegment));
    }

    #[test]
    fn zero_token_decodes_to_absolute_zero_for_fresh_stream() {
        let m = meta(0, 0, 0, false);
        assert_eq!(decode(OffsetToken::ZERO, &m, None), Ok(0));
    }
}
