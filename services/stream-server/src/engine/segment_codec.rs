use thiserror::Error;

/// Hard cap on an individual message body.
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentCodecError {
    #[error("message exceeds the {MAX_MESSAGE_BYTES} byte cap")]
    MessageTooLarge,
}

/// Encode a sequence of message bodies into a flat segment blob:
/// `<length:u32 big-endian><payload>` repeated.
pub fn encode(messages: &[Vec<u8>]) -> Result<Vec<u8>, SegmentCodecError> {
    let mut out = Vec::with_capacity(messages.iter().map(|m| m.len() + 4).sum());
    for m in messages {
        if m.len() > MAX_MESSAGE_BYTES {
            return Err(SegmentCodecError::MessageTooLarge);
        }
        out.extend_from_slice(&(m.len() as u32).to_be_bytes());
        out.extend_from_slice(m);
    }
    Ok(out)
}

/// The addressing unit within a segment: JSON streams are indexed by
/// message count, opaque streams by raw byte span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetUnit {
    Message,
    Byte,
}

/// A streaming iterator over a segment blob.
pub struct SegmentReader<'a> {
    data: &'a [u8],
    cursor: usize,
    pub truncated: bool,
}

impl<'a> SegmentReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        SegmentReader {
            data,
            cursor: 0,
            truncated: false,
        }
    }

    /// Advance past `skip_units` worth of messages, measured in `unit`.
    /// Returns the absolute byte-span skipped for `OffsetUnit::Byte`
    /// callers that need to track consumed units themselves.
    pub fn skip(&mut self, skip_units: u64, unit: OffsetUnit) -> Result<(), SegmentCodecError> {
        let mut remaining = skip_units;
        while remaining > 0 {
            match self.peek_len() {
                None => {
                    // Nothing left to skip into; caller's offset pointed
                    // exactly at the segment boundary.
                    break;
                }
                Some(len) => {
                    let consumed = match unit {
                        OffsetUnit::Message => 1,
                        OffsetUnit::Byte => len as u64,
                    };
                    if consumed > remaining {
                        // Byte-addressed skip landing mid-message is a
                        // caller error (non-boundary offset); stop here
                        // and let the caller detect the mismatch.
                        break;
                    }
                    self.advance_one()?;
                    remaining -= consumed;
                }
            }
        }
        Ok(())
    }

    fn peek_len(&self) -> Option<u32> {
        if self.cursor + 4 > self.data.len() {
            return None;
        }
        let len_bytes: [u8; 4] = self.data[self.cursor..self.cursor + 4].try_into().ok()?;
        Some(u32::from_be_bytes(len_bytes))
    }

    fn advance_one(&mut self) -> Result<(), SegmentCodecError> {
        let len = self.peek_len().expect("advance_one called without a record") as usize;
        let start = self.cursor + 4;
        if start + len > self.data.len() {
            self.truncated = true;
            self.cursor = self.data.len();
            return Ok(());
        }
        self.cursor = start + len;
        Ok(())
    }

    /// Yield messages from the current cursor, accumulating at most
    /// `max_chunk_bytes` of *payload* bytes (not counting length prefixes).
    pub fn take_chunk(&mut self, max_chunk_bytes: u64) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut acc: u64 = 0;
        loop {
            let Some(len) = self.peek_len() else {
                if self.cursor < self.data.len() {
                    self.truncated = true;
                }
                break;
            };
            if !out.is_empty() && acc + len as u64 > max_chunk_bytes {
                break;
            }
            let start = self.cursor + 4;
            let end = start + len as usize;
            if end > self.data.len() {
                self.truncated = true;
                self.cursor = self.data.len();
                break;
            }
            out.push(self.data[start..end].to_vec());
            acc += len as u64;
            self.cursor = end;
            if acc >= max_chunk_bytes {
                break;
            }
        }
        out
    }

    pub fn at_end(&self) -> bool {
        self.cursor >= self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_round_trips_messages() {
        let messages = vec![b"abc".to_vec(), b"de".to_vec(), b"f".to_vec()];
        let blob = encode(&messages).unwrap();
        let mut reader = SegmentReader::new(&blob);
        let out = reader.take_chunk(u64::MAX);
        assert_eq!(out, messages);
        assert!(!reader.truncated);
    }

    #[test]
    fn encode_rejects_oversized_message() {
        let oversized = vec![0u8; MAX_MESSAGE_BYTES + 1];
        assert_eq!(
            encode(&[oversized]),
            Err(SegmentCodecError::MessageTooLarge)
        );
    }

    #[test]
    fn take_chunk_respects_max_chunk_bytes_but_always_yields_at_least_one_message() {
        let messages = vec![b"aaaa".to_vec(), b"bbbb".to_vec(), b"cccc".to_vec()];
        let blob = encode(&messages).unwrap();
        let mut reader = SegmentReader::new(&blob);
        let first = reader.take_chunk(1);
        assert_eq!(first, vec![b"aaaa".to_vec()]);
        let second = reader.take_chunk(u64::MAX);
        assert_eq!(second, vec![b"bbbb".to_vec(), b"cccc".to_vec()]);
    }

    #[test]
    fn truncated_blob_mid_record_is_detected() {
        let messages = vec![b"hello".to_vec()];
        let mut blob = encode(&messages).unwrap();
        blob.truncate(blob.len() - 2);
        let mut reader = SegmentReader::new(&blob);
        let out = reader.take_chunk(u64::MAX);
        assert!(out.is_empty());
        assert!(reader.truncated);
    }

    #[test]
    fn skip_by_message_count_advances_past_n_records() {
        let messages = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
        let blob = encode(&messages).unwrap();
        let mut reader = SegmentReader::new(&blob);
        reader.skip(2, OffsetUnit::Message).unwrap();
        let rest = reader.take_chunk(u64::MAX);
        assert_eq!(rest, vec![b"c".to_vec()]);
    }

    #[test]
    fn skip_by_byte_span_advances_past_whole_messages_only() {
        let messages = vec![b"aa".to_vec(), b"bb".to_vec(), b"cc".to_vec()];
        let blob = encode(&messages).unwrap();
        let mut reader = SegmentReader::new(&blob);
        reader.skip(4, OffsetUnit::Byte).unwrap();
        let rest = reader.take_chunk(u64::MAX);
        assert_eq!(rest, vec![b"cc".to_vec()]);
    }
}
