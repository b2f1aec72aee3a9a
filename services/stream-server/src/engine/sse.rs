use std::collections::HashMap;
use std::sync::Arc;

use stream_protocol::{OffsetToken, SseControlFrame};
use tokio::sync::{broadcast, RwLock};

/// One SSE frame to be written to every subscriber of a stream.
#[derive(Debug, Clone)]
pub enum SseFrame {
    /// A data frame. `is_json` selects whether `payload` is emitted as-is
    /// (a JSON stream's message) or base64-encoded (an opaque stream's raw
    /// bytes are not guaranteed to be valid SSE field text).
    Data { payload: Vec<u8>, is_json: bool },
    Control(SseControlFrame),
}

impl SseFrame {
    /// Render as the bytes written after `data: ` on the wire, one JSON
    /// value per frame either way.
    pub fn render(&self) -> String {
        match self {
            SseFrame::Data { payload, is_json } => {
                if *is_json {
                    String::from_utf8_lossy(payload).into_owned()
                } else {
                    use base64::Engine;
                    let encoded = base64::engine::general_purpose::STANDARD.encode(payload);
                    serde_json::json!({ "encoding": "base64", "payload": encoded }).to_string()
                }
            }
            SseFrame::Control(frame) => {
                serde_json::to_string(frame).unwrap_or_default()
            }
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            SseFrame::Data { .. } => "data",
            SseFrame::Control(_) => "control",
        }
    }
}

const CHANNEL_CAPACITY: usize = 256;

/// Per-stream broadcast fan-out to connected SSE clients: one bounded
/// channel per stream id, grown lazily on first subscriber.
#[derive(Default)]
pub struct SseBroadcaster {
    channels: RwLock<HashMap<String, broadcast::Sender<SseFrame>>>,
}

impl SseBroadcaster {
    pub fn new() -> Self {
        SseBroadcaster {
            channels: RwLock::new(HashMap::new()),
        }
    }

    async fn get_or_create(&self, stream_id: &str) -> broadcast::Sender<SseFrame> {
        if let Some(tx) = self.channels.read().await.get(stream_id) {
            return tx.clone();
        }
        let mut channels = self.channels.write().await;
        channels
            .entry(stream_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    pub async fn subscribe(&self, stream_id: &str) -> broadcast::Receiver<SseFrame> {
        self.get_or_create(stream_id).await.subscribe()
    }

    /// Publish a frame to all currently connected clients. A `SendError`
    /// just means nobody is listening right now, which is normal and not
    /// logged as an error.
    pub async fn publish(&self, stream_id: &str, frame: SseFrame) {
        let tx = self.get_or_create(stream_id).await;
        let _ = tx.send(frame);
    }

    pub async fn publish_data(&self, stream_id: &str, payload: Vec<u8>, is_json: bool) {
        self.publish(stream_id, SseFrame::Data { payload, is_json }).await;
    }

    pub async fn publish_control(
        &self,
        stream_id: &str,
        next_offset: OffsetToken,
        stream_cursor: Option<OffsetToken>,
        up_to_date: Option<bool>,
        stream_closed: Option<bool>,
    ) {
        self.publish(
            stream_id,
            SseFrame::Control(SseControlFrame {
                stream_next_offset: next_offset.format(),
                stream_cursor: stream_cursor.map(|t| t.format()),
                up_to_date,
                stream_closed,
            }),
        )
        .await;
    }

    pub async fn forget(&self, stream_id: &str) {
        self.channels.write().await.remove(stream_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_frame_for_json_stream_emits_raw_text() {
        let frame = SseFrame::Data {
            payload: br#"{"a":1}"#.to_vec(),
            is_json: true,
        };
        assert_eq!(frame.render(), r#"{"a":1}"#);
    }

    #[test]
    fn data_frame_for_opaque_stream_is_base64_wrapped() {
        let frame = SseFrame::Data {
            payload: vec![0xff, 0x00, 0x10],
            is_json: false,
        };
        let rendered = frame.render();
        assert!(rendered.contains("\"encoding\":\"base64\""));
    }

    #[tokio::test]
    async fn subscribers_receive_published_frames() {
        let broadcaster = SseBroadcaster::new();
        let mut rx = broadcaster.subscribe("s1").await;
        broadcaster.publish_data("s1", b"hi".to_vec(), true).await;
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.render(), "hi");
    }
}
