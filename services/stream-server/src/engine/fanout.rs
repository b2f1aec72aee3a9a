use std::time::Duration;

use stream_protocol::{Envelope, OffsetToken};
use tracing::warn;

use crate::repo::{subscriptions::SubscriberLink, Storage};

use super::actor::ActorRegistry;
use super::append::{self, AppendRequest};

/// Above this many subscribers, fan-out switches from delivering inline
/// (on the append request's own task) to a backgrounded, retried delivery
/// so a stream with many subscribers can't make every append slow.
pub const DEFAULT_SUBSCRIBER_THRESHOLD: usize = 50;

pub const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_CAP_SECS: u64 = 900;

/// `5 * 2^(attempt-1)` seconds, capped at 900s.
pub fn backoff_for_attempt(attempt: u32) -> Duration {
    let secs = 5u64.saturating_mul(1u64 << attempt.saturating_sub(1).min(63));
    Duration::from_secs(secs.min(BACKOFF_CAP_SECS))
}

/// Build the envelope fan-out writes into each subscriber's session stream.
///
/// Open question: a stream declared `application/json` whose body fails
/// to parse as JSON falls back to the base64 envelope rather than erroring
/// the whole fan-out, reproduced as-is rather than resolved, since
/// rejecting the append outright at fan-out time (after it already
/// committed to the source stream) isn't clearly better than delivering it
/// opaquely.
pub fn build_envelope(source_stream: &str, offset: OffsetToken, payload: &[u8], is_json: bool) -> Envelope {
    if is_json {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(payload) {
            return Envelope::json(source_stream, offset, value);
        }
    }
    Envelope::base64(source_stream, offset, payload)
}

pub struct FanoutReport {
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
}

/// Deliver `envelope` to every listed subscriber's session stream, each as
/// its own append guarded by that session stream's actor lock.
pub async fn deliver_once(
    storage: &Storage,
    actors: &ActorRegistry,
    subscribers: &[SubscriberLink],
    envelope: &Envelope,
) -> FanoutReport {
    let body = serde_json::to_vec(envelope).unwrap_or_default();
    let mut delivered = Vec::new();
    let mut failed = Vec::new();

    for sub in subscribers {
        let session_stream = format!("subscriptions/{}", sub.session_id);
        let _guard = actors.lock(&session_stream).await;
        let req = AppendRequest {
            body: &body,
            stream_seq: None,
            producer: None,
            close: false,
        };
        match append::append(storage, &session_stream, &req).await {
            Ok(_) => delivered.push(sub.session_id.clone()),
            Err(e) => {
                warn!(session_id = %sub.session_id, error = %e, "fan-out delivery failed");
                failed.push(sub.session_id.clone());
            }
        }
    }

    FanoutReport { delivered, failed }
}

/// Retry failed deliveries with exponential backoff up to `MAX_ATTEMPTS`,
/// used by the caller when subscriber count exceeds the inline threshold
/// and delivery has been handed off to a background task.
pub async fn deliver_with_retry(
    storage: &Storage,
    actors: &ActorRegistry,
    mut subscribers: Vec<SubscriberLink>,
    envelope: &Envelope,
) {
    for attempt in 1..=MAX_ATTEMPTS {
        let report = deliver_once(storage, actors, &subscribers, envelope).await;
        if report.failed.is_empty() {
            return;
        }
        if attempt == MAX_ATTEMPTS {
            warn!(
                remaining = report.failed.len(),
                "fan-out exhausted retries, giving up on remaining subscribers"
            );
            return;
        }
        subscribers.retain(|s| report.failed.contains(&s.session_id));
        tokio::time::sleep(backoff_for_attempt(attempt)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_each_attempt_until_the_cap() {
        assert_eq!(backoff_for_attempt(1), Duration::from_secs(5));
        assert_eq!(backoff_for_attempt(2), Duration::from_secs(10));
        assert_eq!(backoff_for_attempt(3), Duration::from_secs(20));
        assert_eq!(backoff_for_attempt(4), Duration::from_secs(40));
    }

    #[test]
    fn backoff_is_capped_at_900_seconds() {
        assert_eq!(backoff_for_attempt(20), Duration::from_secs(900));
    }

    #[test]
    fn build_envelope_falls_back_to_base64_on_invalid_json() {
        let env = build_envelope("src", OffsetToken::ZERO, b"not json", true);
        assert_eq!(env.encoding.as_deref(), Some("base64"));
    }

    #[test]
    fn build_envelope_keeps_valid_json_inline() {
        let env = build_envelope("src", OffsetToken::ZERO, br#"{"a":1}"#, true);
        assert_eq!(env.encoding, None);
    }
}
