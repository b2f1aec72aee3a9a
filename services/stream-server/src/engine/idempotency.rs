use super::types::ProducerState;
use stream_protocol::ProducerTriple as WireProducerTriple;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerTriple {
    pub producer_id: String,
    pub epoch: i64,
    pub seq: i64,
}

impl From<WireProducerTriple> for ProducerTriple {
    fn from(t: WireProducerTriple) -> Self {
        ProducerTriple {
            producer_id: t.producer_id,
            epoch: t.epoch,
            seq: t.seq,
        }
    }
}

/// Classification of a producer triple against stored producer state.
/// Not an HTTP status, the router maps this to one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Ok,
    Duplicate { next_offset: u64, last_seq: i64 },
    Gap { expected_seq: i64, received_seq: i64 },
    StaleEpoch { stored_epoch: i64 },
    MustStartAtZero,
}

pub fn classify(triple: &ProducerTriple, stored: Option<&ProducerState>) -> Decision {
    let Some(stored) = stored else {
        return if triple.seq == 0 {
            Decision::Ok
        } else {
            Decision::MustStartAtZero
        };
    };

    if triple.epoch < stored.epoch {
        return Decision::StaleEpoch {
            stored_epoch: stored.epoch,
        };
    }

    if triple.epoch > stored.epoch {
        return if triple.seq == 0 {
            Decision::Ok
        } else {
            Decision::MustStartAtZero
        };
    }

    // epoch == stored.epoch
    if triple.seq <= stored.last_seq {
        return Decision::Duplicate {
            next_offset: stored.last_offset,
            last_seq: stored.last_seq,
        };
    }
    if triple.seq == stored.last_seq + 1 {
        return Decision::Ok;
    }
    Decision::Gap {
        expected_seq: stored.last_seq + 1,
        received_seq: triple.seq,
    }
}

/// Producer state entries idle longer than this are forgotten lazily on
/// access, no explicit sweeper removes them in the background.
pub const PRODUCER_STATE_TTL_DAYS: i64 = 7;

pub fn is_expired(state: &ProducerState, now: chrono::DateTime<chrono::Utc>) -> bool {
    now.signed_duration_since(state.last_updated) > chrono::Duration::days(PRODUCER_STATE_TTL_DAYS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn state(epoch: i64, last_seq: i64, last_offset: u64) -> ProducerState {
        ProducerState {
            stream_id: "s1".into(),
            producer_id: "p1".into(),
            epoch,
            last_seq,
            last_offset,
            last_updated: Utc::now(),
        }
    }

    fn triple(epoch: i64, seq: i64) -> ProducerTriple {
        ProducerTriple {
            producer_id: "p1".into(),
            epoch,
            seq,
        }
    }

    #[test]
    fn new_producer_seq_zero_is_ok() {
        assert_eq!(classify(&triple(0, 0), None), Decision::Ok);
    }

    #[test]
    fn new_producer_nonzero_seq_must_start_at_zero() {
        assert_eq!(classify(&triple(0, 1), None), Decision::MustStartAtZero);
    }

    #[test]
    fn stale_epoch_is_rejected() {
        let stored = state(5, 10, 100);
        assert_eq!(
            classify(&triple(3, 0), Some(&stored)),
            Decision::StaleEpoch { stored_epoch: 5 }
        );
    }

    #[test]
    fn new_epoch_seq_zero_is_ok() {
        let stored = state(5, 10, 100);
        assert_eq!(classify(&triple(6, 0), Some(&stored)), Decision::Ok);
    }

    #[test]
    fn new_epoch_nonzero_seq_must_start_at_zero() {
        let stored = state(5, 10, 100);
        assert_eq!(
            classify(&triple(6, 3), Some(&stored)),
            Decision::MustStartAtZero
        );
    }

    #[test]
    fn same_epoch_seq_at_or_below_last_is_duplicate() {
        let stored = state(5, 10, 100);
        assert_eq!(
            classify(&triple(5, 10), Some(&stored)),
            Decision::Duplicate {
                next_offset: 100,
                last_seq: 10
            }
        );
        assert_eq!(
            classify(&triple(5, 3), Some(&stored)),
            Decision::Duplicate {
                next_offset: 100,
                last_seq: 10
            }
        );
    }

    #[test]
    fn same_epoch_next_seq_is_ok() {
        let stored = state(5, 10, 100);
        assert_eq!(classify(&triple(5, 11), Some(&stored)), Decision::Ok);
    }

    #[test]
    fn same_epoch_gap_seq_is_gap() {
        let stored = state(5, 10, 100);
        assert_eq!(
            classify(&triple(5, 13), Some(&stored)),
            Decision::Gap {
                expected_seq: 11,
                received_seq: 13
            }
        );
    }

    #[test]
    fn expiry_check_respects_seven_day_ttl() {
        let now = Utc::now();
        let fresh = state(0, 0, 0);
        assert!(!is_expired(&fresh, now));

        let mut stale = state(0, 0, 0);
        stale.last_updated = now - chrono::Duration::days(8);
        assert!(is_expired(&stale, now));
    }
}
