//! Time-ordered event identifiers.
//!
//! Event ids are ULIDs: a 48-bit millisecond timestamp followed by 80 random
//! bits, rendered as 26 Crockford base32 characters. The timestamp is the
//! event's own time, not the ingestion time, so ids sort close to
//! event-time order across independent processes. Within one generator,
//! ids that share a millisecond are issued by incrementing the previous id,
//! keeping them strictly increasing.

use std::sync::Mutex;
use std::time::{Duration, UNIX_EPOCH};

use ulid::Ulid;

/// Issues event ids. One instance is shared by all ingestion paths.
#[derive(Debug, Default)]
pub struct EventIdGenerator {
    last: Mutex<Option<Ulid>>,
}

impl EventIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates an id embedding `event_time_secs`. Negative times clamp to
    /// the epoch.
    pub fn generate(&self, event_time_secs: i64) -> String {
        let ms = u64::try_from(event_time_secs)
            .unwrap_or(0)
            .saturating_mul(1_000);
        self.generate_at_millis(ms).to_string()
    }

    fn generate_at_millis(&self, ms: u64) -> Ulid {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let next = match *last {
            Some(prev) if prev.timestamp_ms() == ms => {
                prev.increment().unwrap_or_else(|| fresh(ms))
            }
            _ => fresh(ms),
        };
        *last = Some(next);
        next
    }
}

fn fresh(ms: u64) -> Ulid {
    Ulid::from_datetime(UNIX_EPOCH + Duration::from_millis(ms))
}

/// Extracts the embedded timestamp, in milliseconds, from an event id.
pub fn timestamp_ms(event_id: &str) -> Option<u64> {
    Ulid::from_string(event_id).ok().map(|id| id.timestamp_ms())
}
