//! Durable per-job status record and its wire form.
//!
//! The record is stored as exactly 24 bytes: three big-endian `i64` epoch
//! millisecond values in the order completion, start, scheduled. `0` encodes
//! an absent timestamp. The field order must not change; existing records in
//! the coordination store depend on it.

use chrono::{DateTime, Utc};
use tracing::warn;

/// Size of one encoded timestamp.
const FIELD_LEN: usize = 8;
/// Size of a fully encoded record.
pub const ENCODED_LEN: usize = 3 * FIELD_LEN;

/// Timings of a job's most recently completed leadership cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusRecord {
    /// When the last run was scheduled to start.
    pub last_scheduled_time: Option<DateTime<Utc>>,
    /// When the last run actually started.
    pub last_actual_start_time: Option<DateTime<Utc>>,
    /// When the last run actually finished (or was cancelled).
    pub last_actual_completion_time: Option<DateTime<Utc>>,
}

impl StatusRecord {
    /// Whether the job has never completed a cycle.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn encode(&self) -> [u8; ENCODED_LEN] {
        let mut out = [0u8; ENCODED_LEN];
        let fields = [
            self.last_actual_completion_time,
            self.last_actual_start_time,
            self.last_scheduled_time,
        ];
        for (chunk, field) in out.chunks_exact_mut(FIELD_LEN).zip(fields) {
            chunk.copy_from_slice(&to_millis(field).to_be_bytes());
        }
        out
    }

    /// Decode a stored record. Never fails: fields missing from a short
    /// buffer decode as absent, and any bytes past the third field are
    /// ignored.
    pub fn decode(bytes: &[u8]) -> Self {
        if !bytes.is_empty() && bytes.len() < ENCODED_LEN {
            warn!(len = bytes.len(), "could not read status fully; missing fields treated as absent");
        }

        let mut fields = bytes
            .chunks_exact(FIELD_LEN)
            .map(|chunk| {
                let mut raw = [0u8; FIELD_LEN];
                raw.copy_from_slice(chunk);
                from_millis(i64::from_be_bytes(raw))
            });

        let last_actual_completion_time = fields.next().flatten();
        let last_actual_start_time = fields.next().flatten();
        let last_scheduled_time = fields.next().flatten();

        Self {
            last_scheduled_time,
            last_actual_start_time,
            last_actual_completion_time,
        }
    }
}

fn to_millis(time: Option<DateTime<Utc>>) -> i64 {
    time.map_or(0, |t| t.timestamp_millis())
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    if ms == 0 {
        return None;
    }
    DateTime::from_timestamp_millis(ms)
}
