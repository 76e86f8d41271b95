use chrono::{DateTime, Utc};

use crate::services::types::SECONDS_PER_DAY;

/// Current wall-clock time as unix seconds.
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// Daily timestamps from `start` to `end`, both inclusive, one day apart.
///
/// Empty when `start > end`.
pub fn daily_timestamps(start: i64, end: i64) -> Vec<i64> {
    if start > end {
        return Vec::new();
    }
    let count = ((end - start) / SECONDS_PER_DAY + 1) as usize;
    (0..count)
        .map(|day| start + day as i64 * SECONDS_PER_DAY)
        .collect()
}

/// RFC 3339 form of a unix timestamp, as expected by upstream APIs.
pub fn unix_to_rfc3339(timestamp: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
}
