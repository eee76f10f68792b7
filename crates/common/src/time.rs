//! Wall-clock helpers. All persisted timestamps are epoch milliseconds.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local, Utc};

pub const MS_PER_SECOND: u64 = 1_000;
pub const MS_PER_HOUR: u64 = 3_600_000;
pub const MS_PER_DAY: u64 = 86_400_000;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Convert epoch millis to a local date-time, clamping out-of-range values to the epoch.
pub fn local_datetime(ms: u64) -> DateTime<Local> {
    let utc: DateTime<Utc> = DateTime::from_timestamp_millis(ms as i64).unwrap_or_default();
    utc.with_timezone(&Local)
}

/// Epoch millis for a local date-time; negative instants clamp to zero.
pub fn local_to_ms(dt: &DateTime<Local>) -> u64 {
    dt.timestamp_millis().max(0) as u64
}
