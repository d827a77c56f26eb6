//! FILETIME conversion.
//!
//! Journal records carry Windows FILETIME timestamps: 100-nanosecond ticks
//! since 1601-01-01 UTC.

use chrono::{DateTime, Utc};
use log::warn;

/// Ticks between the Windows epoch (1601-01-01) and the Unix epoch (1970-01-01).
pub const FILETIME_UNIX_EPOCH: i64 = 116_444_736_000_000_000;

const TICKS_PER_SECOND: i64 = 10_000_000;
const NANOS_PER_TICK: i64 = 100;

/// Converts a Windows FILETIME value to a timezone-aware UTC timestamp.
pub fn filetime_to_datetime(filetime: i64) -> DateTime<Utc> {
    let unix_ticks = filetime - FILETIME_UNIX_EPOCH;
    let secs = unix_ticks.div_euclid(TICKS_PER_SECOND);
    let nanos = unix_ticks.rem_euclid(TICKS_PER_SECOND) * NANOS_PER_TICK;

    match DateTime::<Utc>::from_timestamp(secs, nanos as u32) {
        Some(datetime) => datetime,
        None => {
            warn!("FILETIME {filetime} is outside the representable range");
            DateTime::<Utc>::UNIX_EPOCH
        }
    }
}

/// Converts a UTC timestamp back to a Windows FILETIME value.
///
/// Sub-100ns precision is truncated; round-tripping a timestamp through
/// [`filetime_to_datetime`] is accurate to one tick.
pub fn datetime_to_filetime(datetime: DateTime<Utc>) -> i64 {
    let secs = datetime.timestamp();
    let subsec_ticks = i64::from(datetime.timestamp_subsec_nanos()) / NANOS_PER_TICK;
    secs * TICKS_PER_SECOND + subsec_ticks + FILETIME_UNIX_EPOCH
}
