//! Timestamp comparison and the quality-as-timestamp encoding.
//!
//! File systems keep modification times at different precision (NTFS: 100ns,
//! ext4: 1ns, FAT: 2s, many network shares: 1s). Two copies of the same file
//! therefore rarely carry bit-identical timestamps once one of them crossed a
//! coarse file system.
//!
//! A copy that still contains unrepaired blocks is stamped with a date in
//! September 1975 that encodes its error count. Such a copy looks older than
//! any real copy, so a later pass replaces it as soon as a better source shows
//! up.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};

/// Maximum difference accepted when only one side kept sub-second precision.
pub const COARSE_TOLERANCE_SECS: i64 = 5;

// Errors are encoded as minutes subtracted from this instant; the day of month
// never drops below 1.
const LAST_CHANCE_YEAR: i32 = 1975;
const LAST_CHANCE_MONTH: u32 = 9;
const LAST_CHANCE_DAY: u32 = 24;
const MAX_ENCODED_ERRORS: u64 = (LAST_CHANCE_DAY as u64 - 1) * 24 * 60 + 24 * 60 - 1;

fn has_subsecond(t: &DateTime<Utc>) -> bool {
    t.nanosecond() != 0
}

/// Fuzzy equality of two modification times.
pub fn file_times_equal(a: &DateTime<Utc>, b: &DateTime<Utc>) -> bool {
    if has_subsecond(a) != has_subsecond(b) {
        let diff = (*a - *b).num_milliseconds().abs();
        diff < COARSE_TOLERANCE_SECS * 1000
    } else {
        a == b
    }
}

fn last_chance_base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(LAST_CHANCE_YEAR, LAST_CHANCE_MONTH, LAST_CHANCE_DAY, 23, 59, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn last_chance_floor() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(LAST_CHANCE_YEAR, LAST_CHANCE_MONTH, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Modification time for a copy that still has `error_count` unrepaired blocks.
pub fn last_chance_time(error_count: u64) -> DateTime<Utc> {
    let n = error_count.clamp(1, MAX_ENCODED_ERRORS);
    last_chance_base() - Duration::minutes(n as i64)
}

/// Whether `t` falls into the reserved range used by [`last_chance_time`].
pub fn is_last_chance(t: &DateTime<Utc>) -> bool {
    *t >= last_chance_floor() && *t <= last_chance_base()
}

/// Recover the error count from a last-chance stamp.
pub fn last_chance_errors(t: &DateTime<Utc>) -> Option<u64> {
    if !is_last_chance(t) {
        return None;
    }
    let minutes = (last_chance_base() - *t).num_minutes();
    Some(minutes.max(0) as u64)
}
