//! Decoding of the packed `DDDSS` day/slot codes used by the CER meter files.
//!
//! The last two digits are the 1-based half-hour slot of the day, the
//! remaining digits the 1-based day counted from the calendar base date.
//! Daylight-saving days carry slots 49 and 50; those roll into the next day
//! and collide with its first slots, which the normalizer resolves by keeping
//! the first timestamp seen.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

/// Split a datecode into `(day, slot)`.
pub fn split_datecode(datecode: u32) -> (u32, u32) {
    (datecode / 100, datecode % 100)
}

/// Convert a datecode into a calendar timestamp.
///
/// Day 1 slot 1 is midnight of `base`; each further slot adds `slot_minutes`.
pub fn decode_datecode(datecode: u32, base: NaiveDate, slot_minutes: i64) -> NaiveDateTime {
    let (day, slot) = split_datecode(datecode);
    let midnight = base.and_time(NaiveTime::MIN);

    midnight + Duration::days(day as i64 - 1) + Duration::minutes((slot as i64 - 1) * slot_minutes)
}
