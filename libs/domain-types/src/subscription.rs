//! Subscription derived state and the `adjust_date` offset grammar (§4.6).

use chrono::{Duration, NaiveDateTime};

const DATE_FORMAT: &str = "%Y-%m-%d-%H";
const MINUTE_FORMAT: &str = "%Y-%m-%d-%H-%M";

/// `expired ⇔ sub_end != "" ∧ sub_end < now`.
pub fn expired(sub_end: &str, now: NaiveDateTime) -> bool {
    if sub_end.is_empty() {
        return false;
    }
    match NaiveDateTime::parse_from_str(sub_end, DATE_FORMAT) {
        Ok(parsed) => parsed < now,
        // An unparsable stored date is treated as already expired so it
        // surfaces for operator correction rather than silently persisting.
        Err(_) => true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateOffset {
    pub negative: bool,
    pub days: i64,
    pub hours: i64,
}

impl DateOffset {
    pub fn to_duration(self) -> Duration {
        let magnitude = Duration::days(self.days) + Duration::hours(self.hours);
        if self.negative {
            -magnitude
        } else {
            magnitude
        }
    }
}

/// Parses the `adjust_date` offset grammar: `^([+-]?)(\d+)(?::(\d+))?$`,
/// meaning `days[:hours]` with an optional sign. `"0"` is handled specially
/// by the caller (it clears `sub_end` rather than producing an offset).
pub fn parse_adjust_offset(raw: &str) -> Option<DateOffset> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let (negative, rest) = match raw.as_bytes()[0] {
        b'+' => (false, &raw[1..]),
        b'-' => (true, &raw[1..]),
        _ => (false, raw),
    };

    let mut parts = rest.splitn(2, ':');
    let days: i64 = parts.next()?.parse().ok()?;
    let hours: i64 = match parts.next() {
        Some(h) => h.parse().ok()?,
        None => 0,
    };

    Some(DateOffset {
        negative,
        days,
        hours,
    })
}

/// Applies a non-zero offset against `base` (the current stored `sub_end`
/// if present, otherwise `now`) and formats the result at hour precision.
pub fn apply_offset(base: NaiveDateTime, offset: DateOffset) -> String {
    (base + offset.to_duration()).format(DATE_FORMAT).to_string()
}

pub fn format_now(now: NaiveDateTime) -> String {
    now.format(DATE_FORMAT).to_string()
}

/// Minute-truncated UTC timestamp (§3 User.last_seen, §4.3: a user freezing
/// into inactivity gets this, not the hour-precision `sub_end` format).
pub fn format_minute(now: NaiveDateTime) -> String {
    now.format(MINUTE_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_days() {
        let offset = parse_adjust_offset("30").unwrap();
        assert!(!offset.negative);
        assert_eq!(offset.days, 30);
        assert_eq!(offset.hours, 0);
    }

    #[test]
    fn parses_signed_days_and_hours() {
        let offset = parse_adjust_offset("-2:5").unwrap();
        assert!(offset.negative);
        assert_eq!(offset.days, 2);
        assert_eq!(offset.hours, 5);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_adjust_offset("abc").is_none());
        assert!(parse_adjust_offset("").is_none());
    }

    #[test]
    fn expired_treats_empty_as_unlimited() {
        let now = NaiveDateTime::parse_from_str("2024-01-01-00", DATE_FORMAT).unwrap();
        assert!(!expired("", now));
    }

    #[test]
    fn format_minute_keeps_distinct_stamps_within_the_same_hour() {
        let five_past = NaiveDateTime::parse_from_str("2024-01-01 00:05:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let fifty_past = NaiveDateTime::parse_from_str("2024-01-01 00:50:00", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_ne!(format_minute(five_past), format_minute(fifty_past));
        assert_eq!(format_minute(five_past), "2024-01-01-00-05");
    }
}
