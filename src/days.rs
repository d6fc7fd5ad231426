//! Calendar-day helpers shared by the synchronizer and the reconciler.
//!
//! Every date that reaches the schedule is reduced to a UTC calendar day
//! (`NaiveDate`) before it is compared or turned into a day key, so the
//! same stored instant always lands on the same `YYYY-MM-DD` key no matter
//! which timezone the caller runs in.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Format used for day keys inside week documents.
pub const DAY_KEY_FORMAT: &str = "%Y-%m-%d";

/// Number of days after Monday that a board week still covers (Saturday).
const WEEK_SPAN_DAYS: i64 = 5;

/// Day key (`YYYY-MM-DD`) for a calendar day.
pub fn day_key(day: NaiveDate) -> String {
    day.format(DAY_KEY_FORMAT).to_string()
}

/// Parse a `YYYY-MM-DD` day key.
pub fn parse_day_key(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DAY_KEY_FORMAT).ok()
}

/// UTC calendar day of an instant, whatever timezone it is expressed in.
pub fn utc_day<Tz: TimeZone>(instant: &DateTime<Tz>) -> NaiveDate {
    instant.with_timezone(&Utc).date_naive()
}

/// Every calendar day from `start` to `end`, both inclusive.
///
/// Returns an empty list when `start > end`.
pub fn expand_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    if start > end {
        return Vec::new();
    }
    start.iter_days().take_while(|day| *day <= end).collect()
}

/// Expand a range given as instants, normalizing both ends to UTC days first.
pub fn expand_instants<Tz: TimeZone>(start: &DateTime<Tz>, end: &DateTime<Tz>) -> Vec<NaiveDate> {
    expand_days(utc_day(start), utc_day(end))
}

/// Monday..Saturday bounds of the board week containing `day`.
pub fn week_bounds(day: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = day - Duration::days(i64::from(day.weekday().num_days_from_monday()));
    (monday, monday + Duration::days(WEEK_SPAN_DAYS))
}

/// Interpret a stored date field as a UTC calendar day.
///
/// Accepts `YYYY-MM-DD`, RFC 3339 timestamps, and timestamp objects of the
/// form `{"seconds": .., "nanoseconds": ..}` (also `_seconds`/`_nanoseconds`).
pub fn parse_day_value(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(raw) => {
            let raw = raw.trim();
            parse_day_key(raw).or_else(|| {
                DateTime::parse_from_rfc3339(raw)
                    .ok()
                    .map(|instant| utc_day(&instant))
            })
        }
        Value::Object(map) => {
            let seconds = map
                .get("seconds")
                .or_else(|| map.get("_seconds"))
                .and_then(Value::as_i64)?;
            let nanos = map
                .get("nanoseconds")
                .or_else(|| map.get("_nanoseconds"))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            let nanos = u32::try_from(nanos).ok()?;
            DateTime::<Utc>::from_timestamp(seconds, nanos).map(|instant| instant.date_naive())
        }
        _ => None,
    }
}

/// Serde helper: read an optional day leniently, mapping unusable values to `None`.
pub fn lenient_day<'de, D>(deserializer: D) -> std::result::Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(Value::Null) => None,
        Some(value) => {
            let parsed = parse_day_value(&value);
            if parsed.is_none() {
                tracing::debug!(value = %value, "unusable date value");
            }
            parsed
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use serde_json::json;

    fn day(raw: &str) -> NaiveDate {
        parse_day_key(raw).expect("valid day")
    }

    #[test]
    fn expands_inclusive_range() {
        let days = expand_days(day("2024-01-01"), day("2024-01-03"));
        let keys: Vec<String> = days.into_iter().map(day_key).collect();
        assert_eq!(keys, vec!["2024-01-01", "2024-01-02", "2024-01-03"]);
    }

    #[test]
    fn single_day_range_has_one_key() {
        let days = expand_days(day("2024-03-10"), day("2024-03-10"));
        assert_eq!(days, vec![day("2024-03-10")]);
    }

    #[test]
    fn inverted_range_is_empty() {
        assert!(expand_days(day("2024-03-11"), day("2024-03-10")).is_empty());
    }

    #[test]
    fn range_crosses_month_and_leap_day() {
        let days = expand_days(day("2024-02-28"), day("2024-03-01"));
        assert_eq!(days.len(), 3);
        assert_eq!(days[1], day("2024-02-29"));
    }

    #[test]
    fn single_day_is_stable_across_offsets() {
        let midnight = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        for hours in [-12, -3, 0, 5, 14] {
            let offset = FixedOffset::east_opt(hours * 3600).unwrap();
            let local = midnight.with_timezone(&offset);
            let days = expand_instants(&local, &local);
            assert_eq!(days, vec![day("2024-03-10")], "offset {hours}h");
        }
    }

    #[test]
    fn week_bounds_are_monday_to_saturday() {
        assert_eq!(
            week_bounds(day("2024-01-03")),
            (day("2024-01-01"), day("2024-01-06"))
        );
        assert_eq!(
            week_bounds(day("2024-01-01")),
            (day("2024-01-01"), day("2024-01-06"))
        );
        // Sunday belongs to the week that started six days earlier.
        assert_eq!(
            week_bounds(day("2024-01-07")),
            (day("2024-01-01"), day("2024-01-06"))
        );
    }

    #[test]
    fn parses_stored_date_shapes() {
        assert_eq!(parse_day_value(&json!("2024-01-05")), Some(day("2024-01-05")));
        assert_eq!(
            parse_day_value(&json!("2024-01-05T23:30:00-03:00")),
            Some(day("2024-01-06"))
        );
        assert_eq!(
            parse_day_value(&json!({"seconds": 1704067200, "nanoseconds": 0})),
            Some(day("2024-01-01"))
        );
        assert_eq!(
            parse_day_value(&json!({"_seconds": 1704067200})),
            Some(day("2024-01-01"))
        );
        assert_eq!(parse_day_value(&json!("not a date")), None);
        assert_eq!(parse_day_value(&json!(42)), None);
        assert_eq!(parse_day_value(&json!({"nanoseconds": 5})), None);
    }
}
